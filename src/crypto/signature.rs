//! Asymmetric signing/verification façade.
//!
//! Grounded on `TrustEdge-Labs/trustedge`'s manifest, which pairs `rsa`
//! (PKCS#1 v1.5) and `p256` (ECDSA) for the same purpose.

use p256::ecdsa::{
    signature::{Signer, Verifier},
    Signature as EcdsaSignature, SigningKey as EcdsaSigningKey, VerifyingKey as EcdsaVerifyingKey,
};
use rsa::{
    pkcs1v15::{Signature as RsaSignature, SigningKey as RsaSigningKey, VerifyingKey as RsaVerifyingKey},
    signature::{SignatureEncoding, Signer as RsaSigner, Verifier as RsaVerifier},
    sha2::Sha256,
    Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey,
};

use crate::error::Error;

/// The IANA `SignatureScheme` values this crate can produce/verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    RsaPkcs1Sha256,
    EcdsaSecp256r1Sha256,
}

impl SignatureScheme {
    pub const fn iana(self) -> u16 {
        match self {
            SignatureScheme::RsaPkcs1Sha256 => 0x0401,
            SignatureScheme::EcdsaSecp256r1Sha256 => 0x0403,
        }
    }
}

#[derive(Clone)]
pub enum SigningKey {
    // Stored as the raw key rather than a `pkcs1v15::SigningKey<Sha256>`:
    // `TLS_RSA_WITH_*` suites need the server to RSA-decrypt a
    // ClientKeyExchange pre-master-secret, which only the raw key can do.
    // The signer is built on demand in `sign()`.
    Rsa(RsaPrivateKey),
    Ecdsa(EcdsaSigningKey),
}

impl SigningKey {
    pub fn from_rsa(key: RsaPrivateKey) -> Self {
        SigningKey::Rsa(key)
    }

    pub fn from_ecdsa(key: EcdsaSigningKey) -> Self {
        SigningKey::Ecdsa(key)
    }

    pub fn scheme(&self) -> SignatureScheme {
        match self {
            SigningKey::Rsa(_) => SignatureScheme::RsaPkcs1Sha256,
            SigningKey::Ecdsa(_) => SignatureScheme::EcdsaSecp256r1Sha256,
        }
    }

    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, Error> {
        match self {
            SigningKey::Rsa(key) => {
                let signer = RsaSigningKey::<Sha256>::new(key.clone());
                let sig: RsaSignature = signer.try_sign(message).map_err(|_| Error::Sign)?;
                Ok(sig.to_bytes().to_vec())
            }
            SigningKey::Ecdsa(key) => {
                let sig: EcdsaSignature = key.try_sign(message).map_err(|_| Error::Sign)?;
                Ok(sig.to_der().as_bytes().to_vec())
            }
        }
    }

    /// Decrypt an RSA-PKCS#1v1.5-encrypted `ClientKeyExchange`
    /// pre-master-secret. Only meaningful for `SigningKey::Rsa`; an ECDSA
    /// key never takes this path since `TLS_ECDHE_*`/`TLS_AES_*` suites
    /// never encrypt a pre-master-secret to the certificate's key.
    pub fn decrypt_pkcs1v15(&self, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        match self {
            SigningKey::Rsa(key) => key.decrypt(Pkcs1v15Encrypt, ciphertext).map_err(|_| Error::Decrypt),
            SigningKey::Ecdsa(_) => Err(Error::Decrypt),
        }
    }
}

pub enum VerifyingKey {
    Rsa(RsaPublicKey),
    Ecdsa(EcdsaVerifyingKey),
}

impl VerifyingKey {
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), Error> {
        match self {
            VerifyingKey::Rsa(key) => {
                let vk = RsaVerifyingKey::<Sha256>::new(key.clone());
                let sig = RsaSignature::try_from(signature).map_err(|_| Error::VerifySignature)?;
                vk.verify(message, &sig)
                    .map_err(|_| Error::VerifySignature)
            }
            VerifyingKey::Ecdsa(key) => {
                let sig =
                    EcdsaSignature::from_der(signature).map_err(|_| Error::VerifySignature)?;
                key.verify(message, &sig)
                    .map_err(|_| Error::VerifySignature)
            }
        }
    }
}

/// Build the TLS 1.3 CertificateVerify signature input:
/// `(0x20 * 64) || context_string || 0x00 || transcript_hash`.
pub fn certificate_verify_content(is_server: bool, transcript_hash: &[u8]) -> Vec<u8> {
    let context = if is_server {
        b"TLS 1.3, server CertificateVerify".as_slice()
    } else {
        b"TLS 1.3, client CertificateVerify".as_slice()
    };
    let mut content = vec![0x20u8; 64];
    content.extend_from_slice(context);
    content.push(0x00);
    content.extend_from_slice(transcript_hash);
    content
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn certificate_verify_content_layout() {
        let content = certificate_verify_content(true, &[0xAAu8; 32]);
        assert_eq!(&content[..64], &[0x20u8; 64][..]);
        assert!(content.len() > 64 + 32);
        assert_eq!(&content[content.len() - 32..], &[0xAAu8; 32][..]);
    }
}
