//! TLS 1.3 `CertificateVerify` message.
//!
//! Built directly on [`crate::crypto::signature`]'s `SigningKey`/
//! `VerifyingKey` facade and `certificate_verify_content`, which already
//! assembles the `0x20 * 64 || context || 0x00 || transcript-hash`
//! content this message signs.

use crate::crypto::hash::TranscriptHash;
use crate::crypto::signature::{certificate_verify_content, SigningKey, VerifyingKey};
use crate::error::Error;
use crate::key_schedule::KeySchedule;
use crate::stuffer::Stuffer;
use crate::{AlertDescription, SignatureScheme};

use super::{HandshakeType, TranscriptWriter};

fn map_scheme(scheme: SignatureScheme) -> Option<crate::crypto::signature::SignatureScheme> {
    match scheme {
        SignatureScheme::RsaPssRsaeSha256 | SignatureScheme::RsaPkcs1Sha256 => {
            Some(crate::crypto::signature::SignatureScheme::RsaPkcs1Sha256)
        }
        SignatureScheme::EcdsaSecp256r1Sha256 => {
            Some(crate::crypto::signature::SignatureScheme::EcdsaSecp256r1Sha256)
        }
        _ => None,
    }
}

/// Sign the running transcript hash with `signing_key` and serialize a
/// `CertificateVerify` message.
///
/// # References
///
/// * [RFC 8446 Section 4.4.3](https://datatracker.ietf.org/doc/html/rfc8446#section-4.4.3)
pub fn ser(
    stuffer: &mut Stuffer,
    key_schedule: &mut KeySchedule,
    is_server: bool,
    signing_key: &SigningKey,
) -> Result<usize, Error> {
    let transcript: TranscriptHash = key_schedule.transcript_hash();
    let content = certificate_verify_content(is_server, &transcript.finalize_clone());
    let signature = signing_key.sign(&content)?;

    let iana: u16 = match signing_key.scheme() {
        // the facade's Rsa variant signs PKCS#1 v1.5, not RSA-PSS, so the
        // wire scheme advertised here must match that, not `rsa_pss_rsae_*`
        crate::crypto::signature::SignatureScheme::RsaPkcs1Sha256 => SignatureScheme::RsaPkcs1Sha256 as u16,
        crate::crypto::signature::SignatureScheme::EcdsaSecp256r1Sha256 => {
            SignatureScheme::EcdsaSecp256r1Sha256 as u16
        }
    };

    let mut body = Vec::new();
    body.extend_from_slice(&iana.to_be_bytes());
    body.extend_from_slice(&(signature.len() as u16).to_be_bytes());
    body.extend_from_slice(&signature);

    let mut writer = TranscriptWriter { stuffer, key_schedule };
    writer.write_u8(HandshakeType::CertificateVerify as u8)?;
    writer.write_u24(body.len() as u32)?;
    writer.write_bytes(&body)?;
    Ok(4 + body.len())
}

/// Verify a received `CertificateVerify` message body against the
/// transcript hash taken before this message was appended to it.
pub fn verify(
    body: &[u8],
    is_server: bool,
    transcript_hash_before: &[u8],
    verifying_key: &VerifyingKey,
) -> Result<(), AlertDescription> {
    let mut stuffer = Stuffer::growable();
    stuffer.write_bytes(body).map_err(|_| AlertDescription::InternalError)?;

    let scheme_raw = stuffer.read_u16().map_err(|_| AlertDescription::DecodeError)?;
    let scheme: SignatureScheme = scheme_raw.try_into().map_err(|_| AlertDescription::HandshakeFailure)?;
    if map_scheme(scheme).is_none() {
        return Err(AlertDescription::HandshakeFailure);
    }

    let sig_len = stuffer.read_u16().map_err(|_| AlertDescription::DecodeError)?;
    let mut signature = vec![0u8; usize::from(sig_len)];
    stuffer.read_bytes(&mut signature).map_err(|_| AlertDescription::DecodeError)?;

    let content = certificate_verify_content(is_server, transcript_hash_before);
    verifying_key
        .verify(&content, &signature)
        .map_err(|_| AlertDescription::DecryptError)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::HashAlg;
    use p256::ecdsa::SigningKey as EcdsaSigningKey;
    use rand_core::OsRng;

    #[test]
    fn ecdsa_round_trips() {
        let ecdsa_signing = EcdsaSigningKey::random(&mut OsRng);
        let verifying = p256::ecdsa::VerifyingKey::from(&ecdsa_signing);
        let signing_key = SigningKey::from_ecdsa(ecdsa_signing);
        let verifying_key = VerifyingKey::Ecdsa(verifying);

        let mut stuffer = Stuffer::growable();
        let mut ks = KeySchedule::new(HashAlg::Sha256);
        ks.update_transcript_hash(b"client hello bytes");

        ser(&mut stuffer, &mut ks, true, &signing_key).unwrap();

        let mut header = [0u8; 4];
        stuffer.read_bytes(&mut header).unwrap();
        let body_len = u32::from_be_bytes(header) & 0x00FF_FFFF;
        let mut body = vec![0u8; body_len as usize];
        stuffer.read_bytes(&mut body).unwrap();

        let transcript_before = crate::crypto::hash::digest(HashAlg::Sha256, b"client hello bytes");
        verify(&body, true, &transcript_before, &verifying_key).unwrap();
    }
}
