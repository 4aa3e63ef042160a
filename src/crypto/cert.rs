//! Minimal DER walker for pulling a leaf certificate's public key out of
//! an X.509 `Certificate` without a full ASN.1/X.509 parser.
//!
//! Grounded on the certificate handling sketched in `s2n_certificate.c`,
//! which also only ever needs to reach into a DER blob far enough to pull
//! out the public key and a handful of fields, re-expressed here as a
//! small TLV walker feeding `rsa`'s and `p256`'s own `DecodePublicKey`
//! constructors instead of hand-rolled RSA/EC-point parsing.

use p256::pkcs8::DecodePublicKey as _;
use rsa::pkcs8::DecodePublicKey as _;

use crate::crypto::signature::VerifyingKey;
use crate::error::Error;

const TAG_INTEGER: u8 = 0x02;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_CONTEXT_0: u8 = 0xA0;

/// Split `buf` into the next TLV's tag, content, and the bytes following
/// it.
fn read_tlv(buf: &[u8]) -> Result<(u8, &[u8], &[u8]), Error> {
    let tag = *buf.first().ok_or(Error::DecodeCertificate("truncated DER tag".into()))?;
    let (len, len_bytes) = read_len(&buf[1..])?;
    let content_start = 1 + len_bytes;
    let content_end = content_start
        .checked_add(len)
        .ok_or(Error::DecodeCertificate("DER length overflow".into()))?;
    if content_end > buf.len() {
        return Err(Error::DecodeCertificate("DER length exceeds buffer".into()));
    }
    Ok((tag, &buf[content_start..content_end], &buf[content_end..]))
}

/// BER/DER length octets: short form (`0..=0x7F`) or long form
/// (`0x80 | n_bytes` followed by `n_bytes` big-endian length bytes).
fn read_len(buf: &[u8]) -> Result<(usize, usize), Error> {
    let first = *buf.first().ok_or(Error::DecodeCertificate("truncated DER length".into()))?;
    if first & 0x80 == 0 {
        return Ok((usize::from(first), 1));
    }
    let n_bytes = usize::from(first & 0x7F);
    if n_bytes == 0 || n_bytes > 4 {
        return Err(Error::DecodeCertificate("unsupported DER length form".into()));
    }
    let bytes = buf
        .get(1..1 + n_bytes)
        .ok_or(Error::DecodeCertificate("truncated DER length octets".into()))?;
    let mut len = 0usize;
    for b in bytes {
        len = (len << 8) | usize::from(*b);
    }
    Ok((len, 1 + n_bytes))
}

/// Walk an X.509 `Certificate` DER blob down to its
/// `subjectPublicKeyInfo`, returning the raw SPKI TLV bytes (including
/// its own SEQUENCE tag and length) ready to hand to a `DecodePublicKey`
/// constructor.
///
/// ```text
/// Certificate ::= SEQUENCE {
///     tbsCertificate       TBSCertificate,
///     signatureAlgorithm   AlgorithmIdentifier,
///     signatureValue       BIT STRING
/// }
/// TBSCertificate ::= SEQUENCE {
///     version         [0] EXPLICIT Version DEFAULT v1,
///     serialNumber        CertificateSerialNumber,
///     signature           AlgorithmIdentifier,
///     issuer              Name,
///     validity            Validity,
///     subject             Name,
///     subjectPublicKeyInfo SubjectPublicKeyInfo,
///     ...
/// }
/// ```
pub fn extract_spki(cert_der: &[u8]) -> Result<Vec<u8>, Error> {
    let (tag, cert_content, _) = read_tlv(cert_der)?;
    if tag != TAG_SEQUENCE {
        return Err(Error::DecodeCertificate("Certificate is not a SEQUENCE".into()));
    }

    let (tag, mut tbs, _) = read_tlv(cert_content)?;
    if tag != TAG_SEQUENCE {
        return Err(Error::DecodeCertificate("TBSCertificate is not a SEQUENCE".into()));
    }

    // version [0], optional
    if tbs.first() == Some(&TAG_CONTEXT_0) {
        let (_, _, rest) = read_tlv(tbs)?;
        tbs = rest;
    }

    // serialNumber
    let (tag, _, rest) = read_tlv(tbs)?;
    if tag != TAG_INTEGER {
        return Err(Error::DecodeCertificate("serialNumber is not an INTEGER".into()));
    }
    tbs = rest;

    // signature AlgorithmIdentifier, issuer, validity, subject: four more
    // SEQUENCEs to skip in order before subjectPublicKeyInfo.
    for field in ["signature", "issuer", "validity", "subject"] {
        let (tag, _, rest) = read_tlv(tbs)?;
        if tag != TAG_SEQUENCE {
            return Err(Error::DecodeCertificate(format!("{field} is not a SEQUENCE")));
        }
        tbs = rest;
    }

    let spki_start = tbs;
    let (tag, content, _) = read_tlv(spki_start)?;
    if tag != TAG_SEQUENCE {
        return Err(Error::DecodeCertificate(
            "subjectPublicKeyInfo is not a SEQUENCE".into(),
        ));
    }
    // return the whole TLV, tag and length included
    let total_len = content.as_ptr() as usize + content.len() - spki_start.as_ptr() as usize;
    Ok(spki_start[..total_len].to_vec())
}

/// Extract and decode the leaf certificate's public key, trying RSA then
/// ECDSA/secp256r1 (the only two signature algorithms this crate
/// verifies; see [`crate::crypto::signature`]).
pub fn leaf_verifying_key(cert_der: &[u8]) -> Result<VerifyingKey, Error> {
    let spki = extract_spki(cert_der)?;

    if let Ok(key) = rsa::RsaPublicKey::from_public_key_der(&spki) {
        return Ok(VerifyingKey::Rsa(key));
    }
    if let Ok(key) = p256::ecdsa::VerifyingKey::from_public_key_der(&spki) {
        return Ok(VerifyingKey::Ecdsa(key));
    }
    Err(Error::DecodeCertificate(
        "subjectPublicKeyInfo is neither a supported RSA nor ECDSA key".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn der_tlv(tag: u8, content: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        if content.len() < 0x80 {
            out.push(content.len() as u8);
        } else {
            let len_bytes = (content.len() as u32).to_be_bytes();
            let first_nonzero = len_bytes.iter().position(|b| *b != 0).unwrap_or(3);
            let trimmed = &len_bytes[first_nonzero..];
            out.push(0x80 | trimmed.len() as u8);
            out.extend_from_slice(trimmed);
        }
        out.extend_from_slice(content);
        out
    }

    fn build_fake_certificate(spki: &[u8]) -> Vec<u8> {
        let serial = der_tlv(TAG_INTEGER, &[0x01]);
        let algorithm = der_tlv(TAG_SEQUENCE, &[]);
        let name = der_tlv(TAG_SEQUENCE, &[]);
        let validity = der_tlv(TAG_SEQUENCE, &[]);

        let mut tbs_content = Vec::new();
        tbs_content.extend_from_slice(&serial);
        tbs_content.extend_from_slice(&algorithm);
        tbs_content.extend_from_slice(&name);
        tbs_content.extend_from_slice(&validity);
        tbs_content.extend_from_slice(&name);
        tbs_content.extend_from_slice(spki);
        let tbs = der_tlv(TAG_SEQUENCE, &tbs_content);

        let signature_algorithm = der_tlv(TAG_SEQUENCE, &[]);
        let signature_value = der_tlv(0x03, &[0x00]);

        let mut cert_content = Vec::new();
        cert_content.extend_from_slice(&tbs);
        cert_content.extend_from_slice(&signature_algorithm);
        cert_content.extend_from_slice(&signature_value);
        der_tlv(TAG_SEQUENCE, &cert_content)
    }

    #[test]
    fn extract_spki_recovers_the_exact_bytes() {
        let spki = der_tlv(TAG_SEQUENCE, b"pretend-spki-contents");
        let cert = build_fake_certificate(&spki);
        let extracted = extract_spki(&cert).unwrap();
        assert_eq!(extracted, spki);
    }

    #[test]
    fn truncated_der_is_rejected() {
        assert!(extract_spki(&[TAG_SEQUENCE]).is_err());
    }

    #[test]
    fn leaf_verifying_key_rejects_garbage_spki() {
        let spki = der_tlv(TAG_SEQUENCE, b"not-a-real-public-key");
        let cert = build_fake_certificate(&spki);
        assert!(leaf_verifying_key(&cert).is_err());
    }
}
