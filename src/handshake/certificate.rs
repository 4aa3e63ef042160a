//! TLS 1.3 `Certificate` message.
//!
//! Grounded on the certificate-chain handling sketched in
//! `s2n_certificate.c` (leaf-first DER chain, each entry length prefixed)
//! and written in this crate's stuffer-based style.

use crate::error::Error;
use crate::key_schedule::KeySchedule;
use crate::stuffer::Stuffer;
use crate::AlertDescription;

use super::{HandshakeType, TranscriptWriter};

/// Serialize and transcript-hash a `Certificate` message for a chain of
/// leaf-first DER certificates. `context` is the (normally empty, except
/// for post-handshake client auth) `certificate_request_context` this
/// message is answering.
///
/// # References
///
/// * [RFC 8446 Section 4.4.2](https://datatracker.ietf.org/doc/html/rfc8446#section-4.4.2)
pub fn ser(
    stuffer: &mut Stuffer,
    key_schedule: &mut KeySchedule,
    context: &[u8],
    chain: &[Vec<u8>],
) -> Result<usize, Error> {
    let mut body = Vec::new();
    body.push(context.len() as u8);
    body.extend_from_slice(context);

    let mut entries = Vec::new();
    for cert in chain {
        entries.extend_from_slice(&(cert.len() as u32).to_be_bytes()[1..]); // uint24 length
        entries.extend_from_slice(cert);
        entries.extend_from_slice(&[0, 0]); // no per-certificate extensions
    }
    body.extend_from_slice(&(entries.len() as u32).to_be_bytes()[1..]);
    body.extend_from_slice(&entries);

    let mut writer = TranscriptWriter { stuffer, key_schedule };
    writer.write_u8(HandshakeType::Certificate as u8)?;
    writer.write_u24(body.len() as u32)?;
    writer.write_bytes(&body)?;
    Ok(4 + body.len())
}

/// Parse a `Certificate` message body (everything after the 4-byte
/// handshake header) into its leaf-first DER chain, discarding any
/// per-certificate extensions.
pub fn parse(body: &[u8]) -> Result<Vec<Vec<u8>>, AlertDescription> {
    let mut stuffer = Stuffer::growable();
    stuffer.write_bytes(body).map_err(|_| AlertDescription::InternalError)?;

    let context_len = stuffer.read_u8().map_err(|_| AlertDescription::DecodeError)?;
    stuffer.skip_read(usize::from(context_len)).map_err(|_| AlertDescription::DecodeError)?;

    let entries_len = stuffer.read_u24().map_err(|_| AlertDescription::DecodeError)?;
    let entries_end = stuffer.read_cursor() + entries_len as usize;
    if entries_end > body.len() {
        return Err(AlertDescription::DecodeError);
    }

    let mut chain = Vec::new();
    while stuffer.read_cursor() < entries_end {
        let cert_len = stuffer.read_u24().map_err(|_| AlertDescription::DecodeError)?;
        let mut cert = vec![0u8; cert_len as usize];
        stuffer.read_bytes(&mut cert).map_err(|_| AlertDescription::DecodeError)?;
        let ext_len = stuffer.read_u16().map_err(|_| AlertDescription::DecodeError)?;
        stuffer.skip_read(usize::from(ext_len)).map_err(|_| AlertDescription::DecodeError)?;
        chain.push(cert);
    }

    if chain.is_empty() {
        return Err(AlertDescription::CertificateRequired);
    }

    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::HashAlg;

    #[test]
    fn round_trips_a_two_certificate_chain() {
        let mut stuffer = Stuffer::growable();
        let mut ks = KeySchedule::new(HashAlg::Sha256);
        let chain = vec![vec![0xAAu8; 10], vec![0xBBu8; 20]];

        ser(&mut stuffer, &mut ks, &[], &chain).unwrap();

        // strip the 4-byte handshake header before parsing the body
        let mut header = [0u8; 4];
        stuffer.read_bytes(&mut header).unwrap();
        let body_len = u32::from_be_bytes(header) & 0x00FF_FFFF;
        let mut body = vec![0u8; body_len as usize];
        stuffer.read_bytes(&mut body).unwrap();

        let parsed = parse(&body).unwrap();
        assert_eq!(parsed, chain);
    }

    #[test]
    fn empty_chain_is_rejected() {
        let body = [0u8, 0, 0, 0]; // empty context, empty entries
        assert!(matches!(parse(&body), Err(AlertDescription::CertificateRequired)));
    }
}
