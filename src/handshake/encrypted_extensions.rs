//! `EncryptedExtensions` parsing.
//!
//! Reads through [`Stuffer`] rather than a ring buffer, and surfaces the
//! negotiated ALPN protocol alongside the rest of the per-extension
//! dispatch.

use core::cmp::min;

use crate::error::Error;
use crate::key_schedule::KeySchedule;
use crate::stuffer::Stuffer;
use crate::{AlertDescription, ExtensionType};

use super::{HandshakeType, TranscriptWriter};

#[derive(Debug, Default)]
pub(crate) struct EncryptedExtensionsResult {
    pub alpn: Option<Vec<u8>>,
}

/// Serialize and transcript-hash an `EncryptedExtensions` message. `alpn`
/// is the single negotiated protocol, if ALPN was offered and a protocol
/// in common was found.
///
/// # References
///
/// * [RFC 8446 Section 4.3.1](https://datatracker.ietf.org/doc/html/rfc8446#section-4.3.1)
pub(crate) fn ser(
    stuffer: &mut Stuffer,
    key_schedule: &mut KeySchedule,
    alpn: Option<&[u8]>,
) -> Result<usize, Error> {
    let mut extensions = Vec::new();
    if let Some(proto) = alpn {
        let mut list = Vec::new();
        list.push(proto.len() as u8);
        list.extend_from_slice(proto);

        extensions.extend_from_slice(
            &u16::from(ExtensionType::ApplicationLayerProtocolNegotiation).to_be_bytes(),
        );
        extensions.extend_from_slice(&((2 + list.len()) as u16).to_be_bytes());
        extensions.extend_from_slice(&(list.len() as u16).to_be_bytes());
        extensions.extend_from_slice(&list);
    }

    let mut body = Vec::with_capacity(2 + extensions.len());
    body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
    body.extend_from_slice(&extensions);

    let mut writer = TranscriptWriter { stuffer, key_schedule };
    writer.write_u8(HandshakeType::EncryptedExtensions as u8)?;
    writer.write_u24(body.len() as u32)?;
    writer.write_bytes(&body)?;
    Ok(4 + body.len())
}

/// # References
///
/// * [RFC 8446 Section 4.3.1](https://datatracker.ietf.org/doc/html/rfc8446#section-4.3.1)
///
/// ```text
/// struct {
///     Extension extensions<0..2^16-1>;
/// } EncryptedExtensions;
/// ```
pub(crate) fn recv_encrypted_extensions(body: &[u8]) -> Result<EncryptedExtensionsResult, AlertDescription> {
    let mut stuffer = Stuffer::growable();
    stuffer.write_bytes(body).map_err(|_| AlertDescription::InternalError)?;

    let extensions_len = stuffer.read_u16().map_err(|_| AlertDescription::DecodeError)?;
    let extensions_end = stuffer.read_cursor() + usize::from(extensions_len);
    if extensions_end > body.len() {
        error!("EncryptedExtensions extensions len exceeds message len");
        return Err(AlertDescription::DecodeError);
    }

    let mut result = EncryptedExtensionsResult::default();

    while stuffer.read_cursor() < extensions_end {
        let extension_type: ExtensionType = stuffer
            .read_u16()
            .map_err(|_| AlertDescription::DecodeError)
            .and_then(|v| ExtensionType::try_from(v).map_err(|_| AlertDescription::IllegalParameter))?;
        let extension_len = stuffer.read_u16().map_err(|_| AlertDescription::DecodeError)?;
        let extension_start = stuffer.read_cursor();

        debug!("EncryptedExtensions {:?} length {}", extension_type, extension_len);

        match extension_type {
            ExtensionType::ServerName => {
                // 253 is the maximum length for a valid DNS name
                let mut buf = [0u8; 253];
                let read_len = min(buf.len(), usize::from(extension_len));
                stuffer.read_bytes(&mut buf[..read_len]).map_err(|_| AlertDescription::DecodeError)?;
                let remain = usize::from(extension_len) - read_len;
                if remain > 0 {
                    stuffer.skip_read(remain).map_err(|_| AlertDescription::DecodeError)?;
                }
            }
            ExtensionType::MaxFragmentLength => {
                error!("unexpected MaxFragmentLength in EncryptedExtensions");
                return Err(AlertDescription::UnsupportedExtension);
            }
            ExtensionType::SupportedGroups => {
                // Clients MUST NOT act upon any information found in
                // "supported_groups" prior to successful completion of the
                // handshake but MAY use the information learned to change
                // what groups they use in subsequent connections.
                stuffer.skip_read(usize::from(extension_len)).map_err(|_| AlertDescription::DecodeError)?;
            }
            ExtensionType::UseSrtp | ExtensionType::Heartbeat => {
                error!("unexpected DTLS-only extension in EncryptedExtensions");
                return Err(AlertDescription::UnsupportedExtension);
            }
            ExtensionType::ApplicationLayerProtocolNegotiation => {
                let list_len = stuffer.read_u16().map_err(|_| AlertDescription::DecodeError)?;
                if list_len == 0 {
                    return Err(AlertDescription::DecodeError);
                }
                let proto_len = stuffer.read_u8().map_err(|_| AlertDescription::DecodeError)?;
                let mut proto = vec![0u8; usize::from(proto_len)];
                stuffer.read_bytes(&mut proto).map_err(|_| AlertDescription::DecodeError)?;
                let consumed = 1 + usize::from(proto_len);
                if consumed < usize::from(list_len) {
                    stuffer
                        .skip_read(usize::from(list_len) - consumed)
                        .map_err(|_| AlertDescription::DecodeError)?;
                }
                result.alpn = Some(proto);
            }
            ExtensionType::ClientCertificateType | ExtensionType::ServerCertificateType => {
                error!("unexpected DTLS-only extension in EncryptedExtensions");
                return Err(AlertDescription::UnsupportedExtension);
            }
            ExtensionType::EarlyData => {
                error!("unexpected early_data extension, early data is not offered");
                return Err(AlertDescription::UnsupportedExtension);
            }
            x => {
                error!("extension invalid for EncryptedExtensions: {:?}", x);
                return Err(AlertDescription::UnsupportedExtension);
            }
        }

        let n_read = stuffer.read_cursor() - extension_start;
        if usize::from(extension_len) != n_read {
            error!("{:?} extension length {} != n_read {}", extension_type, extension_len, n_read);
            return Err(AlertDescription::DecodeError);
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extension(tipe: ExtensionType, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&u16::from(tipe).to_be_bytes());
        out.extend_from_slice(&(body.len() as u16).to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn alpn_extension_is_surfaced() {
        let mut alpn_body = Vec::new();
        alpn_body.extend_from_slice(&3u16.to_be_bytes()); // list len
        alpn_body.push(2);
        alpn_body.extend_from_slice(b"h2");

        let ext = extension(ExtensionType::ApplicationLayerProtocolNegotiation, &alpn_body);
        let mut body = Vec::new();
        body.extend_from_slice(&(ext.len() as u16).to_be_bytes());
        body.extend_from_slice(&ext);

        let result = recv_encrypted_extensions(&body).unwrap();
        assert_eq!(result.alpn, Some(b"h2".to_vec()));
    }

    #[test]
    fn no_extensions_is_fine() {
        let body = 0u16.to_be_bytes();
        let result = recv_encrypted_extensions(&body).unwrap();
        assert!(result.alpn.is_none());
    }

    #[test]
    fn ser_with_alpn_round_trips_through_recv() {
        use crate::crypto::hash::HashAlg;

        let mut stuffer = Stuffer::growable();
        let mut ks = KeySchedule::new(HashAlg::Sha256);
        ser(&mut stuffer, &mut ks, Some(b"h2")).unwrap();

        let mut header = [0u8; 4];
        stuffer.read_bytes(&mut header).unwrap();
        let body_len = u32::from_be_bytes(header) & 0x00FF_FFFF;
        let mut body = vec![0u8; body_len as usize];
        stuffer.read_bytes(&mut body).unwrap();

        let result = recv_encrypted_extensions(&body).unwrap();
        assert_eq!(result.alpn, Some(b"h2".to_vec()));
    }

    #[test]
    fn ser_without_alpn_has_no_extensions() {
        use crate::crypto::hash::HashAlg;

        let mut stuffer = Stuffer::growable();
        let mut ks = KeySchedule::new(HashAlg::Sha256);
        ser(&mut stuffer, &mut ks, None).unwrap();

        let mut header = [0u8; 4];
        stuffer.read_bytes(&mut header).unwrap();
        let body_len = u32::from_be_bytes(header) & 0x00FF_FFFF;
        let mut body = vec![0u8; body_len as usize];
        stuffer.read_bytes(&mut body).unwrap();

        assert_eq!(body, 0u16.to_be_bytes());
    }
}
