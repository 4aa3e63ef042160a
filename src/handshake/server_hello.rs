//! `ServerHello` parsing.
//!
//! This crate negotiates cipher suite, key-share group, and PSK use per
//! connection, so the checklist is driven by what the client actually
//! offered rather than by constants.

use crate::cipher_suites::CipherSuite;
use crate::error::Error;
use crate::extension::ExtensionType;
use crate::key_schedule::{KeySchedule, PeerPublicKey};
use crate::stuffer::Stuffer;
use crate::{AlertDescription, NamedGroup, TlsVersion};

use super::{HandshakeType, TranscriptWriter};

pub struct ServerHelloResult {
    pub cipher_suite: CipherSuite,
    pub version: TlsVersion,
    pub key_share: Option<PeerPublicKey>,
    pub selected_identity: Option<u16>,
}

/// A server's key-share response: the group the client offered that the
/// server is answering, and the server's own public key bytes for it.
pub struct ServerKeyShare<'a> {
    pub group: NamedGroup,
    pub public_key: &'a [u8],
}

pub struct ServerHelloParams<'a> {
    pub random: [u8; 32],
    pub cipher_suite: CipherSuite,
    /// `None` selects TLS 1.2 (no `supported_versions`/`key_share`
    /// extensions); `Some` selects TLS 1.3.
    pub tls13_key_share: Option<ServerKeyShare<'a>>,
}

/// Serialize and transcript-hash a `ServerHello` handshake message.
///
/// # References
///
/// * [RFC 8446 Appendix B.3.1](https://datatracker.ietf.org/doc/html/rfc8446#appendix-B.3.1)
pub fn ser(
    stuffer: &mut Stuffer,
    key_schedule: &mut KeySchedule,
    params: &ServerHelloParams,
) -> Result<usize, Error> {
    let mut body = Vec::new();
    body.extend_from_slice(&u16::from(TlsVersion::V1_2).to_be_bytes());
    body.extend_from_slice(&params.random);
    body.push(0); // legacy_session_id_echo, empty
    body.extend_from_slice(&params.cipher_suite.value());
    body.push(0); // legacy_compression_method

    let mut extensions = Vec::new();
    if let Some(share) = &params.tls13_key_share {
        extensions.extend_from_slice(&u16::from(ExtensionType::SupportedVersions).to_be_bytes());
        extensions.extend_from_slice(&2u16.to_be_bytes());
        extensions.extend_from_slice(&u16::from(TlsVersion::V1_3).to_be_bytes());

        let mut key_share_body = Vec::new();
        key_share_body.extend_from_slice(&(share.group as u16).to_be_bytes());
        key_share_body.extend_from_slice(&(share.public_key.len() as u16).to_be_bytes());
        key_share_body.extend_from_slice(share.public_key);
        extensions.extend_from_slice(&u16::from(ExtensionType::KeyShare).to_be_bytes());
        extensions.extend_from_slice(&(key_share_body.len() as u16).to_be_bytes());
        extensions.extend_from_slice(&key_share_body);
    }
    body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
    body.extend_from_slice(&extensions);

    let mut writer = TranscriptWriter { stuffer, key_schedule };
    writer.write_u8(HandshakeType::ServerHello as u8)?;
    writer.write_u24(body.len() as u32)?;
    writer.write_bytes(&body)?;
    Ok(4 + body.len())
}

/// Parse a `ServerHello` body (everything after the 4-byte handshake
/// header) out of `body`, validating it against what the client offered.
///
/// # References
///
/// * [RFC 8446 Appendix B.3.1](https://datatracker.ietf.org/doc/html/rfc8446#appendix-B.3.1)
///
/// ```text
/// struct {
///     ProtocolVersion legacy_version = 0x0303;    /* TLS v1.2 */
///     Random random;
///     opaque legacy_session_id_echo<0..32>;
///     CipherSuite cipher_suite;
///     uint8 legacy_compression_method = 0;
///     Extension extensions<6..2^16-1>;
/// } ServerHello;
/// ```
pub(crate) fn recv_server_hello(
    body: &[u8],
    offered_cipher_suites: &[CipherSuite],
    offered_groups: &[NamedGroup],
    psk_offered: bool,
) -> Result<ServerHelloResult, AlertDescription> {
    let mut stuffer = Stuffer::growable();
    stuffer.write_bytes(body).map_err(|_| AlertDescription::InternalError)?;

    let legacy_version = stuffer.read_u16().map_err(|_| AlertDescription::DecodeError)?;
    if legacy_version != u16::from(TlsVersion::V1_2) {
        error!(
            "expected legacy_version {:04X} got {:04X}",
            u16::from(TlsVersion::V1_2),
            legacy_version
        );
        return Err(AlertDescription::ProtocolVersion);
    }

    let mut random = [0u8; 32];
    stuffer.read_bytes(&mut random).map_err(|_| AlertDescription::DecodeError)?;

    let session_id_len = stuffer.read_u8().map_err(|_| AlertDescription::DecodeError)?;
    if session_id_len != 0 {
        error!("session ID length is not 0: {}", session_id_len);
        return Err(AlertDescription::IllegalParameter);
    }

    let mut suite_bytes = [0u8; 2];
    stuffer.read_bytes(&mut suite_bytes).map_err(|_| AlertDescription::DecodeError)?;
    let cipher_suite: CipherSuite = suite_bytes.try_into().map_err(|_| AlertDescription::IllegalParameter)?;
    if !offered_cipher_suites.contains(&cipher_suite) {
        error!("server selected a cipher suite we did not offer: {:?}", cipher_suite);
        return Err(AlertDescription::IllegalParameter);
    }

    let compression_method = stuffer.read_u8().map_err(|_| AlertDescription::DecodeError)?;
    if compression_method != 0 {
        error!("compression method is not 0: {}", compression_method);
        return Err(AlertDescription::IllegalParameter);
    }

    let extensions_len = stuffer.read_u16().map_err(|_| AlertDescription::DecodeError)?;
    let extensions_end = stuffer.read_cursor() + usize::from(extensions_len);
    if extensions_end > body.len() {
        error!("ServerHello extensions len exceeds message len");
        return Err(AlertDescription::DecodeError);
    }

    let mut done_supported_versions = false;
    let mut version = TlsVersion::V1_2;
    let mut key_share: Option<PeerPublicKey> = None;
    let mut selected_identity: Option<u16> = None;

    while stuffer.read_cursor() < extensions_end {
        let extension_type: ExtensionType = stuffer
            .read_u16()
            .map_err(|_| AlertDescription::DecodeError)
            .and_then(|v| ExtensionType::try_from(v).map_err(|_| AlertDescription::IllegalParameter))?;
        let extension_len = stuffer.read_u16().map_err(|_| AlertDescription::DecodeError)?;
        let extension_start = stuffer.read_cursor();

        debug!("ServerHello {:?} length {}", extension_type, extension_len);

        match extension_type {
            ExtensionType::KeyShare => {
                if key_share.is_some() {
                    error!("KeyShare appeared twice");
                    return Err(AlertDescription::IllegalParameter);
                }
                let group_raw = stuffer.read_u16().map_err(|_| AlertDescription::DecodeError)?;
                let group: NamedGroup = group_raw.try_into().map_err(|_| AlertDescription::IllegalParameter)?;
                if !offered_groups.contains(&group) {
                    error!("server selected a group we did not offer: {:?}", group);
                    return Err(AlertDescription::IllegalParameter);
                }
                let key_len = stuffer.read_u16().map_err(|_| AlertDescription::DecodeError)?;
                key_share = Some(match group {
                    NamedGroup::secp256r1 => {
                        if key_len != 65 {
                            return Err(AlertDescription::DecodeError);
                        }
                        let mut buf = [0u8; 65];
                        stuffer.read_bytes(&mut buf).map_err(|_| AlertDescription::DecodeError)?;
                        let public = crate::crypto::ecdh::public_key_from_sec1_bytes(&buf)
                            .ok_or(AlertDescription::DecodeError)?;
                        PeerPublicKey::Secp256r1(public)
                    }
                    NamedGroup::x25519 => {
                        if key_len != 32 {
                            return Err(AlertDescription::DecodeError);
                        }
                        let mut buf = [0u8; 32];
                        stuffer.read_bytes(&mut buf).map_err(|_| AlertDescription::DecodeError)?;
                        PeerPublicKey::X25519(buf)
                    }
                    other => {
                        error!("unsupported key-share group: {:?}", other);
                        return Err(AlertDescription::HandshakeFailure);
                    }
                });
            }
            ExtensionType::SupportedVersions => {
                if done_supported_versions {
                    error!("SupportedVersions appeared twice");
                    return Err(AlertDescription::IllegalParameter);
                }
                let selected_version = stuffer.read_u16().map_err(|_| AlertDescription::DecodeError)?;
                if selected_version != u16::from(TlsVersion::V1_3) {
                    error!("unsupported TLS version: {:#06X}", selected_version);
                    return Err(AlertDescription::IllegalParameter);
                }
                version = TlsVersion::V1_3;
                done_supported_versions = true;
            }
            ExtensionType::PreSharedKey => {
                if !psk_offered {
                    error!("server selected a PSK we did not offer");
                    return Err(AlertDescription::IllegalParameter);
                }
                let id = stuffer.read_u16().map_err(|_| AlertDescription::DecodeError)?;
                if id != 0 {
                    error!("expected selected_identity 0 got {}", id);
                    return Err(AlertDescription::DecodeError);
                }
                selected_identity = Some(id);
            }
            x => {
                error!("illegal or unknown extension for ServerHello: {:?}", x);
                return Err(AlertDescription::UnsupportedExtension);
            }
        }

        let n_read = stuffer.read_cursor() - extension_start;
        if usize::from(extension_len) != n_read {
            error!("{:?} extension length {} != n_read {}", extension_type, extension_len, n_read);
            return Err(AlertDescription::DecodeError);
        }
    }

    // Absence of `supported_versions` means the server selected TLS 1.2
    // (the only version below 1.3 this engine negotiates); `key_share`
    // is a TLS 1.3-only extension, so it has no business appearing here.
    if !done_supported_versions && key_share.is_some() {
        error!("key_share present without supported_versions");
        return Err(AlertDescription::IllegalParameter);
    }

    Ok(ServerHelloResult {
        cipher_suite,
        version,
        key_share,
        selected_identity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::HashAlg;

    #[test]
    fn tls13_server_hello_round_trips_with_key_share() {
        let mut stuffer = Stuffer::growable();
        let mut ks = KeySchedule::new(HashAlg::Sha256);
        let params = ServerHelloParams {
            random: [0x33u8; 32],
            cipher_suite: CipherSuite::TLS_AES_128_GCM_SHA256,
            tls13_key_share: Some(ServerKeyShare {
                group: NamedGroup::secp256r1,
                public_key: &[0x04u8; 65],
            }),
        };
        ser(&mut stuffer, &mut ks, &params).unwrap();

        let mut header = [0u8; 4];
        stuffer.read_bytes(&mut header).unwrap();
        let body_len = u32::from_be_bytes(header) & 0x00FF_FFFF;
        let mut body = vec![0u8; body_len as usize];
        stuffer.read_bytes(&mut body).unwrap();

        let result = recv_server_hello(
            &body,
            &[CipherSuite::TLS_AES_128_GCM_SHA256],
            &[NamedGroup::secp256r1],
            false,
        )
        .unwrap();
        assert_eq!(result.cipher_suite, CipherSuite::TLS_AES_128_GCM_SHA256);
        assert_eq!(result.version, TlsVersion::V1_3);
        assert!(result.key_share.is_some());
    }

    #[test]
    fn tls12_server_hello_round_trips_without_extensions() {
        let mut stuffer = Stuffer::growable();
        let mut ks = KeySchedule::new(HashAlg::Sha256);
        let params = ServerHelloParams {
            random: [0x44u8; 32],
            cipher_suite: CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
            tls13_key_share: None,
        };
        ser(&mut stuffer, &mut ks, &params).unwrap();

        let mut header = [0u8; 4];
        stuffer.read_bytes(&mut header).unwrap();
        let body_len = u32::from_be_bytes(header) & 0x00FF_FFFF;
        let mut body = vec![0u8; body_len as usize];
        stuffer.read_bytes(&mut body).unwrap();

        let result = recv_server_hello(
            &body,
            &[CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256],
            &[NamedGroup::secp256r1],
            false,
        )
        .unwrap();
        assert_eq!(result.version, TlsVersion::V1_2);
        assert!(result.key_share.is_none());
    }
}
