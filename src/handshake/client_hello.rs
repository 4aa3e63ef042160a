//! `ClientHello` construction.
//!
//! This crate negotiates cipher suite, key-share groups, and PSK use per
//! connection, so the `ClientHello` byte layout is built at runtime with
//! ordinary `Vec<u8>` construction rather than `const fn`s evaluated at
//! compile time, writing through the transcript hash while serializing.

use crate::cipher_suites::CipherSuite;
use crate::error::Error;
use crate::extension::ExtensionType;
use crate::key_schedule::KeySchedule;
use crate::stuffer::Stuffer;
use crate::{AlertDescription, TlsVersion};

use super::{HandshakeType, TranscriptWriter};

/// # References
///
/// * [RFC 8846 Section 4.2.3](https://datatracker.ietf.org/doc/html/rfc8446#section-4.2.3)
/// * [RFC 8446 Section 9.1](https://datatracker.ietf.org/doc/html/rfc8446#section-9.1)
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SignatureScheme {
    RsaPkcs1Sha256 = 0x0401,
    RsaPkcs1Sha384 = 0x0501,
    RsaPkcs1Sha512 = 0x0601,
    EcdsaSecp256r1Sha256 = 0x0403,
    EcdsaSecp384r1Sha384 = 0x0503,
    EcdsaSecp521r1Sha512 = 0x0603,
    RsaPssRsaeSha256 = 0x0804,
    RsaPssRsaeSha384 = 0x0805,
    RsaPssRsaeSha512 = 0x0806,
    Ed25519 = 0x0807,
    Ed448 = 0x0808,
    RsaPssPssSha256 = 0x0809,
    RsaPssPssSha384 = 0x080a,
    RsaPssPssSha512 = 0x080b,
    RsaPkcs1Sha1 = 0x0201,
    EcdsaSha1 = 0x0203,
}

impl From<SignatureScheme> for u16 {
    #[inline]
    fn from(signature_scheme: SignatureScheme) -> Self {
        signature_scheme as u16
    }
}

impl TryFrom<u16> for SignatureScheme {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            x if x == (Self::RsaPkcs1Sha256 as u16) => Ok(Self::RsaPkcs1Sha256),
            x if x == (Self::RsaPkcs1Sha384 as u16) => Ok(Self::RsaPkcs1Sha384),
            x if x == (Self::RsaPkcs1Sha512 as u16) => Ok(Self::RsaPkcs1Sha512),
            x if x == (Self::EcdsaSecp256r1Sha256 as u16) => Ok(Self::EcdsaSecp256r1Sha256),
            x if x == (Self::EcdsaSecp384r1Sha384 as u16) => Ok(Self::EcdsaSecp384r1Sha384),
            x if x == (Self::EcdsaSecp521r1Sha512 as u16) => Ok(Self::EcdsaSecp521r1Sha512),
            x if x == (Self::RsaPssRsaeSha256 as u16) => Ok(Self::RsaPssRsaeSha256),
            x if x == (Self::RsaPssRsaeSha384 as u16) => Ok(Self::RsaPssRsaeSha384),
            x if x == (Self::RsaPssRsaeSha512 as u16) => Ok(Self::RsaPssRsaeSha512),
            x if x == (Self::Ed25519 as u16) => Ok(Self::Ed25519),
            x if x == (Self::Ed448 as u16) => Ok(Self::Ed448),
            x if x == (Self::RsaPssPssSha256 as u16) => Ok(Self::RsaPssPssSha256),
            x if x == (Self::RsaPssPssSha384 as u16) => Ok(Self::RsaPssPssSha384),
            x if x == (Self::RsaPssPssSha512 as u16) => Ok(Self::RsaPssPssSha512),
            x if x == (Self::RsaPkcs1Sha1 as u16) => Ok(Self::RsaPkcs1Sha1),
            x if x == (Self::EcdsaSha1 as u16) => Ok(Self::EcdsaSha1),
            x => Err(x),
        }
    }
}

/// # References
///
/// * [RFC 6066 Section 3](https://datatracker.ietf.org/doc/html/rfc6066#section-3)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NameType {
    Hostname = 0,
}

/// # References
///
/// * [RFC 8446 Section 4.2.7](https://datatracker.ietf.org/doc/html/rfc8446#section-4.2.7)
#[repr(u16)]
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(non_camel_case_types, dead_code)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NamedGroup {
    secp256r1 = 0x0017,
    secp384r1 = 0x0018,
    secp521r1 = 0x0019,
    x25519 = 0x001D,
    x448 = 0x001E,
    ffdhe2048 = 0x0100,
    ffdhe3072 = 0x0101,
    ffdhe4096 = 0x0102,
    ffdhe6144 = 0x0103,
    ffdhe8192 = 0x0104,
}

impl NamedGroup {
    pub const fn msb(self) -> u8 {
        ((self as u16) >> 8) as u8
    }

    pub const fn lsb(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u16> for NamedGroup {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            x if x == (Self::secp256r1 as u16) => Ok(Self::secp256r1),
            x if x == (Self::secp384r1 as u16) => Ok(Self::secp384r1),
            x if x == (Self::secp521r1 as u16) => Ok(Self::secp521r1),
            x if x == (Self::x25519 as u16) => Ok(Self::x25519),
            x if x == (Self::x448 as u16) => Ok(Self::x448),
            x if x == (Self::ffdhe2048 as u16) => Ok(Self::ffdhe2048),
            x if x == (Self::ffdhe3072 as u16) => Ok(Self::ffdhe3072),
            x if x == (Self::ffdhe4096 as u16) => Ok(Self::ffdhe4096),
            x if x == (Self::ffdhe6144 as u16) => Ok(Self::ffdhe6144),
            x if x == (Self::ffdhe8192 as u16) => Ok(Self::ffdhe8192),
            x => Err(x),
        }
    }
}

/// # References
///
/// * [RFC 8446 Section 4.2.9](https://datatracker.ietf.org/doc/html/rfc8446#section-4.2.9)
#[repr(u8)]
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(dead_code)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PskKeyExchangeMode {
    Ke = 0,
    DheKe = 1,
}

/// A single offered key-share: the group and the client's public key
/// bytes for it (65-byte uncompressed SEC1 point for the NIST curves,
/// 32 raw bytes for `x25519`).
pub struct KeyShareOffer {
    pub group: NamedGroup,
    pub public_key: Vec<u8>,
}

/// A PSK a client is willing to resume/bind to, identified by its
/// opaque ticket/identity.
pub struct PskOffer<'a> {
    pub identity: &'a [u8],
    pub psk: &'a [u8],
}

pub struct ClientHelloParams<'a> {
    pub random: [u8; 32],
    pub server_name: Option<&'a str>,
    pub cipher_suites: &'a [CipherSuite],
    pub supported_versions: &'a [TlsVersion],
    pub key_shares: &'a [KeyShareOffer],
    pub signature_schemes: &'a [SignatureScheme],
    pub psk: Option<PskOffer<'a>>,
    pub alpn: &'a [Vec<u8>],
    pub record_size_limit: Option<u16>,
}

fn write_u16_len_prefixed(out: &mut Vec<u8>, body: &[u8]) {
    out.extend_from_slice(&(body.len() as u16).to_be_bytes());
    out.extend_from_slice(body);
}

fn write_extension(out: &mut Vec<u8>, tipe: ExtensionType, body: &[u8]) {
    out.extend_from_slice(&u16::from(tipe).to_be_bytes());
    write_u16_len_prefixed(out, body);
}

fn build_extensions(params: &ClientHelloParams) -> Vec<u8> {
    let mut ext = Vec::new();

    if let Some(name) = params.server_name {
        let mut list = Vec::new();
        list.push(NameType::Hostname as u8);
        write_u16_len_prefixed(&mut list, name.as_bytes());
        write_extension(&mut ext, ExtensionType::ServerName, &list);
    }

    {
        let mut versions = Vec::new();
        for v in params.supported_versions {
            versions.extend_from_slice(&u16::from(*v).to_be_bytes());
        }
        let mut body = Vec::new();
        body.push(versions.len() as u8);
        body.extend_from_slice(&versions);
        write_extension(&mut ext, ExtensionType::SupportedVersions, &body);
    }

    {
        let mut schemes = Vec::new();
        for s in params.signature_schemes {
            schemes.extend_from_slice(&u16::from(*s).to_be_bytes());
        }
        let mut body = Vec::new();
        write_u16_len_prefixed(&mut body, &schemes);
        write_extension(&mut ext, ExtensionType::SignatureAlgorithms, &body);
    }

    {
        let mut groups = Vec::new();
        for share in params.key_shares {
            groups.extend_from_slice(&u16::from(share.group as u16).to_be_bytes());
        }
        let mut body = Vec::new();
        write_u16_len_prefixed(&mut body, &groups);
        write_extension(&mut ext, ExtensionType::SupportedGroups, &body);
    }

    if !params.key_shares.is_empty() {
        let mut shares = Vec::new();
        for share in params.key_shares {
            shares.extend_from_slice(&u16::from(share.group as u16).to_be_bytes());
            write_u16_len_prefixed(&mut shares, &share.public_key);
        }
        let mut body = Vec::new();
        write_u16_len_prefixed(&mut body, &shares);
        write_extension(&mut ext, ExtensionType::KeyShare, &body);
    }

    if let Some(limit) = params.record_size_limit {
        write_extension(&mut ext, ExtensionType::RecordSizeLimit, &limit.to_be_bytes());
    }

    if !params.alpn.is_empty() {
        let mut list = Vec::new();
        for proto in params.alpn {
            list.push(proto.len() as u8);
            list.extend_from_slice(proto);
        }
        let mut body = Vec::new();
        write_u16_len_prefixed(&mut body, &list);
        write_extension(&mut ext, ExtensionType::ApplicationLayerProtocolNegotiation, &body);
    }

    if params.psk.is_some() {
        let modes = [PskKeyExchangeMode::DheKe as u8];
        let mut body = Vec::new();
        body.push(modes.len() as u8);
        body.extend_from_slice(&modes);
        write_extension(&mut ext, ExtensionType::PskKeyExchangeModes, &body);
    }

    ext
}

/// Serialize and transcript-hash a `ClientHello` handshake message (the
/// 4-byte handshake header plus body; record framing is the record
/// layer's job, not this module's). Returns the number of bytes
/// written.
pub fn ser(
    stuffer: &mut Stuffer,
    key_schedule: &mut KeySchedule,
    params: &ClientHelloParams,
) -> Result<usize, Error> {
    let mut body = Vec::new();
    body.extend_from_slice(&u16::from(TlsVersion::V1_2).to_be_bytes());
    body.extend_from_slice(&params.random);
    body.push(0); // legacy_session_id, empty

    let mut suites = Vec::new();
    for s in params.cipher_suites {
        suites.extend_from_slice(&s.value());
    }
    write_u16_len_prefixed(&mut body, &suites);

    body.extend_from_slice(&[1, 0]); // legacy_compression_methods: null only

    let extensions = build_extensions(params);

    let (binders_field_len, binder_len): (usize, usize) = match &params.psk {
        Some(_) => {
            let hash_len = key_schedule.transcript_hash_bytes().len();
            (1 + hash_len, hash_len)
        }
        None => (0, 0),
    };

    let psk_ext_header_and_identities_len: usize = match &params.psk {
        Some(offer) => {
            // type(2) + ext_len(2) + identities_len(2) + identity_len(2) +
            // identity + obfuscated_ticket_age(4) + binders_len(2) + binder
            2 + 2 + 2 + 2 + offer.identity.len() + 4 + 2 + binders_field_len
        }
        None => 0,
    };

    let extensions_total_len = extensions.len() + psk_ext_header_and_identities_len;
    body.extend_from_slice(&(extensions_total_len as u16).to_be_bytes());
    body.extend_from_slice(&extensions);

    let handshake_length = body.len()
        + if params.psk.is_some() {
            psk_ext_header_and_identities_len
        } else {
            0
        };

    let mut writer = TranscriptWriter { stuffer, key_schedule };
    writer.write_u8(HandshakeType::ClientHello as u8)?;
    writer.write_u24(handshake_length as u32)?;
    writer.write_bytes(&body)?;

    if let Some(offer) = &params.psk {
        let identity_len = offer.identity.len() as u16;
        let identities_len: u16 = identity_len + 4 + 2;

        writer.write_u16(u16::from(ExtensionType::PreSharedKey))?;
        let ext_len: u16 =
            identities_len + 2 + (binders_field_len as u16) + 2;
        writer.write_u16(ext_len)?;
        writer.write_u16(identities_len)?;
        writer.write_u16(identity_len)?;
        writer.write_bytes(offer.identity)?;
        writer.write_u32(0)?; // obfuscated_ticket_age

        let truncated = writer.key_schedule.transcript_hash();
        writer.write_u16(binders_field_len as u16)?;
        writer.write_u8(binder_len as u8)?;
        let binder = writer.key_schedule.binder(offer.psk, truncated);
        writer.write_bytes(&binder)?;
    }

    Ok(4 + handshake_length)
}

/// Everything `connection.rs` needs out of a received `ClientHello` to
/// negotiate a connection. Unrecognized cipher suites, groups, and
/// signature schemes are silently dropped rather than rejected (a
/// GREASE value or a value from a newer draft is not itself fatal;
/// only an empty *result* of negotiation is).
pub struct ClientHelloResult {
    pub random: [u8; 32],
    pub cipher_suites: Vec<CipherSuite>,
    pub server_name: Option<String>,
    pub supported_versions: Vec<TlsVersion>,
    pub supported_groups: Vec<NamedGroup>,
    pub signature_schemes: Vec<SignatureScheme>,
    pub key_shares: Vec<(NamedGroup, Vec<u8>)>,
    pub alpn: Vec<Vec<u8>>,
    pub status_request: bool,
}

/// Parse a `ClientHello` handshake body (no 4-byte header).
pub(crate) fn recv(body: &[u8]) -> Result<ClientHelloResult, AlertDescription> {
    let mut stuffer = Stuffer::growable();
    stuffer.write_bytes(body).map_err(|_| AlertDescription::InternalError)?;

    stuffer.read_u16().map_err(|_| AlertDescription::DecodeError)?; // legacy_version
    let mut random = [0u8; 32];
    stuffer.read_bytes(&mut random).map_err(|_| AlertDescription::DecodeError)?;

    let session_id_len = stuffer.read_u8().map_err(|_| AlertDescription::DecodeError)?;
    stuffer
        .skip_read(usize::from(session_id_len))
        .map_err(|_| AlertDescription::DecodeError)?;

    let suites_len = stuffer.read_u16().map_err(|_| AlertDescription::DecodeError)?;
    if suites_len % 2 != 0 {
        return Err(AlertDescription::DecodeError);
    }
    let mut cipher_suites = Vec::new();
    for _ in 0..(suites_len / 2) {
        let mut raw = [0u8; 2];
        stuffer.read_bytes(&mut raw).map_err(|_| AlertDescription::DecodeError)?;
        if let Ok(suite) = CipherSuite::try_from(raw) {
            cipher_suites.push(suite);
        }
    }

    let compression_len = stuffer.read_u8().map_err(|_| AlertDescription::DecodeError)?;
    stuffer
        .skip_read(usize::from(compression_len))
        .map_err(|_| AlertDescription::DecodeError)?;

    let mut result = ClientHelloResult {
        random,
        cipher_suites,
        server_name: None,
        supported_versions: Vec::new(),
        supported_groups: Vec::new(),
        signature_schemes: Vec::new(),
        key_shares: Vec::new(),
        alpn: Vec::new(),
        status_request: false,
    };

    if stuffer.data_available() == 0 {
        return Ok(result);
    }

    let extensions_len = stuffer.read_u16().map_err(|_| AlertDescription::DecodeError)?;
    let extensions_end = stuffer.read_cursor() + usize::from(extensions_len);
    if extensions_end > body.len() {
        return Err(AlertDescription::DecodeError);
    }

    while stuffer.read_cursor() < extensions_end {
        let extension_type_raw = stuffer.read_u16().map_err(|_| AlertDescription::DecodeError)?;
        let extension_len = stuffer.read_u16().map_err(|_| AlertDescription::DecodeError)?;
        let extension_start = stuffer.read_cursor();
        if extension_start + usize::from(extension_len) > body.len() {
            return Err(AlertDescription::DecodeError);
        }

        let extension_type = match ExtensionType::try_from(extension_type_raw) {
            Ok(t) => t,
            Err(_) => {
                stuffer
                    .skip_read(usize::from(extension_len))
                    .map_err(|_| AlertDescription::DecodeError)?;
                continue;
            }
        };

        match extension_type {
            ExtensionType::ServerName => {
                let list_len = stuffer.read_u16().map_err(|_| AlertDescription::DecodeError)?;
                if list_len > 0 {
                    let name_type = stuffer.read_u8().map_err(|_| AlertDescription::DecodeError)?;
                    let name_len = stuffer.read_u16().map_err(|_| AlertDescription::DecodeError)?;
                    let mut name = vec![0u8; usize::from(name_len)];
                    stuffer.read_bytes(&mut name).map_err(|_| AlertDescription::DecodeError)?;
                    if name_type == NameType::Hostname as u8 {
                        result.server_name = String::from_utf8(name).ok();
                    }
                }
            }
            ExtensionType::SupportedVersions => {
                let list_len = stuffer.read_u8().map_err(|_| AlertDescription::DecodeError)?;
                for _ in 0..(list_len / 2) {
                    let v = stuffer.read_u16().map_err(|_| AlertDescription::DecodeError)?;
                    if let Ok(version) = TlsVersion::try_from(v.to_be_bytes()) {
                        result.supported_versions.push(version);
                    }
                }
            }
            ExtensionType::SupportedGroups => {
                let list_len = stuffer.read_u16().map_err(|_| AlertDescription::DecodeError)?;
                for _ in 0..(list_len / 2) {
                    let g = stuffer.read_u16().map_err(|_| AlertDescription::DecodeError)?;
                    if let Ok(group) = NamedGroup::try_from(g) {
                        result.supported_groups.push(group);
                    }
                }
            }
            ExtensionType::SignatureAlgorithms => {
                let list_len = stuffer.read_u16().map_err(|_| AlertDescription::DecodeError)?;
                for _ in 0..(list_len / 2) {
                    let s = stuffer.read_u16().map_err(|_| AlertDescription::DecodeError)?;
                    if let Ok(scheme) = SignatureScheme::try_from(s) {
                        result.signature_schemes.push(scheme);
                    }
                }
            }
            ExtensionType::KeyShare => {
                let list_len = stuffer.read_u16().map_err(|_| AlertDescription::DecodeError)?;
                let list_end = stuffer.read_cursor() + usize::from(list_len);
                while stuffer.read_cursor() < list_end {
                    let g = stuffer.read_u16().map_err(|_| AlertDescription::DecodeError)?;
                    let key_len = stuffer.read_u16().map_err(|_| AlertDescription::DecodeError)?;
                    let mut key = vec![0u8; usize::from(key_len)];
                    stuffer.read_bytes(&mut key).map_err(|_| AlertDescription::DecodeError)?;
                    if let Ok(group) = NamedGroup::try_from(g) {
                        result.key_shares.push((group, key));
                    }
                }
            }
            ExtensionType::ApplicationLayerProtocolNegotiation => {
                let list_len = stuffer.read_u16().map_err(|_| AlertDescription::DecodeError)?;
                let list_end = stuffer.read_cursor() + usize::from(list_len);
                while stuffer.read_cursor() < list_end {
                    let proto_len = stuffer.read_u8().map_err(|_| AlertDescription::DecodeError)?;
                    let mut proto = vec![0u8; usize::from(proto_len)];
                    stuffer.read_bytes(&mut proto).map_err(|_| AlertDescription::DecodeError)?;
                    result.alpn.push(proto);
                }
            }
            ExtensionType::StatusRequest => {
                result.status_request = true;
                stuffer
                    .skip_read(usize::from(extension_len))
                    .map_err(|_| AlertDescription::DecodeError)?;
            }
            _ => {
                stuffer
                    .skip_read(usize::from(extension_len))
                    .map_err(|_| AlertDescription::DecodeError)?;
            }
        }

        // A per-type parser that consumes a different number of bytes than
        // the extension's own declared length means the byte framing has
        // drifted; there is no safe way to resynchronize, so this is always
        // fatal rather than silently skipped.
        if stuffer.read_cursor() != extension_start + usize::from(extension_len) {
            return Err(AlertDescription::DecodeError);
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hash::HashAlg;

    #[test]
    fn client_hello_round_trips_through_recv() {
        let mut stuffer = Stuffer::growable();
        let mut ks = KeySchedule::new(HashAlg::Sha256);
        let share = KeyShareOffer {
            group: NamedGroup::secp256r1,
            public_key: vec![0x04u8; 65],
        };
        let params = ClientHelloParams {
            random: [0x22u8; 32],
            server_name: Some("example.com"),
            cipher_suites: &[CipherSuite::TLS_AES_128_GCM_SHA256],
            supported_versions: &[TlsVersion::V1_3, TlsVersion::V1_2],
            key_shares: std::slice::from_ref(&share),
            signature_schemes: &[SignatureScheme::EcdsaSecp256r1Sha256],
            psk: None,
            alpn: &[b"h2".to_vec()],
            record_size_limit: None,
        };
        ser(&mut stuffer, &mut ks, &params).unwrap();

        let mut header = [0u8; 4];
        stuffer.read_bytes(&mut header).unwrap();
        let body_len = u32::from_be_bytes(header) & 0x00FF_FFFF;
        let mut body = vec![0u8; body_len as usize];
        stuffer.read_bytes(&mut body).unwrap();

        let parsed = recv(&body).unwrap();
        assert_eq!(parsed.random, [0x22u8; 32]);
        assert_eq!(parsed.server_name.as_deref(), Some("example.com"));
        assert_eq!(parsed.cipher_suites, vec![CipherSuite::TLS_AES_128_GCM_SHA256]);
        assert_eq!(parsed.supported_versions, vec![TlsVersion::V1_3, TlsVersion::V1_2]);
        assert_eq!(parsed.key_shares.len(), 1);
        assert_eq!(parsed.key_shares[0].0, NamedGroup::secp256r1);
        assert_eq!(parsed.alpn, vec![b"h2".to_vec()]);
    }

    #[test]
    fn no_psk_client_hello_serializes_without_binder() {
        let mut stuffer = Stuffer::growable();
        let mut ks = KeySchedule::new(HashAlg::Sha256);
        let params = ClientHelloParams {
            random: [0x11u8; 32],
            server_name: Some("example.com"),
            cipher_suites: &[CipherSuite::TLS_AES_128_GCM_SHA256],
            supported_versions: &[TlsVersion::V1_3],
            key_shares: &[],
            signature_schemes: &[SignatureScheme::EcdsaSecp256r1Sha256],
            psk: None,
            alpn: &[],
            record_size_limit: None,
        };
        let written = ser(&mut stuffer, &mut ks, &params).unwrap();
        assert_eq!(written, stuffer.write_cursor());
        assert_eq!(stuffer.read_cursor(), 0);
    }
}
