//! Connection state machine: handshake negotiation, record protection, and
//! the read/write surface a caller drives.
//!
//! A `Connection` is driven by a caller-supplied `Read`/`Write` pair rather
//! than polling hardware socket registers against a monotonic clock; its
//! non-blocking behavior instead comes from mapping `WouldBlock` I/O errors
//! to `Error::Blocked` and preserving whatever partial progress was made in
//! the connection's own buffers, so a caller can simply call the same
//! method again once more data is available.

use std::io::{self, Read, Write};
use std::sync::Arc;

use rand_core::{OsRng, RngCore};
use rsa::Pkcs1v15Encrypt;

use crate::alert::{Alert, AlertDescription, AlertLevel};
use crate::cipher_suites::{CipherSuite, LegacyKeyExchange, RecordAlg};
use crate::config::{CertifiedKey, Config};
use crate::crypto;
use crate::crypto::hash::HashAlg;
use crate::crypto::signature::{SigningKey, VerifyingKey};
use crate::error::{Direction, Error};
use crate::handshake::certificate;
use crate::handshake::certificate_verify;
use crate::handshake::client_hello::{self, ClientHelloParams, KeyShareOffer};
use crate::handshake::client_key_exchange;
use crate::handshake::server_key_exchange;
use crate::handshake::{
    finished_message, recv_encrypted_extensions, recv_server_hello, ser_encrypted_extensions,
    ser_server_hello, HandshakeHeader, HandshakeType, ServerHelloParams, ServerKeyShare,
    TranscriptWriter,
};
use crate::key_schedule::{KeySchedule, KeyBlock, PeerPublicKey, PrfKeySchedule};
use crate::record::{ContentType, RecordHeader, MAX_FRAGMENT_LEN};
use crate::stuffer::Stuffer;
use crate::{NamedGroup, SignatureScheme, TlsVersion};

/// Which side of the handshake a `Connection` plays. There is no
/// "Both"/"Auto" option: the caller picks a role at construction and it
/// never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// One parsed handshake message, kept around long enough for the caller to
/// both act on it and feed it into the running transcript at the right
/// moment (`CertificateVerify` needs the transcript hash *before* its own
/// bytes are included; every other message is recorded immediately).
struct HandshakeMessage {
    msg_type: HandshakeType,
    body: Vec<u8>,
    raw: Vec<u8>,
}

/// Keys and IVs sliced out of a TLS 1.0-1.2 `key_block`, plus the block
/// cipher/record algorithm needed to use them. Absent until the
/// ClientKeyExchange step derives the master secret.
struct Tls12Keys {
    block: KeyBlock,
    record_alg: RecordAlg,
    block_cipher: Option<crypto::cbc::BlockCipher>,
}

/// Coarse progress marker for the handshake loop. Each variant is a point
/// at which `negotiate()` may need to suspend (on `Error::Blocked`) and
/// resume later without redoing earlier work; the buffers in `Connection`
/// (not this enum) hold whatever partial record/message bytes have
/// already arrived or are queued to go out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Start,

    ClientSendHello,
    ClientWaitServerHello,
    ClientWaitEncryptedExtensions13,
    ClientWaitCertificate13,
    ClientWaitCertificateVerify13,
    ClientWaitFinished13,
    ClientWaitCertificate12,
    ClientWaitServerKeyExchange12,
    ClientWaitServerHelloDone12,
    ClientSendKeyExchange12,
    ClientWaitChangeCipherSpec12,
    ClientWaitFinished12,

    ServerWaitClientHello,
    ServerSendHello13,
    ServerSendEncryptedExtensions13,
    ServerSendCertificate13,
    ServerSendCertificateVerify13,
    ServerSendFinished13,
    ServerWaitFinished13,
    ServerSendHello12,
    ServerSendCertificate12,
    ServerSendServerKeyExchange12,
    ServerSendServerHelloDone12,
    ServerWaitClientKeyExchange12,
    ServerWaitChangeCipherSpec12,
    ServerWaitFinished12,
    ServerSendFinished12,

    Established,
}

/// A TLS 1.0-1.3 connection over an arbitrary `Read + Write` transport.
///
/// One struct carries both directions' accumulation buffers, the
/// negotiated parameters, and the key material, so that
/// `Error::Blocked(Direction)` can be returned from anywhere in the middle
/// of a multi-record operation without losing whatever was already read or
/// already queued to write.
pub struct Connection<R, W> {
    role: Role,
    config: Option<Arc<Config>>,
    reader: Option<R>,
    writer: Option<W>,

    step: Step,

    offered_cipher_suites: Vec<CipherSuite>,
    offered_groups: Vec<NamedGroup>,
    client_random: [u8; 32],
    server_random: [u8; 32],
    cipher_suite: Option<CipherSuite>,
    negotiated_version: Option<TlsVersion>,
    version13: bool,

    key_schedule: KeySchedule,
    prf_key_schedule: Option<PrfKeySchedule>,
    uses_split: bool,
    tls12_keys: Option<Tls12Keys>,
    tls12_master_secret: Option<Vec<u8>>,
    tls12_read_seq: u64,
    tls12_write_seq: u64,

    /// Raw wire bytes (header + body) of every handshake message sent or
    /// received so far, in order. Always maintained, regardless of
    /// negotiated version: the TLS 1.2 PRF path hashes this directly at
    /// `Finished` time, and the TLS 1.3 path uses it to rebuild
    /// `key_schedule`'s transcript hash if the negotiated cipher suite's
    /// hash algorithm (SHA-384) turns out to differ from the SHA-256
    /// guess made before the suite was known.
    transcript_raw: Vec<u8>,

    selected_cert: Option<usize>,
    peer_verifying_key: Option<VerifyingKey>,
    client_ecdhe_secret: Option<crypto::ecdh::EphemeralSecret>,
    pending_client_ecdhe_public: Option<Vec<u8>>,

    header_in: Stuffer,
    body_in: Stuffer,
    handshake_in: Stuffer,
    out: Stuffer,

    read_protected: bool,
    write_protected: bool,

    alert_in: Option<Alert>,
    closing: bool,
    closed: bool,

    server_name: Option<String>,
    application_protocols: Vec<Vec<u8>>,
    application_protocol: Option<Vec<u8>>,
    application_protocols_offered_by_peer: Vec<Vec<u8>>,

    max_fragment_length: u16,
    wire_bytes_in: u64,
    wire_bytes_out: u64,
}

fn io_read(reader: &mut dyn Read, stuffer: &mut Stuffer, total_len: usize) -> Result<(), Error> {
    while stuffer.write_cursor() < total_len {
        let need = total_len - stuffer.write_cursor();
        let mut tmp = vec![0u8; need];
        match reader.read(&mut tmp) {
            Ok(0) => return Err(Error::Closed),
            Ok(n) => stuffer.write_bytes(&tmp[..n])?,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                return Err(Error::Blocked(Direction::Read))
            }
            Err(e) => return Err(Error::Io(e)),
        }
    }
    Ok(())
}

fn legacy_key_exchange(suite: CipherSuite) -> LegacyKeyExchange {
    match suite {
        CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA
        | CipherSuite::TLS_RSA_WITH_AES_256_CBC_SHA
        | CipherSuite::TLS_RSA_WITH_3DES_EDE_CBC_SHA => LegacyKeyExchange::Rsa,
        _ => LegacyKeyExchange::Ecdhe,
    }
}

fn block_cipher_for_suite(suite: CipherSuite) -> crypto::cbc::BlockCipher {
    match suite {
        CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA | CipherSuite::TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA => {
            crypto::cbc::BlockCipher::Aes128
        }
        CipherSuite::TLS_RSA_WITH_AES_256_CBC_SHA => crypto::cbc::BlockCipher::Aes256,
        CipherSuite::TLS_RSA_WITH_3DES_EDE_CBC_SHA => crypto::cbc::BlockCipher::Des3,
        _ => crypto::cbc::BlockCipher::Aes128,
    }
}

fn tls13_key_len(suite: CipherSuite) -> usize {
    match suite {
        CipherSuite::TLS_AES_256_GCM_SHA384 => 32,
        _ => 16,
    }
}

const CLIENT_SIGNATURE_SCHEMES: &[SignatureScheme] = &[
    SignatureScheme::EcdsaSecp256r1Sha256,
    SignatureScheme::RsaPssRsaeSha256,
    SignatureScheme::RsaPkcs1Sha256,
];

impl<R: Read, W: Write> Connection<R, W> {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            config: None,
            reader: None,
            writer: None,
            step: Step::Start,
            offered_cipher_suites: Vec::new(),
            offered_groups: vec![NamedGroup::secp256r1],
            client_random: [0u8; 32],
            server_random: [0u8; 32],
            cipher_suite: None,
            negotiated_version: None,
            version13: false,
            key_schedule: KeySchedule::new(HashAlg::Sha256),
            prf_key_schedule: None,
            uses_split: false,
            tls12_keys: None,
            tls12_master_secret: None,
            tls12_read_seq: 0,
            tls12_write_seq: 0,
            transcript_raw: Vec::new(),
            selected_cert: None,
            peer_verifying_key: None,
            client_ecdhe_secret: None,
            pending_client_ecdhe_public: None,
            header_in: Stuffer::new(RecordHeader::LEN),
            body_in: Stuffer::growable(),
            handshake_in: Stuffer::growable(),
            out: Stuffer::growable(),
            read_protected: false,
            write_protected: false,
            alert_in: None,
            closing: false,
            closed: false,
            server_name: None,
            application_protocols: Vec::new(),
            application_protocol: None,
            application_protocols_offered_by_peer: Vec::new(),
            max_fragment_length: MAX_FRAGMENT_LEN,
            wire_bytes_in: 0,
            wire_bytes_out: 0,
        }
    }

    pub fn set_config(&mut self, config: Arc<Config>) {
        self.config = Some(config);
    }

    pub fn set_io(&mut self, reader: R, writer: W) {
        self.reader = Some(reader);
        self.writer = Some(writer);
    }

    pub fn set_server_name(&mut self, name: &str) -> Result<(), Error> {
        if name.len() > 255 {
            return Err(Error::ServerNameTooLong);
        }
        self.server_name = Some(name.to_owned());
        Ok(())
    }

    pub fn set_protocol_preferences(&mut self, alpn: Vec<Vec<u8>>) {
        self.application_protocols = alpn;
    }

    pub fn application_protocol(&self) -> Option<&[u8]> {
        self.application_protocol.as_deref()
    }

    /// Always `None`: OCSP stapling was not wired up past the `Config`
    /// knob that requests it. See DESIGN.md's simplifications section.
    pub fn ocsp_response(&self) -> Option<&[u8]> {
        None
    }

    pub fn alert(&self) -> Option<Alert> {
        self.alert_in
    }

    fn config(&self) -> Result<Arc<Config>, Error> {
        self.config.clone().ok_or(Error::Internal("no config set"))
    }

    // ---- record layer -----------------------------------------------

    fn flush_out(&mut self) -> Result<(), Error> {
        let writer = self.writer.as_mut().ok_or(Error::Internal("no writer set"))?;
        while self.out.data_available() > 0 {
            let write_result = {
                let chunk = self.out.unread_slice();
                writer.write(chunk)
            };
            match write_result {
                Ok(0) => return Err(Error::Io(io::Error::from(io::ErrorKind::WriteZero))),
                Ok(n) => self.out.skip_read(n)?,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Err(Error::Blocked(Direction::Write))
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
        self.out.wipe();
        Ok(())
    }

    fn record_version_for_header(&self) -> TlsVersion {
        // The wire-visible record version is pinned to TLS 1.2 once a
        // ClientHello has gone out, even under TLS 1.3: RFC 8446 Section
        // 5.1 keeps `legacy_record_version` at {3,3} for middlebox
        // compatibility. Only the very first ClientHello may use {3,1}.
        match self.negotiated_version {
            Some(TlsVersion::V1_0) | Some(TlsVersion::V1_1) => TlsVersion::V1_0,
            _ => TlsVersion::V1_2,
        }
    }

    fn write_record(&mut self, content_type: ContentType, plaintext: &[u8]) -> Result<(), Error> {
        let version_for_header = self.record_version_for_header();
        let chunk_size = self.max_fragment_length.max(1) as usize;
        for chunk in plaintext.chunks(chunk_size) {
            let (wire_type, body) = if self.write_protected {
                if self.version13 {
                    (ContentType::ApplicationData, self.tls13_protect(content_type, chunk)?)
                } else {
                    (content_type, self.tls12_protect(content_type, chunk)?)
                }
            } else {
                (content_type, chunk.to_vec())
            };
            let header = RecordHeader::ser(wire_type, version_for_header, body.len() as u16);
            self.out.write_bytes(header.as_bytes())?;
            self.out.write_bytes(&body)?;
            self.wire_bytes_out += (RecordHeader::LEN + body.len()) as u64;
        }
        self.flush_out()
    }

    fn tls13_protect(&mut self, content_type: ContentType, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let as_client = self.role == Role::Client;
        let key_len = tls13_key_len(self.cipher_suite.ok_or(Error::HandshakeState)?);
        let (key, nonce) = self
            .key_schedule
            .write_key_and_nonce(as_client, key_len)
            .ok_or(Error::KeyInit)?;

        let mut inner = plaintext.to_vec();
        inner.push(content_type.into());

        let version_bytes: [u8; 2] = TlsVersion::V1_2.into();
        let mut aad = Vec::with_capacity(5);
        aad.push(u8::from(ContentType::ApplicationData));
        aad.extend_from_slice(&version_bytes);
        aad.extend_from_slice(&((inner.len() + 16) as u16).to_be_bytes());

        if key_len == 16 {
            let k: [u8; 16] = key.as_slice().try_into().map_err(|_| Error::KeyInit)?;
            crypto::aead::seal_aes128(&k, &nonce, &aad, &mut inner)?;
        } else {
            let k: [u8; 32] = key.as_slice().try_into().map_err(|_| Error::KeyInit)?;
            crypto::aead::seal_aes256(&k, &nonce, &aad, &mut inner)?;
        }
        self.key_schedule.increment_write_record_sequence_number();
        Ok(inner)
    }

    fn tls12_protect(&mut self, content_type: ContentType, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let suite = self.cipher_suite.ok_or(Error::HandshakeState)?;
        let keys = self.tls12_keys.as_ref().ok_or(Error::HandshakeState)?;
        let as_client = self.role == Role::Client;
        let (write_key, write_mac_key, write_iv) = if as_client {
            (&keys.block.client_write_key, &keys.block.client_mac_key, &keys.block.client_write_iv)
        } else {
            (&keys.block.server_write_key, &keys.block.server_mac_key, &keys.block.server_write_iv)
        };
        let seq = self.tls12_write_seq;
        self.tls12_write_seq = self.tls12_write_seq.checked_add(1).ok_or(Error::RecordLimit)?;
        let version_bytes: [u8; 2] = self.negotiated_version.unwrap_or(TlsVersion::V1_2).into();

        match keys.record_alg {
            RecordAlg::Aead => {
                let mut explicit_nonce = [0u8; 8];
                OsRng.fill_bytes(&mut explicit_nonce);
                let mut nonce = [0u8; 12];
                nonce[..4].copy_from_slice(write_iv);
                nonce[4..].copy_from_slice(&explicit_nonce);
                let mut aad = Vec::with_capacity(13);
                aad.extend_from_slice(&seq.to_be_bytes());
                aad.push(content_type.into());
                aad.extend_from_slice(&version_bytes);
                aad.extend_from_slice(&(plaintext.len() as u16).to_be_bytes());
                let mut buf = plaintext.to_vec();
                if write_key.len() == 16 {
                    let k: [u8; 16] = write_key.as_slice().try_into().map_err(|_| Error::KeyInit)?;
                    crypto::aead::seal_aes128(&k, &nonce, &aad, &mut buf)?;
                } else {
                    let k: [u8; 32] = write_key.as_slice().try_into().map_err(|_| Error::KeyInit)?;
                    crypto::aead::seal_aes256(&k, &nonce, &aad, &mut buf)?;
                }
                let mut out = explicit_nonce.to_vec();
                out.extend_from_slice(&buf);
                Ok(out)
            }
            RecordAlg::Composite => {
                let block_cipher = keys.block_cipher.unwrap_or_else(|| block_cipher_for_suite(suite));
                let mut iv = vec![0u8; block_cipher.block_size()];
                OsRng.fill_bytes(&mut iv);
                crypto::cbc::seal(block_cipher, write_key, &iv, write_mac_key, seq, content_type.into(), version_bytes, plaintext)
            }
            RecordAlg::Stream => Err(Error::CipherNotSupported),
        }
    }

    fn unprotect_record(&mut self, wire_type: ContentType, body: &[u8]) -> Result<(ContentType, Vec<u8>), Error> {
        if self.version13 {
            if wire_type == ContentType::ChangeCipherSpec {
                return Ok((wire_type, body.to_vec()));
            }
            if wire_type != ContentType::ApplicationData {
                return Err(Error::BadMessage);
            }
            let as_client = self.role == Role::Client;
            let key_len = tls13_key_len(self.cipher_suite.ok_or(Error::HandshakeState)?);
            let (key, nonce) = self
                .key_schedule
                .read_key_and_nonce(as_client, key_len)
                .ok_or(Error::KeyInit)?;
            let version_bytes: [u8; 2] = TlsVersion::V1_2.into();
            let mut aad = Vec::with_capacity(5);
            aad.push(u8::from(ContentType::ApplicationData));
            aad.extend_from_slice(&version_bytes);
            aad.extend_from_slice(&(body.len() as u16).to_be_bytes());
            let mut buf = body.to_vec();
            if key_len == 16 {
                let k: [u8; 16] = key.as_slice().try_into().map_err(|_| Error::KeyInit)?;
                crypto::aead::open_aes128(&k, &nonce, &aad, &mut buf)?;
            } else {
                let k: [u8; 32] = key.as_slice().try_into().map_err(|_| Error::KeyInit)?;
                crypto::aead::open_aes256(&k, &nonce, &aad, &mut buf)?;
            }
            self.key_schedule.increment_read_record_sequence_number();
            while buf.last() == Some(&0) {
                buf.pop();
            }
            let content_type_byte = buf.pop().ok_or(Error::BadMessage)?;
            let content_type = ContentType::try_from(content_type_byte).map_err(|_| Error::BadMessage)?;
            Ok((content_type, buf))
        } else {
            let suite = self.cipher_suite.ok_or(Error::HandshakeState)?;
            let keys = self.tls12_keys.as_ref().ok_or(Error::HandshakeState)?;
            let as_client = self.role == Role::Client;
            let (read_key, read_mac_key, read_iv_fixed) = if as_client {
                (&keys.block.server_write_key, &keys.block.server_mac_key, &keys.block.server_write_iv)
            } else {
                (&keys.block.client_write_key, &keys.block.client_mac_key, &keys.block.client_write_iv)
            };
            let seq = self.tls12_read_seq;
            self.tls12_read_seq = self.tls12_read_seq.checked_add(1).ok_or(Error::RecordLimit)?;
            let version_bytes: [u8; 2] = self.negotiated_version.unwrap_or(TlsVersion::V1_2).into();

            match keys.record_alg {
                RecordAlg::Aead => {
                    if body.len() < 8 {
                        return Err(Error::Decrypt);
                    }
                    let (explicit_nonce, ct) = body.split_at(8);
                    let mut nonce = [0u8; 12];
                    nonce[..4].copy_from_slice(read_iv_fixed);
                    nonce[4..].copy_from_slice(explicit_nonce);
                    let plaintext_len = ct.len().checked_sub(16).ok_or(Error::Decrypt)?;
                    let mut aad = Vec::with_capacity(13);
                    aad.extend_from_slice(&seq.to_be_bytes());
                    aad.push(wire_type.into());
                    aad.extend_from_slice(&version_bytes);
                    aad.extend_from_slice(&(plaintext_len as u16).to_be_bytes());
                    let mut buf = ct.to_vec();
                    if read_key.len() == 16 {
                        let k: [u8; 16] = read_key.as_slice().try_into().map_err(|_| Error::Decrypt)?;
                        crypto::aead::open_aes128(&k, &nonce, &aad, &mut buf)?;
                    } else {
                        let k: [u8; 32] = read_key.as_slice().try_into().map_err(|_| Error::Decrypt)?;
                        crypto::aead::open_aes256(&k, &nonce, &aad, &mut buf)?;
                    }
                    Ok((wire_type, buf))
                }
                RecordAlg::Composite => {
                    let block_cipher = keys.block_cipher.unwrap_or_else(|| block_cipher_for_suite(suite));
                    let plaintext = crypto::cbc::open(block_cipher, read_key, read_mac_key, seq, wire_type.into(), version_bytes, body)?;
                    Ok((wire_type, plaintext))
                }
                RecordAlg::Stream => Err(Error::CipherNotSupported),
            }
        }
    }

    fn read_one_record(&mut self) -> Result<(ContentType, Vec<u8>), Error> {
        let reader = self.reader.as_mut().ok_or(Error::Internal("no reader set"))? as &mut dyn Read;
        io_read(reader, &mut self.header_in, RecordHeader::LEN)?;
        let mut hdr_bytes = [0u8; RecordHeader::LEN];
        self.header_in.read_bytes(&mut hdr_bytes)?;
        self.header_in.wipe();
        let header = RecordHeader::deser(hdr_bytes).map_err(Error::AlertReceived)?;
        header.validate_fragment_length(self.version13).map_err(Error::AlertReceived)?;

        let len = usize::from(header.length());
        let reader = self.reader.as_mut().ok_or(Error::Internal("no reader set"))? as &mut dyn Read;
        io_read(reader, &mut self.body_in, len)?;
        let mut body = vec![0u8; len];
        self.body_in.read_bytes(&mut body)?;
        self.body_in.wipe();
        self.wire_bytes_in += (RecordHeader::LEN + len) as u64;

        if self.read_protected {
            self.unprotect_record(header.content_type(), &body)
        } else {
            Ok((header.content_type(), body))
        }
    }

    /// Reads complete TLS records until a full handshake message has
    /// accumulated in `handshake_in`, handling interleaved
    /// `ChangeCipherSpec` (accepted and ignored, for middlebox
    /// compatibility) and `Alert` records along the way.
    fn next_handshake_message(&mut self) -> Result<HandshakeMessage, Error> {
        loop {
            if self.handshake_in.data_available() >= HandshakeHeader::LEN {
                let hdr_bytes: [u8; HandshakeHeader::LEN] =
                    self.handshake_in.unread_slice()[..HandshakeHeader::LEN].try_into().unwrap();
                let header = HandshakeHeader::from(hdr_bytes);
                let total = header.length_with_header() as usize;
                if self.handshake_in.data_available() >= total {
                    let mut raw = vec![0u8; total];
                    self.handshake_in.read_bytes(&mut raw)?;
                    let msg_type = header.msg_type().map_err(|_| Error::BadMessage)?;
                    let body = raw[HandshakeHeader::LEN..].to_vec();
                    return Ok(HandshakeMessage { msg_type, body, raw });
                }
            }
            let (content_type, data) = self.read_one_record()?;
            match content_type {
                ContentType::Handshake => self.handshake_in.write_bytes(&data)?,
                ContentType::ChangeCipherSpec => continue,
                ContentType::Alert => {
                    if data.len() < 2 {
                        return Err(Error::BadMessage);
                    }
                    let level = AlertLevel::try_from(data[0]).map_err(|_| Error::BadMessage)?;
                    let description = AlertDescription::try_from(data[1]).map_err(|_| Error::BadMessage)?;
                    let alert = Alert { level, description };
                    self.alert_in = Some(alert);
                    if level == AlertLevel::Fatal || description == AlertDescription::CloseNotify {
                        self.closed = true;
                        return Err(Error::AlertReceived(description));
                    }
                }
                ContentType::ApplicationData => return Err(Error::UnexpectedMessage),
            }
        }
    }

    /// Append a received message's raw bytes to the running transcript.
    /// Split out from `next_handshake_message` so `CertificateVerify` can
    /// be verified against the transcript hash *before* its own bytes are
    /// folded in.
    fn record_handshake_message(&mut self, raw: &[u8]) {
        self.transcript_raw.extend_from_slice(raw);
        if self.version13 {
            self.key_schedule.update_transcript_hash(raw);
        }
    }

    /// Serializes and queues an outgoing handshake message. `raw` is the
    /// full header+body wire bytes. `already_hashed` is `true` for
    /// messages built through `TranscriptWriter` (which feeds
    /// `key_schedule`'s transcript hash as it serializes); `false` for
    /// `Finished`/`ClientKeyExchange`, which are plain byte builders with
    /// no transcript side effect of their own.
    fn send_handshake_message(&mut self, raw: Vec<u8>, already_hashed: bool) -> Result<(), Error> {
        self.transcript_raw.extend_from_slice(&raw);
        if self.version13 && !already_hashed {
            self.key_schedule.update_transcript_hash(&raw);
        }
        self.write_record(ContentType::Handshake, &raw)
    }

    /// If the negotiated TLS 1.3 cipher suite's transcript hash differs
    /// from the SHA-256 guess `key_schedule` was built with before the
    /// suite was known, reinitialize it with the right hash and replay
    /// every handshake message seen so far.
    fn maybe_upgrade_key_schedule_hash(&mut self, suite: CipherSuite) {
        let needed = if suite == CipherSuite::TLS_AES_256_GCM_SHA384 {
            HashAlg::Sha384
        } else {
            HashAlg::Sha256
        };
        // `KeySchedule` does not expose its own hash_alg, so we detect a
        // mismatch indirectly: Sha384 is only ever needed for that one
        // suite, and the default constructed in `new()` is always Sha256.
        if needed == HashAlg::Sha384 {
            self.key_schedule = KeySchedule::new(HashAlg::Sha384);
            self.key_schedule.update_transcript_hash(&self.transcript_raw);
        }
    }

    // ---- certificate / key selection ---------------------------------

    fn select_certified_key<'a>(&self, config: &'a Config, client_schemes: &[SignatureScheme]) -> Option<(usize, &'a CertifiedKey)> {
        if client_schemes.is_empty() {
            return None;
        }
        let wants_ecdsa = client_schemes.iter().any(|s| {
            matches!(
                s,
                SignatureScheme::EcdsaSecp256r1Sha256
                    | SignatureScheme::EcdsaSecp384r1Sha384
                    | SignatureScheme::EcdsaSecp521r1Sha512
            )
        });
        let certified_keys = &config.certified_keys;
        if wants_ecdsa {
            if let Some((i, ck)) = certified_keys
                .iter()
                .enumerate()
                .find(|(_, ck)| matches!(ck.signing_key, SigningKey::Ecdsa(_)))
            {
                return Some((i, ck));
            }
        }
        certified_keys
            .iter()
            .enumerate()
            .find(|(_, ck)| matches!(ck.signing_key, SigningKey::Rsa(_)))
    }

    fn certified_key(&self) -> Result<&CertifiedKey, Error> {
        let idx = self.selected_cert.ok_or(Error::HandshakeState)?;
        // Safety net only: indexes into `self.config`, which must already
        // be set by the time a cert is selected.
        Ok(&self.config.as_ref().ok_or(Error::Internal("no config set"))?.certified_keys[idx])
    }

    // ---- public driving API ------------------------------------------

    pub fn negotiate(&mut self) -> Result<(), Error> {
        loop {
            match self.step {
                Step::Start => {
                    if self.role == Role::Client {
                        self.step = Step::ClientSendHello;
                    } else {
                        self.step = Step::ServerWaitClientHello;
                    }
                }
                Step::Established => return Ok(()),

                Step::ClientSendHello => {
                    self.client_send_hello()?;
                    self.step = Step::ClientWaitServerHello;
                }
                Step::ClientWaitServerHello => {
                    self.client_recv_server_hello()?;
                    self.step = if self.version13 {
                        Step::ClientWaitEncryptedExtensions13
                    } else {
                        Step::ClientWaitCertificate12
                    };
                }
                Step::ClientWaitEncryptedExtensions13 => {
                    self.client_recv_encrypted_extensions()?;
                    self.step = Step::ClientWaitCertificate13;
                }
                Step::ClientWaitCertificate13 => {
                    self.recv_certificate()?;
                    self.step = Step::ClientWaitCertificateVerify13;
                }
                Step::ClientWaitCertificateVerify13 => {
                    self.recv_certificate_verify(true)?;
                    self.step = Step::ClientWaitFinished13;
                }
                Step::ClientWaitFinished13 => {
                    self.client_finish_tls13()?;
                    self.step = Step::Established;
                }

                Step::ClientWaitCertificate12 => {
                    self.recv_certificate()?;
                    self.step = match legacy_key_exchange(self.cipher_suite.ok_or(Error::HandshakeState)?) {
                        LegacyKeyExchange::Ecdhe => Step::ClientWaitServerKeyExchange12,
                        LegacyKeyExchange::Rsa | LegacyKeyExchange::Dhe => Step::ClientWaitServerHelloDone12,
                    };
                }
                Step::ClientWaitServerKeyExchange12 => {
                    self.client_recv_server_key_exchange()?;
                    self.step = Step::ClientWaitServerHelloDone12;
                }
                Step::ClientWaitServerHelloDone12 => {
                    self.recv_empty_message(HandshakeType::ServerHelloDone)?;
                    self.step = Step::ClientSendKeyExchange12;
                }
                Step::ClientSendKeyExchange12 => {
                    self.client_send_key_exchange_12()?;
                    self.send_change_cipher_spec()?;
                    self.write_protected = true;
                    self.tls12_write_seq = 0;
                    self.client_send_finished_12()?;
                    self.step = Step::ClientWaitChangeCipherSpec12;
                }
                Step::ClientWaitChangeCipherSpec12 => {
                    self.recv_change_cipher_spec()?;
                    self.read_protected = true;
                    self.tls12_read_seq = 0;
                    self.step = Step::ClientWaitFinished12;
                }
                Step::ClientWaitFinished12 => {
                    self.recv_finished_12(false)?;
                    self.step = Step::Established;
                }

                Step::ServerWaitClientHello => {
                    self.server_recv_client_hello()?;
                    self.step = if self.version13 {
                        Step::ServerSendHello13
                    } else {
                        Step::ServerSendHello12
                    };
                }
                Step::ServerSendHello13 => {
                    self.server_send_hello_13()?;
                    self.step = Step::ServerSendEncryptedExtensions13;
                }
                Step::ServerSendEncryptedExtensions13 => {
                    self.server_send_encrypted_extensions()?;
                    self.step = Step::ServerSendCertificate13;
                }
                Step::ServerSendCertificate13 => {
                    self.send_certificate()?;
                    self.step = Step::ServerSendCertificateVerify13;
                }
                Step::ServerSendCertificateVerify13 => {
                    self.send_certificate_verify(true)?;
                    self.step = Step::ServerSendFinished13;
                }
                Step::ServerSendFinished13 => {
                    self.server_send_finished_13()?;
                    self.step = Step::ServerWaitFinished13;
                }
                Step::ServerWaitFinished13 => {
                    self.server_finish_tls13()?;
                    self.step = Step::Established;
                }

                Step::ServerSendHello12 => {
                    self.server_send_hello_12()?;
                    self.step = Step::ServerSendCertificate12;
                }
                Step::ServerSendCertificate12 => {
                    self.send_certificate()?;
                    self.step = match legacy_key_exchange(self.cipher_suite.ok_or(Error::HandshakeState)?) {
                        LegacyKeyExchange::Ecdhe => Step::ServerSendServerKeyExchange12,
                        LegacyKeyExchange::Rsa | LegacyKeyExchange::Dhe => Step::ServerSendServerHelloDone12,
                    };
                }
                Step::ServerSendServerKeyExchange12 => {
                    self.server_send_server_key_exchange()?;
                    self.step = Step::ServerSendServerHelloDone12;
                }
                Step::ServerSendServerHelloDone12 => {
                    self.send_empty_message(HandshakeType::ServerHelloDone)?;
                    self.step = Step::ServerWaitClientKeyExchange12;
                }
                Step::ServerWaitClientKeyExchange12 => {
                    self.server_recv_client_key_exchange()?;
                    self.step = Step::ServerWaitChangeCipherSpec12;
                }
                Step::ServerWaitChangeCipherSpec12 => {
                    self.recv_change_cipher_spec()?;
                    self.read_protected = true;
                    self.tls12_read_seq = 0;
                    self.step = Step::ServerWaitFinished12;
                }
                Step::ServerWaitFinished12 => {
                    self.recv_finished_12(true)?;
                    self.step = Step::ServerSendFinished12;
                }
                Step::ServerSendFinished12 => {
                    self.send_change_cipher_spec()?;
                    self.write_protected = true;
                    self.tls12_write_seq = 0;
                    self.server_send_finished_12()?;
                    self.step = Step::Established;
                }
            }
        }
    }

    pub fn send(&mut self, buf: &[u8]) -> Result<usize, Error> {
        if self.step != Step::Established {
            return Err(Error::HandshakeState);
        }
        if self.closed {
            return Err(Error::Closed);
        }
        self.write_record(ContentType::ApplicationData, buf)?;
        Ok(buf.len())
    }

    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if self.step != Step::Established {
            return Err(Error::HandshakeState);
        }
        loop {
            let (content_type, data) = self.read_one_record()?;
            match content_type {
                ContentType::ApplicationData => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    return Ok(n);
                }
                ContentType::Handshake => {
                    // Post-handshake messages (KeyUpdate, NewSessionTicket)
                    // are out of scope; ignore rather than fail the read.
                    continue;
                }
                ContentType::ChangeCipherSpec => continue,
                ContentType::Alert => {
                    if data.len() < 2 {
                        return Err(Error::BadMessage);
                    }
                    let level = AlertLevel::try_from(data[0]).map_err(|_| Error::BadMessage)?;
                    let description = AlertDescription::try_from(data[1]).map_err(|_| Error::BadMessage)?;
                    self.alert_in = Some(Alert { level, description });
                    if description == AlertDescription::CloseNotify {
                        self.closed = true;
                        return Err(Error::Closed);
                    }
                    self.closed = true;
                    return Err(Error::AlertReceived(description));
                }
            }
        }
    }

    pub fn shutdown(&mut self) -> Result<(), Error> {
        if self.closing {
            return self.flush_out();
        }
        self.closing = true;
        let alert = Alert::new_warning(AlertDescription::CloseNotify);
        self.write_record(ContentType::Alert, &[alert.level as u8, alert.description as u8])?;
        self.closed = true;
        Ok(())
    }

    // ---- client-side handshake steps ----------------------------------

    fn client_send_hello(&mut self) -> Result<(), Error> {
        let config = self.config()?;
        OsRng.fill_bytes(&mut self.client_random);
        let public_key = self.key_schedule.new_client_secp256r1_secret(&mut OsRng);
        self.offered_cipher_suites = config.cipher_preferences.clone();

        let mut supported_versions = Vec::new();
        if config.minimum_protocol_version <= TlsVersion::V1_3 {
            supported_versions.push(TlsVersion::V1_3);
        }
        supported_versions.push(TlsVersion::V1_2);

        let params = ClientHelloParams {
            random: self.client_random,
            server_name: self.server_name.as_deref(),
            cipher_suites: &self.offered_cipher_suites,
            supported_versions: &supported_versions,
            key_shares: &[KeyShareOffer { group: NamedGroup::secp256r1, public_key: public_key.to_vec() }],
            signature_schemes: CLIENT_SIGNATURE_SCHEMES,
            psk: None,
            alpn: &self.application_protocols,
            record_size_limit: None,
        };

        let mut tmp = Stuffer::growable();
        client_hello::ser(&mut tmp, &mut self.key_schedule, &params)?;
        let raw = tmp.unread_slice().to_vec();
        self.send_handshake_message(raw, true)
    }

    fn client_recv_server_hello(&mut self) -> Result<(), Error> {
        let msg = self.next_handshake_message()?;
        if msg.msg_type != HandshakeType::ServerHello {
            return Err(Error::UnexpectedMessage);
        }
        let result = recv_server_hello(&msg.body, &self.offered_cipher_suites, &self.offered_groups, false)
            .map_err(Error::AlertReceived)?;

        self.cipher_suite = Some(result.cipher_suite);
        self.negotiated_version = Some(result.version);
        self.version13 = result.version == TlsVersion::V1_3;
        self.server_random = result.random;

        if self.version13 {
            self.maybe_upgrade_key_schedule_hash(result.cipher_suite);
            self.record_handshake_message(&msg.raw);
            let key_share = result.key_share.ok_or(Error::HandshakeState)?;
            match key_share {
                PeerPublicKey::Secp256r1(pk) => self.key_schedule.set_server_secp256r1_public_key(pk),
                PeerPublicKey::X25519(pk) => self.key_schedule.set_server_x25519_public_key(pk),
            }
            self.key_schedule.initialize_early_secret();
            self.key_schedule.initialize_handshake_secret();
            self.read_protected = true;
        } else {
            self.record_handshake_message(&msg.raw);
            self.uses_split = matches!(result.version, TlsVersion::V1_0 | TlsVersion::V1_1);
            self.prf_key_schedule = Some(PrfKeySchedule::new(self.uses_split, HashAlg::Sha256));
        }
        Ok(())
    }

    fn client_recv_encrypted_extensions(&mut self) -> Result<(), Error> {
        let msg = self.next_handshake_message()?;
        if msg.msg_type != HandshakeType::EncryptedExtensions {
            return Err(Error::UnexpectedMessage);
        }
        let result = recv_encrypted_extensions(&msg.body).map_err(Error::AlertReceived)?;
        self.record_handshake_message(&msg.raw);
        self.application_protocol = result.alpn;
        Ok(())
    }

    fn recv_certificate(&mut self) -> Result<(), Error> {
        let msg = self.next_handshake_message()?;
        if msg.msg_type != HandshakeType::Certificate {
            return Err(Error::UnexpectedMessage);
        }
        let chain = certificate::parse(&msg.body).map_err(Error::AlertReceived)?;
        self.record_handshake_message(&msg.raw);
        let leaf = chain.first().ok_or(Error::BadMessage)?;
        self.peer_verifying_key = Some(crypto::cert::leaf_verifying_key(leaf)?);
        Ok(())
    }

    fn recv_certificate_verify(&mut self, is_server_message: bool) -> Result<(), Error> {
        let transcript_hash_before = self.key_schedule.transcript_hash();
        let msg = self.next_handshake_message()?;
        if msg.msg_type != HandshakeType::CertificateVerify {
            return Err(Error::UnexpectedMessage);
        }
        let verifying_key = self.peer_verifying_key.as_ref().ok_or(Error::HandshakeState)?;
        certificate_verify::verify(
            &msg.body,
            is_server_message,
            &transcript_hash_before.finalize_clone(),
            verifying_key,
        )
        .map_err(Error::AlertReceived)?;
        self.record_handshake_message(&msg.raw);
        Ok(())
    }

    fn client_finish_tls13(&mut self) -> Result<(), Error> {
        let msg = self.next_handshake_message()?;
        if msg.msg_type != HandshakeType::Finished {
            return Err(Error::UnexpectedMessage);
        }
        self.record_handshake_message(&msg.raw);
        self.key_schedule.verify_finished(true, &msg.body).map_err(Error::AlertReceived)?;

        let own_verify_data = self.key_schedule.finished_verify_data(true);
        let finished_bytes = finished_message(&own_verify_data);
        self.write_record(ContentType::Handshake, &finished_bytes)?;
        self.key_schedule.initialize_master_secret();
        self.transcript_raw.extend_from_slice(&finished_bytes);
        self.key_schedule.update_transcript_hash(&finished_bytes);
        Ok(())
    }

    fn recv_empty_message(&mut self, expected: HandshakeType) -> Result<(), Error> {
        let msg = self.next_handshake_message()?;
        if msg.msg_type != expected {
            return Err(Error::UnexpectedMessage);
        }
        self.record_handshake_message(&msg.raw);
        Ok(())
    }

    fn send_empty_message(&mut self, msg_type: HandshakeType) -> Result<(), Error> {
        let mut tmp = Stuffer::growable();
        let mut w = TranscriptWriter { stuffer: &mut tmp, key_schedule: &mut self.key_schedule };
        w.write_u8(u8::from(msg_type))?;
        w.write_u24(0)?;
        let raw = tmp.unread_slice().to_vec();
        self.transcript_raw.extend_from_slice(&raw);
        self.write_record(ContentType::Handshake, &raw)
    }

    fn client_recv_server_key_exchange(&mut self) -> Result<(), Error> {
        let msg = self.next_handshake_message()?;
        if msg.msg_type != HandshakeType::ServerKeyExchange {
            return Err(Error::UnexpectedMessage);
        }
        let verifying_key = self.peer_verifying_key.as_ref().ok_or(Error::HandshakeState)?;
        let result = server_key_exchange::recv(&msg.body, &self.client_random, &self.server_random, verifying_key)
            .map_err(Error::AlertReceived)?;
        self.record_handshake_message(&msg.raw);

        let peer_public = crypto::ecdh::public_key_from_sec1_bytes(&result.public_key).ok_or(Error::KeyAgreement)?;
        let (secret, public_key) = crypto::ecdh::keygen(&mut OsRng);
        let shared = crypto::ecdh::diffie_hellman(&secret, &peer_public);
        self.finish_tls12_key_exchange(public_key.to_vec(), shared.to_vec(), true)
    }

    fn client_send_key_exchange_12(&mut self) -> Result<(), Error> {
        let suite = self.cipher_suite.ok_or(Error::HandshakeState)?;
        match legacy_key_exchange(suite) {
            LegacyKeyExchange::Ecdhe => {
                // The ECDHE key/master secret were already derived in
                // `client_recv_server_key_exchange`; just send our public key.
                let public_key = self.pending_client_ecdhe_public.take().ok_or(Error::HandshakeState)?;
                let mut tmp = Stuffer::growable();
                let key_array: [u8; 65] = public_key.as_slice().try_into().map_err(|_| Error::KeyAgreement)?;
                client_key_exchange::ser_ecdhe(&mut tmp, &key_array)?;
                let raw = tmp.unread_slice().to_vec();
                self.send_handshake_message(raw, false)
            }
            LegacyKeyExchange::Rsa | LegacyKeyExchange::Dhe => {
                let verifying_key = self.peer_verifying_key.as_ref().ok_or(Error::HandshakeState)?;
                let mut pre_master_secret = vec![0u8; 48];
                let version_bytes: [u8; 2] = TlsVersion::V1_2.into();
                pre_master_secret[0] = version_bytes[0];
                pre_master_secret[1] = version_bytes[1];
                OsRng.fill_bytes(&mut pre_master_secret[2..]);

                let encrypted = match verifying_key {
                    VerifyingKey::Rsa(pk) => pk
                        .encrypt(&mut OsRng, Pkcs1v15Encrypt, &pre_master_secret)
                        .map_err(|_| Error::Encrypt)?,
                    VerifyingKey::Ecdsa(_) => return Err(Error::CipherNotSupported),
                };
                let mut tmp = Stuffer::growable();
                client_key_exchange::ser_rsa(&mut tmp, &encrypted)?;
                let raw = tmp.unread_slice().to_vec();
                self.derive_tls12_keys(&pre_master_secret)?;
                self.send_handshake_message(raw, false)
            }
        }
    }

    fn client_send_finished_12(&mut self) -> Result<(), Error> {
        self.send_finished_12(true)
    }

    // ---- server-side handshake steps -----------------------------------

    fn server_recv_client_hello(&mut self) -> Result<(), Error> {
        let config = self.config()?;
        let msg = self.next_handshake_message()?;
        if msg.msg_type != HandshakeType::ClientHello {
            return Err(Error::UnexpectedMessage);
        }
        let result = client_hello::recv(&msg.body).map_err(Error::AlertReceived)?;
        self.record_handshake_message(&msg.raw);

        self.client_random = result.random;
        self.server_name = result.server_name.clone();

        let use_13 = result.supported_versions.contains(&TlsVersion::V1_3)
            && config.minimum_protocol_version <= TlsVersion::V1_3
            && result.key_shares.iter().any(|(g, _)| *g == NamedGroup::secp256r1);
        let version = if use_13 {
            TlsVersion::V1_3
        } else if result.supported_versions.contains(&TlsVersion::V1_2) || result.supported_versions.is_empty() {
            TlsVersion::V1_2
        } else {
            return Err(Error::AlertReceived(AlertDescription::ProtocolVersion));
        };

        let suite = crate::cipher_suites::negotiate_cipher_suite(&config.cipher_preferences, &result.cipher_suites, version)
            .ok_or(Error::AlertReceived(AlertDescription::HandshakeFailure))?;

        let (idx, _) = self
            .select_certified_key(&config, &result.signature_schemes)
            .ok_or(Error::AlertReceived(AlertDescription::HandshakeFailure))?;
        self.selected_cert = Some(idx);

        self.cipher_suite = Some(suite);
        self.negotiated_version = Some(version);
        self.version13 = version == TlsVersion::V1_3;

        if !self.version13 {
            self.uses_split = matches!(version, TlsVersion::V1_0 | TlsVersion::V1_1);
            self.prf_key_schedule = Some(PrfKeySchedule::new(self.uses_split, HashAlg::Sha256));
        }

        if self.version13 {
            let offered_secp256r1 = result
                .key_shares
                .iter()
                .find(|(g, _)| *g == NamedGroup::secp256r1)
                .map(|(_, k)| k.clone())
                .ok_or(Error::AlertReceived(AlertDescription::HandshakeFailure))?;
            let peer_public = crypto::ecdh::public_key_from_sec1_bytes(
                offered_secp256r1.as_slice().try_into().map_err(|_| Error::KeyAgreement)?,
            )
            .ok_or(Error::KeyAgreement)?;
            self.key_schedule.set_server_secp256r1_public_key(peer_public);
        }

        self.application_protocols_offered_by_peer = result.alpn;
        Ok(())
    }

    fn server_send_hello_13(&mut self) -> Result<(), Error> {
        OsRng.fill_bytes(&mut self.server_random);
        self.maybe_upgrade_key_schedule_hash(self.cipher_suite.ok_or(Error::HandshakeState)?);
        let public_key = self.key_schedule.new_client_secp256r1_secret(&mut OsRng);

        let params = ServerHelloParams {
            random: self.server_random,
            cipher_suite: self.cipher_suite.ok_or(Error::HandshakeState)?,
            tls13_key_share: Some(ServerKeyShare { group: NamedGroup::secp256r1, public_key: &public_key }),
        };
        let mut tmp = Stuffer::growable();
        ser_server_hello(&mut tmp, &mut self.key_schedule, &params)?;
        let raw = tmp.unread_slice().to_vec();
        self.send_handshake_message(raw, true)?;

        self.key_schedule.initialize_early_secret();
        self.key_schedule.initialize_handshake_secret();
        self.read_protected = true;
        self.write_protected = true;
        Ok(())
    }

    fn server_send_encrypted_extensions(&mut self) -> Result<(), Error> {
        let alpn = self.negotiate_alpn();
        let mut tmp = Stuffer::growable();
        ser_encrypted_extensions(&mut tmp, &mut self.key_schedule, alpn.as_deref())?;
        let raw = tmp.unread_slice().to_vec();
        self.application_protocol = alpn;
        self.send_handshake_message(raw, true)
    }

    fn negotiate_alpn(&self) -> Option<Vec<u8>> {
        self.application_protocols
            .iter()
            .find(|p| self.application_protocols_offered_by_peer.contains(p))
            .cloned()
    }

    fn send_certificate(&mut self) -> Result<(), Error> {
        let chain = self.certified_key()?.chain.clone();
        let mut tmp = Stuffer::growable();
        certificate::ser(&mut tmp, &mut self.key_schedule, &[], &chain)?;
        let raw = tmp.unread_slice().to_vec();
        self.send_handshake_message(raw, true)
    }

    fn send_certificate_verify(&mut self, is_server_message: bool) -> Result<(), Error> {
        let signing_key = self.certified_key()?.signing_key.clone();
        let mut tmp = Stuffer::growable();
        certificate_verify::ser(&mut tmp, &mut self.key_schedule, is_server_message, &signing_key)?;
        let raw = tmp.unread_slice().to_vec();
        self.send_handshake_message(raw, true)
    }

    fn server_send_finished_13(&mut self) -> Result<(), Error> {
        let own_verify_data = self.key_schedule.finished_verify_data(false);
        let finished_bytes = finished_message(&own_verify_data);
        self.write_record(ContentType::Handshake, &finished_bytes)?;
        self.transcript_raw.extend_from_slice(&finished_bytes);
        self.key_schedule.update_transcript_hash(&finished_bytes);
        Ok(())
    }

    fn server_finish_tls13(&mut self) -> Result<(), Error> {
        // See the module doc: the transcript cut for Derive-Secret includes
        // the server's own Finished but not the client's, while the read
        // key used to decrypt the client's Finished must still be the
        // handshake-traffic key. Snapshot the transcript right after our
        // own Finished, verify the peer under the still-current handshake
        // secret, then restore the snapshot before deriving application
        // traffic secrets.
        let cut_hash = self.key_schedule.transcript_hash();
        let msg = self.next_handshake_message()?;
        if msg.msg_type != HandshakeType::Finished {
            return Err(Error::UnexpectedMessage);
        }
        self.key_schedule.verify_finished(false, &msg.body).map_err(Error::AlertReceived)?;
        self.transcript_raw.extend_from_slice(&msg.raw);

        self.key_schedule.set_transcript_hash(cut_hash);
        self.key_schedule.initialize_master_secret();
        Ok(())
    }

    fn server_send_hello_12(&mut self) -> Result<(), Error> {
        OsRng.fill_bytes(&mut self.server_random);
        let params = ServerHelloParams {
            random: self.server_random,
            cipher_suite: self.cipher_suite.ok_or(Error::HandshakeState)?,
            tls13_key_share: None,
        };
        let mut tmp = Stuffer::growable();
        ser_server_hello(&mut tmp, &mut self.key_schedule, &params)?;
        let raw = tmp.unread_slice().to_vec();
        self.record_handshake_message(&raw);
        self.write_record(ContentType::Handshake, &raw)
    }

    fn server_send_server_key_exchange(&mut self) -> Result<(), Error> {
        let (secret, public_key) = crypto::ecdh::keygen(&mut OsRng);
        self.pending_client_ecdhe_public = None;
        self.client_ecdhe_secret = Some(secret);

        let mut signed_params = Vec::with_capacity(32 + 32 + 1 + 2 + 1 + public_key.len());
        signed_params.extend_from_slice(&self.client_random);
        signed_params.extend_from_slice(&self.server_random);
        signed_params.push(3); // named_curve
        signed_params.extend_from_slice(&(NamedGroup::secp256r1 as u16).to_be_bytes());
        signed_params.push(public_key.len() as u8);
        signed_params.extend_from_slice(&public_key);

        let signing_key = self.certified_key()?.signing_key.clone();
        let signature = signing_key.sign(&signed_params)?;

        let mut tmp = Stuffer::growable();
        server_key_exchange::ser(&mut tmp, &public_key, &signature)?;
        let raw = tmp.unread_slice().to_vec();
        self.send_handshake_message(raw, false)
    }

    fn server_recv_client_key_exchange(&mut self) -> Result<(), Error> {
        let msg = self.next_handshake_message()?;
        if msg.msg_type != HandshakeType::ClientKeyExchange {
            return Err(Error::UnexpectedMessage);
        }
        let suite = self.cipher_suite.ok_or(Error::HandshakeState)?;
        match legacy_key_exchange(suite) {
            LegacyKeyExchange::Ecdhe => {
                let client_public = client_key_exchange::recv_ecdhe(&msg.body).map_err(Error::AlertReceived)?;
                self.record_handshake_message(&msg.raw);
                let peer_public = crypto::ecdh::public_key_from_sec1_bytes(&client_public).ok_or(Error::KeyAgreement)?;
                let secret = self.client_ecdhe_secret.take().ok_or(Error::HandshakeState)?;
                let shared = crypto::ecdh::diffie_hellman(&secret, &peer_public);
                self.derive_tls12_keys(&shared)
            }
            LegacyKeyExchange::Rsa | LegacyKeyExchange::Dhe => {
                let encrypted = client_key_exchange::recv_rsa(&msg.body).map_err(Error::AlertReceived)?;
                self.record_handshake_message(&msg.raw);
                let signing_key = self.certified_key()?.signing_key.clone();
                let pre_master_secret = signing_key
                    .decrypt_pkcs1v15(&encrypted)
                    .unwrap_or_else(|_| {
                        // Bleichenbacher mitigation: proceed with a random
                        // pre-master-secret on decrypt failure rather than
                        // returning early, so the handshake fails only at
                        // the Finished MAC check, not at decrypt time.
                        let mut fallback = vec![0u8; 48];
                        OsRng.fill_bytes(&mut fallback);
                        fallback
                    });
                self.derive_tls12_keys(&pre_master_secret)
            }
        }
    }

    fn server_send_finished_12(&mut self) -> Result<(), Error> {
        self.send_finished_12(false)
    }

    // ---- shared TLS 1.2 helpers -----------------------------------------

    fn derive_tls12_keys(&mut self, pre_master_secret_or_shared: &[u8]) -> Result<(), Error> {
        let suite = self.cipher_suite.ok_or(Error::HandshakeState)?;
        let prf = self.prf_key_schedule.as_ref().ok_or(Error::HandshakeState)?;
        let master_secret = prf.master_secret(pre_master_secret_or_shared, &self.client_random, &self.server_random);
        let sizes = suite.key_material_sizes();
        let block = prf.key_block(&master_secret, &self.client_random, &self.server_random, sizes.mac_key_len, sizes.enc_key_len, sizes.fixed_iv_len);
        self.tls12_keys = Some(Tls12Keys {
            block,
            record_alg: suite.record_alg(),
            block_cipher: if suite.record_alg() == RecordAlg::Composite {
                Some(block_cipher_for_suite(suite))
            } else {
                None
            },
        });
        self.tls12_master_secret = Some(master_secret);
        Ok(())
    }

    fn finish_tls12_key_exchange(&mut self, public_key: Vec<u8>, shared_secret: Vec<u8>, _is_client: bool) -> Result<(), Error> {
        self.pending_client_ecdhe_public = Some(public_key);
        self.derive_tls12_keys(&shared_secret)
    }

    fn send_change_cipher_spec(&mut self) -> Result<(), Error> {
        self.write_record(ContentType::ChangeCipherSpec, &[1u8])
    }

    fn recv_change_cipher_spec(&mut self) -> Result<(), Error> {
        loop {
            let (content_type, data) = self.read_one_record()?;
            if content_type == ContentType::ChangeCipherSpec {
                if data != [1u8] {
                    return Err(Error::BadMessage);
                }
                return Ok(());
            }
        }
    }

    fn send_finished_12(&mut self, as_client: bool) -> Result<(), Error> {
        let label: &[u8] = if as_client { b"client finished" } else { b"server finished" };
        let verify_data = self.tls12_finished_verify_data(label)?;
        let finished_bytes = finished_message(&verify_data);
        self.transcript_raw.extend_from_slice(&finished_bytes);
        self.write_record(ContentType::Handshake, &finished_bytes)
    }

    fn recv_finished_12(&mut self, as_client_message: bool) -> Result<(), Error> {
        // `as_client_message` is whether the *peer's* Finished (the one we
        // are receiving) was computed with the "client finished" label.
        let expected_label: &[u8] = if as_client_message { b"client finished" } else { b"server finished" };
        let expected = self.tls12_finished_verify_data(expected_label)?;
        let msg = self.next_handshake_message()?;
        if msg.msg_type != HandshakeType::Finished {
            return Err(Error::UnexpectedMessage);
        }
        use subtle::ConstantTimeEq;
        if !bool::from(expected.as_slice().ct_eq(&msg.body)) {
            return Err(Error::AlertReceived(AlertDescription::DecryptError));
        }
        self.transcript_raw.extend_from_slice(&msg.raw);
        Ok(())
    }

    fn tls12_finished_verify_data(&self, label: &[u8]) -> Result<Vec<u8>, Error> {
        let prf = self.prf_key_schedule.as_ref().ok_or(Error::HandshakeState)?;
        let master_secret = self.tls12_master_secret.as_ref().ok_or(Error::HandshakeState)?;
        // TLS 1.0/1.1 hash the transcript with MD5 and SHA-1 and
        // concatenate both digests (RFC 2246/4346 7.4.9); TLS 1.2 hashes it
        // once with the cipher suite's PRF hash (SHA-256 for every suite
        // this crate negotiates at that level).
        let seed = if self.uses_split {
            let mut seed = crypto::hash::digest(HashAlg::Md5, &self.transcript_raw);
            seed.extend_from_slice(&crypto::hash::digest(HashAlg::Sha1, &self.transcript_raw));
            seed
        } else {
            crypto::hash::digest(HashAlg::Sha256, &self.transcript_raw)
        };
        Ok(prf.prf(master_secret, label, &seed, 12))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use p256::ecdsa::SigningKey as EcdsaSigningKey;

    use super::*;
    use crate::crypto::cbc::BlockCipher;

    fn bare_connection(role: Role) -> Connection<Cursor<Vec<u8>>, Vec<u8>> {
        let mut conn = Connection::new(role);
        conn.set_io(Cursor::new(Vec::new()), Vec::new());
        conn
    }

    /// Derive a matching pair of TLS 1.3 handshake traffic secrets for a
    /// client and a server `KeySchedule`, as if both had just processed
    /// the same ClientHello/ServerHello pair.
    fn matching_handshake_secrets() -> (KeySchedule, KeySchedule) {
        let mut client_ks = KeySchedule::new(HashAlg::Sha256);
        let mut server_ks = KeySchedule::new(HashAlg::Sha256);
        client_ks.update_transcript_hash(b"client hello || server hello");
        server_ks.update_transcript_hash(b"client hello || server hello");

        let client_pub = client_ks.new_client_secp256r1_secret(&mut OsRng);
        let server_pub = server_ks.new_client_secp256r1_secret(&mut OsRng);
        client_ks.set_server_secp256r1_public_key(
            crypto::ecdh::public_key_from_sec1_bytes(&server_pub).unwrap(),
        );
        server_ks.set_server_secp256r1_public_key(
            crypto::ecdh::public_key_from_sec1_bytes(&client_pub).unwrap(),
        );

        client_ks.initialize_early_secret();
        server_ks.initialize_early_secret();
        client_ks.initialize_handshake_secret();
        server_ks.initialize_handshake_secret();
        (client_ks, server_ks)
    }

    #[test]
    fn tls13_record_round_trips_between_client_and_server() {
        let (client_ks, server_ks) = matching_handshake_secrets();

        let mut client = bare_connection(Role::Client);
        client.key_schedule = client_ks;
        client.cipher_suite = Some(CipherSuite::TLS_AES_128_GCM_SHA256);
        client.version13 = true;

        let mut server = bare_connection(Role::Server);
        server.key_schedule = server_ks;
        server.cipher_suite = Some(CipherSuite::TLS_AES_128_GCM_SHA256);
        server.version13 = true;

        let ciphertext = client.tls13_protect(ContentType::Handshake, b"hello from client").unwrap();
        let (content_type, plaintext) =
            server.unprotect_record(ContentType::ApplicationData, &ciphertext).unwrap();
        assert_eq!(content_type, ContentType::Handshake);
        assert_eq!(plaintext, b"hello from client");
    }

    #[test]
    fn tls13_record_rejects_tampered_ciphertext() {
        let (client_ks, server_ks) = matching_handshake_secrets();

        let mut client = bare_connection(Role::Client);
        client.key_schedule = client_ks;
        client.cipher_suite = Some(CipherSuite::TLS_AES_128_GCM_SHA256);
        client.version13 = true;

        let mut server = bare_connection(Role::Server);
        server.key_schedule = server_ks;
        server.cipher_suite = Some(CipherSuite::TLS_AES_128_GCM_SHA256);
        server.version13 = true;

        let mut ciphertext = client.tls13_protect(ContentType::Handshake, b"hello from client").unwrap();
        *ciphertext.last_mut().unwrap() ^= 0x01;
        assert!(server.unprotect_record(ContentType::ApplicationData, &ciphertext).is_err());
    }

    #[test]
    fn tls13_record_replay_is_rejected_once_sequence_number_advances() {
        let (client_ks, server_ks) = matching_handshake_secrets();

        let mut client = bare_connection(Role::Client);
        client.key_schedule = client_ks;
        client.cipher_suite = Some(CipherSuite::TLS_AES_128_GCM_SHA256);
        client.version13 = true;

        let mut server = bare_connection(Role::Server);
        server.key_schedule = server_ks;
        server.cipher_suite = Some(CipherSuite::TLS_AES_128_GCM_SHA256);
        server.version13 = true;

        let first = client.tls13_protect(ContentType::Handshake, b"first").unwrap();
        let _second = client.tls13_protect(ContentType::Handshake, b"second").unwrap();

        // The first record decrypts fine against the still-fresh sequence number...
        let (_, plaintext) = server.unprotect_record(ContentType::ApplicationData, &first).unwrap();
        assert_eq!(plaintext, b"first");
        // ...but replaying it again fails once the read sequence number has moved on,
        // since the per-record nonce is derived from that counter.
        assert!(server.unprotect_record(ContentType::ApplicationData, &first).is_err());
    }

    fn tls12_keys_for_composite(block_cipher: BlockCipher) -> Tls12Keys {
        Tls12Keys {
            block: KeyBlock {
                client_mac_key: vec![0x11u8; 20],
                server_mac_key: vec![0x22u8; 20],
                client_write_key: vec![0x33u8; 16],
                server_write_key: vec![0x44u8; 16],
                client_write_iv: vec![0x55u8; block_cipher.block_size()],
                server_write_iv: vec![0x66u8; block_cipher.block_size()],
            },
            record_alg: RecordAlg::Composite,
            block_cipher: Some(block_cipher),
        }
    }

    #[test]
    fn tls12_composite_record_is_block_aligned_and_round_trips() {
        let mut client = bare_connection(Role::Client);
        client.cipher_suite = Some(CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA);
        client.negotiated_version = Some(TlsVersion::V1_2);
        client.tls12_keys = Some(tls12_keys_for_composite(BlockCipher::Aes128));

        let plaintext = b"a composite record payload";
        let wire = client.tls12_protect(ContentType::ApplicationData, plaintext).unwrap();
        let block_size = BlockCipher::Aes128.block_size();
        assert_eq!((wire.len() - block_size) % block_size, 0);

        let mut server = bare_connection(Role::Server);
        server.cipher_suite = Some(CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA);
        server.negotiated_version = Some(TlsVersion::V1_2);
        server.tls12_keys = Some(tls12_keys_for_composite(BlockCipher::Aes128));

        let (content_type, recovered) =
            server.unprotect_record(ContentType::ApplicationData, &wire).unwrap();
        assert_eq!(content_type, ContentType::ApplicationData);
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn write_record_splits_oversized_plaintext_at_the_fragment_bound() {
        let mut conn = bare_connection(Role::Client);
        let plaintext = vec![0xAAu8; (MAX_FRAGMENT_LEN as usize) * 2 + 1000];
        conn.write_record(ContentType::ApplicationData, &plaintext).unwrap();

        let written = conn.writer.as_ref().unwrap().clone();
        let mut offset = 0;
        let mut fragment_lens = Vec::new();
        while offset < written.len() {
            let header_bytes: [u8; RecordHeader::LEN] =
                written[offset..offset + RecordHeader::LEN].try_into().unwrap();
            let header = RecordHeader::deser(header_bytes).unwrap();
            let len = header.length() as usize;
            fragment_lens.push(len);
            offset += RecordHeader::LEN + len;
        }
        assert_eq!(offset, written.len());
        assert_eq!(fragment_lens.len(), 3);
        assert!(fragment_lens.iter().all(|&l| l <= MAX_FRAGMENT_LEN as usize));
        assert_eq!(fragment_lens.iter().sum::<usize>(), plaintext.len());
    }

    #[test]
    fn tls12_finished_verify_data_differs_between_split_and_unsplit_hash() {
        let mut split = bare_connection(Role::Client);
        split.uses_split = true;
        split.prf_key_schedule = Some(PrfKeySchedule::new(true, HashAlg::Sha256));
        split.tls12_master_secret = Some(vec![0x77u8; 48]);
        split.transcript_raw = b"client hello || server hello || ... || client key exchange".to_vec();

        let mut unsplit = bare_connection(Role::Client);
        unsplit.uses_split = false;
        unsplit.prf_key_schedule = Some(PrfKeySchedule::new(false, HashAlg::Sha256));
        unsplit.tls12_master_secret = Some(vec![0x77u8; 48]);
        unsplit.transcript_raw = split.transcript_raw.clone();

        let a = split.tls12_finished_verify_data(b"client finished").unwrap();
        let b = unsplit.tls12_finished_verify_data(b"client finished").unwrap();
        assert_eq!(a.len(), 12);
        assert_eq!(b.len(), 12);
        assert_ne!(a, b);
    }

    #[test]
    fn tls12_finished_verify_data_is_bound_to_the_transcript() {
        let mut conn = bare_connection(Role::Client);
        conn.uses_split = false;
        conn.prf_key_schedule = Some(PrfKeySchedule::new(false, HashAlg::Sha256));
        conn.tls12_master_secret = Some(vec![0x88u8; 48]);

        conn.transcript_raw = b"first handshake transcript".to_vec();
        let a = conn.tls12_finished_verify_data(b"client finished").unwrap();

        conn.transcript_raw = b"a different handshake transcript".to_vec();
        let b = conn.tls12_finished_verify_data(b"client finished").unwrap();

        assert_ne!(a, b, "verify_data must change if a single handshake message is tampered with");
    }

    #[test]
    fn select_certified_key_prefers_ecdsa_when_client_offers_it() {
        let rsa_key = SigningKey::from_rsa(rsa::RsaPrivateKey::new(&mut OsRng, 512).unwrap());
        let ecdsa_key = SigningKey::from_ecdsa(EcdsaSigningKey::random(&mut OsRng));

        let mut config = Config::new();
        config.certified_keys.push(CertifiedKey { chain: vec![], chain_size: 0, signing_key: rsa_key });
        config.certified_keys.push(CertifiedKey { chain: vec![], chain_size: 0, signing_key: ecdsa_key });

        let conn = bare_connection(Role::Server);
        let schemes = [SignatureScheme::EcdsaSecp256r1Sha256, SignatureScheme::RsaPkcs1Sha256];
        let (idx, selected) = conn.select_certified_key(&config, &schemes).unwrap();
        assert_eq!(idx, 1);
        assert!(matches!(selected.signing_key, SigningKey::Ecdsa(_)));
    }

    #[test]
    fn select_certified_key_falls_back_to_rsa_when_no_ecdsa_scheme_is_offered() {
        let rsa_key = SigningKey::from_rsa(rsa::RsaPrivateKey::new(&mut OsRng, 512).unwrap());
        let ecdsa_key = SigningKey::from_ecdsa(EcdsaSigningKey::random(&mut OsRng));

        let mut config = Config::new();
        config.certified_keys.push(CertifiedKey { chain: vec![], chain_size: 0, signing_key: ecdsa_key });
        config.certified_keys.push(CertifiedKey { chain: vec![], chain_size: 0, signing_key: rsa_key });

        let conn = bare_connection(Role::Server);
        let schemes = [SignatureScheme::RsaPkcs1Sha256];
        let (idx, selected) = conn.select_certified_key(&config, &schemes).unwrap();
        assert_eq!(idx, 1);
        assert!(matches!(selected.signing_key, SigningKey::Rsa(_)));
    }

    #[test]
    fn select_certified_key_returns_none_when_no_key_matches() {
        let ecdsa_key = SigningKey::from_ecdsa(EcdsaSigningKey::random(&mut OsRng));
        let mut config = Config::new();
        config.certified_keys.push(CertifiedKey { chain: vec![], chain_size: 0, signing_key: ecdsa_key });

        let conn = bare_connection(Role::Server);
        let schemes = [SignatureScheme::RsaPkcs1Sha256];
        assert!(conn.select_certified_key(&config, &schemes).is_none());
    }

    #[test]
    fn select_certified_key_fails_when_client_signature_algorithms_is_empty() {
        let rsa_key = SigningKey::from_rsa(rsa::RsaPrivateKey::new(&mut OsRng, 512).unwrap());
        let mut config = Config::new();
        config.certified_keys.push(CertifiedKey { chain: vec![], chain_size: 0, signing_key: rsa_key });

        let conn = bare_connection(Role::Server);
        assert!(conn.select_certified_key(&config, &[]).is_none());
    }
}
