//! Error taxonomy.
//!
//! Replaces the thread-local errno slot an older-style TLS implementation
//! would use with a plain `Result<T, Error>` convention; `?` does the work
//! `GUARD(...)` macros once did.

use crate::AlertDescription;

/// Coarse category for an [`Error`], for callers that want to branch without
/// enumerating every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Io,
    Closed,
    Blocked,
    Alert,
    Protocol,
    Crypto,
    Config,
    Parsing,
    Resource,
    Internal,
}

/// Which direction a [`Error::Blocked`] is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    // IO
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed by peer")]
    Closed,
    #[error("operation would block on {0:?}")]
    Blocked(Direction),

    // PROTOCOL
    #[error("malformed or out-of-order handshake message")]
    BadMessage,
    #[error("unexpected handshake message in current state")]
    UnexpectedMessage,
    #[error("peer sent an alert: {0:?}")]
    AlertReceived(AlertDescription),
    #[error("record sequence number would wrap")]
    RecordLimit,
    #[error("handshake reached an invalid state")]
    HandshakeState,

    // CRYPTO
    #[error("key initialization failed")]
    KeyInit,
    #[error("record encryption failed")]
    Encrypt,
    #[error("record decryption failed")]
    Decrypt,
    #[error("CBC padding or MAC verification failed")]
    CbcVerify,
    #[error("signing failed")]
    Sign,
    #[error("signature verification failed")]
    VerifySignature,
    #[error("no KEM in the server's preference list was offered by the client")]
    KemUnsupportedParams,
    #[error("(EC)DHE key agreement failed")]
    KeyAgreement,

    // CONFIG / USAGE
    #[error("operation requires a client-role connection")]
    ClientModeOnly,
    #[error("server_name exceeds the maximum length")]
    ServerNameTooLong,
    #[error("no cipher suite in the local preference list is usable")]
    CipherNotSupported,
    #[error("invalid max_fragment_length value")]
    InvalidMaxFragLen,

    // PARSING
    #[error("invalid base64 in PEM input")]
    InvalidBase64,
    #[error("invalid PEM framing")]
    InvalidPem,
    #[error("no certificate found in PEM input")]
    NoCertificateInPem,
    #[error("failed to decode certificate: {0}")]
    DecodeCertificate(String),
    #[error("failed to decode private key: {0}")]
    DecodePrivateKey(String),
    #[error("private key does not match certificate")]
    KeyMismatch,
    #[error("invalid ASN.1 time string")]
    InvalidAsn1Time,

    // RESOURCE
    #[error("buffer has no more data to read")]
    StufferOutOfData,
    #[error("buffer has no more room to write")]
    StufferIsFull,
    #[error("cannot resize a tainted stuffer")]
    ResizeTaintedStuffer,

    // SAFETY / INTERNAL
    #[error("internal invariant violated: {0}")]
    Internal(&'static str),
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        use Error::*;
        match self {
            Io(_) => ErrorCategory::Io,
            Closed => ErrorCategory::Closed,
            Blocked(_) => ErrorCategory::Blocked,
            AlertReceived(_) => ErrorCategory::Alert,
            BadMessage | UnexpectedMessage | RecordLimit | HandshakeState => {
                ErrorCategory::Protocol
            }
            KeyInit | Encrypt | Decrypt | CbcVerify | Sign | VerifySignature
            | KemUnsupportedParams | KeyAgreement => ErrorCategory::Crypto,
            ClientModeOnly | ServerNameTooLong | CipherNotSupported | InvalidMaxFragLen => {
                ErrorCategory::Config
            }
            InvalidBase64 | InvalidPem | NoCertificateInPem | DecodeCertificate(_)
            | DecodePrivateKey(_) | KeyMismatch | InvalidAsn1Time => ErrorCategory::Parsing,
            StufferOutOfData | StufferIsFull | ResizeTaintedStuffer => ErrorCategory::Resource,
            Internal(_) => ErrorCategory::Internal,
        }
    }

    /// The fatal alert to send to the peer before closing, if any.
    pub fn as_alert(&self) -> Option<AlertDescription> {
        use Error::*;
        Some(match self {
            AlertReceived(_) | Closed | Io(_) | Blocked(_) => return None,
            BadMessage => AlertDescription::DecodeError,
            UnexpectedMessage => AlertDescription::UnexpectedMessage,
            RecordLimit => AlertDescription::InternalError,
            HandshakeState => AlertDescription::UnexpectedMessage,
            KeyInit | Encrypt | KeyAgreement => AlertDescription::InternalError,
            Decrypt | CbcVerify => AlertDescription::BadRecordMac,
            Sign | VerifySignature => AlertDescription::DecryptError,
            KemUnsupportedParams => AlertDescription::HandshakeFailure,
            ClientModeOnly | ServerNameTooLong | CipherNotSupported | InvalidMaxFragLen => {
                AlertDescription::InternalError
            }
            InvalidBase64 | InvalidPem | NoCertificateInPem | DecodeCertificate(_)
            | DecodePrivateKey(_) | KeyMismatch | InvalidAsn1Time => AlertDescription::BadCertificate,
            StufferOutOfData | StufferIsFull | ResizeTaintedStuffer => {
                AlertDescription::InternalError
            }
            Internal(_) => AlertDescription::InternalError,
        })
    }
}
