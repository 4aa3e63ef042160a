//! A TLS 1.0-1.3 protocol engine: record layer, handshake state machine,
//! key schedule, and the safe buffer primitive they are built on.
//!
//! This crate implements both the client and server roles. It never
//! performs I/O itself — a [`Connection`] is driven by a caller-supplied
//! reader/writer pair and returns [`Error::Blocked`] when it needs more
//! bytes or buffer space, so it works equally well over a blocking
//! socket or a non-blocking one polled from an event loop.

#![forbid(unsafe_code)]

pub(crate) mod fmt;

mod alert;
mod asn1_time;
mod cipher_suites;
mod config;
mod connection;
pub mod crypto;
mod error;
mod extension;
mod handshake;
mod key_schedule;
mod record;
mod stuffer;

pub use alert::{Alert, AlertDescription, AlertLevel};
pub use cipher_suites::{CipherSuite, KeyMaterialSizes, LegacyKeyExchange, PrfAlg, RecordAlg};
pub use config::{Config, StatusRequestType};
pub use connection::{Connection, Role};
pub use error::{Direction, Error, ErrorCategory};
pub use extension::ExtensionType;
pub use handshake::client_hello::{NamedGroup, SignatureScheme};

/// TLS protocol version, as carried on the wire in `ProtocolVersion`
/// fields (the `{major, minor}` pair of RFC 5246 §6.1 collapsed to a
/// single `u16`).
///
/// # References
///
/// * [RFC 8446 Section 4.1.2](https://datatracker.ietf.org/doc/html/rfc8446#section-4.1.2)
/// * [RFC 5246 Appendix E](https://datatracker.ietf.org/doc/html/rfc5246#appendix-E)
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TlsVersion {
    V1_0 = 0x0301,
    V1_1 = 0x0302,
    V1_2 = 0x0303,
    V1_3 = 0x0304,
}

impl TlsVersion {
    pub const fn msb(self) -> u8 {
        ((self as u16) >> 8) as u8
    }

    pub const fn lsb(self) -> u8 {
        self as u8
    }

    /// `true` for any TLS version that uses the ≤ 1.2 PRF/CBC-or-AEAD
    /// record machinery instead of the TLS 1.3 HKDF cascade.
    pub const fn is_legacy(self) -> bool {
        !matches!(self, TlsVersion::V1_3)
    }
}

impl TryFrom<[u8; 2]> for TlsVersion {
    type Error = [u8; 2];

    fn try_from(value: [u8; 2]) -> Result<Self, Self::Error> {
        match u16::from_be_bytes(value) {
            0x0301 => Ok(TlsVersion::V1_0),
            0x0302 => Ok(TlsVersion::V1_1),
            0x0303 => Ok(TlsVersion::V1_2),
            0x0304 => Ok(TlsVersion::V1_3),
            _ => Err(value),
        }
    }
}

impl From<TlsVersion> for [u8; 2] {
    fn from(version: TlsVersion) -> Self {
        [version.msb(), version.lsb()]
    }
}

impl From<TlsVersion> for u16 {
    fn from(version: TlsVersion) -> Self {
        version as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_ordering_matches_wire_order() {
        assert!(TlsVersion::V1_0 < TlsVersion::V1_1);
        assert!(TlsVersion::V1_1 < TlsVersion::V1_2);
        assert!(TlsVersion::V1_2 < TlsVersion::V1_3);
    }

    #[test]
    fn version_round_trips_through_wire_bytes() {
        for v in [
            TlsVersion::V1_0,
            TlsVersion::V1_1,
            TlsVersion::V1_2,
            TlsVersion::V1_3,
        ] {
            let bytes: [u8; 2] = v.into();
            assert_eq!(TlsVersion::try_from(bytes).unwrap(), v);
        }
    }
}
