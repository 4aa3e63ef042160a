use crate::{AlertDescription, TlsVersion};

/// Content Type.
///
/// # References
///
/// * [RFC 8446 Section 5.1](https://datatracker.ietf.org/doc/html/rfc8446#section-5.1)
///
/// ```text
/// enum {
///     invalid(0),
///     change_cipher_spec(20),
///     alert(21),
///     handshake(22),
///     application_data(23),
///     (255)
/// } ContentType;
/// ```
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ContentType {
    ChangeCipherSpec = 20,
    Alert = 21,
    Handshake = 22,
    ApplicationData = 23,
}

impl From<ContentType> for u8 {
    #[inline]
    fn from(content_type: ContentType) -> Self {
        content_type as u8
    }
}

impl TryFrom<u8> for ContentType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            x if x == (Self::ChangeCipherSpec as u8) => Ok(Self::ChangeCipherSpec),
            x if x == (Self::Alert as u8) => Ok(Self::Alert),
            x if x == (Self::Handshake as u8) => Ok(Self::Handshake),
            x if x == (Self::ApplicationData as u8) => Ok(Self::ApplicationData),
            _ => Err(value),
        }
    }
}

/// Maximum plaintext fragment length before TLS 1.3's extra slop for the
/// inner content-type byte and padding.
pub const MAX_FRAGMENT_LEN: u16 = 1 << 14;

/// # References
///
/// * [RFC 8446 Appendix B.1](https://datatracker.ietf.org/doc/html/rfc8446#appendix-B.1)
///
/// ```text
/// struct {
///     ContentType type;
///     ProtocolVersion legacy_record_version;
///     uint16 length;
///     opaque fragment[TLSPlaintext.length];
/// } TLSPlaintext;
/// ```
pub struct RecordHeader {
    buf: [u8; Self::LEN],
}

impl RecordHeader {
    pub const LEN: usize = 5;

    pub fn content_type(&self) -> ContentType {
        // validated in constructor - will never panic
        ContentType::try_from(self.buf[0]).unwrap()
    }

    pub fn length(&self) -> u16 {
        u16::from_be_bytes(self.buf[3..5].try_into().unwrap())
    }

    pub fn as_bytes(&self) -> &[u8; 5] {
        &self.buf
    }

    /// Serialize a record header. `version` is the record's
    /// `legacy_record_version` field: `TlsVersion::V1_0` for the very first
    /// ClientHello record, `TlsVersion::V1_2` for everything else including
    /// TLS 1.3 (whose real version lives in the `supported_versions`
    /// extension, not this field).
    pub fn ser(content_type: ContentType, version: TlsVersion, data_len: u16) -> Self {
        RecordHeader {
            buf: [
                content_type.into(),
                version.msb(),
                version.lsb(),
                (data_len >> 8) as u8,
                data_len as u8,
            ],
        }
    }

    pub fn deser(buf: [u8; 5]) -> Result<Self, AlertDescription> {
        if let Err(content_type) = ContentType::try_from(buf[0]) {
            crate::fmt::error!("invalid ContentType value: 0x{:02X}", content_type);
            return Err(AlertDescription::IllegalParameter);
        }

        // https://www.rfc-editor.org/rfc/rfc8446#appendix-D
        // The value of TLSPlaintext.legacy_record_version MUST be ignored by all
        // implementations.  The value of TLSCiphertext.legacy_record_version is
        // included in the additional data for deprotection but MAY otherwise be
        // ignored or MAY be validated to match the fixed constant value.

        Ok(Self { buf })
    }

    /// `fragment_length > 2^14 + 2048` (TLS 1.2 and earlier) or
    /// `2^14 + 256` (TLS 1.3) is always a protocol violation.
    pub fn validate_fragment_length(&self, tls13: bool) -> Result<(), AlertDescription> {
        let max = if tls13 {
            MAX_FRAGMENT_LEN + 256
        } else {
            MAX_FRAGMENT_LEN + 2048
        };
        if self.length() > max {
            crate::fmt::error!("fragment length {} exceeds {}", self.length(), max);
            Err(AlertDescription::RecordOverflow)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let header = RecordHeader::ser(ContentType::ApplicationData, TlsVersion::V1_2, 0x30);
        assert_eq!(header.as_bytes(), &[0x17, 0x03, 0x03, 0x00, 0x30]);
        let deser = RecordHeader::deser(*header.as_bytes()).unwrap();
        assert_eq!(deser.content_type(), ContentType::ApplicationData);
        assert_eq!(deser.length(), 0x30);
    }

    #[test]
    fn rejects_oversized_tls13_fragment() {
        let header = RecordHeader::ser(
            ContentType::ApplicationData,
            TlsVersion::V1_2,
            MAX_FRAGMENT_LEN + 257,
        );
        assert!(header.validate_fragment_length(true).is_err());
        assert!(header.validate_fragment_length(false).is_ok());
    }
}
