use crate::TlsVersion;

/// Which shape of record transform a cipher suite uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordAlg {
    Stream,
    Cbc,
    Composite,
    Aead,
}

/// Hash algorithm used for the suite's PRF (TLS ≤ 1.2) or HKDF (TLS 1.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrfAlg {
    Sha1,
    Sha256,
    Sha384,
}

/// Key exchange algorithm implied by a cipher suite, for TLS ≤ 1.2 suites
/// that bind key exchange and cipher suite together on the wire (TLS 1.3
/// negotiates key exchange independently via `supported_groups`/`key_share`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyKeyExchange {
    Rsa,
    Dhe,
    Ecdhe,
}

/// Cipher Suites.
///
/// # References
///
/// * [RFC 8446 Appendix B.4](https://datatracker.ietf.org/doc/html/rfc8446#appendix-B.4)
/// * [RFC 5246 Appendix A.5](https://datatracker.ietf.org/doc/html/rfc5246#appendix-A.5)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
#[allow(non_camel_case_types)]
pub enum CipherSuite {
    // TLS 1.3 AEAD suites
    TLS_AES_128_GCM_SHA256,
    TLS_AES_256_GCM_SHA384,

    // TLS 1.2 AEAD suites
    TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,

    // TLS 1.0-1.2 CBC suites (legacy, required for the §8 literal scenarios)
    TLS_RSA_WITH_AES_128_CBC_SHA,
    TLS_RSA_WITH_AES_256_CBC_SHA,
    TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA,
    TLS_RSA_WITH_3DES_EDE_CBC_SHA,
}

impl CipherSuite {
    pub const fn value(&self) -> [u8; 2] {
        match self {
            Self::TLS_AES_128_GCM_SHA256 => [0x13, 0x01],
            Self::TLS_AES_256_GCM_SHA384 => [0x13, 0x02],
            Self::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256 => [0xC0, 0x2F],
            Self::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256 => [0xC0, 0x2B],
            Self::TLS_RSA_WITH_AES_128_CBC_SHA => [0x00, 0x2F],
            Self::TLS_RSA_WITH_AES_256_CBC_SHA => [0x00, 0x35],
            Self::TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA => [0xC0, 0x13],
            Self::TLS_RSA_WITH_3DES_EDE_CBC_SHA => [0x00, 0x0A],
        }
    }

    pub const fn record_alg(&self) -> RecordAlg {
        match self {
            Self::TLS_AES_128_GCM_SHA256
            | Self::TLS_AES_256_GCM_SHA384
            | Self::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256
            | Self::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256 => RecordAlg::Aead,
            Self::TLS_RSA_WITH_AES_128_CBC_SHA
            | Self::TLS_RSA_WITH_AES_256_CBC_SHA
            | Self::TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA
            | Self::TLS_RSA_WITH_3DES_EDE_CBC_SHA => RecordAlg::Composite,
        }
    }

    pub const fn prf_alg(&self) -> PrfAlg {
        match self {
            Self::TLS_AES_256_GCM_SHA384 => PrfAlg::Sha384,
            Self::TLS_AES_128_GCM_SHA256
            | Self::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256
            | Self::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256 => PrfAlg::Sha256,
            Self::TLS_RSA_WITH_AES_128_CBC_SHA
            | Self::TLS_RSA_WITH_AES_256_CBC_SHA
            | Self::TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA
            | Self::TLS_RSA_WITH_3DES_EDE_CBC_SHA => PrfAlg::Sha1,
        }
    }

    pub const fn min_tls_version(&self) -> TlsVersion {
        match self {
            Self::TLS_AES_128_GCM_SHA256 | Self::TLS_AES_256_GCM_SHA384 => TlsVersion::V1_3,
            Self::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256
            | Self::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256 => TlsVersion::V1_2,
            Self::TLS_RSA_WITH_AES_128_CBC_SHA
            | Self::TLS_RSA_WITH_AES_256_CBC_SHA
            | Self::TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA
            | Self::TLS_RSA_WITH_3DES_EDE_CBC_SHA => TlsVersion::V1_0,
        }
    }

    /// Key and MAC sizes in bytes, used to size the TLS ≤ 1.2 key block.
    pub const fn key_material_sizes(&self) -> KeyMaterialSizes {
        match self.record_alg() {
            RecordAlg::Aead => KeyMaterialSizes {
                mac_key_len: 0,
                enc_key_len: 16,
                fixed_iv_len: 4,
            },
            RecordAlg::Composite => {
                let enc_key_len = match self {
                    Self::TLS_RSA_WITH_AES_256_CBC_SHA => 32,
                    Self::TLS_RSA_WITH_3DES_EDE_CBC_SHA => 24,
                    _ => 16,
                };
                KeyMaterialSizes {
                    mac_key_len: 20,
                    enc_key_len,
                    fixed_iv_len: match self {
                        Self::TLS_RSA_WITH_3DES_EDE_CBC_SHA => 8,
                        _ => 16,
                    },
                }
            }
            RecordAlg::Stream => KeyMaterialSizes {
                mac_key_len: 20,
                enc_key_len: 16,
                fixed_iv_len: 0,
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct KeyMaterialSizes {
    pub mac_key_len: usize,
    pub enc_key_len: usize,
    pub fixed_iv_len: usize,
}

impl From<CipherSuite> for [u8; 2] {
    #[inline]
    fn from(cipher_suite: CipherSuite) -> Self {
        cipher_suite.value()
    }
}

impl TryFrom<[u8; 2]> for CipherSuite {
    type Error = [u8; 2];

    fn try_from(value: [u8; 2]) -> Result<Self, Self::Error> {
        match value {
            [0x13, 0x01] => Ok(Self::TLS_AES_128_GCM_SHA256),
            [0x13, 0x02] => Ok(Self::TLS_AES_256_GCM_SHA384),
            [0xC0, 0x2F] => Ok(Self::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256),
            [0xC0, 0x2B] => Ok(Self::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256),
            [0x00, 0x2F] => Ok(Self::TLS_RSA_WITH_AES_128_CBC_SHA),
            [0x00, 0x35] => Ok(Self::TLS_RSA_WITH_AES_256_CBC_SHA),
            [0xC0, 0x13] => Ok(Self::TLS_ECDHE_RSA_WITH_AES_128_CBC_SHA),
            [0x00, 0x0A] => Ok(Self::TLS_RSA_WITH_3DES_EDE_CBC_SHA),
            _ => Err(value),
        }
    }
}

/// Select the negotiated cipher suite. The *server's* preference order is
/// authoritative: walk `server_prefs` in order and return the first suite
/// that the client also offered and that is valid for `version`.
pub fn negotiate_cipher_suite(
    server_prefs: &[CipherSuite],
    client_offered: &[CipherSuite],
    version: TlsVersion,
) -> Option<CipherSuite> {
    server_prefs
        .iter()
        .find(|suite| {
            suite.min_tls_version() <= version && client_offered.contains(suite)
        })
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_preference_wins_over_client_order() {
        let server_prefs = [
            CipherSuite::TLS_AES_256_GCM_SHA384,
            CipherSuite::TLS_AES_128_GCM_SHA256,
        ];
        // client lists its favorite first, server's list is still authoritative
        let client_offered = [
            CipherSuite::TLS_AES_128_GCM_SHA256,
            CipherSuite::TLS_AES_256_GCM_SHA384,
        ];
        let chosen =
            negotiate_cipher_suite(&server_prefs, &client_offered, TlsVersion::V1_3).unwrap();
        assert_eq!(chosen, CipherSuite::TLS_AES_256_GCM_SHA384);
    }

    #[test]
    fn no_overlap_fails() {
        let server_prefs = [CipherSuite::TLS_AES_128_GCM_SHA256];
        let client_offered = [CipherSuite::TLS_RSA_WITH_AES_128_CBC_SHA];
        assert!(negotiate_cipher_suite(&server_prefs, &client_offered, TlsVersion::V1_3).is_none());
    }
}
