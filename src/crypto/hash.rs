//! Hash algorithm façade.
//!
//! One enum dispatching to the RustCrypto digest the negotiated cipher
//! suite's PRF or transcript needs. `TranscriptHash::clone` is what the
//! handshake state machine uses to snapshot the running transcript at a
//! Finished or CertificateVerify boundary while the original keeps hashing
//! subsequent messages — RustCrypto digests are already `Clone`, so no
//! bespoke "copy" operation is needed the way an opaque C hash context
//! would require one.

use md5::Md5;
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};
use sha2::Digest as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlg {
    Md5,
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlg {
    pub const fn output_len(self) -> usize {
        match self {
            HashAlg::Md5 => 16,
            HashAlg::Sha1 => 20,
            HashAlg::Sha256 => 32,
            HashAlg::Sha384 => 48,
            HashAlg::Sha512 => 64,
        }
    }
}

/// A running hash over an as-yet-undetermined algorithm, cloneable at any
/// point to snapshot the transcript so far.
#[derive(Clone)]
pub enum TranscriptHash {
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
}

impl TranscriptHash {
    pub fn new(alg: HashAlg) -> Self {
        match alg {
            HashAlg::Sha256 => TranscriptHash::Sha256(Sha256::new()),
            HashAlg::Sha384 => TranscriptHash::Sha384(Sha384::new()),
            HashAlg::Sha512 => TranscriptHash::Sha512(Sha512::new()),
            // TLS ≤ 1.1's dual MD5+SHA1 transcript is modeled separately in
            // `key_schedule::PrfKeySchedule`; the unified `TranscriptHash`
            // only needs to cover the single-hash TLS 1.2/1.3 case.
            HashAlg::Md5 | HashAlg::Sha1 => {
                panic!("MD5/SHA1 transcripts use the dedicated TLS 1.0-1.2 PRF path")
            }
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            TranscriptHash::Sha256(h) => h.update(data),
            TranscriptHash::Sha384(h) => h.update(data),
            TranscriptHash::Sha512(h) => h.update(data),
        }
    }

    /// Finalize a clone, leaving `self` able to keep accumulating.
    pub fn finalize_clone(&self) -> Vec<u8> {
        match self {
            TranscriptHash::Sha256(h) => h.clone().finalize().to_vec(),
            TranscriptHash::Sha384(h) => h.clone().finalize().to_vec(),
            TranscriptHash::Sha512(h) => h.clone().finalize().to_vec(),
        }
    }
}

/// One-shot digest, used for the TLS 1.0/1.1 key-expansion MD5/SHA1 split
/// and for the legacy `*_CBC_SHA` suites' record MAC hash.
pub fn digest(alg: HashAlg, data: &[u8]) -> Vec<u8> {
    match alg {
        HashAlg::Md5 => Md5::digest(data).to_vec(),
        HashAlg::Sha1 => Sha1::digest(data).to_vec(),
        HashAlg::Sha256 => Sha256::digest(data).to_vec(),
        HashAlg::Sha384 => Sha384::digest(data).to_vec(),
        HashAlg::Sha512 => Sha512::digest(data).to_vec(),
    }
}
