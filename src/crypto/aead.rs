//! AEAD record transform.
//!
//! Operates on plain in-memory slices, backed by the `aes-gcm` crate
//! rather than a hand-rolled AES/GHASH implementation: on a host target
//! the RustCrypto crate is the idiomatic choice.

pub use aes_gcm::{Aes128Gcm, Aes256Gcm};
use aes_gcm::{
    aead::{generic_array::GenericArray, AeadInPlace, KeyInit},
    Nonce,
};

use crate::error::Error;

/// `nonce = fixed_iv XOR (zero-padded sequence number)`, per RFC 8446 §5.3.
pub fn build_nonce(iv: &[u8; 12], seq: u64) -> [u8; 12] {
    let mut nonce = *iv;
    let seq_bytes = seq.to_be_bytes();
    for i in 0..8 {
        nonce[4 + i] ^= seq_bytes[i];
    }
    nonce
}

/// Seal `plaintext` in place, appending the 16-byte GCM tag. Returns the
/// total ciphertext length (plaintext length + tag).
pub fn seal_aes128(
    key: &[u8; 16],
    nonce: &[u8; 12],
    aad: &[u8],
    buf: &mut Vec<u8>,
) -> Result<(), Error> {
    let cipher = Aes128Gcm::new(GenericArray::from_slice(key));
    cipher
        .encrypt_in_place(Nonce::from_slice(nonce), aad, buf)
        .map_err(|_| Error::Encrypt)
}

pub fn open_aes128(
    key: &[u8; 16],
    nonce: &[u8; 12],
    aad: &[u8],
    buf: &mut Vec<u8>,
) -> Result<(), Error> {
    let cipher = Aes128Gcm::new(GenericArray::from_slice(key));
    cipher
        .decrypt_in_place(Nonce::from_slice(nonce), aad, buf)
        .map_err(|_| Error::Decrypt)
}

pub fn seal_aes256(
    key: &[u8; 32],
    nonce: &[u8; 12],
    aad: &[u8],
    buf: &mut Vec<u8>,
) -> Result<(), Error> {
    let cipher = Aes256Gcm::new(GenericArray::from_slice(key));
    cipher
        .encrypt_in_place(Nonce::from_slice(nonce), aad, buf)
        .map_err(|_| Error::Encrypt)
}

pub fn open_aes256(
    key: &[u8; 32],
    nonce: &[u8; 12],
    aad: &[u8],
    buf: &mut Vec<u8>,
) -> Result<(), Error> {
    let cipher = Aes256Gcm::new(GenericArray::from_slice(key));
    cipher
        .decrypt_in_place(Nonce::from_slice(nonce), aad, buf)
        .map_err(|_| Error::Decrypt)
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    /// NIST/McGrew-Viega AES-128-GCM test vector: all-zero key, IV, and
    /// (empty) plaintext, no AAD.
    #[test]
    fn aes128_gcm_matches_known_answer_test_case_empty_plaintext() {
        let key = [0u8; 16];
        let nonce = [0u8; 12];
        let mut buf = Vec::new();
        seal_aes128(&key, &nonce, &[], &mut buf).unwrap();
        assert_eq!(buf, hex!("58e2fccefa7e3061367f1d57a4e7455a"));
    }

    /// NIST/McGrew-Viega AES-128-GCM test vector: all-zero key, IV, and a
    /// single all-zero plaintext block, no AAD.
    #[test]
    fn aes128_gcm_matches_known_answer_test_case_one_zero_block() {
        let key = [0u8; 16];
        let nonce = [0u8; 12];
        let mut buf = vec![0u8; 16];
        seal_aes128(&key, &nonce, &[], &mut buf).unwrap();
        assert_eq!(
            buf,
            hex!("0388dace60b6a392f328c2b971b2fe78ab6e47d42cec13bdf53a67b21257bddf")
        );
    }

    #[test]
    fn seal_open_round_trip() {
        let key = [0x42u8; 16];
        let nonce = [0x11u8; 12];
        let aad = b"header";
        let mut buf = b"hello record layer".to_vec();
        seal_aes128(&key, &nonce, aad, &mut buf).unwrap();
        assert_ne!(buf, b"hello record layer".to_vec());
        open_aes128(&key, &nonce, aad, &mut buf).unwrap();
        assert_eq!(buf, b"hello record layer".to_vec());
    }

    #[test]
    fn tampered_aad_fails() {
        let key = [0x42u8; 16];
        let nonce = [0x11u8; 12];
        let mut buf = b"hello".to_vec();
        seal_aes128(&key, &nonce, b"aad-a", &mut buf).unwrap();
        assert!(open_aes128(&key, &nonce, b"aad-b", &mut buf).is_err());
    }

    #[test]
    fn nonce_xors_sequence_into_low_bytes() {
        let iv = [0u8; 12];
        let nonce = build_nonce(&iv, 1);
        assert_eq!(nonce, [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
    }
}
