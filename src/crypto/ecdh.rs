//! ECDH (secp256r1) key agreement.
//!
//! Wraps the `p256` crate's ECDH API directly; a `cfg_if`-gated hardware
//! backend for Cortex-M4 acceleration is dropped since this crate targets
//! `std`, where the pure-Rust `p256` backend is always the right choice.

pub use p256::{ecdh::EphemeralSecret, PublicKey};
use rand_core::{CryptoRng, RngCore};

pub type SharedSecret = [u8; 32];

pub fn public_key_from_sec1_bytes(bytes: &[u8; 65]) -> Option<PublicKey> {
    PublicKey::from_sec1_bytes(bytes).ok()
}

pub fn keygen<R: RngCore + CryptoRng>(rng: &mut R) -> (EphemeralSecret, [u8; 65]) {
    let secret = EphemeralSecret::random(rng);
    let public = p256::EncodedPoint::from(secret.public_key());
    let mut buf = [0u8; 65];
    buf.copy_from_slice(public.as_bytes());
    (secret, buf)
}

pub fn diffie_hellman(secret: &EphemeralSecret, public: &PublicKey) -> SharedSecret {
    let shared = secret.diffie_hellman(public);
    let mut out = [0u8; 32];
    out.copy_from_slice(shared.raw_secret_bytes().as_slice());
    out
}
