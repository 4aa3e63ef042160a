//! X25519 key agreement.
//!
//! Grounded on the `x25519-dalek` crate, the choice both
//! `TrustEdge-Labs/trustedge` and `denoland/deno`'s manifests make for the
//! same key-exchange group.

use rand_core::{CryptoRng, RngCore};
use x25519_dalek::{EphemeralSecret, PublicKey};

pub type SharedSecret = [u8; 32];

pub fn keygen<R: RngCore + CryptoRng>(rng: &mut R) -> (EphemeralSecret, [u8; 32]) {
    let secret = EphemeralSecret::random_from_rng(rng);
    let public = PublicKey::from(&secret);
    (secret, public.to_bytes())
}

pub fn diffie_hellman(secret: EphemeralSecret, peer_public: &[u8; 32]) -> SharedSecret {
    let public = PublicKey::from(*peer_public);
    secret.diffie_hellman(&public).to_bytes()
}
