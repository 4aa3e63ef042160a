pub mod aead;
pub mod cbc;
pub mod cert;
pub mod ecdh;
pub mod hash;
pub mod kem;
pub mod signature;
pub mod x25519;

pub use aead::{Aes128Gcm, Aes256Gcm};
