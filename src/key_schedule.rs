//! TLS key schedule: the TLS 1.3 HKDF cascade and its TLS 1.0-1.2 PRF sibling.
//!
//! # References
//!
//! * [RFC 5869] HMAC-based Extract-and-Expand Key Derivation Function (HKDF)
//! * [RFC 8446 Section 7.1](https://datatracker.ietf.org/doc/html/rfc8446#section-7.1)
//! * [RFC 5246 Section 5](https://datatracker.ietf.org/doc/html/rfc5246#section-5) (TLS 1.2 PRF)
//! * [RFC 2246 Section 5](https://datatracker.ietf.org/doc/html/rfc2246#section-5) (TLS 1.0 PRF, MD5+SHA1 split)
//!
//! [RFC 5869]: https://datatracker.ietf.org/doc/html/rfc5869

use crate::crypto::hash::{digest, HashAlg, TranscriptHash};
use crate::AlertDescription;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand_core::{CryptoRng, RngCore};
use sha2::{Sha256, Sha384};

const ZEROS_48: [u8; 48] = [0; 48];

fn empty_hash(alg: HashAlg) -> Vec<u8> {
    digest(alg, &[])
}

/// `Hkdf<Sha256>` / `Hkdf<Sha384>`, dispatched on the cipher suite's hash.
/// TLS 1.3 only ever negotiates SHA-256 or SHA-384 transcripts, so an enum
/// covers the whole space without the trait-bound gymnastics a fully
/// generic `Hkdf<H>` parameter would need.
enum Hkdf13 {
    Sha256(Hkdf<Sha256>),
    Sha384(Hkdf<Sha384>),
}

impl Hkdf13 {
    fn extract(alg: HashAlg, salt: &[u8], ikm: &[u8]) -> (Vec<u8>, Self) {
        match alg {
            HashAlg::Sha256 => {
                let (prk, hkdf) = Hkdf::<Sha256>::extract(Some(salt), ikm);
                (prk.to_vec(), Hkdf13::Sha256(hkdf))
            }
            HashAlg::Sha384 => {
                let (prk, hkdf) = Hkdf::<Sha384>::extract(Some(salt), ikm);
                (prk.to_vec(), Hkdf13::Sha384(hkdf))
            }
            _ => panic!("TLS 1.3 only negotiates SHA-256/SHA-384 transcripts"),
        }
    }

    fn from_prk(alg: HashAlg, prk: &[u8]) -> Self {
        match alg {
            HashAlg::Sha256 => Hkdf13::Sha256(Hkdf::<Sha256>::from_prk(prk).unwrap()),
            HashAlg::Sha384 => Hkdf13::Sha384(Hkdf::<Sha384>::from_prk(prk).unwrap()),
            _ => panic!("TLS 1.3 only negotiates SHA-256/SHA-384 transcripts"),
        }
    }

    fn expand(&self, info: &[u8], out: &mut [u8]) {
        match self {
            Hkdf13::Sha256(h) => h.expand(info, out).unwrap(),
            Hkdf13::Sha384(h) => h.expand(info, out).unwrap(),
        }
    }
}

/// Create a TLS `HkdfLabel`.
///
/// # References
///
/// * [RFC 8446 Section 7.1](https://datatracker.ietf.org/doc/html/rfc8446#section-7.1)
///
/// ```text
/// struct {
///     uint16 length = Length;
///     opaque label<7..255> = "tls13 " + Label;
///     opaque context<0..255> = Context;
/// } HkdfLabel;
/// ```
fn hkdf_label(len: u16, label: &[u8], context: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + 1 + 6 + label.len() + 1 + context.len());
    out.extend_from_slice(&len.to_be_bytes());

    const LABEL_PREFIX: &[u8] = b"tls13 ";
    let label_len = u8::try_from(label.len() + LABEL_PREFIX.len()).unwrap();
    out.push(label_len);
    out.extend_from_slice(LABEL_PREFIX);
    out.extend_from_slice(label);

    let context_len = u8::try_from(context.len()).unwrap();
    out.push(context_len);
    out.extend_from_slice(context);
    out
}

/// TLS `HKDF-Expand-Label` function.
///
/// ```text
/// HKDF-Expand-Label(Secret, Label, Context, Length) =
///     HKDF-Expand(Secret, HkdfLabel, Length)
/// ```
fn hkdf_expand_label(secret: &Hkdf13, label: &[u8], context: &[u8], len: usize) -> Vec<u8> {
    let info = hkdf_label(len as u16, label, context);
    let mut okm = vec![0u8; len];
    secret.expand(&info, &mut okm);
    okm
}

/// TLS `Derive-Secret` function.
///
/// ```text
/// Derive-Secret(Secret, Label, Messages) =
///     HKDF-Expand-Label(Secret, Label,
///                       Transcript-Hash(Messages), Hash.length)
/// ```
fn derive_secret(secret: &Hkdf13, label: &[u8], context: &[u8], hash_len: usize) -> Vec<u8> {
    hkdf_expand_label(secret, label, context, hash_len)
}

/// Ephemeral key-exchange material for the negotiated group.
pub enum KeyExchangeSecret {
    Secp256r1(crate::crypto::ecdh::EphemeralSecret),
    X25519(x25519_dalek::EphemeralSecret),
}

pub enum PeerPublicKey {
    Secp256r1(crate::crypto::ecdh::PublicKey),
    X25519([u8; 32]),
}

fn key_exchange_shared_secret(secret: KeyExchangeSecret, peer: &PeerPublicKey) -> Vec<u8> {
    match (secret, peer) {
        (KeyExchangeSecret::Secp256r1(s), PeerPublicKey::Secp256r1(p)) => {
            crate::crypto::ecdh::diffie_hellman(&s, p).to_vec()
        }
        (KeyExchangeSecret::X25519(s), PeerPublicKey::X25519(p)) => {
            crate::crypto::x25519::diffie_hellman(s, p).to_vec()
        }
        _ => panic!("negotiated group mismatch between local secret and peer key"),
    }
}

/// TLS 1.3 HKDF key schedule: early secret -> handshake secret -> master
/// secret, as laid out in RFC 8446 Section 7.1.
pub struct KeySchedule {
    hash_alg: HashAlg,
    client_secret: Option<KeyExchangeSecret>,
    server_public: Option<PeerPublicKey>,

    // https://datatracker.ietf.org/doc/html/rfc8446#section-4.4.1
    // Many of the cryptographic computations in TLS make use of a
    // transcript hash. This value is computed by hashing the concatenation
    // of each included handshake message, including the handshake message
    // header carrying the handshake message type and length fields, but not
    // including record layer headers.
    transcript_hash: TranscriptHash,

    // https://datatracker.ietf.org/doc/html/rfc8446#section-5.3
    // A 64-bit sequence number is maintained separately for reading and
    // writing records. The appropriate sequence number is incremented by
    // one after reading or writing each record. Each sequence number is
    // set to zero at the beginning of a connection and whenever the key is
    // changed; the first record transmitted under a particular traffic key
    // MUST use sequence number 0.
    read_record_sequence_number: u64,
    write_record_sequence_number: u64,

    hkdf: Hkdf13,
    secret: Vec<u8>,

    client_traffic_secret: Option<Hkdf13>,
    server_traffic_secret: Option<Hkdf13>,
}

impl KeySchedule {
    pub fn new(hash_alg: HashAlg) -> Self {
        let zeros = &ZEROS_48[..hash_alg.output_len()];
        let (_, hkdf) = Hkdf13::extract(hash_alg, zeros, zeros);
        let secret = derive_secret(&hkdf, b"derived", &empty_hash(hash_alg), hash_alg.output_len());
        Self {
            hash_alg,
            client_secret: None,
            server_public: None,
            transcript_hash: TranscriptHash::new(hash_alg),
            read_record_sequence_number: 0,
            write_record_sequence_number: 0,
            hkdf,
            secret,
            client_traffic_secret: None,
            server_traffic_secret: None,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.hash_alg);
    }

    pub fn increment_read_record_sequence_number(&mut self) {
        self.read_record_sequence_number =
            self.read_record_sequence_number.checked_add(1).unwrap();
        trace!(
            "read_record_sequence_number={}",
            self.read_record_sequence_number
        )
    }

    pub fn increment_write_record_sequence_number(&mut self) {
        self.write_record_sequence_number =
            self.write_record_sequence_number.checked_add(1).unwrap();
        trace!(
            "write_record_sequence_number={}",
            self.write_record_sequence_number
        )
    }

    /// Create a new ephemeral client key-exchange secret for `group`.
    pub fn new_client_secp256r1_secret<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> [u8; 65] {
        let (private, public) = crate::crypto::ecdh::keygen(rng);
        self.client_secret.replace(KeyExchangeSecret::Secp256r1(private));
        public
    }

    pub fn new_client_x25519_secret<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> [u8; 32] {
        let (private, public) = crate::crypto::x25519::keygen(rng);
        self.client_secret.replace(KeyExchangeSecret::X25519(private));
        public
    }

    pub fn update_transcript_hash(&mut self, data: &[u8]) {
        self.transcript_hash.update(data)
    }

    pub fn transcript_hash_bytes(&self) -> Vec<u8> {
        self.transcript_hash.finalize_clone()
    }

    pub fn set_transcript_hash(&mut self, hash: TranscriptHash) {
        self.transcript_hash = hash
    }

    pub fn transcript_hash(&self) -> TranscriptHash {
        self.transcript_hash.clone()
    }

    pub fn set_server_secp256r1_public_key(&mut self, key: crate::crypto::ecdh::PublicKey) {
        self.server_public.replace(PeerPublicKey::Secp256r1(key));
    }

    pub fn set_server_x25519_public_key(&mut self, key: [u8; 32]) {
        self.server_public.replace(PeerPublicKey::X25519(key));
    }

    fn shared_secret(&mut self) -> Option<Vec<u8>> {
        let secret = self.client_secret.take()?;
        let peer = self.server_public.as_ref()?;
        Some(key_exchange_shared_secret(secret, peer))
    }

    fn binder_key(&mut self, psk: &[u8]) -> Hkdf13 {
        let zeros = &ZEROS_48[..self.hash_alg.output_len()];
        let (prk, hkdf) = Hkdf13::extract(self.hash_alg, zeros, psk);
        self.secret = prk;
        self.hkdf = hkdf;
        let binder_key = derive_secret(&self.hkdf, b"ext binder", &empty_hash(self.hash_alg), self.hash_alg.output_len());
        Hkdf13::from_prk(self.hash_alg, &binder_key)
    }

    /// The PskBinderEntry is computed in the same way as the Finished
    /// message (Section 4.4.4) but with the BaseKey being the binder_key
    /// derived via the key schedule from the corresponding PSK which is
    /// being offered (see Section 7.1).
    ///
    /// finished_key = HKDF-Expand-Label(BaseKey, "finished", "", Hash.length)
    pub fn binder(&mut self, psk: &[u8], truncated_transcript_hash: TranscriptHash) -> Vec<u8> {
        let binder_key = self.binder_key(psk);
        let key = hkdf_expand_label(&binder_key, b"finished", &[], self.hash_alg.output_len());
        hmac_finalize(self.hash_alg, &key, &truncated_transcript_hash.finalize_clone())
    }

    pub fn initialize_early_secret(&mut self) {
        let transcript_hash_bytes = self.transcript_hash_bytes();
        let client_secret = derive_secret(&self.hkdf, b"c e traffic", &transcript_hash_bytes, self.hash_alg.output_len());
        self.client_traffic_secret
            .replace(Hkdf13::from_prk(self.hash_alg, &client_secret));

        // there is also an early_exporter_master_secret here

        self.secret = derive_secret(&self.hkdf, b"derived", &empty_hash(self.hash_alg), self.hash_alg.output_len());
        self.read_record_sequence_number = 0;
        self.write_record_sequence_number = 0;
    }

    pub fn initialize_handshake_secret(&mut self) {
        let shared_secret = self.shared_secret().expect("key exchange not yet performed");
        let (prk, hkdf) = Hkdf13::extract(self.hash_alg, &self.secret, &shared_secret);
        self.secret = prk;
        self.hkdf = hkdf;

        let transcript_hash_bytes = self.transcript_hash_bytes();
        let client_secret = derive_secret(&self.hkdf, b"c hs traffic", &transcript_hash_bytes, self.hash_alg.output_len());
        self.client_traffic_secret
            .replace(Hkdf13::from_prk(self.hash_alg, &client_secret));

        let server_secret = derive_secret(&self.hkdf, b"s hs traffic", &transcript_hash_bytes, self.hash_alg.output_len());
        self.server_traffic_secret
            .replace(Hkdf13::from_prk(self.hash_alg, &server_secret));

        self.secret = derive_secret(&self.hkdf, b"derived", &empty_hash(self.hash_alg), self.hash_alg.output_len());
        self.read_record_sequence_number = 0;
        self.write_record_sequence_number = 0;
    }

    pub fn initialize_master_secret(&mut self) {
        let zeros = &ZEROS_48[..self.hash_alg.output_len()];
        let (prk, hkdf) = Hkdf13::extract(self.hash_alg, &self.secret, zeros);
        self.secret = prk;
        self.hkdf = hkdf;

        let transcript_hash_bytes = self.transcript_hash_bytes();
        let client_secret = derive_secret(&self.hkdf, b"c ap traffic", &transcript_hash_bytes, self.hash_alg.output_len());
        self.client_traffic_secret
            .replace(Hkdf13::from_prk(self.hash_alg, &client_secret));

        let server_secret = derive_secret(&self.hkdf, b"s ap traffic", &transcript_hash_bytes, self.hash_alg.output_len());
        self.server_traffic_secret
            .replace(Hkdf13::from_prk(self.hash_alg, &server_secret));

        self.secret = derive_secret(&self.hkdf, b"derived", &empty_hash(self.hash_alg), self.hash_alg.output_len());
        self.read_record_sequence_number = 0;
        self.write_record_sequence_number = 0;
    }

    /// Update traffic secrets.
    ///
    /// # References
    ///
    /// * [RFC 8446 Section 7.2](https://datatracker.ietf.org/doc/html/rfc8446#section-7.2)
    ///
    /// ```text
    /// application_traffic_secret_N+1 =
    ///     HKDF-Expand-Label(application_traffic_secret_N,
    ///                       "traffic upd", "", Hash.length)
    /// ```
    pub fn update_traffic_secret(&mut self) {
        let zeros = &ZEROS_48[..self.hash_alg.output_len()];
        let (prk, hkdf) = Hkdf13::extract(self.hash_alg, &self.secret, zeros);
        self.secret = prk;
        self.hkdf = hkdf;

        let transcript_hash_bytes = self.transcript_hash_bytes();
        let client_secret = derive_secret(&self.hkdf, b"traffic upd", &transcript_hash_bytes, self.hash_alg.output_len());
        self.client_traffic_secret
            .replace(Hkdf13::from_prk(self.hash_alg, &client_secret));

        let server_secret = derive_secret(&self.hkdf, b"traffic upd", &transcript_hash_bytes, self.hash_alg.output_len());
        self.server_traffic_secret
            .replace(Hkdf13::from_prk(self.hash_alg, &server_secret));

        self.secret = derive_secret(&self.hkdf, b"derived", &empty_hash(self.hash_alg), self.hash_alg.output_len());
        self.read_record_sequence_number = 0;
        self.write_record_sequence_number = 0;
    }

    pub fn server_traffic_secret_exists(&self) -> bool {
        self.server_traffic_secret.is_some()
    }

    /// The traffic secret and record sequence number for records this
    /// `Connection` writes. `as_client` is this connection's own role, not
    /// the direction's fixed label: a Client writes with
    /// `client_traffic_secret`/`write_record_sequence_number`, a Server
    /// writes with `server_traffic_secret`/`write_record_sequence_number`.
    pub fn write_key_and_nonce(&self, as_client: bool, key_len: usize) -> Option<(Vec<u8>, [u8; 12])> {
        let traffic_secret = if as_client {
            self.client_traffic_secret.as_ref()?
        } else {
            self.server_traffic_secret.as_ref()?
        };
        let key = hkdf_expand_label(traffic_secret, b"key", &[], key_len);
        let mut iv = [0u8; 12];
        iv.copy_from_slice(&hkdf_expand_label(traffic_secret, b"iv", &[], 12));
        self.write_record_sequence_number
            .to_be_bytes()
            .iter()
            .enumerate()
            .for_each(|(idx, byte)| iv[idx + 4] ^= byte);
        Some((key, iv))
    }

    /// # References
    ///
    /// * [RFC 8446 Section 7.3](https://datatracker.ietf.org/doc/html/rfc8446#ref-sender)
    ///
    /// ```text
    /// [sender]_write_key = HKDF-Expand-Label(Secret, "key", "", key_length)
    /// ```
    ///
    /// The traffic secret and record sequence number for records this
    /// `Connection` reads; the mirror image of [`Self::write_key_and_nonce`].
    pub fn read_key_and_nonce(&self, as_client: bool, key_len: usize) -> Option<(Vec<u8>, [u8; 12])> {
        let traffic_secret = if as_client {
            self.server_traffic_secret.as_ref()?
        } else {
            self.client_traffic_secret.as_ref()?
        };
        let key = hkdf_expand_label(traffic_secret, b"key", &[], key_len);
        let mut iv = [0u8; 12];
        iv.copy_from_slice(&hkdf_expand_label(traffic_secret, b"iv", &[], 12));
        self.read_record_sequence_number
            .to_be_bytes()
            .iter()
            .enumerate()
            .for_each(|(idx, byte)| iv[idx + 4] ^= byte);
        Some((key, iv))
    }

    /// # References
    ///
    /// * [RFC 8446 Section 4.4.4](https://datatracker.ietf.org/doc/html/rfc8446#section-4.4.4)
    ///
    /// ```text
    /// finished_key =
    ///     HKDF-Expand-Label(BaseKey, "finished", "", Hash.length)
    ///
    /// verify_data =
    ///     HMAC(finished_key,
    ///          Transcript-Hash(Handshake Context,
    ///                          Certificate*, CertificateVerify*))
    /// ```
    ///
    /// Verifies a `Finished` message sent by the peer. `as_client` is this
    /// connection's own role: a Client verifies the server's Finished
    /// (keyed off `server_traffic_secret`), a Server verifies the client's.
    pub fn verify_finished(&self, as_client: bool, finished: &[u8]) -> Result<(), AlertDescription> {
        let peer_secret = if as_client {
            self.server_traffic_secret.as_ref().unwrap()
        } else {
            self.client_traffic_secret.as_ref().unwrap()
        };
        let key = hkdf_expand_label(peer_secret, b"finished", &[], self.hash_alg.output_len());
        let expected = hmac_finalize(self.hash_alg, &key, &self.transcript_hash_bytes());

        use subtle::ConstantTimeEq;
        if expected.ct_eq(finished).into() {
            Ok(())
        } else {
            Err(AlertDescription::DecryptError)
        }
    }

    /// Computes this connection's own `Finished.verify_data`, to be sent to
    /// the peer. `as_client` is this connection's own role.
    pub fn finished_verify_data(&self, as_client: bool) -> Vec<u8> {
        let own_secret = if as_client {
            self.client_traffic_secret.as_ref().unwrap()
        } else {
            self.server_traffic_secret.as_ref().unwrap()
        };
        let key = hkdf_expand_label(own_secret, b"finished", &[], self.hash_alg.output_len());
        hmac_finalize(self.hash_alg, &key, &self.transcript_hash_bytes())
    }
}

fn hmac_finalize(alg: HashAlg, key: &[u8], data: &[u8]) -> Vec<u8> {
    match alg {
        HashAlg::Sha256 => {
            let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts any key length");
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
        HashAlg::Sha384 => {
            let mut mac = Hmac::<Sha384>::new_from_slice(key).expect("HMAC accepts any key length");
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
        _ => panic!("TLS 1.3 only negotiates SHA-256/SHA-384 transcripts"),
    }
}

impl ::core::fmt::Debug for KeySchedule {
    fn fmt(&self, f: &mut ::core::fmt::Formatter) -> Result<(), ::core::fmt::Error> {
        write!(f, "KeySchedule {{ .. }}")
    }
}

#[cfg(feature = "defmt")]
impl ::defmt::Format for KeySchedule {
    fn format(&self, fmt: ::defmt::Formatter) {
        ::defmt::write!(fmt, "KeySchedule {{ .. }}");
    }
}

/// TLS 1.0-1.2 PRF-based key schedule (RFC 5246 Section 5, RFC 2246 Section 5).
///
/// TLS 1.2 cipher suites each name a single PRF hash (SHA-256 unless the
/// suite says otherwise); TLS 1.0 and 1.1 always split the secret in half
/// and XOR the MD5-based and SHA1-based outputs together.
pub struct PrfKeySchedule {
    version_uses_md5_sha1_split: bool,
    prf_hash: HashAlg,
}

impl PrfKeySchedule {
    pub fn new(version_uses_md5_sha1_split: bool, prf_hash: HashAlg) -> Self {
        Self {
            version_uses_md5_sha1_split,
            prf_hash,
        }
    }

    /// `P_hash(secret, seed)`, iterated with `A(i) = HMAC(secret, A(i-1))`,
    /// `A(0) = seed`, producing output by concatenating
    /// `HMAC(secret, A(i) || seed)` until `out_len` bytes are available.
    fn p_hash(alg: HashAlg, secret: &[u8], seed: &[u8], out_len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(out_len);
        let mut a = seed.to_vec();
        while out.len() < out_len {
            a = hmac_finalize_any(alg, secret, &a);
            let mut chunk_input = a.clone();
            chunk_input.extend_from_slice(seed);
            let chunk = hmac_finalize_any(alg, secret, &chunk_input);
            out.extend_from_slice(&chunk);
        }
        out.truncate(out_len);
        out
    }

    /// `PRF(secret, label, seed) = P_<hash>(secret, label + seed)` for
    /// TLS 1.2; for TLS 1.0/1.1,
    /// `P_MD5(S1, label+seed) XOR P_SHA-1(S2, label+seed)` where `S1`/`S2`
    /// are the two (possibly overlapping, for odd lengths) halves of the
    /// secret.
    pub fn prf(&self, secret: &[u8], label: &[u8], seed: &[u8], out_len: usize) -> Vec<u8> {
        let mut label_seed = label.to_vec();
        label_seed.extend_from_slice(seed);

        if self.version_uses_md5_sha1_split {
            let half = secret.len().div_ceil(2);
            let s1 = &secret[..half];
            let s2 = &secret[secret.len() - half..];
            let md5_out = Self::p_hash(HashAlg::Md5, s1, &label_seed, out_len);
            let sha1_out = Self::p_hash(HashAlg::Sha1, s2, &label_seed, out_len);
            md5_out
                .iter()
                .zip(sha1_out.iter())
                .map(|(a, b)| a ^ b)
                .collect()
        } else {
            Self::p_hash(self.prf_hash, secret, &label_seed, out_len)
        }
    }

    /// `master_secret = PRF(pre_master_secret, "master secret",
    /// ClientHello.random + ServerHello.random)[0..47]`
    pub fn master_secret(&self, pre_master_secret: &[u8], client_random: &[u8; 32], server_random: &[u8; 32]) -> Vec<u8> {
        let mut seed = Vec::with_capacity(64);
        seed.extend_from_slice(client_random);
        seed.extend_from_slice(server_random);
        self.prf(pre_master_secret, b"master secret", &seed, 48)
    }

    /// `key_block = PRF(SecurityParameters.master_secret, "key expansion",
    /// SecurityParameters.server_random + SecurityParameters.client_random)`,
    /// sliced in the fixed wire order: client MAC key, server MAC key,
    /// client write key, server write key, client IV, server IV.
    pub fn key_block(
        &self,
        master_secret: &[u8],
        client_random: &[u8; 32],
        server_random: &[u8; 32],
        mac_key_len: usize,
        enc_key_len: usize,
        iv_len: usize,
    ) -> KeyBlock {
        let mut seed = Vec::with_capacity(64);
        seed.extend_from_slice(server_random);
        seed.extend_from_slice(client_random);

        let total = 2 * mac_key_len + 2 * enc_key_len + 2 * iv_len;
        let block = self.prf(master_secret, b"key expansion", &seed, total);

        let mut cursor = 0;
        let mut take = |len: usize| {
            let slice = block[cursor..cursor + len].to_vec();
            cursor += len;
            slice
        };
        KeyBlock {
            client_mac_key: take(mac_key_len),
            server_mac_key: take(mac_key_len),
            client_write_key: take(enc_key_len),
            server_write_key: take(enc_key_len),
            client_write_iv: take(iv_len),
            server_write_iv: take(iv_len),
        }
    }
}

fn hmac_finalize_any(alg: HashAlg, key: &[u8], data: &[u8]) -> Vec<u8> {
    match alg {
        HashAlg::Md5 => {
            let mut mac = Hmac::<md5::Md5>::new_from_slice(key).expect("HMAC accepts any key length");
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
        HashAlg::Sha1 => {
            let mut mac = Hmac::<sha1::Sha1>::new_from_slice(key).expect("HMAC accepts any key length");
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
        HashAlg::Sha256 => {
            let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts any key length");
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
        HashAlg::Sha384 => {
            let mut mac = Hmac::<Sha384>::new_from_slice(key).expect("HMAC accepts any key length");
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
        HashAlg::Sha512 => {
            let mut mac = Hmac::<sha2::Sha512>::new_from_slice(key).expect("HMAC accepts any key length");
            mac.update(data);
            mac.finalize().into_bytes().to_vec()
        }
    }
}

/// The six secrets sliced out of a TLS 1.0-1.2 `key_block`, in wire order.
pub struct KeyBlock {
    pub client_mac_key: Vec<u8>,
    pub server_mac_key: Vec<u8>,
    pub client_write_key: Vec<u8>,
    pub server_write_key: Vec<u8>,
    pub client_write_iv: Vec<u8>,
    pub server_write_iv: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    #[test]
    fn tls13_early_secret_with_no_psk_matches_the_published_value() {
        // A TLS 1.3 handshake with no external or resumption PSK starts
        // from HKDF-Extract(salt = 0^32, ikm = 0^32) with SHA-256, a fixed
        // value every implementation derives identically regardless of
        // transcript (RFC 8446 Section 7.1) -- exactly what
        // `KeySchedule::new` computes before any PSK is bound.
        let zeros = &ZEROS_48[..HashAlg::Sha256.output_len()];
        let (early_secret, _) = Hkdf13::extract(HashAlg::Sha256, zeros, zeros);
        assert_eq!(
            early_secret,
            hex!("33ad0a1c607ec03b09e6cd9893680ce210adf300aa1f2660e1b22e10f170f92")
        );
    }

    #[test]
    fn p_hash_output_length_matches_request() {
        let out = PrfKeySchedule::p_hash(HashAlg::Sha256, b"secret", b"seed", 100);
        assert_eq!(out.len(), 100);
    }

    #[test]
    fn p_hash_is_deterministic() {
        let a = PrfKeySchedule::p_hash(HashAlg::Sha256, b"secret", b"seed", 64);
        let b = PrfKeySchedule::p_hash(HashAlg::Sha256, b"secret", b"seed", 64);
        assert_eq!(a, b);
    }

    #[test]
    fn tls12_prf_master_secret_is_48_bytes() {
        let prf = PrfKeySchedule::new(false, HashAlg::Sha256);
        let pre_master = [0x11u8; 48];
        let client_random = [0x22u8; 32];
        let server_random = [0x33u8; 32];
        let master = prf.master_secret(&pre_master, &client_random, &server_random);
        assert_eq!(master.len(), 48);
    }

    #[test]
    fn tls10_md5_sha1_split_prf_matches_manual_xor() {
        let prf = PrfKeySchedule::new(true, HashAlg::Sha256);
        let secret = b"0123456789abcdef"; // 16 bytes, halves overlap at byte 8
        let half = secret.len().div_ceil(2);
        let s1 = &secret[..half];
        let s2 = &secret[secret.len() - half..];
        let mut label_seed = b"master secret".to_vec();
        label_seed.extend_from_slice(b"seed-material");

        let md5_out = PrfKeySchedule::p_hash(HashAlg::Md5, s1, &label_seed, 48);
        let sha1_out = PrfKeySchedule::p_hash(HashAlg::Sha1, s2, &label_seed, 48);
        let expected: Vec<u8> = md5_out.iter().zip(sha1_out.iter()).map(|(a, b)| a ^ b).collect();

        let actual = prf.prf(secret, b"master secret", b"seed-material", 48);
        assert_eq!(actual, expected);
    }

    #[test]
    fn key_block_slices_are_in_wire_order_and_correct_length() {
        let prf = PrfKeySchedule::new(false, HashAlg::Sha256);
        let master_secret = [0x44u8; 48];
        let client_random = [0x55u8; 32];
        let server_random = [0x66u8; 32];
        let block = prf.key_block(&master_secret, &client_random, &server_random, 20, 16, 16);
        assert_eq!(block.client_mac_key.len(), 20);
        assert_eq!(block.server_mac_key.len(), 20);
        assert_eq!(block.client_write_key.len(), 16);
        assert_eq!(block.server_write_key.len(), 16);
        assert_eq!(block.client_write_iv.len(), 16);
        assert_eq!(block.server_write_iv.len(), 16);
        assert_ne!(block.client_mac_key, block.server_mac_key);
    }
}
