//! TLS 1.0-1.2 `ServerKeyExchange`, ECDHE path.
//!
//! RSA key exchange (no `ServerKeyExchange` at all, see
//! [`crate::handshake::client_key_exchange`]) and the anonymous/plain-DHE
//! suites are out of scope; every CBC suite this crate negotiates is
//! ECDHE, so this module only ever speaks `ServerECDHParams`.

use crate::crypto::signature::VerifyingKey;
use crate::error::Error;
use crate::stuffer::Stuffer;
use crate::{AlertDescription, NamedGroup};

use super::HandshakeType;

/// # References
///
/// * [RFC 4492 Section 5.4](https://datatracker.ietf.org/doc/html/rfc4492#section-5.4)
///
/// ```text
/// struct {
///     ECParameters    curve_params;
///     ECPoint         public;
/// } ServerECDHParams;
///
/// struct {
///     select (KeyExchangeAlgorithm) {
///         case ec_diffie_hellman:
///             ServerECDHParams    params;
///             Signature           signed_params;
///     };
/// } ServerKeyExchange;
/// ```
const NAMED_CURVE: u8 = 3;

pub fn ser(stuffer: &mut Stuffer, public_key: &[u8; 65], signature: &[u8]) -> Result<usize, Error> {
    let mut body = Vec::new();
    body.push(NAMED_CURVE);
    body.extend_from_slice(&(NamedGroup::secp256r1 as u16).to_be_bytes());
    body.push(public_key.len() as u8);
    body.extend_from_slice(public_key);
    body.extend_from_slice(&(signature.len() as u16).to_be_bytes());
    body.extend_from_slice(signature);

    stuffer.write_u8(HandshakeType::ServerKeyExchange as u8)?;
    stuffer.write_u24(body.len() as u32)?;
    stuffer.write_bytes(&body)?;
    Ok(4 + body.len())
}

pub struct ServerKeyExchangeResult {
    pub public_key: [u8; 65],
    pub signed_params: Vec<u8>,
}

/// Parse the body and verify `signed_params` covers
/// `client_random || server_random || ServerECDHParams`.
pub fn recv(
    body: &[u8],
    client_random: &[u8; 32],
    server_random: &[u8; 32],
    verifying_key: &VerifyingKey,
) -> Result<ServerKeyExchangeResult, AlertDescription> {
    let mut stuffer = Stuffer::growable();
    stuffer.write_bytes(body).map_err(|_| AlertDescription::InternalError)?;

    let curve_type = stuffer.read_u8().map_err(|_| AlertDescription::DecodeError)?;
    if curve_type != NAMED_CURVE {
        error!("unsupported ECCurveType: {}", curve_type);
        return Err(AlertDescription::HandshakeFailure);
    }

    let params_start = stuffer.read_cursor();
    let named_curve = stuffer.read_u16().map_err(|_| AlertDescription::DecodeError)?;
    if named_curve != NamedGroup::secp256r1 as u16 {
        error!("unsupported named curve: {:#06X}", named_curve);
        return Err(AlertDescription::HandshakeFailure);
    }

    let key_len = stuffer.read_u8().map_err(|_| AlertDescription::DecodeError)?;
    if key_len != 65 {
        return Err(AlertDescription::DecodeError);
    }
    let mut public_key = [0u8; 65];
    stuffer.read_bytes(&mut public_key).map_err(|_| AlertDescription::DecodeError)?;
    let params_end = stuffer.read_cursor();

    let sig_len = stuffer.read_u16().map_err(|_| AlertDescription::DecodeError)?;
    let mut signed_params = vec![0u8; usize::from(sig_len)];
    stuffer.read_bytes(&mut signed_params).map_err(|_| AlertDescription::DecodeError)?;

    let mut signed_content = Vec::with_capacity(64 + params_end - params_start);
    signed_content.extend_from_slice(client_random);
    signed_content.extend_from_slice(server_random);
    signed_content.extend_from_slice(&body[params_start..params_end]);

    verifying_key
        .verify(&signed_content, &signed_params)
        .map_err(|_| AlertDescription::DecryptError)?;

    Ok(ServerKeyExchangeResult {
        public_key,
        signed_params,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_secp256r1_curve() {
        let mut body = vec![NAMED_CURVE];
        body.extend_from_slice(&0x0018u16.to_be_bytes()); // secp384r1
        body.push(65);
        body.extend_from_slice(&[0u8; 65]);
        body.extend_from_slice(&0u16.to_be_bytes());

        let signing = p256::ecdsa::SigningKey::random(&mut rand_core::OsRng);
        let key = p256::ecdsa::VerifyingKey::from(&signing);
        let err = recv(&body, &[0u8; 32], &[0u8; 32], &VerifyingKey::Ecdsa(key)).unwrap_err();
        assert_eq!(err, AlertDescription::HandshakeFailure);
    }
}
