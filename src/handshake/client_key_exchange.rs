//! TLS 1.0-1.2 `ClientKeyExchange`.
//!
//! Covers the two key-exchange shapes this crate negotiates at
//! `<= TLS 1.2`: ECDHE (an opaque EC point) and plain RSA (an
//! RSA-PKCS#1v1.5-encrypted `PreMasterSecret`, RFC 5246 Section 7.4.7.1).

use crate::error::Error;
use crate::stuffer::Stuffer;
use crate::AlertDescription;

use super::HandshakeType;

/// ```text
/// struct {
///     select (KeyExchangeAlgorithm) {
///         case ec_diffie_hellman: ClientECDiffieHellmanPublic;
///     } exchange_keys;
/// } ClientKeyExchange;
///
/// struct {
///     ECPoint ecdh_Yc;
/// } ClientECDiffieHellmanPublic;
/// ```
pub fn ser_ecdhe(stuffer: &mut Stuffer, public_key: &[u8; 65]) -> Result<usize, Error> {
    let mut body = Vec::with_capacity(1 + public_key.len());
    body.push(public_key.len() as u8);
    body.extend_from_slice(public_key);

    stuffer.write_u8(HandshakeType::ClientKeyExchange as u8)?;
    stuffer.write_u24(body.len() as u32)?;
    stuffer.write_bytes(&body)?;
    Ok(4 + body.len())
}

pub fn recv_ecdhe(body: &[u8]) -> Result<[u8; 65], AlertDescription> {
    let mut stuffer = Stuffer::growable();
    stuffer.write_bytes(body).map_err(|_| AlertDescription::InternalError)?;
    let key_len = stuffer.read_u8().map_err(|_| AlertDescription::DecodeError)?;
    if key_len != 65 {
        return Err(AlertDescription::DecodeError);
    }
    let mut public_key = [0u8; 65];
    stuffer.read_bytes(&mut public_key).map_err(|_| AlertDescription::DecodeError)?;
    Ok(public_key)
}

/// ```text
/// struct {
///     select (KeyExchangeAlgorithm) {
///         case rsa: EncryptedPreMasterSecret;
///     } exchange_keys;
/// } ClientKeyExchange;
///
/// struct {
///     ProtocolVersion client_version;
///     opaque random[46];
/// } PreMasterSecret;
///
/// struct {
///     public-key-encrypted PreMasterSecret pre_master_secret;
/// } EncryptedPreMasterSecret;
/// ```
pub fn ser_rsa(stuffer: &mut Stuffer, encrypted_pre_master_secret: &[u8]) -> Result<usize, Error> {
    let mut body = Vec::with_capacity(2 + encrypted_pre_master_secret.len());
    body.extend_from_slice(&(encrypted_pre_master_secret.len() as u16).to_be_bytes());
    body.extend_from_slice(encrypted_pre_master_secret);

    stuffer.write_u8(HandshakeType::ClientKeyExchange as u8)?;
    stuffer.write_u24(body.len() as u32)?;
    stuffer.write_bytes(&body)?;
    Ok(4 + body.len())
}

pub fn recv_rsa(body: &[u8]) -> Result<Vec<u8>, AlertDescription> {
    let mut stuffer = Stuffer::growable();
    stuffer.write_bytes(body).map_err(|_| AlertDescription::InternalError)?;
    let len = stuffer.read_u16().map_err(|_| AlertDescription::DecodeError)?;
    let mut encrypted = vec![0u8; usize::from(len)];
    stuffer.read_bytes(&mut encrypted).map_err(|_| AlertDescription::DecodeError)?;
    Ok(encrypted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecdhe_public_key_round_trips() {
        let mut stuffer = Stuffer::growable();
        let key = [0x04u8; 65];
        ser_ecdhe(&mut stuffer, &key).unwrap();

        let mut header = [0u8; 4];
        stuffer.read_bytes(&mut header).unwrap();
        let body_len = u32::from_be_bytes(header) & 0x00FF_FFFF;
        let mut body = vec![0u8; body_len as usize];
        stuffer.read_bytes(&mut body).unwrap();

        assert_eq!(recv_ecdhe(&body).unwrap(), key);
    }
}
