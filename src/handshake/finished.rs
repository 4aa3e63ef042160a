use super::HandshakeType;

/// Serialize a `Finished` handshake message (header included) from its
/// `verify_data`. Takes any length rather than a fixed 32 bytes, since
/// SHA-384 cipher suites and the TLS 1.0-1.2 PRF path both produce
/// differently sized `verify_data`.
pub fn finished_message(verify_data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + verify_data.len());
    let len: [u8; 4] = u32::try_from(verify_data.len()).unwrap().to_be_bytes();
    buf.push(HandshakeType::Finished.into());
    buf.extend_from_slice(&len[1..]);
    buf.extend_from_slice(verify_data);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_verify_data_produces_36_byte_message() {
        let msg = finished_message(&[0xAAu8; 32]);
        assert_eq!(msg.len(), 36);
        assert_eq!(msg[0], HandshakeType::Finished as u8);
        assert_eq!(&msg[1..4], &[0, 0, 32]);
    }

    #[test]
    fn sha384_verify_data_produces_52_byte_message() {
        let msg = finished_message(&[0xBBu8; 48]);
        assert_eq!(msg.len(), 52);
        assert_eq!(&msg[1..4], &[0, 0, 48]);
    }
}
