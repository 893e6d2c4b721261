// Base58 and Base58Check encoding

use crate::core::CodecError;
use crate::core::hash::{CHECKSUM_LEN, checksum};

/// Encode bytes as Base58. Leading zero bytes become leading '1' characters.
pub fn base58_encode(data: &[u8]) -> String {
    bs58::encode(data).into_string()
}

/// Decode a Base58 string
pub fn base58_decode(encoded: &str) -> Result<Vec<u8>, CodecError> {
    bs58::decode(encoded)
        .into_vec()
        .map_err(|e| CodecError::Invalid(format!("invalid base58: {}", e)))
}

/// Base58Check: `base58(version ‖ payload ‖ checksum(version ‖ payload))`
pub fn base58check_encode(version: u8, payload: &[u8]) -> String {
    let mut data = Vec::with_capacity(1 + payload.len() + CHECKSUM_LEN);
    data.push(version);
    data.extend_from_slice(payload);
    let check = checksum(&data);
    data.extend_from_slice(&check);
    base58_encode(&data)
}

/// Decode a Base58Check string into `(version, payload)`, verifying the checksum
pub fn base58check_decode(encoded: &str) -> Result<(u8, Vec<u8>), CodecError> {
    let data = base58_decode(encoded)?;
    if data.len() < 1 + CHECKSUM_LEN {
        return Err(CodecError::InvalidLength {
            expected: 1 + CHECKSUM_LEN,
            actual: data.len(),
        });
    }

    let (body, actual) = data.split_at(data.len() - CHECKSUM_LEN);
    if checksum(body) != actual {
        return Err(CodecError::Invalid("checksum mismatch".to_string()));
    }

    Ok((body[0], body[1..].to_vec()))
}
