// Hashing utilities

use crate::core::{Hash256, PubKeyHash};
use sha2::{Digest, Sha256};

/// Length of the Base58Check checksum suffix
pub const CHECKSUM_LEN: usize = 4;

/// Single SHA256 hash. Block hashes, transaction ids and Merkle nodes all use this.
pub fn sha256(data: &[u8]) -> Hash256 {
    let hash = Sha256::digest(data);
    let mut result = [0u8; 32];
    result.copy_from_slice(&hash);
    Hash256::new(result)
}

/// SHA256 over the concatenation of two byte strings
pub fn sha256_concat(left: &[u8], right: &[u8]) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    let mut result = [0u8; 32];
    result.copy_from_slice(&hasher.finalize());
    Hash256::new(result)
}

/// RIPEMD160(SHA256(data)) - used for address generation
pub fn hash160(data: &[u8]) -> PubKeyHash {
    use ripemd::{Digest as RipemdDigest, Ripemd160};
    let sha = Sha256::digest(data);
    let ripemd = Ripemd160::digest(sha);
    let mut result = [0u8; 20];
    result.copy_from_slice(&ripemd);
    result
}

/// First four bytes of SHA256(SHA256(payload))
pub fn checksum(payload: &[u8]) -> [u8; CHECKSUM_LEN] {
    let first = Sha256::digest(payload);
    let second = Sha256::digest(first);
    let mut result = [0u8; CHECKSUM_LEN];
    result.copy_from_slice(&second[..CHECKSUM_LEN]);
    result
}
