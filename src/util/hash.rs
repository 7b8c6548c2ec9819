use sha2::{Digest, Sha256};

/// Hashes a string to a stable signed 64-bit integer.
///
/// Used for two things that must survive re-fetches unchanged: post ids
/// derived from guid text (or synthesized from title + timestamp), and the
/// content hash of a feed document prefix. SHA-256 truncated to the first
/// 8 bytes — stability across runs and platforms is the requirement here,
/// not collision resistance of the full digest.
pub fn hash_to_i64(input: &str) -> i64 {
    let digest = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}
