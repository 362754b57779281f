//! SHA-256 helpers for identifiers and content versions.

use sha2::{Digest, Sha256};

/// Hashes a client-reported identifier with a static server salt.
///
/// Input is trimmed so that trailing newlines from executor APIs do not
/// produce distinct hashes for the same device.
pub fn hash_identifier(value: &str, static_salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(static_salt.as_bytes());
    hasher.update(b":");
    hasher.update(value.trim().as_bytes());
    hex::encode(hasher.finalize())
}

/// Raw SHA-256 digest.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Lowercase hex SHA-256 digest.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}
