//! Content-addressed cache keys.

use sha2::{Digest, Sha256};

/// Separates the normalized query from the normalized context in the digest
/// input, so ("ab", "c") and ("a", "bc") hash differently.
const FIELD_SEPARATOR: u8 = 0x1f;

/// Bytes of the SHA-256 digest kept in the key.
const KEY_BYTES: usize = 16;

/// Canonical form used for hashing: trimmed and lower-cased.
pub fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Deterministic digest of normalized query + context, hex encoded.
pub fn query_hash(query: &str, context: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(query).as_bytes());
    hasher.update([FIELD_SEPARATOR]);
    hasher.update(normalize(context).as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..KEY_BYTES])
}
