//! SHA-256 fingerprints over UTF-8 bytes, lowercase hex.
//!
//! Three fingerprints exist per ingested file: the raw bytes, the canonical
//! serialization of the normalized module, and each segment's text. All three
//! go through the same function.

use sha2::{Digest, Sha256};

/// Hash a byte slice to 64 lowercase hex characters.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Incremental hasher for streamed downloads.
pub struct StreamingHash {
    inner: Sha256,
}

impl StreamingHash {
    pub fn new() -> Self {
        Self { inner: Sha256::new() }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
    }

    pub fn finish(self) -> String {
        hex::encode(self.inner.finalize())
    }
}

impl Default for StreamingHash {
    fn default() -> Self {
        Self::new()
    }
}

/// Check that a string is a plausible hash key: 64 lowercase hex chars.
pub fn is_valid_hash(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        // sha256 of the empty string
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_streaming_matches_oneshot() {
        let mut h = StreamingHash::new();
        h.update(b"x = ");
        h.update(b"1");
        assert_eq!(h.finish(), sha256_hex(b"x = 1"));
    }

    #[test]
    fn test_hash_validation() {
        assert!(is_valid_hash(&sha256_hex(b"pass")));
        assert!(!is_valid_hash("abc"));
        assert!(!is_valid_hash(&sha256_hex(b"pass").to_uppercase()));
    }
}
