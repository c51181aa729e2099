//! EntryDigest: a BLAKE3 digest of one snapshot entry, truncated to 128 bits.
//!
//! Recorded in the snapshot manifest so the reader can tell a truncated or
//! rewritten entry apart from the one the writer produced.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// 128 bits (16 bytes, 32 hex chars) of BLAKE3.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntryDigest(String);

/// Errors that can occur when parsing an entry digest.
#[derive(Debug, Error)]
pub enum DigestError {
    #[error("invalid digest length: expected 32 hex chars, got {0}")]
    InvalidLength(usize),

    #[error("invalid hex character in digest")]
    InvalidHex,
}

impl EntryDigest {
    /// Digest an entry's bytes.
    pub fn of(data: &[u8]) -> Self {
        let hash = blake3::hash(data);
        Self(hex::encode(&hash.as_bytes()[..16]))
    }

    /// Parse a digest string (validates format).
    pub fn from_str_checked(s: &str) -> Result<Self, DigestError> {
        if s.len() != 32 {
            return Err(DigestError::InvalidLength(s.len()));
        }
        if !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DigestError::InvalidHex);
        }
        Ok(Self(s.to_lowercase()))
    }

    /// Check whether `data` hashes to this digest.
    pub fn matches(&self, data: &[u8]) -> bool {
        *self == Self::of(data)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntryDigest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_checked(s)
    }
}

impl TryFrom<String> for EntryDigest {
    type Error = DigestError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_str_checked(&s)
    }
}

impl From<EntryDigest> for String {
    fn from(digest: EntryDigest) -> Self {
        digest.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_of_produces_32_hex_chars() {
        let digest = EntryDigest::of(b"rest entry");
        assert_eq!(digest.as_str().len(), 32);
        assert!(digest.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_of_is_deterministic() {
        assert_eq!(EntryDigest::of(b"same"), EntryDigest::of(b"same"));
        assert_ne!(EntryDigest::of(b"one"), EntryDigest::of(b"two"));
    }

    #[test]
    fn test_matches_detects_truncation() {
        let data = b"{\"components\":{}}";
        let digest = EntryDigest::of(data);
        assert!(digest.matches(data));
        assert!(!digest.matches(&data[..data.len() - 1]));
    }

    #[test]
    fn test_from_str_invalid_length() {
        let result: Result<EntryDigest, _> = "short".parse();
        assert!(matches!(result, Err(DigestError::InvalidLength(5))));
    }

    #[test]
    fn test_from_str_invalid_hex() {
        let result: Result<EntryDigest, _> = "zzzzzzzzzzzzzzzzzzzzzzzzzzzzzzzz".parse();
        assert!(matches!(result, Err(DigestError::InvalidHex)));
    }

    #[test]
    fn test_serde_rejects_malformed() {
        let ok: EntryDigest = serde_json::from_str("\"ABCDEF01234567890123456789ABCDEF\"").unwrap();
        assert_eq!(ok.as_str(), "abcdef01234567890123456789abcdef");

        let bad: Result<EntryDigest, _> = serde_json::from_str("\"nope\"");
        assert!(bad.is_err());
    }
}
