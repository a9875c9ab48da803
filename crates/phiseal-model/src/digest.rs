//! Content digests for sealed artifacts (versioned).
//!
//! Seals commit to the exact bytes of the exported files, so every digest in
//! a bundle uses one encoding:
//!
//! - algorithm: **SHA-256**
//! - input: the UTF-8 bytes of the artifact as exported
//! - output: `"sha256:<64 lowercase hex digits>"`
//!
//! Older bundles listed manifest entries as bare hex. `Digest::parse` accepts
//! both spellings so those bundles still verify.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};
use std::fmt;

/// Prefix used in serialized digests.
pub const SHA256_PREFIX: &str = "sha256:";

/// A SHA-256 digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; 32]);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DigestParseError {
    #[error("digest must be 64 hex digits (got {0} characters)")]
    BadLength(usize),
    #[error("digest contains a non-hex character at position {0}")]
    BadHex(usize),
}

impl Digest {
    /// Hash arbitrary bytes.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hasher.finalize().into())
    }

    /// Hash UTF-8 text as-is (no newline or whitespace normalization).
    pub fn of_text(text: &str) -> Self {
        Self::of_bytes(text.as_bytes())
    }

    /// Lowercase hex without the algorithm prefix.
    pub fn hex(&self) -> String {
        let mut out = String::with_capacity(64);
        for b in self.0.iter() {
            use std::fmt::Write as _;
            let _ = write!(&mut out, "{:02x}", b);
        }
        out
    }

    /// Parse `sha256:<hex>` or bare `<hex>`.
    pub fn parse(s: &str) -> Result<Self, DigestParseError> {
        let hex = s.trim();
        let hex = hex.strip_prefix(SHA256_PREFIX).unwrap_or(hex);
        if hex.len() != 64 {
            return Err(DigestParseError::BadLength(hex.len()));
        }

        let bytes = hex.as_bytes();
        let mut out = [0u8; 32];
        for (i, pair) in bytes.chunks(2).enumerate() {
            let hi = hex_value(pair[0]).ok_or(DigestParseError::BadHex(i * 2))?;
            let lo = hex_value(pair[1]).ok_or(DigestParseError::BadHex(i * 2 + 1))?;
            out[i] = (hi << 4) | lo;
        }
        Ok(Self(out))
    }
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SHA256_PREFIX}{}", self.hex())
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Digest::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Compute the `sha256:<hex>` string for text content.
pub fn sha256_digest(text: &str) -> String {
    Digest::of_text(text).to_string()
}
