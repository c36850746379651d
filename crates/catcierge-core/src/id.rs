//! Stable ids for matches and match groups.
//!
//! An id is the SHA-1 digest of the raw image bytes plus the formatted
//! timestamp string, so identical input always yields the identical id.

use sha1::{Digest, Sha1};
use std::fmt;

/// A 20-byte digest identifying a match or match group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MatchId([u8; 20]);

impl MatchId {
    /// Hash image bytes together with a timestamp string.
    pub fn compute(image_bytes: &[u8], time_str: &str) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(image_bytes);
        hasher.update(time_str.as_bytes());
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Hex id truncated to at most `n` characters.
    pub fn short(&self, n: usize) -> String {
        let mut hex = self.to_string();
        hex.truncate(n);
        hex
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}
