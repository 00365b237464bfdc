//! Content fingerprints for comparing placement results across runs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A 128-bit XXH3 fingerprint of a byte stream.
///
/// Two runs whose serialized placements hash to the same `ContentHash` are
/// treated as reproducing the same floorplan.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; 16]);

impl ContentHash {
    /// Hashes a byte slice with XXH3-128.
    pub fn from_bytes(data: &[u8]) -> Self {
        Self(xxhash_rust::xxh3::xxh3_128(data).to_le_bytes())
    }

    /// Returns the raw little-endian hash bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.iter().try_for_each(|byte| write!(f, "{byte:02x}"))
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_bytes_same_hash() {
        assert_eq!(
            ContentHash::from_bytes(b"m0 (0,0)-(2,2)"),
            ContentHash::from_bytes(b"m0 (0,0)-(2,2)")
        );
    }

    #[test]
    fn moved_module_changes_hash() {
        assert_ne!(
            ContentHash::from_bytes(b"m0 (0,0)-(2,2)"),
            ContentHash::from_bytes(b"m0 (1,0)-(3,2)")
        );
    }

    #[test]
    fn display_is_hex() {
        let s = ContentHash::from_bytes(b"layout").to_string();
        assert_eq!(s.len(), 32);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn serde_roundtrip() {
        let h = ContentHash::from_bytes(b"snapshot");
        let json = serde_json::to_string(&h).unwrap();
        let back: ContentHash = serde_json::from_str(&json).unwrap();
        assert_eq!(h, back);
        assert_eq!(back.as_bytes().len(), 16);
    }
}
