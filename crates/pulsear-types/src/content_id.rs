/// Transfer-scoped content identifier.
///
/// A `ContentId` names one upload attempt. It is the first field of every
/// binary slice frame (fixed width) and appears hex-encoded in JSON envelopes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::ProtocolDecodeError;

/// Width of a content id in bytes.
pub const CONTENT_ID_LEN: usize = 32;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId([u8; CONTENT_ID_LEN]);

impl ContentId {
    pub const fn from_bytes(bytes: [u8; CONTENT_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Derive the id for a new upload attempt.
    ///
    /// Every field is length-prefixed before hashing so that `("ab", "c")`
    /// and `("a", "bc")` never collide, and a random v4 UUID is mixed in so
    /// two attempts in the same millisecond still get distinct ids.
    pub fn derive(
        name: &str,
        owner: &str,
        size: u64,
        modified_ms: u64,
        attempt_ms: i64,
    ) -> Self {
        let mut hasher = Sha256::new();
        for field in [name.as_bytes(), owner.as_bytes()] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field);
        }
        hasher.update(size.to_le_bytes());
        hasher.update(modified_ms.to_le_bytes());
        hasher.update(attempt_ms.to_le_bytes());
        hasher.update(Uuid::new_v4().as_bytes());
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; CONTENT_ID_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse the raw fixed-width prefix of a slice frame.
    pub fn from_slice(raw: &[u8]) -> Option<Self> {
        let bytes: [u8; CONTENT_ID_LEN] = raw.try_into().ok()?;
        Some(Self(bytes))
    }
}

impl FromStr for ContentId {
    type Err = ProtocolDecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = hex::decode(s).map_err(|_| ProtocolDecodeError::ContentId(s.to_string()))?;
        Self::from_slice(&raw).ok_or_else(|| ProtocolDecodeError::ContentId(s.to_string()))
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps log lines readable.
        write!(f, "ContentId({}..)", &self.to_hex()[..12])
    }
}

impl Serialize for ContentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_roundtrip() {
        let id = ContentId::derive("a.txt", "alice", 10, 1_700_000_000_000, 1_700_000_000_123);
        let parsed: ContentId = id.to_hex().parse().unwrap();
        assert_eq!(parsed, id);
        assert_eq!(id.to_hex().len(), CONTENT_ID_LEN * 2);
    }

    #[test]
    fn test_attempts_are_distinct() {
        let a = ContentId::derive("a.txt", "alice", 10, 5, 7);
        let b = ContentId::derive("a.txt", "alice", 10, 5, 7);
        assert_ne!(a, b);
    }

    #[test]
    fn test_rejects_bad_hex() {
        assert!("zz".parse::<ContentId>().is_err());
        assert!("abcd".parse::<ContentId>().is_err());
    }

    #[test]
    fn test_serde_is_hex_string() {
        let id = ContentId::from_bytes([0xab; CONTENT_ID_LEN]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(CONTENT_ID_LEN)));
    }
}
