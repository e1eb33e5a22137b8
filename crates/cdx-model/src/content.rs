//! Content identifiers for change detection
//!
//! Provides [`ContentId`], a 32-byte Blake3 digest of an entity's canonical
//! JSON encoding. Two runs that produce byte-identical payloads produce the
//! same id, which lets ingestion skip re-uploading unchanged entities.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// A 32-byte content hash (Blake3)
///
/// Identity of an entity never depends on this value; see [`crate::Uid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentId([u8; 32]);

impl ContentId {
    /// Create a content id from raw digest bytes
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get reference to the underlying bytes
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Create content id from byte slice
    ///
    /// # Errors
    /// Returns error if slice length is not exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ContentIdError> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| ContentIdError::InvalidLength {
            expected: 32,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }

    /// Hash raw bytes
    #[inline]
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        Self::new(*blake3::hash(data).as_bytes())
    }

    /// Hash the JSON encoding of a value, returning the id and encoded size
    ///
    /// # Errors
    /// Returns error if serialization fails
    pub fn of<T>(value: &T) -> Result<(Self, usize), ContentIdError>
    where
        T: serde::Serialize + ?Sized,
    {
        let json = serde_json::to_vec(value)?;
        Ok((Self::compute(&json), json.len()))
    }

    /// Short string representation (first 16 hex chars)
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl Display for ContentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for ContentId {
    type Err = ContentIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes)
    }
}

// Always hex on the wire: content ids are stored next to JSON entities.
impl serde::Serialize for ContentId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for ContentId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Errors that can occur when working with content ids
#[derive(Debug, thiserror::Error)]
pub enum ContentIdError {
    /// Invalid digest length
    #[error("invalid content id length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Required byte length
        expected: usize,
        /// Observed byte length
        actual: usize,
    },

    /// Hex encoding error
    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_id_from_slice_invalid_length() {
        let result = ContentId::from_slice(&[1u8; 31]);
        assert!(matches!(
            result,
            Err(ContentIdError::InvalidLength { expected: 32, actual: 31 })
        ));
    }

    #[test]
    fn content_id_of_is_deterministic() {
        let (a, size_a) = ContentId::of(&vec!["x", "y"]).unwrap();
        let (b, size_b) = ContentId::of(&vec!["x", "y"]).unwrap();
        assert_eq!(a, b);
        assert_eq!(size_a, size_b);
        assert_eq!(size_a, br#"["x","y"]"#.len());
    }

    #[test]
    fn content_id_changes_with_content() {
        assert_ne!(ContentId::compute(b"data1"), ContentId::compute(b"data2"));
    }

    #[test]
    fn content_id_display_and_parse() {
        let id = ContentId::compute(b"test");
        let parsed: ContentId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!(id.to_string().starts_with(&id.short()));
    }

    #[test]
    fn content_id_serde_is_hex_string() {
        let id = ContentId::compute(b"test");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json.len(), 66);
        let decoded: ContentId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, decoded);
    }
}
