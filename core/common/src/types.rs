//! Common types used throughout DriveVault.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of one sealed object within a vault.
///
/// Ids are freshly generated, never derived from the original file name, so
/// they cannot collide and do not leak the name on disk. The textual form
/// doubles as the ciphertext file name inside the vault's data directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parse an identifier from its textual form.
    ///
    /// # Preconditions
    /// - `s` must be non-empty and safe to use as a file name
    ///
    /// # Errors
    /// - Returns error if the string is empty or contains characters outside
    ///   the generated alphabet
    pub fn parse(s: &str) -> crate::Result<Self> {
        if s.is_empty() {
            return Err(crate::Error::InvalidInput(
                "ObjectId cannot be empty".to_string(),
            ));
        }
        if !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(crate::Error::InvalidInput(format!(
                "invalid object id: {}",
                s
            )));
        }
        Ok(Self(s.to_string()))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_unique() {
        let a = ObjectId::generate();
        let b = ObjectId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_parse_roundtrip() {
        let id = ObjectId::generate();
        let parsed = ObjectId::parse(id.as_str()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_parse_empty_fails() {
        assert!(ObjectId::parse("").is_err());
    }

    #[test]
    fn test_parse_rejects_path_characters() {
        assert!(ObjectId::parse("../escape").is_err());
        assert!(ObjectId::parse("a/b").is_err());
        assert!(ObjectId::parse("a\\b").is_err());
    }

    #[test]
    fn test_serde_transparent() {
        let id = ObjectId::parse("abc-123").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"abc-123\"");
    }
}
