//! Key types with secure memory handling.
//!
//! All key material automatically zeroizes on drop to prevent sensitive
//! data from persisting in memory.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of symmetric keys in bytes (256-bit).
pub const KEY_LENGTH: usize = 32;

/// Symmetric key derived from the operator password.
///
/// Exists only in memory while a vault is unlocked. It is never serialized
/// and is zeroized on drop or when the session closes.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey {
    key: [u8; KEY_LENGTH],
}

impl SessionKey {
    /// Create a session key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Get the key bytes.
    ///
    /// # Security
    /// The returned slice should be used immediately and not stored.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Derive a single-purpose subkey bound to a context label.
    ///
    /// Uses BLAKE2b so that the stream cipher and the stream MAC never share
    /// key material with each other or with the session key itself.
    pub fn derive_subkey(&self, context: &[u8]) -> SessionKey {
        use blake2::digest::consts::U32;
        use blake2::{Blake2b, Digest};

        let mut hasher = Blake2b::<U32>::new();
        hasher.update(self.key);
        hasher.update(context);

        let result = hasher.finalize();
        let mut derived = [0u8; KEY_LENGTH];
        derived.copy_from_slice(&result);
        SessionKey::from_bytes(derived)
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionKey([REDACTED])")
    }
}

/// Salt for key derivation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Salt(pub [u8; 32]);

impl Salt {
    /// Generate a random salt.
    pub fn generate() -> Self {
        let mut salt = [0u8; 32];
        rand::rng().fill_bytes(&mut salt);
        Self(salt)
    }

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the salt bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_subkey_deterministic() {
        let key = SessionKey::from_bytes([1u8; KEY_LENGTH]);

        let sub1 = key.derive_subkey(b"stream-mac");
        let sub2 = key.derive_subkey(b"stream-mac");
        assert_eq!(sub1.as_bytes(), sub2.as_bytes());
    }

    #[test]
    fn test_derive_subkey_context_separation() {
        let key = SessionKey::from_bytes([1u8; KEY_LENGTH]);

        let mac = key.derive_subkey(b"stream-mac");
        let cipher = key.derive_subkey(b"stream-cipher");
        assert_ne!(mac.as_bytes(), cipher.as_bytes());
        assert_ne!(mac.as_bytes(), key.as_bytes());
    }

    #[test]
    fn test_salt_generate() {
        let salt1 = Salt::generate();
        let salt2 = Salt::generate();

        // Random salts should be different
        assert_ne!(salt1.as_bytes(), salt2.as_bytes());
    }

    #[test]
    fn test_debug_redacted() {
        let key = SessionKey::from_bytes([7u8; KEY_LENGTH]);
        let rendered = format!("{:?}", key);
        assert!(!rendered.contains('7'));
        assert!(rendered.contains("REDACTED"));
    }
}
