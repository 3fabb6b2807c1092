//! Password verification without persisting secrets.
//!
//! The verifier record stores a salt, the KDF cost parameters, and a keyed
//! hash of a fixed constant under the derived key. It never contains the
//! password or the key itself. Unlocking re-derives the key and compares
//! tags in constant time.

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::kdf::{derive_key, KdfParams};
use crate::keys::{Salt, SessionKey};
use drivevault_common::{Error, Result};

/// Verifier record format version.
pub const VERIFIER_FORMAT_VERSION: u32 = 1;

/// Fixed domain constant the verification tag commits to.
const VERIFICATION_CONTEXT: &[u8] = b"DRIVEVAULT_KEY_VERIFICATION_V1";

/// Minimum password requirements enforced at initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordPolicy {
    /// Minimum accepted password length in bytes.
    pub min_length: usize,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self { min_length: 8 }
    }
}

/// Persisted password-verification record.
///
/// Created once per vault at initialization and immutable thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyVerifier {
    /// Record format version, checked before anything else.
    pub format_version: u32,
    /// Salt for key derivation.
    pub salt: Salt,
    /// KDF cost parameters the key was derived with.
    pub kdf_params: KdfParams,
    /// Keyed BLAKE2b-256 of [`VERIFICATION_CONTEXT`] under the derived key.
    pub tag: Vec<u8>,
}

impl KeyVerifier {
    /// Serialize the record for persistence.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize a persisted record.
    ///
    /// Unparsable data maps to [`Error::Auth`]: a damaged verifier is
    /// indistinguishable from a wrong password. A well-formed record from a
    /// future format version is rejected with [`Error::UnsupportedFormat`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let verifier: KeyVerifier = serde_json::from_slice(bytes).map_err(|_| Error::Auth)?;
        if verifier.format_version != VERIFIER_FORMAT_VERSION {
            return Err(Error::UnsupportedFormat(verifier.format_version));
        }
        Ok(verifier)
    }
}

/// Derives and verifies session keys from operator passwords.
///
/// Stateless service: performs no disk I/O. Callers persist the verifier.
#[derive(Debug, Clone, Default)]
pub struct KeyManager {
    params: KdfParams,
    policy: PasswordPolicy,
}

impl KeyManager {
    /// Create a key manager with explicit KDF parameters and password policy.
    pub fn new(params: KdfParams, policy: PasswordPolicy) -> Self {
        Self { params, policy }
    }

    /// First-use initialization: derive a key and build its verifier.
    ///
    /// # Postconditions
    /// - The verifier contains neither the password nor the derived key
    ///
    /// # Errors
    /// - [`Error::WeakPassword`] if the password is shorter than the policy
    ///   minimum
    pub fn initialize(&self, password: &[u8]) -> Result<(KeyVerifier, SessionKey)> {
        if password.len() < self.policy.min_length {
            return Err(Error::WeakPassword(format!(
                "password must be at least {} bytes",
                self.policy.min_length
            )));
        }

        let salt = Salt::generate();
        let key = derive_key(password, &salt, &self.params)?;
        let tag = verification_tag(&key);

        let verifier = KeyVerifier {
            format_version: VERIFIER_FORMAT_VERSION,
            salt,
            kdf_params: self.params.clone(),
            tag,
        };

        Ok((verifier, key))
    }

    /// Re-derive the key and check it against the stored verifier.
    ///
    /// Comparison is constant time. A wrong password and a corrupted tag
    /// produce the same [`Error::Auth`], so the failure mode leaks nothing.
    pub fn unlock(&self, password: &[u8], verifier: &KeyVerifier) -> Result<SessionKey> {
        if verifier.format_version != VERIFIER_FORMAT_VERSION {
            return Err(Error::UnsupportedFormat(verifier.format_version));
        }

        let key = derive_key(password, &verifier.salt, &verifier.kdf_params)?;
        let tag = verification_tag(&key);

        if bool::from(tag.ct_eq(&verifier.tag)) {
            Ok(key)
        } else {
            Err(Error::Auth)
        }
    }
}

/// Keyed BLAKE2b-256 over the fixed domain constant.
fn verification_tag(key: &SessionKey) -> Vec<u8> {
    use blake2::digest::consts::U32;
    use blake2::digest::Mac;
    use blake2::Blake2bMac;

    let mut mac = <Blake2bMac<U32> as Mac>::new_from_slice(key.as_bytes())
        .expect("32-byte key is a valid BLAKE2b MAC key");
    mac.update(VERIFICATION_CONTEXT);
    mac.finalize().into_bytes().to_vec()
}
