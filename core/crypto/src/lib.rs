//! Cryptographic primitives for DriveVault.
//!
//! This module provides:
//! - Key derivation using Argon2id
//! - Password verification without persisting secrets
//! - Authenticated encryption using XChaCha20-Poly1305
//! - Whole-stream authenticated encryption for large files
//! - Plaintext content hashing
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext, password, or key material is ever persisted or logged
//! - Nonces are generated internally; no API accepts one
//! - Constant-time operations for sensitive comparisons

pub mod aead;
pub mod hash;
pub mod kdf;
pub mod keys;
pub mod stream;
pub mod verifier;

pub use kdf::{derive_key, KdfParams};
pub use keys::{Salt, SessionKey, KEY_LENGTH};
pub use stream::{DecryptingStream, EncryptingStream};
pub use verifier::{KeyManager, KeyVerifier, PasswordPolicy};
