//! Common error types for DriveVault.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for vault operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Password rejected at vault initialization.
    #[error("weak password: {0}")]
    WeakPassword(String),

    /// Password verification failed.
    ///
    /// Deliberately does not distinguish a wrong password from an unreadable
    /// verifier record, so the failure mode leaks nothing about which it was.
    #[error("authentication failed")]
    Auth,

    /// Ciphertext failed authentication: data corruption or tampering.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// Journal did not parse as well-formed structured data.
    #[error("journal corrupt: {0}")]
    JournalCorrupt(String),

    /// Operation requires an unlocked vault session.
    #[error("vault is not unlocked")]
    NotUnlocked,

    /// Another session holds the vault's exclusivity lock.
    #[error("vault busy: {0}")]
    VaultBusy(String),

    /// Seal source or unseal destination conflicts with existing state.
    #[error("conflict: {0}")]
    SourceConflict(String),

    /// The original restore directory is gone; the caller must supply a
    /// destination override.
    #[error("restore destination required: {} no longer exists", .0.display())]
    DestinationRequired(PathBuf),

    /// On-disk record written by an unknown format version.
    #[error("unsupported format version {0}")]
    UnsupportedFormat(u32),

    /// Cryptographic operation failed.
    #[error("cryptographic error: {0}")]
    Crypto(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
