//! Vault engine for DriveVault.
//!
//! This module provides:
//! - Vault lifecycle management per removable volume
//! - Sealing files into encrypted objects and restoring them
//! - A crash-safe journal mapping objects to their original location
//! - Single-writer locking and session handling with secure key management
//!
//! # Architecture
//! The vault module sits between the user interface and the crypto
//! primitives: callers resolve a volume to a root via [`VolumeBinding`],
//! open a [`VaultStore`] session with a password, and drive seal / unseal /
//! list / purge through it.

pub mod binding;
pub mod journal;
pub mod lock;
pub mod store;

pub use binding::{HiddenDirBinding, VolumeBinding, VAULT_DIRNAME};
pub use journal::{JournalEntry, MetadataJournal, Reconciliation};
pub use lock::VaultLock;
pub use store::{StoreState, VaultEntry, VaultStore};
