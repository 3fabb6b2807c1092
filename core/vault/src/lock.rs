//! Single-writer vault lock.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use drivevault_common::{Error, Result};

/// Lock file name inside the vault root.
pub const LOCK_FILENAME: &str = "vault.lock";

/// Exclusive advisory lock over one vault root.
///
/// Creation fails if the lock file already exists; the file records the
/// holder's pid and is removed on drop. A lock left behind by a crashed
/// process must be removed by the operator; the engine never breaks it.
#[derive(Debug)]
pub struct VaultLock {
    path: PathBuf,
}

impl VaultLock {
    /// Try to acquire the lock at `path`.
    ///
    /// # Errors
    /// - [`Error::VaultBusy`] if another session holds the lock
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let _ = writeln!(file, "{}", std::process::id());
                debug!(path = %path.display(), "vault lock acquired");
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = std::fs::read_to_string(&path)
                    .ok()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| "unknown".to_string());
                Err(Error::VaultBusy(format!(
                    "{} is held by pid {}",
                    path.display(),
                    holder
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for VaultLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!(path = %self.path.display(), error = %e, "failed to remove vault lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_and_release() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(LOCK_FILENAME);

        let lock = VaultLock::acquire(&path).unwrap();
        assert!(path.exists());

        drop(lock);
        assert!(!path.exists());
    }

    #[test]
    fn test_contention_fails_busy() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(LOCK_FILENAME);

        let _held = VaultLock::acquire(&path).unwrap();
        let result = VaultLock::acquire(&path);

        assert!(matches!(result, Err(Error::VaultBusy(_))));
    }

    #[test]
    fn test_reacquire_after_release() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(LOCK_FILENAME);

        drop(VaultLock::acquire(&path).unwrap());
        assert!(VaultLock::acquire(&path).is_ok());
    }

    #[test]
    fn test_busy_reports_holder_pid() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(LOCK_FILENAME);

        let _held = VaultLock::acquire(&path).unwrap();
        match VaultLock::acquire(&path) {
            Err(Error::VaultBusy(msg)) => {
                assert!(msg.contains(&std::process::id().to_string()));
            }
            other => panic!("expected VaultBusy, got {:?}", other.map(|_| ())),
        }
    }
}
