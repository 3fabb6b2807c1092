//! Volume resolution and concealment.
//!
//! Concealment is best-effort: a filesystem without a hidden attribute is a
//! reportable capability, not an error.

use std::path::{Path, PathBuf};

use drivevault_common::Result;

/// Default vault directory name on a volume.
pub const VAULT_DIRNAME: &str = ".vault";

/// Resolves a mounted volume to its vault root and applies host-specific
/// concealment attributes.
pub trait VolumeBinding: Send + Sync {
    /// Map a mountpoint to the vault root directory on that volume.
    fn resolve_root(&self, mountpoint: &Path) -> Result<PathBuf>;

    /// Conceal the vault directory from casual browsing.
    ///
    /// Returns whether concealment was actually applied; `false` means the
    /// host offers no mechanism beyond the directory name itself.
    fn apply_concealment(&self, path: &Path) -> Result<bool>;
}

/// Dot-directory binding.
///
/// The vault root is `<mountpoint>/.vault`. The leading dot already hides
/// the directory on Unix-like hosts; on Windows the hidden and system
/// attributes are set on top of it.
#[derive(Debug, Default, Clone, Copy)]
pub struct HiddenDirBinding;

impl VolumeBinding for HiddenDirBinding {
    fn resolve_root(&self, mountpoint: &Path) -> Result<PathBuf> {
        Ok(mountpoint.join(VAULT_DIRNAME))
    }

    #[cfg(unix)]
    fn apply_concealment(&self, path: &Path) -> Result<bool> {
        // The dot prefix is the concealment mechanism.
        Ok(path
            .file_name()
            .map(|n| n.to_string_lossy().starts_with('.'))
            .unwrap_or(false))
    }

    #[cfg(windows)]
    fn apply_concealment(&self, path: &Path) -> Result<bool> {
        let status = std::process::Command::new("attrib")
            .arg("+h")
            .arg("+s")
            .arg(path)
            .status()?;
        Ok(status.success())
    }

    #[cfg(not(any(unix, windows)))]
    fn apply_concealment(&self, _path: &Path) -> Result<bool> {
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_root_joins_vault_dirname() {
        let binding = HiddenDirBinding;
        let root = binding.resolve_root(Path::new("/mnt/usb0")).unwrap();
        assert_eq!(root, PathBuf::from("/mnt/usb0/.vault"));
    }

    #[cfg(unix)]
    #[test]
    fn test_dot_directory_counts_as_concealed() {
        let binding = HiddenDirBinding;
        assert!(binding.apply_concealment(Path::new("/mnt/usb0/.vault")).unwrap());
        assert!(!binding.apply_concealment(Path::new("/mnt/usb0/vault")).unwrap());
    }
}
