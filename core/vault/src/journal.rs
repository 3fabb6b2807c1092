//! Durable object-to-origin journal.
//!
//! The journal maps every sealed object to the absolute path it came from.
//! It is rewritten wholesale on every change; the rewrite goes to a
//! temporary file, is flushed, and is renamed over the previous version, so
//! a crash mid-write leaves either the old or the new complete journal,
//! never a truncated one.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use drivevault_common::{Error, ObjectId, Result};

/// Journal format version.
pub const JOURNAL_FORMAT_VERSION: u32 = 1;

/// One journal entry: where a sealed object came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Absolute path the object was sealed from, and the default restore
    /// target.
    pub original_path: PathBuf,
    /// BLAKE2b-256 of the plaintext, recorded for integrity display.
    pub content_hash: String,
    /// Plaintext size in bytes.
    pub size: u64,
    /// When the object was sealed.
    pub sealed_at: DateTime<Utc>,
}

impl JournalEntry {
    /// Name shown to the operator: the original file's basename.
    pub fn display_name(&self) -> String {
        self.original_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.original_path.display().to_string())
    }
}

/// Persisted journal form.
#[derive(Debug, Serialize, Deserialize)]
struct JournalFile {
    format_version: u32,
    entries: HashMap<ObjectId, JournalEntry>,
}

/// Result of comparing the journal against the objects actually on disk.
#[derive(Debug, Default)]
pub struct Reconciliation {
    /// Entries whose object is missing. They cannot refer to anything and
    /// are safe to prune.
    pub orphan_entries: Vec<ObjectId>,
    /// Objects with no entry. Recoverable only by manual export; never
    /// deleted automatically.
    pub orphan_objects: Vec<ObjectId>,
}

impl Reconciliation {
    /// True when journal and directory agree exactly.
    pub fn is_clean(&self) -> bool {
        self.orphan_entries.is_empty() && self.orphan_objects.is_empty()
    }
}

/// Durable mapping from object id to original location.
pub struct MetadataJournal {
    path: PathBuf,
    entries: HashMap<ObjectId, JournalEntry>,
}

impl MetadataJournal {
    /// Load the journal at `path`, or start empty if none exists yet.
    ///
    /// # Errors
    /// - [`Error::JournalCorrupt`] if the file exists but does not parse
    /// - [`Error::UnsupportedFormat`] for a future format version
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match fs::read(&path).await {
            Ok(bytes) => {
                let file: JournalFile = serde_json::from_slice(&bytes)
                    .map_err(|e| Error::JournalCorrupt(e.to_string()))?;
                if file.format_version != JOURNAL_FORMAT_VERSION {
                    return Err(Error::UnsupportedFormat(file.format_version));
                }
                file.entries
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self { path, entries })
    }

    /// Look up an entry.
    pub fn get(&self, id: &ObjectId) -> Option<&JournalEntry> {
        self.entries.get(id)
    }

    /// Whether some entry already maps the given original path.
    pub fn contains_path(&self, original: &Path) -> bool {
        self.entries.values().any(|e| e.original_path == original)
    }

    /// Iterate over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (&ObjectId, &JournalEntry)> {
        self.entries.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the journal has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append or update an entry and durably persist the new journal.
    ///
    /// On persistence failure the in-memory state is rolled back, so memory
    /// and disk never disagree.
    pub async fn record(&mut self, id: ObjectId, entry: JournalEntry) -> Result<()> {
        let previous = self.entries.insert(id.clone(), entry);
        if let Err(e) = self.persist().await {
            match previous {
                Some(prev) => {
                    self.entries.insert(id, prev);
                }
                None => {
                    self.entries.remove(&id);
                }
            }
            return Err(e);
        }
        Ok(())
    }

    /// Remove an entry and durably persist the new journal.
    pub async fn remove(&mut self, id: &ObjectId) -> Result<()> {
        let previous = self.entries.remove(id);
        if let Err(e) = self.persist().await {
            if let Some(prev) = previous {
                self.entries.insert(id.clone(), prev);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Compare against the object ids actually present in the data
    /// directory.
    pub fn reconcile(&self, actual: &HashSet<ObjectId>) -> Reconciliation {
        let orphan_entries = self
            .entries
            .keys()
            .filter(|id| !actual.contains(*id))
            .cloned()
            .collect();
        let orphan_objects = actual
            .iter()
            .filter(|id| !self.entries.contains_key(*id))
            .cloned()
            .collect();

        Reconciliation {
            orphan_entries,
            orphan_objects,
        }
    }

    /// Drop entries that no longer have an object, persisting if anything
    /// changed.
    pub async fn prune(&mut self, orphans: &[ObjectId]) -> Result<()> {
        let mut changed = false;
        for id in orphans {
            if self.entries.remove(id).is_some() {
                warn!(object_id = %id, "pruned journal entry with no object");
                changed = true;
            }
        }
        if changed {
            self.persist().await?;
        }
        Ok(())
    }

    /// Write-temp, flush, rename-over.
    async fn persist(&self) -> Result<()> {
        let file = JournalFile {
            format_version: JOURNAL_FORMAT_VERSION,
            entries: self.entries.clone(),
        };
        let bytes =
            serde_json::to_vec_pretty(&file).map_err(|e| Error::Serialization(e.to_string()))?;

        let tmp = self.path.with_extension("json.tmp");
        let mut out = fs::File::create(&tmp).await?;
        out.write_all(&bytes).await?;
        out.sync_all().await?;
        drop(out);

        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(path: &str) -> JournalEntry {
        JournalEntry {
            original_path: PathBuf::from(path),
            content_hash: "hash".to_string(),
            size: 42,
            sealed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_record_and_reload() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("journal.json");

        let id = ObjectId::generate();
        let mut journal = MetadataJournal::load(&path).await.unwrap();
        journal.record(id.clone(), entry("/home/op/notes.txt")).await.unwrap();

        let reloaded = MetadataJournal::load(&path).await.unwrap();
        assert_eq!(reloaded.len(), 1);
        let restored = reloaded.get(&id).unwrap();
        assert_eq!(restored.original_path, PathBuf::from("/home/op/notes.txt"));
        assert_eq!(restored.display_name(), "notes.txt");
    }

    #[tokio::test]
    async fn test_remove_persists() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("journal.json");

        let id = ObjectId::generate();
        let mut journal = MetadataJournal::load(&path).await.unwrap();
        journal.record(id.clone(), entry("/a")).await.unwrap();
        journal.remove(&id).await.unwrap();

        let reloaded = MetadataJournal::load(&path).await.unwrap();
        assert!(reloaded.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_journal() {
        let temp = TempDir::new().unwrap();
        let journal = MetadataJournal::load(temp.path().join("journal.json"))
            .await
            .unwrap();
        assert!(journal.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_journal_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("journal.json");
        fs::write(&path, b"{ not json").await.unwrap();

        let result = MetadataJournal::load(&path).await;
        assert!(matches!(result, Err(Error::JournalCorrupt(_))));
    }

    #[tokio::test]
    async fn test_future_version_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("journal.json");
        fs::write(&path, br#"{"format_version": 7, "entries": {}}"#)
            .await
            .unwrap();

        let result = MetadataJournal::load(&path).await;
        assert!(matches!(result, Err(Error::UnsupportedFormat(7))));
    }

    #[tokio::test]
    async fn test_no_temp_file_left_behind() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("journal.json");

        let mut journal = MetadataJournal::load(&path).await.unwrap();
        journal.record(ObjectId::generate(), entry("/a")).await.unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_reconcile_classifies_orphans() {
        let temp = TempDir::new().unwrap();
        let mut journal = MetadataJournal::load(temp.path().join("journal.json"))
            .await
            .unwrap();

        let sealed = ObjectId::generate();
        let vanished = ObjectId::generate();
        let stray = ObjectId::generate();
        journal.record(sealed.clone(), entry("/a")).await.unwrap();
        journal.record(vanished.clone(), entry("/b")).await.unwrap();

        let actual: HashSet<ObjectId> = [sealed.clone(), stray.clone()].into_iter().collect();
        let recon = journal.reconcile(&actual);

        assert_eq!(recon.orphan_entries, vec![vanished.clone()]);
        assert_eq!(recon.orphan_objects, vec![stray.clone()]);
        assert!(!recon.is_clean());

        journal.prune(&recon.orphan_entries).await.unwrap();
        assert!(journal.get(&vanished).is_none());
        assert!(journal.get(&sealed).is_some());
    }
}
