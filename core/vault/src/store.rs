//! Vault session and object lifecycle orchestration.
//!
//! A [`VaultStore`] is an unlocked session over one vault root. It owns the
//! session key, the journal, and the exclusivity lock, and drives the
//! seal / unseal / list / purge lifecycle with a commit ordering chosen so
//! that any interruption leaves either the pre-operation or the fully
//! committed state on disk, never a partial one.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::task;
use tracing::{debug, info, warn};

use crate::binding::VolumeBinding;
use crate::journal::{JournalEntry, MetadataJournal};
use crate::lock::{VaultLock, LOCK_FILENAME};
use drivevault_common::{Error, ObjectId, Result};
use drivevault_crypto::hash::{HashingReader, HashingWriter};
use drivevault_crypto::{
    DecryptingStream, EncryptingStream, KeyManager, KeyVerifier, SessionKey,
};

/// Verifier record file name in the vault root.
pub const VERIFIER_FILENAME: &str = "vault.verifier";

/// Journal file name in the vault root.
pub const JOURNAL_FILENAME: &str = "journal.json";

/// Data directory name in the vault root.
pub const DATA_DIRNAME: &str = "d";

/// State of a vault session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreState {
    /// Session key present, operations permitted.
    Unlocked,
    /// Key zeroized and lock released.
    Closed,
}

/// Listing entry for one sealed object.
#[derive(Debug, Clone)]
pub struct VaultEntry {
    /// Identifier of the sealed object.
    pub object_id: ObjectId,
    /// Original file basename, for display.
    pub display_name: String,
    /// Plaintext size in bytes.
    pub size: u64,
    /// When the object was sealed.
    pub sealed_at: DateTime<Utc>,
}

/// An unlocked vault session.
///
/// Dropping the store closes it: the key is zeroized and the lock released.
pub struct VaultStore {
    root: PathBuf,
    data_dir: PathBuf,
    key: Option<SessionKey>,
    journal: Mutex<MetadataJournal>,
    orphan_objects: Vec<ObjectId>,
    concealed: bool,
    state: StoreState,
    lock: Option<VaultLock>,
}

impl VaultStore {
    /// Open the vault at `root` with default KDF parameters and password
    /// policy, creating and initializing it on first use.
    pub async fn open(root: impl AsRef<Path>, password: &[u8]) -> Result<Self> {
        Self::open_with(root, password, KeyManager::default()).await
    }

    /// Resolve a volume's vault root through `binding`, open it, and apply
    /// best-effort concealment. Whether concealment took effect is reported
    /// by [`VaultStore::concealment_applied`].
    pub async fn open_volume(
        mountpoint: impl AsRef<Path>,
        password: &[u8],
        binding: &dyn VolumeBinding,
        key_manager: KeyManager,
    ) -> Result<Self> {
        let root = binding.resolve_root(mountpoint.as_ref())?;
        let mut store = Self::open_with(&root, password, key_manager).await?;
        store.concealed = binding.apply_concealment(&store.root)?;
        if !store.concealed {
            debug!(root = %store.root.display(), "volume offers no concealment attribute");
        }
        Ok(store)
    }

    /// Open the vault at `root` with an explicit key manager.
    ///
    /// # Postconditions
    /// - The exclusivity lock is held until close or drop
    /// - The journal agrees with the data directory: entries without an
    ///   object are pruned, objects without an entry are reported via
    ///   [`VaultStore::orphan_objects`]
    ///
    /// # Errors
    /// - [`Error::VaultBusy`] if another session holds the lock
    /// - [`Error::Auth`] for a wrong password or unreadable verifier
    /// - [`Error::WeakPassword`] on first use with a too-short password
    pub async fn open_with(
        root: impl AsRef<Path>,
        password: &[u8],
        key_manager: KeyManager,
    ) -> Result<Self> {
        let data_dir = root.as_ref().join(DATA_DIRNAME);
        fs::create_dir_all(&data_dir).await?;
        let root = fs::canonicalize(root.as_ref()).await?;
        let data_dir = root.join(DATA_DIRNAME);

        let lock = VaultLock::acquire(root.join(LOCK_FILENAME))?;

        let verifier_path = root.join(VERIFIER_FILENAME);
        let key = match fs::read(&verifier_path).await {
            Ok(bytes) => {
                let verifier = KeyVerifier::from_bytes(&bytes)?;
                key_manager.unlock(password, &verifier)?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let (verifier, key) = key_manager.initialize(password)?;
                write_atomic(&verifier_path, &verifier.to_bytes()?).await?;
                info!(root = %root.display(), "vault initialized");
                key
            }
            Err(e) => return Err(e.into()),
        };

        // Anything still carrying a .tmp suffix never reached its commit
        // point and is safe to sweep.
        sweep_temp_files(&root, &data_dir).await?;

        let mut journal = MetadataJournal::load(root.join(JOURNAL_FILENAME)).await?;
        let actual = scan_objects(&data_dir).await?;
        let reconciliation = journal.reconcile(&actual);
        journal.prune(&reconciliation.orphan_entries).await?;
        for id in &reconciliation.orphan_objects {
            warn!(object_id = %id, "object present with no journal entry; recoverable only by manual export");
        }

        info!(root = %root.display(), objects = journal.len(), "vault unlocked");

        Ok(Self {
            root,
            data_dir,
            key: Some(key),
            journal: Mutex::new(journal),
            orphan_objects: reconciliation.orphan_objects,
            concealed: false,
            state: StoreState::Unlocked,
            lock: Some(lock),
        })
    }

    /// The vault root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Current session state.
    pub fn state(&self) -> StoreState {
        self.state
    }

    /// Whether operations are currently permitted.
    pub fn is_unlocked(&self) -> bool {
        self.state == StoreState::Unlocked
    }

    /// Whether the host applied a concealment attribute to the vault root.
    ///
    /// Only meaningful for sessions opened through
    /// [`VaultStore::open_volume`].
    pub fn concealment_applied(&self) -> bool {
        self.concealed
    }

    /// Objects found on disk with no journal entry at open time.
    ///
    /// These are never deleted automatically.
    pub fn orphan_objects(&self) -> &[ObjectId] {
        &self.orphan_objects
    }

    /// Seal `source` into the vault.
    ///
    /// The source file is removed only after the ciphertext and the journal
    /// entry are both durably committed; any earlier failure leaves the
    /// source untouched and deletes the partial ciphertext.
    ///
    /// # Errors
    /// - [`Error::NotFound`] if the source does not exist
    /// - [`Error::InvalidInput`] if it is not a regular file
    /// - [`Error::SourceConflict`] if it lives inside the vault or is
    ///   already sealed
    pub async fn seal(&self, source: impl AsRef<Path>) -> Result<ObjectId> {
        let key = self.key()?.clone();

        let source = match fs::canonicalize(source.as_ref()).await {
            Ok(path) => path,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!(
                    "source file {} does not exist",
                    source.as_ref().display()
                )))
            }
            Err(e) => return Err(e.into()),
        };

        let meta = fs::metadata(&source).await?;
        if !meta.is_file() {
            return Err(Error::InvalidInput(format!(
                "{} is not a regular file",
                source.display()
            )));
        }
        if source.starts_with(&self.root) {
            return Err(Error::SourceConflict(format!(
                "{} is already inside the vault",
                source.display()
            )));
        }
        {
            let journal = self.journal.lock().await;
            if journal.contains_path(&source) {
                return Err(Error::SourceConflict(format!(
                    "{} is already sealed",
                    source.display()
                )));
            }
        }

        let id = ObjectId::generate();
        let object_path = self.object_path(&id);
        let tmp_path = tmp_sibling(&object_path);

        debug!(source = %source.display(), object_id = %id, "sealing file");

        let tmp_guard = TempFileGuard::new(tmp_path.clone());
        let (size, content_hash) = {
            let source = source.clone();
            let tmp = tmp_path.clone();
            task::spawn_blocking(move || encrypt_file(&key, &source, &tmp))
                .await
                .map_err(|e| Error::Crypto(format!("encryption task failed: {}", e)))??
        };

        fs::rename(&tmp_path, &object_path).await?;
        tmp_guard.disarm();

        // The ciphertext is in place but not yet journaled; roll it back if
        // the journal commit fails.
        let object_guard = TempFileGuard::new(object_path.clone());
        {
            let mut journal = self.journal.lock().await;
            if journal.contains_path(&source) {
                return Err(Error::SourceConflict(format!(
                    "{} is already sealed",
                    source.display()
                )));
            }
            journal
                .record(
                    id.clone(),
                    JournalEntry {
                        original_path: source.clone(),
                        content_hash,
                        size,
                        sealed_at: Utc::now(),
                    },
                )
                .await?;
        }
        object_guard.disarm();

        // Commit point passed: only now does the original disappear.
        fs::remove_file(&source).await?;

        info!(object_id = %id, size, "file sealed");
        Ok(id)
    }

    /// Restore a sealed object out of the vault.
    ///
    /// Restores to the original path when its parent directory still exists
    /// and no override is given; otherwise the caller must supply
    /// `destination_override`. The ciphertext and journal entry are deleted
    /// only after the plaintext is durably written.
    ///
    /// # Errors
    /// - [`Error::NotFound`] if no such object is journaled
    /// - [`Error::DestinationRequired`] if the original directory is gone
    /// - [`Error::SourceConflict`] if the destination is already occupied
    /// - [`Error::Integrity`] on ciphertext corruption; the object and its
    ///   entry are left untouched
    pub async fn unseal(
        &self,
        id: &ObjectId,
        destination_override: Option<&Path>,
    ) -> Result<PathBuf> {
        let key = self.key()?.clone();

        let entry = {
            let journal = self.journal.lock().await;
            journal
                .get(id)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("no sealed object {}", id)))?
        };

        let dest: PathBuf = match destination_override {
            Some(path) => path.to_path_buf(),
            None => {
                let parent = entry
                    .original_path
                    .parent()
                    .ok_or_else(|| Error::DestinationRequired(entry.original_path.clone()))?;
                let parent_exists = fs::metadata(parent)
                    .await
                    .map(|m| m.is_dir())
                    .unwrap_or(false);
                if !parent_exists {
                    return Err(Error::DestinationRequired(parent.to_path_buf()));
                }
                entry.original_path.clone()
            }
        };

        if fs::metadata(&dest).await.is_ok() {
            return Err(Error::SourceConflict(format!(
                "destination {} already exists",
                dest.display()
            )));
        }

        let object_path = self.object_path(id);
        let tmp_dest = unseal_tmp_path(&dest, id);

        debug!(object_id = %id, dest = %dest.display(), "unsealing object");

        let tmp_guard = TempFileGuard::new(tmp_dest.clone());
        let (_, restored_hash) = {
            let object_path = object_path.clone();
            let tmp = tmp_dest.clone();
            task::spawn_blocking(move || decrypt_file(&key, &object_path, &tmp))
                .await
                .map_err(|e| Error::Crypto(format!("decryption task failed: {}", e)))??
        };

        if restored_hash != entry.content_hash {
            // The stream already authenticated; the journal record predates
            // some out-of-band change.
            warn!(object_id = %id, "restored content hash differs from the journal record");
        }

        fs::rename(&tmp_dest, &dest).await?;
        tmp_guard.disarm();

        // Commit point passed: the plaintext is in place. Retire the object
        // file first so an interruption leaves an auto-prunable entry, not
        // an orphan object.
        fs::remove_file(&object_path).await?;
        {
            let mut journal = self.journal.lock().await;
            journal.remove(id).await?;
        }

        info!(object_id = %id, dest = %dest.display(), "object restored");
        Ok(dest)
    }

    /// Current vault contents.
    ///
    /// Recomputed on every call from the journal and the data directory, so
    /// entries whose ciphertext vanished out of band are not shown.
    pub async fn list(&self) -> Result<Vec<VaultEntry>> {
        self.ensure_unlocked()?;

        let actual = scan_objects(&self.data_dir).await?;
        let journal = self.journal.lock().await;

        let mut entries: Vec<VaultEntry> = journal
            .iter()
            .filter(|(id, _)| actual.contains(*id))
            .map(|(id, entry)| VaultEntry {
                object_id: id.clone(),
                display_name: entry.display_name(),
                size: entry.size,
                sealed_at: entry.sealed_at,
            })
            .collect();
        entries.sort_by(|a, b| a.display_name.cmp(&b.display_name));

        Ok(entries)
    }

    /// Irreversibly delete a sealed object and its journal entry.
    ///
    /// Deletes unconditionally when called; any confirmation gate is the
    /// caller's responsibility.
    pub async fn purge(&self, id: &ObjectId) -> Result<()> {
        self.ensure_unlocked()?;

        {
            let journal = self.journal.lock().await;
            if journal.get(id).is_none() {
                return Err(Error::NotFound(format!("no sealed object {}", id)));
            }
        }

        match fs::remove_file(self.object_path(id)).await {
            Ok(()) => {}
            // Entry without object: purging it is exactly the prune case.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let mut journal = self.journal.lock().await;
        journal.remove(id).await?;

        info!(object_id = %id, "object purged");
        Ok(())
    }

    /// Destroy the entire vault: every object, the journal, and the
    /// verifier. Consumes the session.
    ///
    /// As with [`VaultStore::purge`], the confirmation gate belongs to the
    /// caller.
    pub async fn destroy(mut self) -> Result<()> {
        self.ensure_unlocked()?;

        let root = self.root.clone();
        self.close();
        fs::remove_dir_all(&root).await?;

        info!(root = %root.display(), "vault destroyed");
        Ok(())
    }

    /// Zeroize the session key and release the vault lock.
    ///
    /// # Postconditions
    /// - Session state is Closed; all further operations fail with
    ///   [`Error::NotUnlocked`]
    pub fn close(&mut self) {
        if let Some(key) = self.key.take() {
            // Zeroized on drop
            drop(key);
        }
        self.lock = None;
        self.state = StoreState::Closed;
    }

    fn ensure_unlocked(&self) -> Result<()> {
        match self.state {
            StoreState::Unlocked => Ok(()),
            StoreState::Closed => Err(Error::NotUnlocked),
        }
    }

    fn key(&self) -> Result<&SessionKey> {
        self.ensure_unlocked()?;
        self.key.as_ref().ok_or(Error::NotUnlocked)
    }

    fn object_path(&self, id: &ObjectId) -> PathBuf {
        self.data_dir.join(id.as_str())
    }
}

impl Drop for VaultStore {
    fn drop(&mut self) {
        // Ensure the key is zeroized and the lock released
        self.close();
    }
}

/// Encrypt `source` into `dest`, returning plaintext size and content hash.
fn encrypt_file(key: &SessionKey, source: &Path, dest: &Path) -> Result<(u64, String)> {
    let mut reader = HashingReader::new(BufReader::new(File::open(source)?));
    let mut writer = BufWriter::new(File::create(dest)?);

    let size = EncryptingStream::new(key).encrypt_stream(&mut reader, &mut writer)?;

    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok((size, reader.finalize()))
}

/// Decrypt `source` into `dest`, returning plaintext size and content hash.
fn decrypt_file(key: &SessionKey, source: &Path, dest: &Path) -> Result<(u64, String)> {
    let reader = BufReader::new(File::open(source)?);
    let mut writer = HashingWriter::new(BufWriter::new(File::create(dest)?));

    let size = DecryptingStream::new(key).decrypt_stream(reader, &mut writer)?;

    let (mut inner, hash) = writer.finalize();
    inner.flush()?;
    inner.get_ref().sync_all()?;
    Ok((size, hash))
}

/// Write `bytes` to `path` via temp + flush + rename.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = tmp_sibling(path);
    let mut out = fs::File::create(&tmp).await?;
    out.write_all(bytes).await?;
    out.sync_all().await?;
    drop(out);
    fs::rename(&tmp, path).await?;
    Ok(())
}

/// Sibling path carrying a `.tmp` suffix.
fn tmp_sibling(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}

/// Temporary restore path next to the destination, unique per object.
fn unseal_tmp_path(dest: &Path, id: &ObjectId) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}.tmp", id));
    dest.with_file_name(name)
}

/// Remove uncommitted temporary outputs left by an interrupted operation.
async fn sweep_temp_files(root: &Path, data_dir: &Path) -> Result<()> {
    for dir in [root, data_dir] {
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if name.to_string_lossy().ends_with(".tmp") {
                debug!(file = %entry.path().display(), "sweeping stale temporary file");
                fs::remove_file(entry.path()).await?;
            }
        }
    }
    Ok(())
}

/// Object ids actually present in the data directory.
async fn scan_objects(data_dir: &Path) -> Result<HashSet<ObjectId>> {
    let mut ids = HashSet::new();
    let mut entries = fs::read_dir(data_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let name = entry.file_name();
        if let Ok(id) = ObjectId::parse(&name.to_string_lossy()) {
            ids.insert(id);
        }
    }
    Ok(ids)
}

/// Deletes an uncommitted output file on drop.
///
/// Disarmed once the operation passes its commit point.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
