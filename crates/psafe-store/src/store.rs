//! `SafeStore`: the working set of entries and transactional file updates
//!
//! Saving follows write → reread → verify → swap:
//!
//! 1. snapshot the live entries into a [`SafeData`]
//! 2. write it to a fresh temp file in the target's directory
//! 3. reload the temp file with a throwaway store
//! 4. compare every reloaded record with the snapshot
//! 5. only then rename the temp file over the target
//!
//! Any failure before step 5 removes the temp file and leaves the target
//! untouched.

use std::collections::BTreeMap;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use psafe_core::SafeConfig;
use psafe_crypto::{Cipher, CipherRegistry, Destroy, SecretChars, WorkingStatus};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::entry::{ExistingEntry, PasswordEntry};
use crate::error::{SafeError, SafeResult};
use crate::format;
use crate::model::{now_truncated, PasswordEntryData, SafeData, TotpSecret};

pub struct SafeStore {
    path: PathBuf,
    password: SecretChars,
    cipher: Arc<Cipher>,
    entries: BTreeMap<String, PasswordEntry>,
    /// Deleted persisted entries, keyed by their original name.
    deleted: BTreeMap<String, ExistingEntry>,
    unsaved: bool,
}

impl SafeStore {
    fn empty(path: PathBuf, password: SecretChars, cipher: Arc<Cipher>) -> Self {
        Self {
            path,
            password,
            cipher,
            entries: BTreeMap::new(),
            deleted: BTreeMap::new(),
            unsaved: false,
        }
    }

    /// Start a new safe at `path`. Nothing is written until
    /// [`update_safe_file`](Self::update_safe_file).
    pub fn create(
        path: impl Into<PathBuf>,
        password: SecretChars,
        cipher: Arc<Cipher>,
    ) -> SafeResult<Self> {
        let path = path.into();
        if path.exists() {
            return Err(SafeError::AlreadyExists(path));
        }
        let mut store = Self::empty(path, password, cipher);
        store.unsaved = true;
        Ok(store)
    }

    pub fn open(
        path: impl Into<PathBuf>,
        password: SecretChars,
        cipher: Arc<Cipher>,
    ) -> SafeResult<Self> {
        let mut store = Self::empty(path.into(), password, cipher);
        store.load_safe_file()?;
        Ok(store)
    }

    /// Resolve the configured cipher and open (or create, if missing) the
    /// configured safe.
    pub fn open_with_config(
        config: &SafeConfig,
        registry: &CipherRegistry,
        password: SecretChars,
    ) -> SafeResult<Self> {
        let cipher = registry.get(&config.safe.cipher)?;
        if config.crypto.self_test_on_open {
            let status = cipher.wait_working_check();
            if status != WorkingStatus::Working {
                warn!(cipher = cipher.name(), ?status, "configured cipher failed its self-test");
            }
        }
        let path = config.safe_path();
        if path.exists() {
            Self::open(path, password, cipher)
        } else {
            info!(path = %path.display(), "safe file not found, starting a new safe");
            Self::create(path, password, cipher)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cipher(&self) -> &Arc<Cipher> {
        &self.cipher
    }

    /// Replace the working set with the contents of the safe file.
    pub fn load_safe_file(&mut self) -> SafeResult<()> {
        let file = std::fs::read(&self.path)?;
        let data = format::read_safe(&self.cipher, &self.password, &file)?;
        self.replace_working_set(data)?;
        self.unsaved = false;
        info!(path = %self.path.display(), entries = self.entries.len(), "safe loaded");
        Ok(())
    }

    fn replace_working_set(&mut self, data: SafeData) -> SafeResult<()> {
        self.discard_working_set()?;
        for record in data.into_entries() {
            let name = record.name().to_string();
            if self.entries.contains_key(&name) {
                return Err(SafeError::DuplicateEntryName(name));
            }
            self.entries.insert(name, PasswordEntry::existing(record));
        }
        Ok(())
    }

    fn discard_working_set(&mut self) -> SafeResult<()> {
        let mut items: Vec<&mut dyn Destroy> = Vec::new();
        items.extend(self.entries.values_mut().map(|e| e as &mut dyn Destroy));
        items.extend(self.deleted.values_mut().map(|e| e as &mut dyn Destroy));
        let wiped = psafe_crypto::destroy_all(&mut items);
        self.entries.clear();
        self.deleted.clear();
        wiped.map_err(SafeError::from)
    }

    /// Write, verify, and atomically swap in the current entries.
    pub fn update_safe_file(&mut self) -> SafeResult<()> {
        self.update_safe_file_with(|_| Ok(()))
    }

    /// `before_verify` runs on the written temp file before it is reloaded.
    fn update_safe_file_with(
        &mut self,
        before_verify: impl FnOnce(&Path) -> SafeResult<()>,
    ) -> SafeResult<()> {
        let snapshot = self.snapshot()?;
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut temp = NamedTempFile::new_in(&dir)?;
        {
            let mut out = BufWriter::new(temp.as_file_mut());
            format::write_safe(&self.cipher, &self.password, &snapshot, &mut out)?;
            out.flush()?;
        }
        temp.as_file().sync_all()?;
        debug!(temp = %temp.path().display(), "safe written to temp file");

        before_verify(temp.path())?;
        if let Err(e) = self.verify_written(temp.path(), &snapshot) {
            warn!(path = %self.path.display(), "discarding unverified safe update: {e}");
            if let Err(close) = temp.close() {
                warn!(error = %close, "failed to remove unverified temp file");
            }
            return Err(e);
        }

        temp.persist(&self.path).map_err(|e| SafeError::Io(e.error))?;
        self.replace_working_set(snapshot)?;
        self.unsaved = false;
        info!(path = %self.path.display(), entries = self.entries.len(), "safe saved");
        Ok(())
    }

    fn verify_written(&self, temp: &Path, snapshot: &SafeData) -> SafeResult<()> {
        let mut reread = Self::empty(
            temp.to_path_buf(),
            self.password.clone(),
            Arc::clone(&self.cipher),
        );
        reread
            .load_safe_file()
            .map_err(|e| SafeError::VerificationFailed {
                reason: format!("reload failed: {e}"),
            })?;
        let reloaded = reread.snapshot()?;

        if reloaded.len() != snapshot.len() {
            return Err(SafeError::VerificationFailed {
                reason: format!("{} records written, {} read back", snapshot.len(), reloaded.len()),
            });
        }
        for (i, (written, read)) in snapshot.entries().iter().zip(reloaded.entries()).enumerate() {
            if written != read {
                return Err(SafeError::VerificationFailed {
                    reason: format!("record {i} differs after reload"),
                });
            }
        }
        Ok(())
    }

    /// Current live entries as a record set, in name order.
    pub fn snapshot(&self) -> SafeResult<SafeData> {
        let records = self
            .entries
            .values()
            .map(PasswordEntry::to_data)
            .collect::<SafeResult<Vec<_>>>()?;
        SafeData::new(records)
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.unsaved
    }

    pub fn entry(&self, name: &str) -> Option<&PasswordEntry> {
        self.entries.get(name)
    }

    pub fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Original names of deleted entries that can still be restored.
    pub fn deleted_names(&self) -> impl Iterator<Item = &str> {
        self.deleted.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn check_free_name(&self, name: &str) -> SafeResult<()> {
        if name.is_empty() {
            return Err(SafeError::EmptyName);
        }
        if self.entries.contains_key(name) {
            return Err(SafeError::DuplicateEntryName(name.to_string()));
        }
        Ok(())
    }

    fn entry_mut(&mut self, name: &str) -> SafeResult<&mut PasswordEntry> {
        self.entries
            .get_mut(name)
            .ok_or_else(|| SafeError::EntryNotFound(name.to_string()))
    }

    pub fn add_entry(
        &mut self,
        name: &str,
        password: SecretChars,
        site: &str,
        info: &str,
        totp: Option<TotpSecret>,
    ) -> SafeResult<()> {
        let record = PasswordEntryData::new(name, password, now_truncated(), site, info, totp)?;
        self.insert_entry(record)
    }

    /// Add a complete record (e.g. from an import) as a new entry.
    pub fn insert_entry(&mut self, record: PasswordEntryData) -> SafeResult<()> {
        self.check_free_name(record.name())?;
        debug!(entry = record.name(), "entry added");
        self.entries
            .insert(record.name().to_string(), PasswordEntry::new(record));
        self.unsaved = true;
        Ok(())
    }

    pub fn rename_entry(&mut self, old: &str, new: &str) -> SafeResult<()> {
        if !self.entries.contains_key(old) {
            return Err(SafeError::EntryNotFound(old.to_string()));
        }
        if old == new {
            return Ok(());
        }
        self.check_free_name(new)?;
        let mut entry = self
            .entries
            .remove(old)
            .ok_or_else(|| SafeError::EntryNotFound(old.to_string()))?;
        if let Err(e) = entry.set_name(new.to_string()) {
            self.entries.insert(old.to_string(), entry);
            return Err(e);
        }
        self.entries.insert(new.to_string(), entry);
        self.unsaved = true;
        Ok(())
    }

    /// Replace an entry's password and stamp the change with the current
    /// second.
    pub fn set_password(&mut self, name: &str, password: SecretChars) -> SafeResult<()> {
        self.entry_mut(name)?.set_password(password, now_truncated())?;
        self.unsaved = true;
        Ok(())
    }

    pub fn set_site(&mut self, name: &str, site: &str) -> SafeResult<()> {
        self.entry_mut(name)?.set_site(site.to_string())?;
        self.unsaved = true;
        Ok(())
    }

    pub fn set_info(&mut self, name: &str, info: &str) -> SafeResult<()> {
        self.entry_mut(name)?.set_info(info.to_string())?;
        self.unsaved = true;
        Ok(())
    }

    pub fn set_totp(&mut self, name: &str, totp: Option<TotpSecret>) -> SafeResult<()> {
        self.entry_mut(name)?.set_totp(totp)?;
        self.unsaved = true;
        Ok(())
    }

    /// Remove an entry. Persisted entries stay restorable until the next
    /// successful save or load; new entries are gone immediately.
    pub fn delete_entry(&mut self, name: &str) -> SafeResult<()> {
        let entry = self
            .entries
            .remove(name)
            .ok_or_else(|| SafeError::EntryNotFound(name.to_string()))?;
        match entry {
            PasswordEntry::Existing(existing) => {
                self.deleted
                    .insert(existing.original().name().to_string(), existing);
            }
            mut unsaved @ PasswordEntry::New(_) => unsaved.destroy()?,
        }
        debug!(entry = name, "entry deleted");
        self.unsaved = true;
        Ok(())
    }

    /// Bring back a deleted persisted entry by its original name.
    pub fn restore_entry(&mut self, original_name: &str) -> SafeResult<()> {
        let existing = self
            .deleted
            .remove(original_name)
            .ok_or_else(|| SafeError::EntryNotFound(original_name.to_string()))?;
        let entry = PasswordEntry::Existing(existing);
        let name = entry.name().to_string();
        if self.entries.contains_key(&name) {
            if let PasswordEntry::Existing(existing) = entry {
                self.deleted.insert(original_name.to_string(), existing);
            }
            return Err(SafeError::DuplicateEntryName(name));
        }
        self.entries.insert(name, entry);
        self.unsaved = true;
        Ok(())
    }

    /// Re-key the safe under a new password on the next save.
    pub fn change_safe_password(&mut self, password: SecretChars) -> SafeResult<()> {
        let mut old = std::mem::replace(&mut self.password, password);
        old.destroy()?;
        self.unsaved = true;
        Ok(())
    }
}

impl Drop for SafeStore {
    fn drop(&mut self) {
        if let Err(e) = self.discard_working_set() {
            warn!("could not wipe safe working set: {e}");
        }
    }
}

impl std::fmt::Debug for SafeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafeStore")
            .field("path", &self.path)
            .field("cipher", &self.cipher.name())
            .field("entries", &self.entries.len())
            .field("deleted", &self.deleted.len())
            .field("unsaved", &self.unsaved)
            .finish()
    }
}
