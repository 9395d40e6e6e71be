//! Working-set records: entries that are new, or that shadow a persisted
//! original with pending edits

use std::time::SystemTime;

use psafe_crypto::{Destroy, DestroyError, SecretChars};

use crate::error::SafeResult;
use crate::model::{PasswordEntryData, TotpSecret};

/// Edits pending on top of a persisted record. `None` means unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryOverlay {
    name: Option<String>,
    password: Option<(SecretChars, SystemTime)>,
    site: Option<String>,
    info: Option<String>,
    totp: Option<Option<TotpSecret>>,
}

impl EntryOverlay {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// An entry with no persisted counterpart yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    data: PasswordEntryData,
}

/// A persisted record plus pending edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistingEntry {
    original: PasswordEntryData,
    overlay: EntryOverlay,
}

impl ExistingEntry {
    pub fn original(&self) -> &PasswordEntryData {
        &self.original
    }

    pub fn overlay(&self) -> &EntryOverlay {
        &self.overlay
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordEntry {
    New(NewEntry),
    Existing(ExistingEntry),
}

impl PasswordEntry {
    pub(crate) fn new(data: PasswordEntryData) -> Self {
        PasswordEntry::New(NewEntry { data })
    }

    pub(crate) fn existing(original: PasswordEntryData) -> Self {
        PasswordEntry::Existing(ExistingEntry {
            original,
            overlay: EntryOverlay::default(),
        })
    }

    pub fn is_new(&self) -> bool {
        matches!(self, PasswordEntry::New(_))
    }

    pub fn name(&self) -> &str {
        match self {
            PasswordEntry::New(e) => e.data.name(),
            PasswordEntry::Existing(e) => e.overlay.name.as_deref().unwrap_or(e.original.name()),
        }
    }

    pub fn password(&self) -> &SecretChars {
        match self {
            PasswordEntry::New(e) => e.data.password(),
            PasswordEntry::Existing(e) => match &e.overlay.password {
                Some((password, _)) => password,
                None => e.original.password(),
            },
        }
    }

    pub fn last_change(&self) -> SystemTime {
        match self {
            PasswordEntry::New(e) => e.data.last_change(),
            PasswordEntry::Existing(e) => match &e.overlay.password {
                Some((_, changed)) => *changed,
                None => e.original.last_change(),
            },
        }
    }

    pub fn site(&self) -> &str {
        match self {
            PasswordEntry::New(e) => e.data.site(),
            PasswordEntry::Existing(e) => e.overlay.site.as_deref().unwrap_or(e.original.site()),
        }
    }

    pub fn info(&self) -> &str {
        match self {
            PasswordEntry::New(e) => e.data.info(),
            PasswordEntry::Existing(e) => e.overlay.info.as_deref().unwrap_or(e.original.info()),
        }
    }

    pub fn totp(&self) -> Option<&TotpSecret> {
        match self {
            PasswordEntry::New(e) => e.data.totp(),
            PasswordEntry::Existing(e) => match &e.overlay.totp {
                Some(totp) => totp.as_ref(),
                None => e.original.totp(),
            },
        }
    }

    /// Whether saving would write something different for this entry.
    pub fn is_modified(&self) -> bool {
        match self {
            PasswordEntry::New(_) => true,
            PasswordEntry::Existing(e) => {
                !e.overlay.is_empty() && self.to_data().map_or(true, |d| d != e.original)
            }
        }
    }

    /// The record as it would be saved now.
    pub fn to_data(&self) -> SafeResult<PasswordEntryData> {
        match self {
            PasswordEntry::New(e) => Ok(e.data.clone()),
            PasswordEntry::Existing(_) => PasswordEntryData::new(
                self.name(),
                self.password().clone(),
                self.last_change(),
                self.site(),
                self.info(),
                self.totp().cloned(),
            ),
        }
    }

    // Setters assume the store already validated the new value.

    pub(crate) fn set_name(&mut self, name: String) -> SafeResult<()> {
        self.edit(|data| data.name = Some(name))
    }

    pub(crate) fn set_password(&mut self, password: SecretChars, changed: SystemTime) -> SafeResult<()> {
        self.edit(|data| data.password = Some((password, changed)))
    }

    pub(crate) fn set_site(&mut self, site: String) -> SafeResult<()> {
        self.edit(|data| data.site = Some(site))
    }

    pub(crate) fn set_info(&mut self, info: String) -> SafeResult<()> {
        self.edit(|data| data.info = Some(info))
    }

    pub(crate) fn set_totp(&mut self, totp: Option<TotpSecret>) -> SafeResult<()> {
        self.edit(|data| data.totp = Some(totp))
    }

    /// Apply `change` to the overlay of an existing entry, or rebuild a new
    /// entry's record through the same overlay shape.
    fn edit(&mut self, change: impl FnOnce(&mut EntryOverlay)) -> SafeResult<()> {
        match self {
            PasswordEntry::Existing(e) => {
                change(&mut e.overlay);
                Ok(())
            }
            PasswordEntry::New(e) => {
                let mut overlay = EntryOverlay::default();
                change(&mut overlay);
                let shadow = PasswordEntry::Existing(ExistingEntry {
                    original: e.data.clone(),
                    overlay,
                });
                e.data = shadow.to_data()?;
                Ok(())
            }
        }
    }
}

impl Destroy for ExistingEntry {
    fn destroy(&mut self) -> Result<(), DestroyError> {
        let mut items: Vec<&mut dyn Destroy> = vec![&mut self.original as &mut dyn Destroy];
        if let Some((password, _)) = self.overlay.password.as_mut() {
            items.push(password);
        }
        if let Some(Some(totp)) = self.overlay.totp.as_mut() {
            items.push(totp);
        }
        psafe_crypto::destroy_all(&mut items)
    }

    fn is_destroyed(&self) -> bool {
        self.original.is_destroyed()
    }
}

impl Destroy for PasswordEntry {
    fn destroy(&mut self) -> Result<(), DestroyError> {
        match self {
            PasswordEntry::New(e) => e.data.destroy(),
            PasswordEntry::Existing(e) => e.destroy(),
        }
    }

    fn is_destroyed(&self) -> bool {
        match self {
            PasswordEntry::New(e) => e.data.is_destroyed(),
            PasswordEntry::Existing(e) => e.is_destroyed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TotpAlgorithm;
    use psafe_crypto::SecretBuffer;
    use std::time::{Duration, UNIX_EPOCH};

    fn record() -> PasswordEntryData {
        PasswordEntryData::new(
            "github",
            SecretChars::from("p@ss1234"),
            UNIX_EPOCH + Duration::from_secs(1_700_000_000),
            "github.com",
            "",
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_existing_overlay_shadows_original() {
        let mut entry = PasswordEntry::existing(record());
        assert!(!entry.is_modified());

        let later = UNIX_EPOCH + Duration::from_secs(1_800_000_000);
        entry.set_password(SecretChars::from("n3w"), later).unwrap();
        entry.set_name("gh".into()).unwrap();

        assert_eq!(entry.name(), "gh");
        assert_eq!(entry.password().as_bytes(), b"n3w");
        assert_eq!(entry.last_change(), later);
        assert_eq!(entry.site(), "github.com");
        assert!(entry.is_modified());

        let PasswordEntry::Existing(existing) = &entry else {
            panic!("expected existing entry");
        };
        assert_eq!(existing.original().name(), "github");
        assert_eq!(existing.original().password().as_bytes(), b"p@ss1234");
    }

    #[test]
    fn test_edit_back_to_original_is_unmodified() {
        let mut entry = PasswordEntry::existing(record());
        entry.set_site("github.com".into()).unwrap();
        assert!(!entry.is_modified());
    }

    #[test]
    fn test_new_entry_edits_in_place() {
        let mut entry = PasswordEntry::new(record());
        let totp = TotpSecret::new(SecretBuffer::from_slice(b"k"), "", "", TotpAlgorithm::Sha1, 6, 30)
            .unwrap();
        entry.set_totp(Some(totp.clone())).unwrap();
        entry.set_info("note".into()).unwrap();

        assert!(entry.is_new());
        assert_eq!(entry.info(), "note");
        assert_eq!(entry.totp(), Some(&totp));
        assert_eq!(entry.to_data().unwrap().info(), "note");

        entry.set_totp(None).unwrap();
        assert!(entry.totp().is_none());
    }

    #[test]
    fn test_destroy_existing_entry_wipes_overlay() {
        let mut entry = PasswordEntry::existing(record());
        entry.set_password(SecretChars::from("pending"), UNIX_EPOCH).unwrap();
        entry.destroy().unwrap();
        assert!(entry.is_destroyed());
        assert!(entry.password().as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_destroy_deleted_existing_entry() {
        let mut entry = PasswordEntry::existing(record());
        entry.set_password(SecretChars::from("pending"), UNIX_EPOCH).unwrap();
        let PasswordEntry::Existing(mut existing) = entry else {
            panic!("expected an existing entry");
        };

        existing.destroy().unwrap();
        assert!(existing.is_destroyed());
        assert!(existing.original().password().as_bytes().iter().all(|&b| b == 0));
        let (pending, _) = existing.overlay().password.as_ref().unwrap();
        assert!(pending.as_bytes().iter().all(|&b| b == 0));
    }
}
