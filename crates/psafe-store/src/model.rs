//! Immutable records as stored in a safe file

use std::collections::HashSet;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use psafe_crypto::{Destroy, DestroyError, SecretBuffer, SecretChars};

use crate::error::{SafeError, SafeResult};

/// HMAC digest used by a TOTP secret. Stored as its ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TotpAlgorithm {
    #[default]
    Sha1,
    Sha256,
    Sha512,
}

impl TotpAlgorithm {
    pub fn ordinal(self) -> u8 {
        match self {
            TotpAlgorithm::Sha1 => 0,
            TotpAlgorithm::Sha256 => 1,
            TotpAlgorithm::Sha512 => 2,
        }
    }

    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        match ordinal {
            0 => Some(TotpAlgorithm::Sha1),
            1 => Some(TotpAlgorithm::Sha256),
            2 => Some(TotpAlgorithm::Sha512),
            _ => None,
        }
    }
}

/// Shared secret and parameters for generating TOTP codes.
#[derive(Clone, PartialEq, Eq)]
pub struct TotpSecret {
    key: SecretBuffer,
    label: String,
    issuer: String,
    algorithm: TotpAlgorithm,
    digits: u8,
    period: u32,
}

impl TotpSecret {
    pub fn new(
        key: SecretBuffer,
        label: impl Into<String>,
        issuer: impl Into<String>,
        algorithm: TotpAlgorithm,
        digits: u8,
        period: u32,
    ) -> SafeResult<Self> {
        if key.is_empty() {
            return Err(SafeError::InvalidTotp("empty key"));
        }
        if !(6..=8).contains(&digits) {
            return Err(SafeError::InvalidTotp("digits must be 6, 7 or 8"));
        }
        if period == 0 {
            return Err(SafeError::InvalidTotp("period must be positive"));
        }
        Ok(Self {
            key,
            label: label.into(),
            issuer: issuer.into(),
            algorithm,
            digits,
            period,
        })
    }

    pub fn key(&self) -> &SecretBuffer {
        &self.key
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn algorithm(&self) -> TotpAlgorithm {
        self.algorithm
    }

    pub fn digits(&self) -> u8 {
        self.digits
    }

    pub fn period(&self) -> u32 {
        self.period
    }
}

impl Destroy for TotpSecret {
    fn destroy(&mut self) -> Result<(), DestroyError> {
        self.key.destroy()
    }

    fn is_destroyed(&self) -> bool {
        self.key.is_destroyed()
    }
}

impl std::fmt::Debug for TotpSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TotpSecret")
            .field("key", &"[REDACTED]")
            .field("label", &self.label)
            .field("issuer", &self.issuer)
            .field("algorithm", &self.algorithm)
            .field("digits", &self.digits)
            .field("period", &self.period)
            .finish()
    }
}

/// One credential record.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordEntryData {
    name: String,
    password: SecretChars,
    last_change: SystemTime,
    site: String,
    info: String,
    totp: Option<TotpSecret>,
}

impl PasswordEntryData {
    pub fn new(
        name: impl Into<String>,
        password: SecretChars,
        last_change: SystemTime,
        site: impl Into<String>,
        info: impl Into<String>,
        totp: Option<TotpSecret>,
    ) -> SafeResult<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(SafeError::EmptyName);
        }
        epoch_seconds(last_change)?;
        Ok(Self {
            name,
            password,
            last_change,
            site: site.into(),
            info: info.into(),
            totp,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn password(&self) -> &SecretChars {
        &self.password
    }

    pub fn last_change(&self) -> SystemTime {
        self.last_change
    }

    pub fn site(&self) -> &str {
        &self.site
    }

    pub fn info(&self) -> &str {
        &self.info
    }

    pub fn totp(&self) -> Option<&TotpSecret> {
        self.totp.as_ref()
    }

    pub(crate) fn last_change_secs(&self) -> i64 {
        // Validated in `new`.
        epoch_seconds(self.last_change).unwrap_or_default()
    }
}

impl Destroy for PasswordEntryData {
    fn destroy(&mut self) -> Result<(), DestroyError> {
        let mut items: Vec<&mut dyn Destroy> = vec![&mut self.password as &mut dyn Destroy];
        if let Some(totp) = self.totp.as_mut() {
            items.push(totp);
        }
        psafe_crypto::destroy_all(&mut items)
    }

    fn is_destroyed(&self) -> bool {
        self.password.is_destroyed() && self.totp.as_ref().map_or(true, Destroy::is_destroyed)
    }
}

impl std::fmt::Debug for PasswordEntryData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordEntryData")
            .field("name", &self.name)
            .field("password", &"[REDACTED]")
            .field("last_change", &self.last_change)
            .field("site", &self.site)
            .field("info", &self.info)
            .field("totp", &self.totp)
            .finish()
    }
}

/// Seconds since the epoch, rejecting pre-epoch and sub-second instants.
pub(crate) fn epoch_seconds(instant: SystemTime) -> SafeResult<i64> {
    let since = instant
        .duration_since(UNIX_EPOCH)
        .map_err(|_| SafeError::InvalidLastChange)?;
    if since.subsec_nanos() != 0 {
        return Err(SafeError::InvalidLastChange);
    }
    i64::try_from(since.as_secs()).map_err(|_| SafeError::InvalidLastChange)
}

pub(crate) fn from_epoch_seconds(secs: i64) -> SafeResult<SystemTime> {
    let secs = u64::try_from(secs).map_err(|_| SafeError::InvalidLastChange)?;
    UNIX_EPOCH
        .checked_add(Duration::from_secs(secs))
        .ok_or(SafeError::InvalidLastChange)
}

/// The current time, truncated to whole seconds.
pub fn now_truncated() -> SystemTime {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    UNIX_EPOCH + Duration::from_secs(secs)
}

/// Ordered record set with unique names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SafeData {
    entries: Vec<PasswordEntryData>,
}

impl SafeData {
    pub fn new(entries: Vec<PasswordEntryData>) -> SafeResult<Self> {
        let mut seen = HashSet::with_capacity(entries.len());
        for entry in &entries {
            if !seen.insert(entry.name()) {
                return Err(SafeError::DuplicateEntryName(entry.name().to_string()));
            }
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[PasswordEntryData] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&PasswordEntryData> {
        self.entries.iter().find(|e| e.name() == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> Vec<PasswordEntryData> {
        self.entries
    }
}

impl Destroy for SafeData {
    fn destroy(&mut self) -> Result<(), DestroyError> {
        let mut items: Vec<&mut dyn Destroy> = self
            .entries
            .iter_mut()
            .map(|e| e as &mut dyn Destroy)
            .collect();
        psafe_crypto::destroy_all(&mut items)
    }

    fn is_destroyed(&self) -> bool {
        self.entries.iter().all(Destroy::is_destroyed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn entry(name: &str) -> PasswordEntryData {
        PasswordEntryData::new(
            name,
            SecretChars::from("hunter2"),
            UNIX_EPOCH + Duration::from_secs(1_700_000_000),
            "example.com",
            "",
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_entry_validation() {
        let t = UNIX_EPOCH + Duration::from_secs(10);
        assert!(matches!(
            PasswordEntryData::new("", SecretChars::new(), t, "", "", None),
            Err(SafeError::EmptyName)
        ));
        assert!(matches!(
            PasswordEntryData::new("x", SecretChars::new(), t + Duration::from_millis(5), "", "", None),
            Err(SafeError::InvalidLastChange)
        ));
        assert!(matches!(
            PasswordEntryData::new("x", SecretChars::new(), UNIX_EPOCH - Duration::from_secs(1), "", "", None),
            Err(SafeError::InvalidLastChange)
        ));
        assert_eq!(entry("x").last_change_secs(), 1_700_000_000);
    }

    #[test]
    fn test_epoch_seconds_roundtrip() {
        let t = from_epoch_seconds(1_234_567_890).unwrap();
        assert_eq!(epoch_seconds(t).unwrap(), 1_234_567_890);
        assert!(from_epoch_seconds(-1).is_err());
        assert_eq!(epoch_seconds(now_truncated()).map(|s| s > 0).ok(), Some(true));
    }

    #[test]
    fn test_safe_data_rejects_duplicates() {
        assert!(SafeData::new(vec![entry("a"), entry("b")]).is_ok());
        assert!(matches!(
            SafeData::new(vec![entry("a"), entry("b"), entry("a")]),
            Err(SafeError::DuplicateEntryName(n)) if n == "a"
        ));
    }

    #[test]
    fn test_totp_validation() {
        let key = || SecretBuffer::from_slice(b"12345678901234567890");
        assert!(TotpSecret::new(key(), "l", "i", TotpAlgorithm::Sha1, 6, 30).is_ok());
        assert!(TotpSecret::new(SecretBuffer::new(), "l", "i", TotpAlgorithm::Sha1, 6, 30).is_err());
        assert!(TotpSecret::new(key(), "l", "i", TotpAlgorithm::Sha1, 5, 30).is_err());
        assert!(TotpSecret::new(key(), "l", "i", TotpAlgorithm::Sha1, 6, 0).is_err());
        for alg in [TotpAlgorithm::Sha1, TotpAlgorithm::Sha256, TotpAlgorithm::Sha512] {
            assert_eq!(TotpAlgorithm::from_ordinal(alg.ordinal()), Some(alg));
        }
        assert_eq!(TotpAlgorithm::from_ordinal(3), None);
    }

    #[test]
    fn test_destroy_wipes_entry() {
        let totp =
            TotpSecret::new(SecretBuffer::from_slice(b"seed"), "l", "i", TotpAlgorithm::Sha256, 8, 60)
                .unwrap();
        let mut data = SafeData::new(vec![
            PasswordEntryData::new("a", SecretChars::from("pw"), UNIX_EPOCH, "", "", Some(totp))
                .unwrap(),
            entry("b"),
        ])
        .unwrap();

        data.destroy().unwrap();
        assert!(data.is_destroyed());
        let first = &data.entries()[0];
        assert!(first.password().as_bytes().iter().all(|&b| b == 0));
        let totp = first.totp().unwrap();
        assert!(totp.key().expose_secret().iter().all(|&b| b == 0));
        data.destroy().unwrap();
    }

    #[test]
    fn test_debug_redacts_password() {
        let rendered = format!("{:?}", entry("github"));
        assert!(rendered.contains("github"));
        assert!(!rendered.contains("hunter2"));
    }
}
