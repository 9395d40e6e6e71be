use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CoreError, CoreResult};

/// Cipher used when the config does not name one.
pub const DEFAULT_CIPHER: &str = "AES-GCM";

/// PBKDF2 iteration floor for the safe password.
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 600_000;

/// Top-level configuration (loaded from psafe.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SafeConfig {
    pub safe: SafeFileConfig,
    pub crypto: CryptoConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafeFileConfig {
    /// Safe file location (default: ~/.local/share/psafe/passwords.safe)
    pub path: PathBuf,
    /// Registry name of the cipher protecting the safe
    pub cipher: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// PBKDF2-HMAC-SHA256 iterations for the safe password (minimum 600000)
    pub pbkdf2_iterations: u32,
    /// Run the cipher self-test and wait for it before opening a safe
    pub self_test_on_open: bool,
}

impl Default for SafeFileConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("~/.local/share/psafe/passwords.safe"),
            cipher: DEFAULT_CIPHER.into(),
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            pbkdf2_iterations: DEFAULT_PBKDF2_ITERATIONS,
            self_test_on_open: true,
        }
    }
}

impl SafeConfig {
    /// Read and parse a TOML config file.
    pub fn load(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("parsing config: {}", path.display()))?;
        tracing::debug!(path = %path.display(), cipher = %config.safe.cipher, "config loaded");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> CoreResult<Self> {
        let config: SafeConfig =
            toml::from_str(content).map_err(|e| CoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> CoreResult<String> {
        toml::to_string(self).map_err(|e| CoreError::Config(e.to_string()))
    }

    /// Safe path with a leading `~/` expanded against `$HOME`.
    pub fn safe_path(&self) -> PathBuf {
        expand_tilde(&self.safe.path)
    }

    fn validate(&self) -> CoreResult<()> {
        if self.safe.cipher.trim().is_empty() {
            return Err(CoreError::Config("safe.cipher must not be empty".into()));
        }
        if self.safe.path.as_os_str().is_empty() {
            return Err(CoreError::Config("safe.path must not be empty".into()));
        }
        Ok(())
    }
}

fn expand_tilde(path: &Path) -> PathBuf {
    if let Some(rest) = path.to_str().and_then(|s| s.strip_prefix("~/")) {
        let home = std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"));
        return home.join(rest);
    }
    path.to_path_buf()
}
