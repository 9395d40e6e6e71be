use std::path::PathBuf;

use psafe_core::CoreError;
use psafe_crypto::{CryptoError, DestroyError, RegistryError};
use thiserror::Error;

use crate::block::BlockKind;

pub type SafeResult<T> = Result<T, SafeError>;

#[derive(Debug, Error)]
pub enum SafeError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wrong safe password or not a safe file")]
    WrongPassword,

    #[error("{block} block is corrupt: {reason}")]
    Integrity { block: BlockKind, reason: String },

    #[error("safe update failed verification, original file left untouched: {reason}")]
    VerificationFailed { reason: String },

    #[error("an entry named {0:?} already exists")]
    DuplicateEntryName(String),

    #[error("entry name must not be empty")]
    EmptyName,

    #[error("no entry named {0:?}")]
    EntryNotFound(String),

    #[error("last-change time must be whole seconds after the Unix epoch")]
    InvalidLastChange,

    #[error("invalid TOTP secret: {0}")]
    InvalidTotp(&'static str),

    #[error("unsupported export format version {0}")]
    UnsupportedExportVersion(u16),

    #[error("safe file already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error(transparent)]
    Destroy(#[from] DestroyError),

    #[error(transparent)]
    Config(#[from] CoreError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SafeError {
    pub(crate) fn integrity(block: BlockKind, reason: impl Into<String>) -> Self {
        SafeError::Integrity {
            block,
            reason: reason.into(),
        }
    }
}
