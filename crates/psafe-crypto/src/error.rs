use thiserror::Error;

use crate::cipher::WorkingStatus;
use crate::secret::DestroyError;

pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("cipher {cipher} is not usable for this operation (status: {status:?})")]
    NotWorkingCipher {
        cipher: String,
        status: WorkingStatus,
    },

    #[error("{algorithm}: invalid {what} length: {actual} bytes (expected {expected})")]
    InvalidLength {
        algorithm: String,
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{algorithm}: encryption failed: {reason}")]
    Encrypt { algorithm: String, reason: String },

    #[error("{algorithm}: decryption failed: wrong key or corrupted data")]
    Decrypt { algorithm: String },

    #[error("{algorithm}: key derivation failed: {reason}")]
    KeyDerivation { algorithm: String, reason: String },

    #[error("{algorithm}: self-test failed: {property}")]
    SelfTest {
        algorithm: String,
        property: &'static str,
    },

    #[error("PBKDF2 iteration count {0} is below the minimum of {}", crate::MIN_PBKDF2_ITERATIONS)]
    WeakKdfParams(u32),

    #[error(transparent)]
    Destroy(#[from] DestroyError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while building or querying a [`crate::CipherRegistry`].
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("duplicate cipher name in registry: {0}")]
    DuplicateName(String),

    #[error("cipher {0} shares its algorithm instance with another registry entry")]
    DuplicateAlgorithm(String),

    #[error("no cipher named {0} in registry")]
    UnknownCipher(String),
}
