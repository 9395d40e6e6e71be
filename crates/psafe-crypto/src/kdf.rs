//! Key derivation: PBKDF2-HMAC-SHA256 password → cipher key

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

use crate::error::{CryptoError, CryptoResult};
use crate::secret::{SecretBuffer, SecretChars};

/// Iteration floor for deriving keys from a password.
pub const MIN_PBKDF2_ITERATIONS: u32 = 600_000;

/// Smallest salt accepted for derivation (128-bit).
pub const MIN_SALT_SIZE: usize = 16;

/// PBKDF2 parameters shared by every scheme in a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pbkdf2Params {
    iterations: u32,
}

impl Default for Pbkdf2Params {
    fn default() -> Self {
        Self {
            iterations: MIN_PBKDF2_ITERATIONS,
        }
    }
}

impl Pbkdf2Params {
    pub fn new(iterations: u32) -> CryptoResult<Self> {
        if iterations < MIN_PBKDF2_ITERATIONS {
            return Err(CryptoError::WeakKdfParams(iterations));
        }
        Ok(Self { iterations })
    }

    /// Cheap parameters so tests do not spend seconds per derivation.
    #[cfg(any(test, feature = "test-constants"))]
    pub const fn fast() -> Self {
        Self { iterations: 1_000 }
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }
}

/// Derive `key_size` bytes from `password` and `salt`.
pub fn derive_key_bytes(
    params: &Pbkdf2Params,
    password: &SecretChars,
    salt: &[u8],
    key_size: usize,
) -> SecretBuffer {
    let mut key = SecretBuffer::zeroed(key_size);
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, params.iterations, key.as_mut_slice());
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_weak_iterations_rejected() {
        assert!(matches!(
            Pbkdf2Params::new(10_000),
            Err(CryptoError::WeakKdfParams(10_000))
        ));
        assert_eq!(
            Pbkdf2Params::new(MIN_PBKDF2_ITERATIONS).unwrap(),
            Pbkdf2Params::default()
        );
    }

    #[test]
    fn test_kdf_deterministic() {
        let params = Pbkdf2Params::fast();
        let password = SecretChars::from("test-passphrase-123");
        let salt = [1u8; 32];

        let key1 = derive_key_bytes(&params, &password, &salt, 32);
        let key2 = derive_key_bytes(&params, &password, &salt, 32);

        assert_eq!(key1.expose_secret(), key2.expose_secret(), "KDF must be deterministic");
    }

    #[test]
    fn test_kdf_different_salts() {
        let params = Pbkdf2Params::fast();
        let password = SecretChars::from("same-passphrase");

        let key1 = derive_key_bytes(&params, &password, &[1u8; 32], 32);
        let key2 = derive_key_bytes(&params, &password, &[2u8; 32], 32);

        assert_ne!(key1.expose_secret(), key2.expose_secret());
    }

    #[test]
    fn test_kdf_output_size() {
        let key = derive_key_bytes(&Pbkdf2Params::fast(), &SecretChars::from("pw"), &[0u8; 16], 16);
        assert_eq!(key.len(), 16);
    }
}
