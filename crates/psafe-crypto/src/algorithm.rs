//! The `CipherAlgorithm` contract shared by every symmetric scheme

use std::io::{Read, Write};

use rand::RngCore;
use secrecy::ExposeSecret;

use crate::error::{CryptoError, CryptoResult};
use crate::kdf::{self, Pbkdf2Params, MIN_SALT_SIZE};
use crate::secret::{Destroy, DestroyError, SecretBuffer, SecretChars};
use crate::DERIVATION_SALT_SIZE;

/// A symmetric key. Zeroized on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct CipherKey {
    bytes: SecretBuffer,
}

impl CipherKey {
    pub(crate) fn from_buffer(bytes: SecretBuffer) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl ExposeSecret<[u8]> for CipherKey {
    fn expose_secret(&self) -> &[u8] {
        self.bytes.expose_secret()
    }
}

impl Destroy for CipherKey {
    fn destroy(&mut self) -> Result<(), DestroyError> {
        self.bytes.destroy()
    }

    fn is_destroyed(&self) -> bool {
        self.bytes.is_destroyed()
    }
}

impl std::fmt::Debug for CipherKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Encrypting sink returned by [`CipherAlgorithm::encrypting_writer`].
///
/// Plaintext goes in through `Write`; `finish` must be called to emit any
/// buffered ciphertext and authentication tag.
pub trait EncryptWrite: Write {
    fn finish(self: Box<Self>) -> std::io::Result<()>;
}

/// Stateless description of one symmetric scheme.
///
/// Implementations only provide sizes, the length formula, and the raw
/// transforms; key/IV/salt generation and PBKDF2 derivation have default
/// bodies built on those.
pub trait CipherAlgorithm: Send + Sync {
    fn name(&self) -> &str;

    fn key_size(&self) -> usize;

    fn iv_size(&self) -> usize;

    fn derivation_salt_size(&self) -> usize {
        DERIVATION_SALT_SIZE
    }

    fn kdf_params(&self) -> &Pbkdf2Params;

    /// Ciphertext length for a plaintext of `plaintext_len` bytes, including
    /// any authentication tag.
    fn ciphertext_len(&self, plaintext_len: usize) -> usize;

    fn encrypt(&self, key: &CipherKey, iv: &[u8], plaintext: &[u8]) -> CryptoResult<Vec<u8>>;

    fn decrypt(&self, key: &CipherKey, iv: &[u8], ciphertext: &[u8])
        -> CryptoResult<SecretBuffer>;

    fn encrypting_writer<'a>(
        &self,
        key: &CipherKey,
        iv: &[u8],
        sink: &'a mut dyn Write,
    ) -> CryptoResult<Box<dyn EncryptWrite + 'a>>;

    fn decrypting_reader<'a>(
        &self,
        key: &CipherKey,
        iv: &[u8],
        source: &'a mut dyn Read,
    ) -> CryptoResult<Box<dyn Read + 'a>>;

    fn generate_key(&self) -> CipherKey {
        CipherKey::from_buffer(SecretBuffer::random(self.key_size()))
    }

    fn key_from_bytes(&self, bytes: &[u8]) -> CryptoResult<CipherKey> {
        check_len(self.name(), "key", self.key_size(), bytes.len())?;
        Ok(CipherKey::from_buffer(SecretBuffer::from_slice(bytes)))
    }

    fn key_to_bytes(&self, key: &CipherKey) -> CryptoResult<SecretBuffer> {
        check_len(self.name(), "key", self.key_size(), key.len())?;
        Ok(SecretBuffer::from_slice(key.expose_secret()))
    }

    fn generate_iv(&self) -> Vec<u8> {
        random_bytes(self.iv_size())
    }

    fn generate_derivation_salt(&self) -> Vec<u8> {
        random_bytes(self.derivation_salt_size())
    }

    fn derive_key(&self, password: &SecretChars, salt: &[u8]) -> CryptoResult<CipherKey> {
        check_len(self.name(), "derivation salt", self.derivation_salt_size(), salt.len())?;
        if salt.len() < MIN_SALT_SIZE {
            return Err(CryptoError::KeyDerivation {
                algorithm: self.name().to_string(),
                reason: format!("salt shorter than {MIN_SALT_SIZE} bytes"),
            });
        }
        let bytes = kdf::derive_key_bytes(self.kdf_params(), password, salt, self.key_size());
        Ok(CipherKey::from_buffer(bytes))
    }
}

pub(crate) fn check_len(
    algorithm: &str,
    what: &'static str,
    expected: usize,
    actual: usize,
) -> CryptoResult<()> {
    if expected != actual {
        return Err(CryptoError::InvalidLength {
            algorithm: algorithm.to_string(),
            what,
            expected,
            actual,
        });
    }
    Ok(())
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}
