//! Named lookup of the ciphers a safe may be written with

use std::sync::Arc;

use tracing::debug;

use crate::aead::{AesGcm, ChaCha20Poly1305};
use crate::algorithm::CipherAlgorithm;
use crate::cipher::{same_algorithm, Cipher};
use crate::error::RegistryError;
use crate::kdf::Pbkdf2Params;
use crate::keystream::{AesCtr, ChaCha20};

/// Fixed set of ciphers, unique by name and by algorithm instance.
#[derive(Debug)]
pub struct CipherRegistry {
    ciphers: Vec<Arc<Cipher>>,
}

impl CipherRegistry {
    pub fn new(ciphers: Vec<Cipher>) -> Result<Self, RegistryError> {
        let mut accepted: Vec<Arc<Cipher>> = Vec::with_capacity(ciphers.len());
        for cipher in ciphers {
            if accepted.iter().any(|c| c.name() == cipher.name()) {
                return Err(RegistryError::DuplicateName(cipher.name().to_string()));
            }
            if accepted
                .iter()
                .any(|c| same_algorithm(c.algorithm(), cipher.algorithm()))
            {
                return Err(RegistryError::DuplicateAlgorithm(cipher.name().to_string()));
            }
            accepted.push(Arc::new(cipher));
        }
        debug!(count = accepted.len(), "cipher registry built");
        Ok(Self { ciphers: accepted })
    }

    /// The four built-in schemes, each with its own algorithm instance.
    pub fn with_defaults(kdf: Pbkdf2Params) -> Self {
        let builtins: [(&str, Arc<dyn CipherAlgorithm>); 4] = [
            (crate::AES_CTR, Arc::new(AesCtr::new(kdf))),
            (crate::AES_GCM, Arc::new(AesGcm::new(kdf))),
            (crate::CHACHA20, Arc::new(ChaCha20::new(kdf))),
            (crate::CHACHA20_POLY1305, Arc::new(ChaCha20Poly1305::new(kdf))),
        ];
        Self {
            ciphers: builtins
                .into_iter()
                .map(|(name, algorithm)| Arc::new(Cipher::new(name, algorithm)))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<Cipher>, RegistryError> {
        self.ciphers
            .iter()
            .find(|c| c.name() == name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownCipher(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.ciphers.iter().map(|c| c.name())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Cipher>> {
        self.ciphers.iter()
    }

    pub fn len(&self) -> usize {
        self.ciphers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ciphers.is_empty()
    }

    /// Kick off the self-test of every registered cipher.
    pub fn check_all_async(&self) {
        for cipher in &self.ciphers {
            cipher.check_working_async();
        }
    }
}
