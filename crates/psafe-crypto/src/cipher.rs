//! `Cipher`: an algorithm gated behind its self-test status
//!
//! The status lives in a mutex + condvar pair. `check_working_async` flips
//! `Unchecked → PendingCheck` under the lock and spawns the single
//! background self-test; the thread resolves the status to `Working` or
//! `NotWorking` and wakes every waiter. Terminal states never change.

use std::io::{Read, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

use tracing::{debug, error, info, warn};

use crate::algorithm::{CipherAlgorithm, CipherKey, EncryptWrite};
use crate::error::{CryptoError, CryptoResult};
use crate::secret::{SecretBuffer, SecretChars};
use crate::self_test::run_self_test;

/// Self-test state of a [`Cipher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkingStatus {
    Unchecked,
    PendingCheck,
    Working,
    NotWorking,
}

impl WorkingStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkingStatus::Working | WorkingStatus::NotWorking)
    }
}

/// Operations that create new secrets or ciphertext.
const WORKING_ONLY: &[WorkingStatus] = &[WorkingStatus::Working];

/// Operations on existing data (decrypting, rebuilding keys).
const WORKING_OR_UNCHECKED: &[WorkingStatus] = &[WorkingStatus::Working, WorkingStatus::Unchecked];

struct StatusCell {
    status: Mutex<WorkingStatus>,
    changed: Condvar,
}

impl StatusCell {
    fn lock(&self) -> MutexGuard<'_, WorkingStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve(&self, outcome: WorkingStatus) {
        *self.lock() = outcome;
        self.changed.notify_all();
    }

    fn wait_terminal(&self) -> WorkingStatus {
        let mut status = self.lock();
        while !status.is_terminal() {
            status = self
                .changed
                .wait(status)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *status
    }
}

/// The only cipher handle the rest of the system uses.
pub struct Cipher {
    name: String,
    algorithm: Arc<dyn CipherAlgorithm>,
    state: Arc<StatusCell>,
}

impl Cipher {
    pub fn new(name: impl Into<String>, algorithm: Arc<dyn CipherAlgorithm>) -> Self {
        Self {
            name: name.into(),
            algorithm,
            state: Arc::new(StatusCell {
                status: Mutex::new(WorkingStatus::Unchecked),
                changed: Condvar::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn algorithm(&self) -> &Arc<dyn CipherAlgorithm> {
        &self.algorithm
    }

    pub fn status(&self) -> WorkingStatus {
        *self.state.lock()
    }

    /// Start the self-test on a background thread. Only the first call on an
    /// unchecked cipher does anything.
    pub fn check_working_async(&self) {
        {
            let mut status = self.state.lock();
            if *status != WorkingStatus::Unchecked {
                return;
            }
            *status = WorkingStatus::PendingCheck;
        }

        let algorithm = Arc::clone(&self.algorithm);
        let state = Arc::clone(&self.state);
        let name = self.name.clone();
        debug!(cipher = %name, "starting self-test");

        let spawned = thread::Builder::new()
            .name(format!("psafe-selftest-{name}"))
            .spawn(move || {
                let outcome =
                    panic::catch_unwind(AssertUnwindSafe(|| run_self_test(algorithm.as_ref())));
                let status = match outcome {
                    Ok(Ok(())) => {
                        info!(cipher = %name, "cipher self-test passed");
                        WorkingStatus::Working
                    }
                    Ok(Err(e)) => {
                        warn!(cipher = %name, "cipher self-test failed: {e}");
                        WorkingStatus::NotWorking
                    }
                    Err(_) => {
                        error!(cipher = %name, "cipher self-test panicked");
                        WorkingStatus::NotWorking
                    }
                };
                state.resolve(status);
            });

        if let Err(e) = spawned {
            error!(cipher = %self.name, "could not spawn self-test thread: {e}");
            self.state.resolve(WorkingStatus::NotWorking);
        }
    }

    /// Block until the self-test reaches a terminal state, starting it first
    /// if nobody has.
    pub fn wait_working_check(&self) -> WorkingStatus {
        self.check_working_async();
        self.state.wait_terminal()
    }

    /// Wait only if a check is already running; otherwise report the status.
    pub fn wait_if_pending(&self) -> WorkingStatus {
        match self.status() {
            WorkingStatus::PendingCheck => self.state.wait_terminal(),
            status => status,
        }
    }

    pub fn is_working(&self) -> bool {
        self.status() == WorkingStatus::Working
    }

    fn require(&self, allowed: &[WorkingStatus]) -> CryptoResult<()> {
        let status = self.status();
        if allowed.contains(&status) {
            Ok(())
        } else {
            Err(CryptoError::NotWorkingCipher {
                cipher: self.name.clone(),
                status,
            })
        }
    }

    pub fn key_size(&self) -> usize {
        self.algorithm.key_size()
    }

    pub fn iv_size(&self) -> usize {
        self.algorithm.iv_size()
    }

    pub fn derivation_salt_size(&self) -> usize {
        self.algorithm.derivation_salt_size()
    }

    pub fn ciphertext_len(&self, plaintext_len: usize) -> usize {
        self.algorithm.ciphertext_len(plaintext_len)
    }

    pub fn generate_key(&self) -> CryptoResult<CipherKey> {
        self.require(WORKING_ONLY)?;
        Ok(self.algorithm.generate_key())
    }

    pub fn generate_iv(&self) -> CryptoResult<Vec<u8>> {
        self.require(WORKING_ONLY)?;
        Ok(self.algorithm.generate_iv())
    }

    pub fn generate_derivation_salt(&self) -> CryptoResult<Vec<u8>> {
        self.require(WORKING_ONLY)?;
        Ok(self.algorithm.generate_derivation_salt())
    }

    pub fn key_from_bytes(&self, bytes: &[u8]) -> CryptoResult<CipherKey> {
        self.require(WORKING_OR_UNCHECKED)?;
        self.algorithm.key_from_bytes(bytes)
    }

    pub fn key_to_bytes(&self, key: &CipherKey) -> CryptoResult<SecretBuffer> {
        self.require(WORKING_OR_UNCHECKED)?;
        self.algorithm.key_to_bytes(key)
    }

    pub fn derive_key(&self, password: &SecretChars, salt: &[u8]) -> CryptoResult<CipherKey> {
        self.require(WORKING_OR_UNCHECKED)?;
        self.algorithm.derive_key(password, salt)
    }

    pub fn encrypt(&self, key: &CipherKey, iv: &[u8], plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        self.require(WORKING_ONLY)?;
        self.algorithm.encrypt(key, iv, plaintext)
    }

    pub fn decrypt(
        &self,
        key: &CipherKey,
        iv: &[u8],
        ciphertext: &[u8],
    ) -> CryptoResult<SecretBuffer> {
        self.require(WORKING_OR_UNCHECKED)?;
        self.algorithm.decrypt(key, iv, ciphertext)
    }

    pub fn encrypting_writer<'a>(
        &self,
        key: &CipherKey,
        iv: &[u8],
        sink: &'a mut dyn Write,
    ) -> CryptoResult<Box<dyn EncryptWrite + 'a>> {
        self.require(WORKING_ONLY)?;
        self.algorithm.encrypting_writer(key, iv, sink)
    }

    pub fn decrypting_reader<'a>(
        &self,
        key: &CipherKey,
        iv: &[u8],
        source: &'a mut dyn Read,
    ) -> CryptoResult<Box<dyn Read + 'a>> {
        self.require(WORKING_OR_UNCHECKED)?;
        self.algorithm.decrypting_reader(key, iv, source)
    }
}

/// Identity of the algorithm instance behind two handles.
pub(crate) fn same_algorithm(a: &Arc<dyn CipherAlgorithm>, b: &Arc<dyn CipherAlgorithm>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

impl PartialEq for Cipher {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && same_algorithm(&self.algorithm, &other.algorithm)
    }
}

impl Eq for Cipher {}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher")
            .field("name", &self.name)
            .field("algorithm", &self.algorithm.name())
            .field("status", &self.status())
            .finish()
    }
}
