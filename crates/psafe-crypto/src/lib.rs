//! psafe-crypto: cipher abstraction and secret-memory discipline for psafe
//!
//! Every symmetric scheme implements [`CipherAlgorithm`]. The rest of the
//! system only ever touches a [`Cipher`], which wraps an algorithm behind a
//! self-test state machine:
//!
//! ```text
//! Unchecked ──check_working_async()──► PendingCheck ──self-test──► Working
//!                                                        └───────► NotWorking
//! ```
//!
//! Key/IV/salt generation and encryption require `Working`; decryption and
//! key reconstruction are also allowed while `Unchecked`.
//!
//! Secret material lives in [`SecretBuffer`] / [`SecretChars`], which wipe on
//! every resize, on [`Destroy::destroy`], and on drop.

pub mod aead;
pub mod algorithm;
pub mod cipher;
pub mod error;
pub mod kdf;
pub mod keystream;
pub mod registry;
pub mod secret;

pub use algorithm::{CipherAlgorithm, CipherKey, EncryptWrite};
pub use cipher::{Cipher, WorkingStatus};
pub use error::{CryptoError, CryptoResult, RegistryError};
pub use kdf::{Pbkdf2Params, MIN_PBKDF2_ITERATIONS};
pub use registry::CipherRegistry;
pub use secret::{destroy_all, Destroy, DestroyError, SecretBuffer, SecretChars};
pub use self_test::run_self_test;

/// Size of the PBKDF2 derivation salt in bytes (256-bit)
pub const DERIVATION_SALT_SIZE: usize = 32;

/// Size of every cipher key in bytes (AES-256 / ChaCha20)
pub const KEY_SIZE: usize = 32;

/// Registry names of the built-in schemes.
pub const AES_CTR: &str = "AES-CTR";
pub const AES_GCM: &str = "AES-GCM";
pub const CHACHA20: &str = "ChaCha20";
pub const CHACHA20_POLY1305: &str = "ChaCha20-Poly1305";
