//! psafe-store: the encrypted safe file and the working set around it
//!
//! Layering, leaves first:
//!
//! - `small_number`: randomized encodings for block metadata lengths
//! - [`block`]: one keyed, noise-padded ciphertext region
//! - [`format`]: content, header, and main-header blocks chained backward
//!   from the end of the file
//! - [`model`] / [`entry`]: persisted records and working-set entries
//! - [`store`]: edits plus the write → reread → verify → swap update
//! - [`export`]: the single-stream export envelope

pub mod block;
mod codec;
pub mod entry;
pub mod error;
pub mod export;
pub mod format;
pub mod model;
mod small_number;
pub mod store;

#[cfg(test)]
mod test_support;

pub use block::BlockKind;
pub use entry::{EntryOverlay, ExistingEntry, NewEntry, PasswordEntry};
pub use error::{SafeError, SafeResult};
pub use export::{export_entries, import_entries, EXPORT_VERSION, SUPPORTED_EXPORT_VERSIONS};
pub use format::{read_safe, write_safe};
pub use model::{PasswordEntryData, SafeData, TotpAlgorithm, TotpSecret};
pub use store::SafeStore;

use psafe_core::CryptoConfig;
use psafe_crypto::{CipherRegistry, Pbkdf2Params};

/// Build the built-in cipher registry with the configured KDF strength.
pub fn cipher_registry(config: &CryptoConfig) -> SafeResult<CipherRegistry> {
    let kdf = Pbkdf2Params::new(config.pbkdf2_iterations)?;
    Ok(CipherRegistry::with_defaults(kdf))
}
