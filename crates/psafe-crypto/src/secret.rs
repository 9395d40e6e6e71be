//! Zeroizing secret buffers and the explicit destroy contract
//!
//! Every type that holds key material, passwords, or decrypted intermediates
//! implements [`Destroy`]: `destroy()` overwrites the storage with zeros,
//! re-reads it to verify the wipe, and is idempotent. Buffers also wipe on
//! drop, so early returns and `?` paths never leave plaintext behind.
//!
//! Growable buffers never let `Vec` reallocate on its own: when more room is
//! needed a new allocation is made, the contents are copied, and the old
//! allocation is wiped before it is freed.

use rand::RngCore;
use secrecy::ExposeSecret;
use zeroize::{Zeroize, ZeroizeOnDrop};

const MIN_GROWTH: usize = 16;

/// Raised when a wipe could not be verified for one or more fields.
///
/// Composite types keep wiping the remaining fields before reporting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("failed to wipe {failed} of {attempted} secret fields")]
pub struct DestroyError {
    pub failed: usize,
    pub attempted: usize,
}

/// Scoped, explicitly destroyable secret holder.
pub trait Destroy {
    /// Overwrite every secret byte with zero. Calling it again is a no-op
    /// that still succeeds.
    fn destroy(&mut self) -> Result<(), DestroyError>;

    fn is_destroyed(&self) -> bool;
}

/// Destroy every item, even when earlier ones fail, and report the total.
pub fn destroy_all(items: &mut [&mut dyn Destroy]) -> Result<(), DestroyError> {
    let attempted = items.len();
    let mut failed = 0;
    for item in items.iter_mut() {
        if item.destroy().is_err() {
            failed += 1;
        }
    }
    if failed == 0 {
        Ok(())
    } else {
        tracing::error!(failed, attempted, "secret wipe verification failed");
        Err(DestroyError { failed, attempted })
    }
}

/// Growable byte buffer for secrets. Zeroized on resize, destroy, and drop.
#[derive(Default)]
pub struct SecretBuffer {
    bytes: Vec<u8>,
    destroyed: bool,
}

impl SecretBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
            destroyed: false,
        }
    }

    /// A buffer of `len` zero bytes, ready to be filled in place.
    pub fn zeroed(len: usize) -> Self {
        Self {
            bytes: vec![0u8; len],
            destroyed: false,
        }
    }

    /// `len` bytes from the thread-local CSPRNG.
    pub fn random(len: usize) -> Self {
        let mut buf = Self::zeroed(len);
        rand::thread_rng().fill_bytes(&mut buf.bytes);
        buf
    }

    pub fn from_slice(data: &[u8]) -> Self {
        let mut buf = Self::with_capacity(data.len());
        buf.bytes.extend_from_slice(data);
        buf
    }

    /// Take ownership of an existing allocation without copying it.
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            destroyed: false,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.bytes.capacity()
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.revive();
        &mut self.bytes
    }

    pub fn push(&mut self, byte: u8) {
        self.reserve(1);
        self.bytes.push(byte);
    }

    pub fn extend_from_slice(&mut self, data: &[u8]) {
        self.reserve(data.len());
        self.bytes.extend_from_slice(data);
    }

    /// Shorten the buffer, wiping the bytes that fall off the end.
    pub fn truncate(&mut self, len: usize) {
        if len < self.bytes.len() {
            self.bytes[len..].zeroize();
            self.bytes.truncate(len);
        }
    }

    pub fn clear(&mut self) {
        self.truncate(0);
    }

    /// Make room for `additional` more bytes, wiping the old allocation if it
    /// has to be replaced.
    pub fn reserve(&mut self, additional: usize) {
        self.revive();
        let needed = self.bytes.len().saturating_add(additional);
        if needed <= self.bytes.capacity() {
            return;
        }
        let new_capacity = needed
            .max(self.bytes.capacity().saturating_mul(2))
            .max(MIN_GROWTH);
        let mut grown = Vec::with_capacity(new_capacity);
        grown.extend_from_slice(&self.bytes);
        self.bytes.zeroize();
        self.bytes = grown;
    }

    /// Writing to a destroyed buffer starts over from empty.
    fn revive(&mut self) {
        if self.destroyed {
            self.bytes.clear();
            self.destroyed = false;
        }
    }
}

impl ExposeSecret<[u8]> for SecretBuffer {
    fn expose_secret(&self) -> &[u8] {
        &self.bytes
    }
}

impl Destroy for SecretBuffer {
    fn destroy(&mut self) -> Result<(), DestroyError> {
        // Length is kept so the wiped storage stays observable.
        self.bytes.as_mut_slice().zeroize();
        self.destroyed = true;
        if self.bytes.iter().all(|&b| b == 0) {
            Ok(())
        } else {
            Err(DestroyError {
                failed: 1,
                attempted: 1,
            })
        }
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

impl Zeroize for SecretBuffer {
    fn zeroize(&mut self) {
        self.bytes.zeroize();
    }
}

impl Drop for SecretBuffer {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl ZeroizeOnDrop for SecretBuffer {}

impl Clone for SecretBuffer {
    fn clone(&self) -> Self {
        Self::from_slice(&self.bytes)
    }
}

impl PartialEq for SecretBuffer {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for SecretBuffer {}

impl std::fmt::Debug for SecretBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretBuffer")
            .field("len", &self.bytes.len())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// UTF-8 text secret (passwords). Backed by a [`SecretBuffer`].
#[derive(Default, Clone, PartialEq, Eq)]
pub struct SecretChars {
    buf: SecretBuffer,
}

impl SecretChars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move a `String` in and wipe its original allocation.
    pub fn from_string(mut source: String) -> Self {
        let chars = Self {
            buf: SecretBuffer::from_slice(source.as_bytes()),
        };
        source.zeroize();
        chars
    }

    /// Decode UTF-8 bytes, returning `None` if they are not valid text.
    pub fn from_utf8(bytes: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(bytes).ok()?;
        Some(Self::from(text))
    }

    pub fn push(&mut self, c: char) {
        let mut encoded = [0u8; 4];
        self.buf.extend_from_slice(c.encode_utf8(&mut encoded).as_bytes());
        encoded.zeroize();
    }

    pub fn push_str(&mut self, s: &str) {
        self.buf.extend_from_slice(s.as_bytes());
    }

    /// Remove the last character, wiping its bytes.
    pub fn pop(&mut self) -> Option<char> {
        let c = self.expose_secret().chars().next_back()?;
        let new_len = self.buf.len() - c.len_utf8();
        self.buf.truncate(new_len);
        Some(c)
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn char_count(&self) -> usize {
        self.expose_secret().chars().count()
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.buf.expose_secret()
    }

    /// The first `n` characters (or fewer, if the text is shorter).
    pub fn prefix_chars(&self, n: usize) -> &str {
        let text = self.expose_secret();
        match text.char_indices().nth(n) {
            Some((end, _)) => &text[..end],
            None => text,
        }
    }
}

impl From<&str> for SecretChars {
    fn from(s: &str) -> Self {
        Self {
            buf: SecretBuffer::from_slice(s.as_bytes()),
        }
    }
}

impl ExposeSecret<str> for SecretChars {
    fn expose_secret(&self) -> &str {
        // Only whole characters are ever written, and a wiped buffer is NULs.
        std::str::from_utf8(self.buf.expose_secret()).unwrap_or_default()
    }
}

impl Destroy for SecretChars {
    fn destroy(&mut self) -> Result<(), DestroyError> {
        self.buf.destroy()
    }

    fn is_destroyed(&self) -> bool {
        self.buf.is_destroyed()
    }
}

impl Zeroize for SecretChars {
    fn zeroize(&mut self) {
        self.buf.zeroize();
    }
}

impl ZeroizeOnDrop for SecretChars {}

impl std::fmt::Debug for SecretChars {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretChars")
            .field("chars", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    struct FailingSecret {
        destroy_calls: usize,
    }

    impl Destroy for FailingSecret {
        fn destroy(&mut self) -> Result<(), DestroyError> {
            self.destroy_calls += 1;
            Err(DestroyError {
                failed: 1,
                attempted: 1,
            })
        }

        fn is_destroyed(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_destroy_zeroes_backing_storage() {
        let mut buf = SecretBuffer::from_slice(b"super secret key material");
        buf.destroy().unwrap();

        assert!(buf.is_destroyed());
        assert_eq!(buf.len(), 25, "wiped storage stays observable");
        assert!(buf.expose_secret().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let mut buf = SecretBuffer::from_slice(&[0xAA; 64]);
        buf.destroy().unwrap();
        buf.destroy().unwrap();

        assert!(buf.is_destroyed());
        assert!(buf.expose_secret().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_write_after_destroy_starts_fresh() {
        let mut buf = SecretBuffer::from_slice(b"old");
        buf.destroy().unwrap();
        buf.extend_from_slice(b"new");

        assert!(!buf.is_destroyed());
        assert_eq!(buf.expose_secret(), b"new");
    }

    #[test]
    fn test_growth_preserves_contents() {
        let mut buf = SecretBuffer::with_capacity(2);
        for i in 0..=255u8 {
            buf.push(i);
        }
        assert_eq!(buf.len(), 256);
        assert!(buf.capacity() >= 256);
        assert!(buf.expose_secret().iter().enumerate().all(|(i, &b)| b == i as u8));
    }

    #[test]
    fn test_truncate_wipes_tail() {
        let mut buf = SecretBuffer::from_slice(b"abcdef");
        buf.truncate(2);
        assert_eq!(buf.expose_secret(), b"ab");

        // Truncation keeps the allocation, so the old tail is still readable
        // as spare capacity.
        let tail: Vec<u8> = buf.bytes.spare_capacity_mut()[..4]
            .iter()
            .map(|b| unsafe { b.assume_init() })
            .collect();
        assert_eq!(tail, [0u8; 4]);
    }

    #[test]
    fn test_debug_is_redacted() {
        let buf = SecretBuffer::from_slice(b"hunter2");
        let chars = SecretChars::from("hunter2");
        assert!(!format!("{buf:?}").contains("hunter2"));
        assert!(!format!("{chars:?}").contains("hunter2"));
    }

    #[test]
    fn test_destroy_all_attempts_every_item() {
        let mut failing = FailingSecret { destroy_calls: 0 };
        let mut first = SecretBuffer::from_slice(b"first");
        let mut last = SecretChars::from("last");

        let result = destroy_all(&mut [&mut first, &mut failing, &mut last]);

        assert_eq!(
            result,
            Err(DestroyError {
                failed: 1,
                attempted: 3
            })
        );
        assert_eq!(failing.destroy_calls, 1);
        assert!(first.is_destroyed());
        assert!(last.is_destroyed(), "later fields wiped despite earlier failure");
        assert!(last.as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_secret_chars_push_pop() {
        let mut pw = SecretChars::new();
        pw.push_str("p@ss");
        pw.push('é');
        pw.push('1');

        assert_eq!(pw.expose_secret(), "p@ssé1");
        assert_eq!(pw.pop(), Some('1'));
        assert_eq!(pw.pop(), Some('é'));
        assert_eq!(pw.expose_secret(), "p@ss");
        assert_eq!(pw.char_count(), 4);
    }

    #[test]
    fn test_secret_chars_from_string() {
        let pw = SecretChars::from_string(String::from("correcthorsebattery"));
        assert_eq!(pw.expose_secret(), "correcthorsebattery");
        assert_eq!(pw.prefix_chars(2), "co");
        assert_eq!(SecretChars::from("x").prefix_chars(2), "x");
    }

    #[test]
    fn test_secret_chars_rejects_invalid_utf8() {
        assert!(SecretChars::from_utf8(&[0xff, 0xfe]).is_none());
        assert_eq!(
            SecretChars::from_utf8("ok".as_bytes()).unwrap().expose_secret(),
            "ok"
        );
    }

    proptest! {
        #[test]
        fn push_then_pop_restores(base in ".{0,32}", extra in ".{0,32}") {
            let mut pw = SecretChars::from(base.as_str());
            pw.push_str(&extra);
            for _ in 0..extra.chars().count() {
                prop_assert!(pw.pop().is_some());
            }
            prop_assert_eq!(pw.expose_secret(), base.as_str());
        }

        #[test]
        fn chunked_extend_matches_input(data in proptest::collection::vec(any::<u8>(), 0..=2048), step in 1usize..64) {
            let mut buf = SecretBuffer::new();
            for chunk in data.chunks(step) {
                buf.extend_from_slice(chunk);
            }
            prop_assert_eq!(buf.expose_secret(), data.as_slice());
        }
    }
}
