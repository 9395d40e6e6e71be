//! Unauthenticated stream ciphers: AES-256-CTR and ChaCha20
//!
//! Ciphertext length equals plaintext length. Integrity of data encrypted
//! with these schemes has to come from the layer above (the safe format
//! checks a marker in its main header and validates every decoded length).

use std::io::{self, Read, Write};
use std::marker::PhantomData;

use ctr::cipher::typenum::Unsigned;
use ctr::cipher::{IvSizeUser, KeyIvInit, KeySizeUser, StreamCipher};
use secrecy::ExposeSecret;

use crate::algorithm::{check_len, CipherAlgorithm, CipherKey, EncryptWrite};
use crate::error::{CryptoError, CryptoResult};
use crate::kdf::Pbkdf2Params;
use crate::secret::SecretBuffer;

/// Generic keystream scheme over a RustCrypto `StreamCipher`.
pub struct KeystreamScheme<C> {
    name: &'static str,
    kdf: Pbkdf2Params,
    _cipher: PhantomData<fn() -> C>,
}

pub type AesCtr = KeystreamScheme<ctr::Ctr128BE<aes::Aes256>>;
pub type ChaCha20 = KeystreamScheme<chacha20::ChaCha20>;

impl AesCtr {
    /// AES-256 in big-endian 128-bit counter mode, 128-bit IV.
    pub fn new(kdf: Pbkdf2Params) -> Self {
        Self::named(crate::AES_CTR, kdf)
    }
}

impl ChaCha20 {
    pub fn new(kdf: Pbkdf2Params) -> Self {
        Self::named(crate::CHACHA20, kdf)
    }
}

impl<C> KeystreamScheme<C>
where
    C: KeyIvInit + StreamCipher + 'static,
{
    fn named(name: &'static str, kdf: Pbkdf2Params) -> Self {
        Self {
            name,
            kdf,
            _cipher: PhantomData,
        }
    }

    fn init(&self, key: &CipherKey, iv: &[u8]) -> CryptoResult<C> {
        check_len(self.name, "key", self.key_size(), key.len())?;
        check_len(self.name, "IV", self.iv_size(), iv.len())?;
        C::new_from_slices(key.expose_secret(), iv).map_err(|e| CryptoError::Encrypt {
            algorithm: self.name.to_string(),
            reason: e.to_string(),
        })
    }

    fn keystream_error(&self) -> CryptoError {
        CryptoError::Encrypt {
            algorithm: self.name.to_string(),
            reason: "keystream exhausted".into(),
        }
    }
}

impl<C> CipherAlgorithm for KeystreamScheme<C>
where
    C: KeyIvInit + StreamCipher + 'static,
{
    fn name(&self) -> &str {
        self.name
    }

    fn key_size(&self) -> usize {
        <C as KeySizeUser>::KeySize::USIZE
    }

    fn iv_size(&self) -> usize {
        <C as IvSizeUser>::IvSize::USIZE
    }

    fn kdf_params(&self) -> &Pbkdf2Params {
        &self.kdf
    }

    fn ciphertext_len(&self, plaintext_len: usize) -> usize {
        plaintext_len
    }

    fn encrypt(&self, key: &CipherKey, iv: &[u8], plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        let mut cipher = self.init(key, iv)?;
        let mut out = plaintext.to_vec();
        cipher
            .try_apply_keystream(&mut out)
            .map_err(|_| self.keystream_error())?;
        Ok(out)
    }

    fn decrypt(
        &self,
        key: &CipherKey,
        iv: &[u8],
        ciphertext: &[u8],
    ) -> CryptoResult<SecretBuffer> {
        let mut cipher = self.init(key, iv)?;
        let mut out = SecretBuffer::from_slice(ciphertext);
        cipher
            .try_apply_keystream(out.as_mut_slice())
            .map_err(|_| self.keystream_error())?;
        Ok(out)
    }

    fn encrypting_writer<'a>(
        &self,
        key: &CipherKey,
        iv: &[u8],
        sink: &'a mut dyn Write,
    ) -> CryptoResult<Box<dyn EncryptWrite + 'a>> {
        Ok(Box::new(KeystreamWriter {
            cipher: self.init(key, iv)?,
            scratch: SecretBuffer::new(),
            sink,
        }))
    }

    fn decrypting_reader<'a>(
        &self,
        key: &CipherKey,
        iv: &[u8],
        source: &'a mut dyn Read,
    ) -> CryptoResult<Box<dyn Read + 'a>> {
        Ok(Box::new(KeystreamReader {
            cipher: self.init(key, iv)?,
            source,
        }))
    }
}

struct KeystreamWriter<'a, C> {
    cipher: C,
    scratch: SecretBuffer,
    sink: &'a mut dyn Write,
}

impl<C: StreamCipher> Write for KeystreamWriter<'_, C> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.scratch.clear();
        self.scratch.extend_from_slice(buf);
        self.cipher
            .try_apply_keystream(self.scratch.as_mut_slice())
            .map_err(|_| io::Error::other("keystream exhausted"))?;
        self.sink.write_all(self.scratch.expose_secret())?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

impl<C: StreamCipher> EncryptWrite for KeystreamWriter<'_, C> {
    fn finish(mut self: Box<Self>) -> io::Result<()> {
        self.flush()
    }
}

struct KeystreamReader<'a, C> {
    cipher: C,
    source: &'a mut dyn Read,
}

impl<C: StreamCipher> Read for KeystreamReader<'_, C> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let n = self.source.read(out)?;
        self.cipher
            .try_apply_keystream(&mut out[..n])
            .map_err(|_| io::Error::other("keystream exhausted"))?;
        Ok(n)
    }
}
