//! AEAD schemes: AES-256-GCM and ChaCha20-Poly1305
//!
//! Ciphertext format (binary): `[N bytes: ciphertext][16 bytes: tag]`.
//! The IV is supplied by the caller and never stored here.
//!
//! The streaming adapters buffer the whole message: the tag covers all of it,
//! so nothing can be emitted (or released on decryption) before the end.

use std::io::{self, Read, Write};
use std::marker::PhantomData;

use aes_gcm::aead::generic_array::typenum::Unsigned;
use aes_gcm::aead::{Aead, AeadCore, KeyInit, KeySizeUser, Nonce};
use secrecy::ExposeSecret;

use crate::algorithm::{check_len, CipherAlgorithm, CipherKey, EncryptWrite};
use crate::error::{CryptoError, CryptoResult};
use crate::kdf::Pbkdf2Params;
use crate::secret::SecretBuffer;

/// Generic AEAD scheme over a RustCrypto `Aead` implementation.
pub struct AeadScheme<A> {
    name: &'static str,
    kdf: Pbkdf2Params,
    _aead: PhantomData<fn() -> A>,
}

pub type AesGcm = AeadScheme<aes_gcm::Aes256Gcm>;
pub type ChaCha20Poly1305 = AeadScheme<chacha20poly1305::ChaCha20Poly1305>;

impl AesGcm {
    /// AES-256-GCM with a 96-bit IV and 128-bit tag.
    pub fn new(kdf: Pbkdf2Params) -> Self {
        Self::named(crate::AES_GCM, kdf)
    }
}

impl ChaCha20Poly1305 {
    pub fn new(kdf: Pbkdf2Params) -> Self {
        Self::named(crate::CHACHA20_POLY1305, kdf)
    }
}

impl<A> AeadScheme<A>
where
    A: Aead + KeyInit + 'static,
{
    fn named(name: &'static str, kdf: Pbkdf2Params) -> Self {
        Self {
            name,
            kdf,
            _aead: PhantomData,
        }
    }

    fn init(&self, key: &CipherKey, iv: &[u8]) -> CryptoResult<(A, Nonce<A>)> {
        check_len(self.name, "key", self.key_size(), key.len())?;
        check_len(self.name, "IV", self.iv_size(), iv.len())?;
        let aead = A::new_from_slice(key.expose_secret()).map_err(|e| CryptoError::Encrypt {
            algorithm: self.name.to_string(),
            reason: e.to_string(),
        })?;
        Ok((aead, Nonce::<A>::clone_from_slice(iv)))
    }
}

impl<A> CipherAlgorithm for AeadScheme<A>
where
    A: Aead + KeyInit + 'static,
{
    fn name(&self) -> &str {
        self.name
    }

    fn key_size(&self) -> usize {
        <A as KeySizeUser>::KeySize::USIZE
    }

    fn iv_size(&self) -> usize {
        <A as AeadCore>::NonceSize::USIZE
    }

    fn kdf_params(&self) -> &Pbkdf2Params {
        &self.kdf
    }

    fn ciphertext_len(&self, plaintext_len: usize) -> usize {
        plaintext_len + <A as AeadCore>::TagSize::USIZE
    }

    fn encrypt(&self, key: &CipherKey, iv: &[u8], plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        let (aead, nonce) = self.init(key, iv)?;
        aead.encrypt(&nonce, plaintext)
            .map_err(|e| CryptoError::Encrypt {
                algorithm: self.name.to_string(),
                reason: e.to_string(),
            })
    }

    fn decrypt(
        &self,
        key: &CipherKey,
        iv: &[u8],
        ciphertext: &[u8],
    ) -> CryptoResult<SecretBuffer> {
        let (aead, nonce) = self.init(key, iv)?;
        aead.decrypt(&nonce, ciphertext)
            .map(SecretBuffer::from_vec)
            .map_err(|_| CryptoError::Decrypt {
                algorithm: self.name.to_string(),
            })
    }

    fn encrypting_writer<'a>(
        &self,
        key: &CipherKey,
        iv: &[u8],
        sink: &'a mut dyn Write,
    ) -> CryptoResult<Box<dyn EncryptWrite + 'a>> {
        let (aead, nonce) = self.init(key, iv)?;
        Ok(Box::new(AeadWriter {
            name: self.name,
            aead,
            nonce,
            plaintext: SecretBuffer::new(),
            sink,
        }))
    }

    fn decrypting_reader<'a>(
        &self,
        key: &CipherKey,
        iv: &[u8],
        source: &'a mut dyn Read,
    ) -> CryptoResult<Box<dyn Read + 'a>> {
        let (aead, nonce) = self.init(key, iv)?;
        Ok(Box::new(AeadReader {
            name: self.name,
            aead,
            nonce,
            source: Some(source),
            plaintext: SecretBuffer::new(),
            pos: 0,
        }))
    }
}

struct AeadWriter<'a, A: AeadCore> {
    name: &'static str,
    aead: A,
    nonce: Nonce<A>,
    plaintext: SecretBuffer,
    sink: &'a mut dyn Write,
}

impl<A: Aead> Write for AeadWriter<'_, A> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.plaintext.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<A: Aead> EncryptWrite for AeadWriter<'_, A> {
    fn finish(self: Box<Self>) -> io::Result<()> {
        let mut this = *self;
        let ciphertext = this
            .aead
            .encrypt(&this.nonce, this.plaintext.expose_secret())
            .map_err(|e| io::Error::other(format!("{}: encryption failed: {e}", this.name)))?;
        this.sink.write_all(&ciphertext)?;
        this.sink.flush()
    }
}

struct AeadReader<'a, A: AeadCore> {
    name: &'static str,
    aead: A,
    nonce: Nonce<A>,
    source: Option<&'a mut dyn Read>,
    plaintext: SecretBuffer,
    pos: usize,
}

impl<A: Aead> AeadReader<'_, A> {
    fn open(&mut self) -> io::Result<()> {
        let Some(source) = self.source.take() else {
            return Ok(());
        };
        let mut ciphertext = Vec::new();
        source.read_to_end(&mut ciphertext)?;
        let plaintext = self
            .aead
            .decrypt(&self.nonce, ciphertext.as_slice())
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("{}: decryption failed: wrong key or corrupted data", self.name),
                )
            })?;
        self.plaintext = SecretBuffer::from_vec(plaintext);
        Ok(())
    }
}

impl<A: Aead> Read for AeadReader<'_, A> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        self.open()?;
        let remaining = &self.plaintext.expose_secret()[self.pos..];
        let n = remaining.len().min(out.len());
        out[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schemes() -> Vec<Box<dyn CipherAlgorithm>> {
        vec![
            Box::new(AesGcm::new(Pbkdf2Params::fast())),
            Box::new(ChaCha20Poly1305::new(Pbkdf2Params::fast())),
        ]
    }

    #[test]
    fn test_sizes() {
        for scheme in schemes() {
            assert_eq!(scheme.key_size(), 32, "{}", scheme.name());
            assert_eq!(scheme.iv_size(), 12, "{}", scheme.name());
            assert_eq!(scheme.ciphertext_len(1000), 1016, "{}", scheme.name());
        }
    }

    #[test]
    fn test_encrypt_decrypt_empty() {
        for scheme in schemes() {
            let key = scheme.generate_key();
            let iv = scheme.generate_iv();
            let ct = scheme.encrypt(&key, &iv, b"").unwrap();
            assert_eq!(ct.len(), 16);
            let pt = scheme.decrypt(&key, &iv, &ct).unwrap();
            assert!(pt.is_empty());
        }
    }

    #[test]
    fn test_tampered_ciphertext() {
        for scheme in schemes() {
            let key = scheme.generate_key();
            let iv = scheme.generate_iv();
            let mut ct = scheme.encrypt(&key, &iv, b"secret data").unwrap();
            ct[3] ^= 0xFF;
            assert!(
                matches!(scheme.decrypt(&key, &iv, &ct), Err(CryptoError::Decrypt { .. })),
                "{}: tampered ciphertext must fail",
                scheme.name()
            );
        }
    }

    #[test]
    fn test_decrypt_wrong_key() {
        for scheme in schemes() {
            let iv = scheme.generate_iv();
            let ct = scheme.encrypt(&scheme.generate_key(), &iv, b"secret").unwrap();
            assert!(scheme.decrypt(&scheme.generate_key(), &iv, &ct).is_err());
        }
    }

    #[test]
    fn test_wrong_iv_length_rejected() {
        for scheme in schemes() {
            let key = scheme.generate_key();
            let result = scheme.encrypt(&key, &[0u8; 7], b"data");
            assert!(matches!(
                result,
                Err(CryptoError::InvalidLength { what: "IV", expected: 12, actual: 7, .. })
            ));
        }
    }

    #[test]
    fn test_stream_tampered_ciphertext_is_invalid_data() {
        let scheme = AesGcm::new(Pbkdf2Params::fast());
        let key = scheme.generate_key();
        let iv = scheme.generate_iv();
        let mut ct = scheme.encrypt(&key, &iv, b"streamed secret").unwrap();
        ct[0] ^= 1;

        let mut source = ct.as_slice();
        let mut reader = scheme.decrypting_reader(&key, &iv, &mut source).unwrap();
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
