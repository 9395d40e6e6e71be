//! One keyed, noise-padded ciphertext region of a safe file
//!
//! ```text
//! [exterior noise][ciphertext( before-noise ‖ data ‖ after-noise )]
//! ```
//!
//! A block stores no offsets. Given the offset where it ends, its start is
//! `end - exterior - cipher.ciphertext_len(before + data + after)`, so a
//! reader that knows a block's key, IV, and lengths can walk the file
//! backward one block at a time.

use std::fmt;
use std::io::Write;

use psafe_crypto::{Cipher, CipherKey, CryptoError, Destroy, DestroyError, SecretBuffer};
use rand::{Rng, RngCore};
use secrecy::ExposeSecret;
use zeroize::Zeroize;

use crate::error::{SafeError, SafeResult};
use crate::small_number::{
    read_varint, write_varint, NOISE_AFTER, NOISE_BEFORE, NOISE_EXTERIOR, VARINT_MAX_LEN,
};

/// Which region of the file a block (or an error) refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Passwords,
    PasswordsData,
    Totp,
    PasswordsHeader,
    PasswordsDataHeader,
    TotpHeader,
    MainHeader,
    Export,
}

impl BlockKind {
    pub const CONTENT: [BlockKind; 3] = [BlockKind::Passwords, BlockKind::PasswordsData, BlockKind::Totp];

    /// The header block that wraps this content block's key.
    pub fn header(self) -> BlockKind {
        match self {
            BlockKind::Passwords => BlockKind::PasswordsHeader,
            BlockKind::PasswordsData => BlockKind::PasswordsDataHeader,
            BlockKind::Totp => BlockKind::TotpHeader,
            other => other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BlockKind::Passwords => "passwords",
            BlockKind::PasswordsData => "passwords-data",
            BlockKind::Totp => "totp",
            BlockKind::PasswordsHeader => "passwords-header",
            BlockKind::PasswordsDataHeader => "passwords-data-header",
            BlockKind::TotpHeader => "totp-header",
            BlockKind::MainHeader => "main-header",
            BlockKind::Export => "export",
        }
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Largest data length a decoded header may claim. Anything above it cannot
/// fit in a file and is treated as corrupt metadata.
pub(crate) const MAX_DATA_LEN: usize = usize::MAX / 4;

/// Noise and data lengths of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockLayout {
    pub(crate) exterior: u8,
    pub(crate) before: u8,
    pub(crate) after: u8,
    pub(crate) data_len: usize,
}

impl BlockLayout {
    pub(crate) fn random<R: Rng + ?Sized>(data_len: usize, rng: &mut R) -> Self {
        Self {
            exterior: NOISE_EXTERIOR.random(rng),
            before: NOISE_BEFORE.random(rng),
            after: NOISE_AFTER.random(rng),
            data_len,
        }
    }

    /// `None` when the lengths cannot describe a real block.
    pub(crate) fn plaintext_len(&self) -> Option<usize> {
        if self.data_len > MAX_DATA_LEN {
            return None;
        }
        usize::from(self.before)
            .checked_add(self.data_len)?
            .checked_add(usize::from(self.after))
    }

    pub(crate) fn encrypted_len(&self, cipher: &Cipher) -> Option<usize> {
        self.plaintext_len().map(|n| cipher.ciphertext_len(n))
    }

    /// Bytes the block occupies on disk, exterior noise included.
    pub(crate) fn region_len(&self, cipher: &Cipher) -> Option<usize> {
        usize::from(self.exterior).checked_add(self.encrypted_len(cipher)?)
    }
}

pub(crate) struct EncryptedBlock {
    kind: BlockKind,
    key: CipherKey,
    iv: Vec<u8>,
    layout: BlockLayout,
}

impl EncryptedBlock {
    pub(crate) fn new(kind: BlockKind, key: CipherKey, iv: Vec<u8>, layout: BlockLayout) -> Self {
        Self {
            kind,
            key,
            iv,
            layout,
        }
    }

    /// Fresh key, IV, and noise lengths for `data_len` bytes of payload.
    pub(crate) fn generate<R: Rng + ?Sized>(
        kind: BlockKind,
        cipher: &Cipher,
        data_len: usize,
        rng: &mut R,
    ) -> SafeResult<Self> {
        Ok(Self::new(
            kind,
            cipher.generate_key()?,
            cipher.generate_iv()?,
            BlockLayout::random(data_len, rng),
        ))
    }

    pub(crate) fn kind(&self) -> BlockKind {
        self.kind
    }

    pub(crate) fn iv(&self) -> &[u8] {
        &self.iv
    }

    pub(crate) fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    /// Write exterior noise then the ciphertext through the streaming path.
    pub(crate) fn write_to<R: RngCore + ?Sized>(
        &self,
        cipher: &Cipher,
        data: &[u8],
        out: &mut dyn Write,
        rng: &mut R,
    ) -> SafeResult<()> {
        if data.len() != self.layout.data_len {
            return Err(anyhow::anyhow!(
                "{} block: {} payload bytes, layout expects {}",
                self.kind,
                data.len(),
                self.layout.data_len
            )
            .into());
        }

        let mut noise = [0u8; 8];
        let exterior = &mut noise[..usize::from(self.layout.exterior)];
        rng.fill_bytes(exterior);
        out.write_all(exterior)?;

        let mut writer = cipher.encrypting_writer(&self.key, &self.iv, out)?;
        rng.fill_bytes(&mut noise[..usize::from(self.layout.before)]);
        writer.write_all(&noise[..usize::from(self.layout.before)])?;
        writer.write_all(data)?;
        rng.fill_bytes(&mut noise[..usize::from(self.layout.after)]);
        writer.write_all(&noise[..usize::from(self.layout.after)])?;
        writer.finish()?;
        Ok(())
    }

    /// Decrypt the block that ends at `end`, returning its payload and the
    /// offset where it starts.
    pub(crate) fn read_from(
        &self,
        cipher: &Cipher,
        file: &[u8],
        end: usize,
    ) -> SafeResult<(SecretBuffer, usize)> {
        let region = self
            .layout
            .region_len(cipher)
            .ok_or_else(|| SafeError::integrity(self.kind, "block lengths overflow"))?;
        let start = end
            .checked_sub(region)
            .filter(|_| end <= file.len())
            .ok_or_else(|| SafeError::integrity(self.kind, "block extends past start of file"))?;
        let ciphertext = &file[start + usize::from(self.layout.exterior)..end];

        let plaintext = cipher
            .decrypt(&self.key, &self.iv, ciphertext)
            .map_err(|e| match e {
                CryptoError::Decrypt { .. } => SafeError::integrity(self.kind, "decryption failed"),
                other => other.into(),
            })?;
        if Some(plaintext.len()) != self.layout.plaintext_len() {
            return Err(SafeError::integrity(self.kind, "decrypted length mismatch"));
        }

        let before = usize::from(self.layout.before);
        let data = plaintext
            .expose_secret()
            .get(before..before + self.layout.data_len)
            .ok_or_else(|| SafeError::integrity(self.kind, "decrypted length mismatch"))?;
        Ok((SecretBuffer::from_slice(data), start))
    }

    /// Size of the fixed-length payload a header block stores for a
    /// content block.
    pub(crate) fn header_payload_len(cipher: &Cipher) -> usize {
        cipher.key_size() + cipher.iv_size() + 3 + VARINT_MAX_LEN
    }

    /// `key ‖ iv ‖ exterior ‖ before ‖ after ‖ varint(data_len) ‖ padding`
    pub(crate) fn encode_header<R: Rng + ?Sized>(
        &self,
        cipher: &Cipher,
        rng: &mut R,
    ) -> SafeResult<SecretBuffer> {
        let mut payload = SecretBuffer::with_capacity(Self::header_payload_len(cipher));
        payload.extend_from_slice(cipher.key_to_bytes(&self.key)?.expose_secret());
        payload.extend_from_slice(&self.iv);
        payload.extend_from_slice(&[
            NOISE_EXTERIOR.encode(self.layout.exterior, rng),
            NOISE_BEFORE.encode(self.layout.before, rng),
            NOISE_AFTER.encode(self.layout.after, rng),
        ]);

        let mut tail = Vec::with_capacity(VARINT_MAX_LEN);
        write_varint(&mut tail, self.layout.data_len as u64, rng);
        let used = tail.len();
        tail.resize(VARINT_MAX_LEN, 0);
        rng.fill_bytes(&mut tail[used..]);
        payload.extend_from_slice(&tail);
        Ok(payload)
    }

    pub(crate) fn decode_header(
        kind: BlockKind,
        cipher: &Cipher,
        payload: &[u8],
    ) -> SafeResult<Self> {
        let header = kind.header();
        if payload.len() != Self::header_payload_len(cipher) {
            return Err(SafeError::integrity(header, "header payload has the wrong size"));
        }
        let (key_bytes, rest) = payload.split_at(cipher.key_size());
        let (iv, rest) = rest.split_at(cipher.iv_size());
        let key = cipher.key_from_bytes(key_bytes)?;
        let exterior = NOISE_EXTERIOR.decode(rest[0], header)?;
        let before = NOISE_BEFORE.decode(rest[1], header)?;
        let after = NOISE_AFTER.decode(rest[2], header)?;
        let (data_len, _) = read_varint(&rest[3..], header)?;
        let data_len = usize::try_from(data_len)
            .ok()
            .filter(|&n| n <= MAX_DATA_LEN)
            .ok_or_else(|| SafeError::integrity(header, "data length overflows"))?;

        Ok(Self::new(
            kind,
            key,
            iv.to_vec(),
            BlockLayout {
                exterior,
                before,
                after,
                data_len,
            },
        ))
    }
}

impl Destroy for EncryptedBlock {
    fn destroy(&mut self) -> Result<(), DestroyError> {
        self.iv.zeroize();
        self.layout.data_len = 0;
        self.key.destroy()
    }

    fn is_destroyed(&self) -> bool {
        self.key.is_destroyed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{working_cipher, ALL_CIPHERS};

    #[test]
    fn test_block_roundtrip_at_end_of_file() {
        let mut rng = rand::thread_rng();
        for name in ALL_CIPHERS {
            let cipher = working_cipher(name);
            let data = b"the quick brown fox";
            let block = EncryptedBlock::generate(BlockKind::Passwords, &cipher, data.len(), &mut rng)
                .unwrap();

            let mut file = b"leading".to_vec();
            block.write_to(&cipher, data, &mut file, &mut rng).unwrap();
            assert_eq!(file.len(), 7 + block.layout().region_len(&cipher).unwrap(), "{name}");

            let (payload, start) = block.read_from(&cipher, &file, file.len()).unwrap();
            assert_eq!(payload.expose_secret(), data, "{name}");
            assert_eq!(start, 7, "{name}");
        }
    }

    #[test]
    fn test_header_payload_roundtrip() {
        let mut rng = rand::thread_rng();
        let cipher = working_cipher(psafe_crypto::AES_CTR);
        let block =
            EncryptedBlock::generate(BlockKind::Totp, &cipher, 123_456, &mut rng).unwrap();

        let payload = block.encode_header(&cipher, &mut rng).unwrap();
        assert_eq!(payload.len(), EncryptedBlock::header_payload_len(&cipher));

        let decoded = EncryptedBlock::decode_header(BlockKind::Totp, &cipher, payload.expose_secret())
            .unwrap();
        assert_eq!(decoded.layout(), block.layout());
        assert_eq!(decoded.iv(), block.iv());
        assert_eq!(decoded.key, block.key);
        assert_eq!(decoded.kind(), BlockKind::Totp);
    }

    #[test]
    fn test_header_noise_out_of_range() {
        let mut rng = rand::thread_rng();
        let cipher = working_cipher(psafe_crypto::AES_GCM);
        let block = EncryptedBlock::generate(BlockKind::Passwords, &cipher, 10, &mut rng).unwrap();
        let mut payload = block.encode_header(&cipher, &mut rng).unwrap().expose_secret().to_vec();
        // Before-noise byte: offset 7 is above the 1..=5 range.
        payload[cipher.key_size() + cipher.iv_size() + 1] = 0xFF;

        assert!(matches!(
            EncryptedBlock::decode_header(BlockKind::Passwords, &cipher, &payload),
            Err(SafeError::Integrity { block: BlockKind::PasswordsHeader, .. })
        ));
    }

    #[test]
    fn test_read_past_start_of_file() {
        let mut rng = rand::thread_rng();
        let cipher = working_cipher(psafe_crypto::CHACHA20);
        let block = EncryptedBlock::generate(BlockKind::Totp, &cipher, 64, &mut rng).unwrap();
        let file = vec![0u8; 16];
        assert!(matches!(
            block.read_from(&cipher, &file, file.len()),
            Err(SafeError::Integrity { block: BlockKind::Totp, .. })
        ));
    }

    fn corrupt_length_header(cipher: &Cipher, length_field: &[u8]) -> Vec<u8> {
        let mut rng = rand::thread_rng();
        let block = EncryptedBlock::generate(BlockKind::Passwords, cipher, 10, &mut rng).unwrap();
        let mut payload = block.encode_header(cipher, &mut rng).unwrap().expose_secret().to_vec();
        let at = cipher.key_size() + cipher.iv_size() + 3;
        payload[at..at + length_field.len()].copy_from_slice(length_field);
        payload
    }

    #[test]
    fn test_header_data_len_u64_max_rejected() {
        let cipher = working_cipher(psafe_crypto::AES_CTR);
        let mut field = vec![0x09, 0x00];
        field.extend_from_slice(&[0xFF; 8]);
        let payload = corrupt_length_header(&cipher, &field);

        assert!(matches!(
            EncryptedBlock::decode_header(BlockKind::Passwords, &cipher, &payload),
            Err(SafeError::Integrity { block: BlockKind::PasswordsHeader, .. })
        ));
    }

    #[test]
    fn test_header_data_len_past_file_is_integrity_error() {
        let cipher = working_cipher(psafe_crypto::CHACHA20);
        // 0x40_0000_0000 bytes: decodes fine but cannot fit in the file.
        let payload = corrupt_length_header(&cipher, &[0x05, 0x40, 0x00, 0x00, 0x00, 0x00]);
        let block = EncryptedBlock::decode_header(BlockKind::Passwords, &cipher, &payload).unwrap();

        let file = vec![0u8; 4096];
        assert!(matches!(
            block.read_from(&cipher, &file, file.len()),
            Err(SafeError::Integrity { block: BlockKind::Passwords, .. })
        ));
    }

    #[test]
    fn test_overflowing_layout_is_integrity_error() {
        let mut rng = rand::thread_rng();
        for name in ALL_CIPHERS {
            let cipher = working_cipher(name);
            let mut block =
                EncryptedBlock::generate(BlockKind::Totp, &cipher, 4, &mut rng).unwrap();
            block.layout.data_len = usize::MAX;
            assert_eq!(block.layout().region_len(&cipher), None, "{name}");

            let file = vec![0u8; 4096];
            assert!(
                matches!(
                    block.read_from(&cipher, &file, file.len()),
                    Err(SafeError::Integrity { block: BlockKind::Totp, .. })
                ),
                "{name}"
            );
        }
    }

    #[test]
    fn test_tampered_aead_block() {
        let mut rng = rand::thread_rng();
        let cipher = working_cipher(psafe_crypto::CHACHA20_POLY1305);
        let block = EncryptedBlock::generate(BlockKind::PasswordsData, &cipher, 4, &mut rng).unwrap();
        let mut file = Vec::new();
        block.write_to(&cipher, b"data", &mut file, &mut rng).unwrap();
        let last = file.len() - 1;
        file[last] ^= 1;
        assert!(matches!(
            block.read_from(&cipher, &file, file.len()),
            Err(SafeError::Integrity { block: BlockKind::PasswordsData, .. })
        ));
    }

    #[test]
    fn test_destroy_block() {
        let mut rng = rand::thread_rng();
        let cipher = working_cipher(psafe_crypto::AES_GCM);
        let mut block = EncryptedBlock::generate(BlockKind::Totp, &cipher, 4, &mut rng).unwrap();
        block.destroy().unwrap();
        assert!(block.is_destroyed());
        assert!(block.key.expose_secret().iter().all(|&b| b == 0));
        block.destroy().unwrap();
    }
}
