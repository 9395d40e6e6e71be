//! Plaintext payloads of the three content blocks
//!
//! Every field is big-endian; byte strings carry a `u32` length prefix.
//!
//! ```text
//! Passwords:     count:u32, count × password
//! PasswordsData: count:u32, count × (name, last_change:i64, site, info)
//! Totp:          present:u32, present × (index:u32, key, label, issuer,
//!                                        algorithm:u8, digits:u8, period:u32)
//! ```
//!
//! TOTP entries are indexed by position in the other two blocks and must
//! appear in strictly increasing index order.

use psafe_crypto::{SecretBuffer, SecretChars};
use secrecy::ExposeSecret;

use crate::block::BlockKind;
use crate::error::{SafeError, SafeResult};
use crate::model::{self, PasswordEntryData, SafeData, TotpAlgorithm, TotpSecret};

/// Append-only encoder into a zeroizing buffer.
#[derive(Default)]
pub(crate) struct FieldWriter {
    buf: SecretBuffer,
}

impl FieldWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub(crate) fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub(crate) fn put_i64(&mut self, value: i64) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub(crate) fn put_len(&mut self, len: usize) -> SafeResult<()> {
        let len = u32::try_from(len)
            .map_err(|_| anyhow::anyhow!("field of {len} bytes exceeds the u32 length prefix"))?;
        self.put_u32(len);
        Ok(())
    }

    pub(crate) fn put_bytes(&mut self, bytes: &[u8]) -> SafeResult<()> {
        self.put_len(bytes.len())?;
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    pub(crate) fn put_str(&mut self, text: &str) -> SafeResult<()> {
        self.put_bytes(text.as_bytes())
    }

    pub(crate) fn into_inner(self) -> SecretBuffer {
        self.buf
    }
}

/// Cursor over a decrypted payload. Every failure is an integrity error
/// attributed to `block`.
pub(crate) struct FieldReader<'a> {
    data: &'a [u8],
    pos: usize,
    block: BlockKind,
}

impl<'a> FieldReader<'a> {
    pub(crate) fn new(data: &'a [u8], block: BlockKind) -> Self {
        Self { data, pos: 0, block }
    }

    pub(crate) fn block(&self) -> BlockKind {
        self.block
    }

    pub(crate) fn take(&mut self, n: usize) -> SafeResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| SafeError::integrity(self.block, "payload truncated"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> SafeResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub(crate) fn get_u8(&mut self) -> SafeResult<u8> {
        Ok(self.take_array::<1>()?[0])
    }

    pub(crate) fn get_u32(&mut self) -> SafeResult<u32> {
        self.take_array().map(u32::from_be_bytes)
    }

    pub(crate) fn get_i64(&mut self) -> SafeResult<i64> {
        self.take_array().map(i64::from_be_bytes)
    }

    /// A `u32` element count, bounded by what the remaining bytes could hold.
    pub(crate) fn get_count(&mut self, min_element_len: usize) -> SafeResult<usize> {
        let count = self.get_u32()? as usize;
        if count.saturating_mul(min_element_len.max(1)) > self.remaining() {
            return Err(SafeError::integrity(
                self.block,
                format!("record count {count} exceeds payload size"),
            ));
        }
        Ok(count)
    }

    pub(crate) fn get_bytes(&mut self) -> SafeResult<&'a [u8]> {
        let len = self.get_u32()? as usize;
        self.take(len)
    }

    pub(crate) fn get_string(&mut self, field: &str) -> SafeResult<String> {
        let bytes = self.get_bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| SafeError::integrity(self.block, format!("{field} is not valid UTF-8")))
    }

    pub(crate) fn get_secret_chars(&mut self, field: &str) -> SafeResult<SecretChars> {
        let bytes = self.get_bytes()?;
        SecretChars::from_utf8(bytes)
            .ok_or_else(|| SafeError::integrity(self.block, format!("{field} is not valid UTF-8")))
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub(crate) fn finish(self) -> SafeResult<()> {
        if self.remaining() != 0 {
            return Err(SafeError::integrity(
                self.block,
                format!("{} unexpected trailing bytes", self.remaining()),
            ));
        }
        Ok(())
    }
}

/// Plaintext of the Passwords, PasswordsData and Totp blocks, in file order.
pub(crate) struct ContentPayloads {
    pub(crate) passwords: SecretBuffer,
    pub(crate) data: SecretBuffer,
    pub(crate) totp: SecretBuffer,
}

pub(crate) fn encode_contents(safe: &SafeData) -> SafeResult<ContentPayloads> {
    let entries = safe.entries();

    let mut passwords = FieldWriter::new();
    passwords.put_len(entries.len())?;
    for entry in entries {
        passwords.put_bytes(entry.password().as_bytes())?;
    }

    let mut data = FieldWriter::new();
    data.put_len(entries.len())?;
    for entry in entries {
        data.put_str(entry.name())?;
        data.put_i64(entry.last_change_secs());
        data.put_str(entry.site())?;
        data.put_str(entry.info())?;
    }

    let mut totp = FieldWriter::new();
    let present: Vec<_> = entries
        .iter()
        .enumerate()
        .filter_map(|(i, e)| e.totp().map(|t| (i, t)))
        .collect();
    totp.put_len(present.len())?;
    for (index, secret) in present {
        totp.put_len(index)?;
        put_totp(&mut totp, secret)?;
    }

    Ok(ContentPayloads {
        passwords: passwords.into_inner(),
        data: data.into_inner(),
        totp: totp.into_inner(),
    })
}

pub(crate) fn put_totp(out: &mut FieldWriter, secret: &TotpSecret) -> SafeResult<()> {
    out.put_bytes(secret.key().expose_secret())?;
    out.put_str(secret.label())?;
    out.put_str(secret.issuer())?;
    out.put_u8(secret.algorithm().ordinal());
    out.put_u8(secret.digits());
    out.put_u32(secret.period());
    Ok(())
}

pub(crate) fn get_totp(input: &mut FieldReader<'_>) -> SafeResult<TotpSecret> {
    let key = SecretBuffer::from_slice(input.get_bytes()?);
    let label = input.get_string("TOTP label")?;
    let issuer = input.get_string("TOTP issuer")?;
    let ordinal = input.get_u8()?;
    let algorithm = TotpAlgorithm::from_ordinal(ordinal).ok_or_else(|| {
        SafeError::integrity(input.block(), format!("unknown TOTP algorithm {ordinal}"))
    })?;
    let digits = input.get_u8()?;
    let period = input.get_u32()?;
    TotpSecret::new(key, label, issuer, algorithm, digits, period)
        .map_err(|e| SafeError::integrity(input.block(), e.to_string()))
}

pub(crate) fn decode_contents(
    passwords: &[u8],
    data: &[u8],
    totp: &[u8],
) -> SafeResult<SafeData> {
    let mut passwords = FieldReader::new(passwords, BlockKind::Passwords);
    let count = passwords.get_count(4)?;
    let mut secrets = Vec::with_capacity(count);
    for _ in 0..count {
        secrets.push(passwords.get_secret_chars("password")?);
    }
    passwords.finish()?;

    let mut totp = FieldReader::new(totp, BlockKind::Totp);
    let present = totp.get_count(4)?;
    let mut totps: Vec<Option<TotpSecret>> = vec![None; count];
    let mut last_index = None;
    for _ in 0..present {
        let index = totp.get_u32()? as usize;
        if index >= count || last_index.is_some_and(|last| index <= last) {
            return Err(SafeError::integrity(
                BlockKind::Totp,
                format!("entry index {index} out of order or range"),
            ));
        }
        last_index = Some(index);
        totps[index] = Some(get_totp(&mut totp)?);
    }
    totp.finish()?;

    let mut data = FieldReader::new(data, BlockKind::PasswordsData);
    let data_count = data.get_count(4)?;
    if data_count != count {
        return Err(SafeError::integrity(
            BlockKind::PasswordsData,
            format!("{data_count} records but {count} passwords"),
        ));
    }
    let mut entries = Vec::with_capacity(count);
    for (password, totp) in secrets.into_iter().zip(totps) {
        let name = data.get_string("name")?;
        let last_change = model::from_epoch_seconds(data.get_i64()?)
            .map_err(|e| SafeError::integrity(BlockKind::PasswordsData, e.to_string()))?;
        let site = data.get_string("site")?;
        let info = data.get_string("info")?;
        let entry = PasswordEntryData::new(name, password, last_change, site, info, totp)
            .map_err(|e| SafeError::integrity(BlockKind::PasswordsData, e.to_string()))?;
        entries.push(entry);
    }
    data.finish()?;

    SafeData::new(entries)
}
