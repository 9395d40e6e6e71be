//! Portable export envelope: a single password-keyed stream
//!
//! ```text
//! [version:u16][salt][iv][encrypted( marker ‖ count:u32 ‖ count × entry )]
//! entry = name, password, last_change:i64, site, info,
//!         has_totp:u8 [, key, label, issuer, algorithm:u8, digits:u8, period:u32]
//! ```
//!
//! The version is checked before any key is derived.

use std::io::{Read, Write};
use std::ops::RangeInclusive;

use psafe_crypto::{Cipher, SecretBuffer, SecretChars};
use secrecy::ExposeSecret;
use tracing::{debug, info};
use zeroize::Zeroize;

use crate::block::BlockKind;
use crate::codec::{self, FieldReader, FieldWriter};
use crate::error::{SafeError, SafeResult};
use crate::model::{self, PasswordEntryData};

pub const EXPORT_VERSION: u16 = 1;

pub const SUPPORTED_EXPORT_VERSIONS: RangeInclusive<u16> = 1..=1;

const EXPORT_MARKER: &[u8; 8] = b"PSAFEexp";

pub fn export_entries(
    cipher: &Cipher,
    password: &SecretChars,
    entries: &[PasswordEntryData],
    out: &mut dyn Write,
) -> SafeResult<()> {
    let salt = cipher.generate_derivation_salt()?;
    let iv = cipher.generate_iv()?;
    let key = cipher.derive_key(password, &salt)?;

    let mut payload = FieldWriter::new();
    for &byte in EXPORT_MARKER {
        payload.put_u8(byte);
    }
    payload.put_len(entries.len())?;
    for entry in entries {
        payload.put_str(entry.name())?;
        payload.put_bytes(entry.password().as_bytes())?;
        payload.put_i64(entry.last_change_secs());
        payload.put_str(entry.site())?;
        payload.put_str(entry.info())?;
        match entry.totp() {
            Some(totp) => {
                payload.put_u8(1);
                codec::put_totp(&mut payload, totp)?;
            }
            None => payload.put_u8(0),
        }
    }
    let payload = payload.into_inner();

    out.write_all(&EXPORT_VERSION.to_be_bytes())?;
    out.write_all(&salt)?;
    out.write_all(&iv)?;
    let mut writer = cipher.encrypting_writer(&key, &iv, out)?;
    writer.write_all(payload.expose_secret())?;
    writer.finish()?;

    info!(cipher = cipher.name(), entries = entries.len(), "entries exported");
    Ok(())
}

pub fn import_entries(
    cipher: &Cipher,
    password: &SecretChars,
    input: &mut dyn Read,
) -> SafeResult<Vec<PasswordEntryData>> {
    let mut version = [0u8; 2];
    input.read_exact(&mut version)?;
    let version = u16::from_be_bytes(version);
    if !SUPPORTED_EXPORT_VERSIONS.contains(&version) {
        return Err(SafeError::UnsupportedExportVersion(version));
    }

    let mut salt = vec![0u8; cipher.derivation_salt_size()];
    input.read_exact(&mut salt)?;
    let mut iv = vec![0u8; cipher.iv_size()];
    input.read_exact(&mut iv)?;
    cipher.wait_if_pending();
    let key = cipher.derive_key(password, &salt)?;

    let payload = read_secret(cipher.decrypting_reader(&key, &iv, input)?.as_mut())
        .map_err(|e| match e {
            SafeError::Io(io) if io.kind() == std::io::ErrorKind::InvalidData => {
                SafeError::WrongPassword
            }
            other => other,
        })?;

    let mut fields = FieldReader::new(payload.expose_secret(), BlockKind::Export);
    if fields.take(EXPORT_MARKER.len()).ok() != Some(&EXPORT_MARKER[..]) {
        return Err(SafeError::WrongPassword);
    }
    let count = fields.get_count(4)?;
    let mut entries = Vec::with_capacity(count);
    for _ in 0..count {
        let name = fields.get_string("name")?;
        let password = fields.get_secret_chars("password")?;
        let last_change = model::from_epoch_seconds(fields.get_i64()?)
            .map_err(|e| SafeError::integrity(BlockKind::Export, e.to_string()))?;
        let site = fields.get_string("site")?;
        let info = fields.get_string("info")?;
        let totp = match fields.get_u8()? {
            0 => None,
            1 => Some(codec::get_totp(&mut fields)?),
            flag => {
                return Err(SafeError::integrity(
                    BlockKind::Export,
                    format!("invalid TOTP flag {flag}"),
                ))
            }
        };
        entries.push(
            PasswordEntryData::new(name, password, last_change, site, info, totp)
                .map_err(|e| SafeError::integrity(BlockKind::Export, e.to_string()))?,
        );
    }
    fields.finish()?;

    debug!(cipher = cipher.name(), entries = entries.len(), "entries imported");
    Ok(entries)
}

/// Drain `reader` into a zeroizing buffer without leaving partial copies in
/// freed memory.
fn read_secret(reader: &mut dyn Read) -> SafeResult<SecretBuffer> {
    let mut out = SecretBuffer::new();
    let mut chunk = [0u8; 4096];
    let result = loop {
        match reader.read(&mut chunk) {
            Ok(0) => break Ok(()),
            Ok(n) => out.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => break Err(e),
        }
    };
    chunk.zeroize();
    result?;
    Ok(out)
}
