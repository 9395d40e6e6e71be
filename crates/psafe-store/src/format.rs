//! The safe file: content blocks wrapped by header blocks wrapped by a
//! password-keyed main header
//!
//! ```text
//! [leading junk 1..=32]
//! [Passwords][PasswordsData][Totp]                      content, own keys
//! [PasswordsHeader][PasswordsDataHeader][TotpHeader]    main key, own IVs
//! [MainHeader]                                          password-derived key
//! [before:small][after:small][main IV][salt][trailing noise 0..1024]
//! ```
//!
//! Main header payload:
//! `marker ‖ main key ‖ 3 × (header IV ‖ exterior ‖ before ‖ after)`.
//! Header blocks have a fixed payload size, so no lengths are stored for
//! them. The main header has no exterior noise.
//!
//! Files are written front to back and read back to front: the tail gives
//! the salt and main IV, the main header gives the header blocks, and each
//! header gives its content block. Every failure before the marker has been
//! checked is reported as [`SafeError::WrongPassword`].

use std::io::Write;

use psafe_crypto::{destroy_all, Cipher, CryptoError, Destroy, SecretBuffer, SecretChars};
use rand::{Rng, RngCore};
use secrecy::ExposeSecret;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::block::{BlockKind, BlockLayout, EncryptedBlock};
use crate::codec::{self, FieldReader};
use crate::error::{SafeError, SafeResult};
use crate::model::SafeData;
use crate::small_number::{NOISE_AFTER, NOISE_BEFORE, NOISE_EXTERIOR};

/// Fixed prefix of the main header payload.
const MAIN_HEADER_MARKER: &[u8; 8] = b"PSAFE\x00\x01\x00";

const LEADING_JUNK_MAX: usize = 32;

const TRAILING_NOISE_MODULUS: u16 = 1024;

const TRAILING_NOISE_DOMAIN: &[u8] = b"psafe trailing noise";

/// Bytes of trailing noise for `password`: a pseudo-random value in
/// `0..1024` seeded by its first two characters.
pub(crate) fn trailing_noise_len(password: &SecretChars) -> usize {
    let digest = Sha256::new()
        .chain_update(TRAILING_NOISE_DOMAIN)
        .chain_update(password.prefix_chars(2).as_bytes())
        .finalize();
    usize::from(u16::from_be_bytes([digest[0], digest[1]]) % TRAILING_NOISE_MODULUS)
}

fn tail_len(cipher: &Cipher) -> usize {
    2 + cipher.iv_size() + cipher.derivation_salt_size()
}

fn main_payload_len(cipher: &Cipher) -> usize {
    MAIN_HEADER_MARKER.len() + cipher.key_size() + 3 * (cipher.iv_size() + 3)
}

/// Serialize `safe` under `password`.
pub fn write_safe(
    cipher: &Cipher,
    password: &SecretChars,
    safe: &SafeData,
    out: &mut dyn Write,
) -> SafeResult<()> {
    let mut rng = rand::thread_rng();
    let payloads = codec::encode_contents(safe)?;
    let contents = [&payloads.passwords, &payloads.data, &payloads.totp];

    let mut content_blocks = Vec::with_capacity(3);
    for (kind, payload) in BlockKind::CONTENT.into_iter().zip(contents) {
        content_blocks.push(EncryptedBlock::generate(kind, cipher, payload.len(), &mut rng)?);
    }

    let main_key = cipher.generate_key()?;
    let header_len = EncryptedBlock::header_payload_len(cipher);
    let mut header_blocks = Vec::with_capacity(3);
    let mut header_payloads = Vec::with_capacity(3);
    for content in &content_blocks {
        header_payloads.push(content.encode_header(cipher, &mut rng)?);
        header_blocks.push(EncryptedBlock::new(
            content.kind().header(),
            main_key.clone(),
            cipher.generate_iv()?,
            BlockLayout::random(header_len, &mut rng),
        ));
    }

    let salt = cipher.generate_derivation_salt()?;
    let main_layout = BlockLayout {
        exterior: 0,
        before: NOISE_BEFORE.random(&mut rng),
        after: NOISE_AFTER.random(&mut rng),
        data_len: main_payload_len(cipher),
    };
    let mut main = EncryptedBlock::new(
        BlockKind::MainHeader,
        cipher.derive_key(password, &salt)?,
        cipher.generate_iv()?,
        main_layout,
    );

    let mut main_payload = SecretBuffer::with_capacity(main_layout.data_len);
    main_payload.extend_from_slice(MAIN_HEADER_MARKER);
    main_payload.extend_from_slice(cipher.key_to_bytes(&main_key)?.expose_secret());
    for header in &header_blocks {
        let layout = header.layout();
        main_payload.extend_from_slice(header.iv());
        main_payload.extend_from_slice(&[
            NOISE_EXTERIOR.encode(layout.exterior, &mut rng),
            NOISE_BEFORE.encode(layout.before, &mut rng),
            NOISE_AFTER.encode(layout.after, &mut rng),
        ]);
    }

    let mut junk = [0u8; LEADING_JUNK_MAX];
    let junk_len = rng.gen_range(1..=LEADING_JUNK_MAX);
    rng.fill_bytes(&mut junk[..junk_len]);
    out.write_all(&junk[..junk_len])?;

    for (block, payload) in content_blocks.iter().zip(contents) {
        block.write_to(cipher, payload.expose_secret(), out, &mut rng)?;
    }
    for (block, payload) in header_blocks.iter().zip(&header_payloads) {
        block.write_to(cipher, payload.expose_secret(), out, &mut rng)?;
    }
    main.write_to(cipher, main_payload.expose_secret(), out, &mut rng)?;

    out.write_all(&[
        NOISE_BEFORE.encode(main_layout.before, &mut rng),
        NOISE_AFTER.encode(main_layout.after, &mut rng),
    ])?;
    out.write_all(main.iv())?;
    out.write_all(&salt)?;
    let mut trailing = vec![0u8; trailing_noise_len(password)];
    rng.fill_bytes(&mut trailing);
    out.write_all(&trailing)?;
    out.flush()?;

    let mut wipe: Vec<&mut dyn Destroy> =
        vec![&mut main as &mut dyn Destroy, &mut main_payload as &mut dyn Destroy];
    wipe.extend(content_blocks.iter_mut().map(|b| b as &mut dyn Destroy));
    wipe.extend(header_blocks.iter_mut().map(|b| b as &mut dyn Destroy));
    wipe.extend(header_payloads.iter_mut().map(|p| p as &mut dyn Destroy));
    destroy_all(&mut wipe)?;

    debug!(cipher = cipher.name(), entries = safe.len(), "safe written");
    Ok(())
}

/// Parse a whole safe file held in memory.
pub fn read_safe(cipher: &Cipher, password: &SecretChars, file: &[u8]) -> SafeResult<SafeData> {
    // Decryption is allowed on an unchecked cipher, not on one mid-check.
    cipher.wait_if_pending();

    let (headers, main_start) = read_main_header(cipher, password, file).map_err(|e| {
        if is_password_failure(&e) {
            debug!(cipher = cipher.name(), "main header rejected: {e}");
            SafeError::WrongPassword
        } else {
            e
        }
    })?;

    let mut end = main_start;
    let mut header_payloads = Vec::with_capacity(3);
    for header in headers.iter().rev() {
        let (payload, start) = header.read_from(cipher, file, end)?;
        header_payloads.push(payload);
        end = start;
    }
    header_payloads.reverse();

    let mut contents = Vec::with_capacity(3);
    for (kind, payload) in BlockKind::CONTENT.into_iter().zip(&header_payloads).rev() {
        let block = EncryptedBlock::decode_header(kind, cipher, payload.expose_secret())?;
        let (data, start) = block.read_from(cipher, file, end)?;
        contents.push(data);
        end = start;
    }
    contents.reverse();
    if end == 0 {
        warn!("safe file has no leading junk");
    }

    let safe = codec::decode_contents(
        contents[0].expose_secret(),
        contents[1].expose_secret(),
        contents[2].expose_secret(),
    )?;
    debug!(cipher = cipher.name(), entries = safe.len(), "safe read");
    Ok(safe)
}

fn is_password_failure(e: &SafeError) -> bool {
    matches!(
        e,
        SafeError::Integrity { .. }
            | SafeError::Crypto(CryptoError::Decrypt { .. })
            | SafeError::Crypto(CryptoError::InvalidLength { .. })
    )
}

/// Parse the tail and main header, returning the three header blocks and
/// the offset where the main header starts.
fn read_main_header(
    cipher: &Cipher,
    password: &SecretChars,
    file: &[u8],
) -> SafeResult<(Vec<EncryptedBlock>, usize)> {
    let block = BlockKind::MainHeader;
    let tail_end = file
        .len()
        .checked_sub(trailing_noise_len(password))
        .ok_or_else(|| SafeError::integrity(block, "file shorter than trailing noise"))?;
    let tail_start = tail_end
        .checked_sub(tail_len(cipher))
        .ok_or_else(|| SafeError::integrity(block, "file shorter than header tail"))?;

    let mut tail = FieldReader::new(&file[tail_start..tail_end], block);
    let before = NOISE_BEFORE.decode(tail.get_u8()?, block)?;
    let after = NOISE_AFTER.decode(tail.get_u8()?, block)?;
    let iv = tail.take(cipher.iv_size())?.to_vec();
    let salt = tail.take(cipher.derivation_salt_size())?;
    tail.finish()?;

    let main = EncryptedBlock::new(
        block,
        cipher.derive_key(password, salt)?,
        iv,
        BlockLayout {
            exterior: 0,
            before,
            after,
            data_len: main_payload_len(cipher),
        },
    );
    let (payload, main_start) = main.read_from(cipher, file, tail_start)?;

    let mut fields = FieldReader::new(payload.expose_secret(), block);
    if fields.take(MAIN_HEADER_MARKER.len())? != MAIN_HEADER_MARKER {
        return Err(SafeError::integrity(block, "check marker mismatch"));
    }
    let main_key = cipher.key_from_bytes(fields.take(cipher.key_size())?)?;

    let header_len = EncryptedBlock::header_payload_len(cipher);
    let mut headers = Vec::with_capacity(3);
    for kind in BlockKind::CONTENT {
        let iv = fields.take(cipher.iv_size())?.to_vec();
        let layout = BlockLayout {
            exterior: NOISE_EXTERIOR.decode(fields.get_u8()?, block)?,
            before: NOISE_BEFORE.decode(fields.get_u8()?, block)?,
            after: NOISE_AFTER.decode(fields.get_u8()?, block)?,
            data_len: header_len,
        };
        headers.push(EncryptedBlock::new(kind.header(), main_key.clone(), iv, layout));
    }
    fields.finish()?;

    Ok((headers, main_start))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PasswordEntryData, TotpAlgorithm, TotpSecret};
    use crate::test_support::{working_cipher, ALL_CIPHERS};
    use std::time::{Duration, UNIX_EPOCH};

    fn sample(count: usize) -> SafeData {
        let entries = (0..count)
            .map(|i| {
                let totp = (i % 2 == 1).then(|| {
                    TotpSecret::new(
                        SecretBuffer::from_slice(format!("seed-{i}").as_bytes()),
                        format!("user{i}"),
                        "Issuer",
                        TotpAlgorithm::Sha1,
                        6,
                        30,
                    )
                    .unwrap()
                });
                PasswordEntryData::new(
                    format!("entry-{i}"),
                    SecretChars::from(format!("password-{i}").as_str()),
                    UNIX_EPOCH + Duration::from_secs(1_700_000_000 + i as u64),
                    format!("site{i}.example"),
                    "x".repeat(i * 10),
                    totp,
                )
                .unwrap()
            })
            .collect();
        SafeData::new(entries).unwrap()
    }

    fn write(cipher: &Cipher, password: &str, safe: &SafeData) -> Vec<u8> {
        let mut file = Vec::new();
        write_safe(cipher, &SecretChars::from(password), safe, &mut file).unwrap();
        file
    }

    #[test]
    fn test_trailing_noise_depends_on_two_chars() {
        let a = trailing_noise_len(&SecretChars::from("correcthorsebattery"));
        assert_eq!(a, trailing_noise_len(&SecretChars::from("co")));
        assert!(a < 1024);
        let lens: std::collections::HashSet<_> = ["aa", "ab", "ba", "zz", "q", ""]
            .iter()
            .map(|p| trailing_noise_len(&SecretChars::from(*p)))
            .collect();
        assert!(lens.len() > 1);
    }

    #[test]
    fn test_roundtrip_every_cipher() {
        for name in ALL_CIPHERS {
            let cipher = working_cipher(name);
            for count in [0, 1, 5] {
                let safe = sample(count);
                let file = write(&cipher, "pw", &safe);
                let read = read_safe(&cipher, &SecretChars::from("pw"), &file).unwrap();
                assert_eq!(read, safe, "{name} with {count} entries");
            }
        }
    }

    #[test]
    fn test_same_data_never_serializes_identically() {
        let cipher = working_cipher(psafe_crypto::AES_CTR);
        let safe = sample(3);
        assert_ne!(write(&cipher, "pw", &safe), write(&cipher, "pw", &safe));
    }

    #[test]
    fn test_wrong_password_every_cipher() {
        for name in ALL_CIPHERS {
            let cipher = working_cipher(name);
            let file = write(&cipher, "correcthorsebattery", &sample(2));
            // Same first two characters: same trailing noise, so the failure
            // comes from the key, not the tail position.
            for wrong in ["correcthorsebatterz", "wrongpassword"] {
                let result = read_safe(&cipher, &SecretChars::from(wrong), &file);
                assert!(
                    matches!(result, Err(SafeError::WrongPassword)),
                    "{name}/{wrong}: {result:?}"
                );
            }
        }
    }

    #[test]
    fn test_truncated_file_is_wrong_password() {
        let cipher = working_cipher(psafe_crypto::AES_GCM);
        let result = read_safe(&cipher, &SecretChars::from("pw"), &[1, 2, 3]);
        assert!(matches!(result, Err(SafeError::WrongPassword)));
    }

    #[test]
    fn test_corrupt_content_is_integrity_error() {
        let cipher = working_cipher(psafe_crypto::AES_GCM);
        let mut file = write(&cipher, "pw", &sample(3));
        // The first content block sits right after at most 32 junk bytes
        // plus 8 exterior noise bytes.
        file[45] ^= 0x55;
        let result = read_safe(&cipher, &SecretChars::from("pw"), &file);
        assert!(matches!(result, Err(SafeError::Integrity { .. })), "{result:?}");
    }

    #[test]
    fn test_other_cipher_cannot_read() {
        let gcm = working_cipher(psafe_crypto::AES_GCM);
        let chacha = working_cipher(psafe_crypto::CHACHA20_POLY1305);
        let file = write(&gcm, "pw", &sample(1));
        assert!(matches!(
            read_safe(&chacha, &SecretChars::from("pw"), &file),
            Err(SafeError::WrongPassword)
        ));
    }
}
