//! Obfuscated encodings for the lengths stored in block metadata
//!
//! Neither encoding is a security boundary. They only keep small lengths
//! from showing up as recognizable byte patterns in decrypted headers.

use rand::Rng;

use crate::block::BlockKind;
use crate::error::{SafeError, SafeResult};

/// Longest encoded varint: count byte plus nine body bytes.
pub(crate) const VARINT_MAX_LEN: usize = 10;

/// A bounded value packed into the high bits of one byte.
///
/// `value - min` occupies the top `bits()` bits; the rest is random, so the
/// same value encodes differently each time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SmallRange {
    min: u8,
    max: u8,
}

pub(crate) const NOISE_BEFORE: SmallRange = SmallRange::new(1, 5);
pub(crate) const NOISE_AFTER: SmallRange = SmallRange::new(1, 5);
pub(crate) const NOISE_EXTERIOR: SmallRange = SmallRange::new(1, 8);

impl SmallRange {
    pub(crate) const fn new(min: u8, max: u8) -> Self {
        assert!(min <= max);
        Self { min, max }
    }

    fn bits(self) -> u32 {
        8 - (self.max - self.min).leading_zeros()
    }

    pub(crate) fn random<R: Rng + ?Sized>(self, rng: &mut R) -> u8 {
        rng.gen_range(self.min..=self.max)
    }

    pub(crate) fn encode<R: Rng + ?Sized>(self, value: u8, rng: &mut R) -> u8 {
        debug_assert!((self.min..=self.max).contains(&value));
        let bits = self.bits();
        let high = (value - self.min).checked_shl(8 - bits).unwrap_or(0);
        let low_mask = u8::MAX.checked_shr(bits).unwrap_or(0);
        high | (rng.gen::<u8>() & low_mask)
    }

    pub(crate) fn decode(self, byte: u8, block: BlockKind) -> SafeResult<u8> {
        let offset = byte.checked_shr(8 - self.bits()).unwrap_or(0);
        let value = self.min.saturating_add(offset);
        if value > self.max {
            return Err(SafeError::integrity(
                block,
                format!("noise length {value} outside {}..={}", self.min, self.max),
            ));
        }
        Ok(value)
    }
}

/// Append `value` as `[count][body]`.
///
/// The low nibble of the count byte is the body length, the high nibble is
/// random. The body is the shortest big-endian form that leaves the top bit
/// of its first byte unused; that bit is randomized.
pub(crate) fn write_varint<R: Rng + ?Sized>(out: &mut Vec<u8>, value: u64, rng: &mut R) {
    let significant = 64 - value.leading_zeros() as usize;
    let body_len = significant / 8 + 1;
    let count = (body_len as u8) | (rng.gen::<u8>() & 0xF0);
    out.push(count);

    let wide = (value as u128).to_be_bytes();
    let body = &wide[wide.len() - body_len..];
    out.push(body[0] | (rng.gen::<u8>() & 0x80));
    out.extend_from_slice(&body[1..]);
}

/// Decode a varint from the front of `input`, returning the value and the
/// number of bytes consumed.
pub(crate) fn read_varint(input: &[u8], block: BlockKind) -> SafeResult<(u64, usize)> {
    let (&count, rest) = input
        .split_first()
        .ok_or_else(|| SafeError::integrity(block, "missing length field"))?;
    let body_len = usize::from(count & 0x0F);
    if body_len == 0 || body_len > VARINT_MAX_LEN - 1 {
        return Err(SafeError::integrity(block, "malformed length field"));
    }
    let body = rest
        .get(..body_len)
        .ok_or_else(|| SafeError::integrity(block, "truncated length field"))?;

    let mut value = u128::from(body[0] & 0x7F);
    for &byte in &body[1..] {
        value = (value << 8) | u128::from(byte);
    }
    let value = u64::try_from(value)
        .map_err(|_| SafeError::integrity(block, "length field overflows"))?;
    Ok((value, 1 + body_len))
}
