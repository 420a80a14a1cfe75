//! Little-endian integer codec for variable-width device fields
//!
//! Device fields are 1-4 bytes wide (1-8 for the 64-bit family) and must
//! sign-extend from the declared field width, not from the width of the
//! native integer they land in.

use crate::{BleError, Result};

/// Read an unsigned little-endian value of 1-4 bytes.
///
/// # Panics
///
/// Panics if `bytes` is empty or longer than 4 bytes.
pub fn le_u32(bytes: &[u8]) -> u32 {
    assert!((1..=4).contains(&bytes.len()), "u32 field width must be 1..=4, got {}", bytes.len());
    bytes.iter().rev().fold(0u32, |acc, &b| (acc << 8) | b as u32)
}

/// Read a signed little-endian value of 1-4 bytes, sign-extended from the field width.
///
/// # Panics
///
/// Panics if `bytes` is empty or longer than 4 bytes.
pub fn le_i32(bytes: &[u8]) -> i32 {
    assert!((1..=4).contains(&bytes.len()), "i32 field width must be 1..=4, got {}", bytes.len());
    sign_extend(le_u32(bytes) as u64, bytes.len() as u32 * 8) as i32
}

/// Read an unsigned little-endian value of 1-8 bytes.
///
/// # Panics
///
/// Panics if `bytes` is empty or longer than 8 bytes.
pub fn le_u64(bytes: &[u8]) -> u64 {
    assert!((1..=8).contains(&bytes.len()), "u64 field width must be 1..=8, got {}", bytes.len());
    bytes.iter().rev().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

/// Read a signed little-endian value of 1-8 bytes, sign-extended from the field width.
///
/// # Panics
///
/// Panics if `bytes` is empty or longer than 8 bytes.
pub fn le_i64(bytes: &[u8]) -> i64 {
    assert!((1..=8).contains(&bytes.len()), "i64 field width must be 1..=8, got {}", bytes.len());
    sign_extend(le_u64(bytes), bytes.len() as u32 * 8)
}

/// Sign-extend the low `bits` bits of `value`.
pub fn sign_extend(value: u64, bits: u32) -> i64 {
    if bits == 0 {
        return 0;
    }
    if bits >= 64 {
        return value as i64;
    }
    let shift = 64 - bits;
    ((value << shift) as i64) >> shift
}

/// Encode the low `width` bytes of `value` little-endian.
pub fn to_le_bytes(value: u32, width: usize) -> Vec<u8> {
    value.to_le_bytes().into_iter().chain(std::iter::repeat(0)).take(width).collect()
}

/// Bounds-checked slice of `len` bytes at `offset`.
pub fn field<'a>(data: &'a [u8], offset: usize, len: usize, context: &str) -> Result<&'a [u8]> {
    offset.checked_add(len).and_then(|end| data.get(offset..end)).ok_or_else(|| {
        BleError::decode(
            context,
            format!("need {} bytes at offset {}, buffer has {}", len, offset, data.len()),
        )
    })
}

/// Bounds-checked single byte at `offset`.
pub fn byte_at(data: &[u8], offset: usize, context: &str) -> Result<u8> {
    data.get(offset).copied().ok_or_else(|| {
        BleError::decode(context, format!("offset {} past end of {} byte buffer", offset, data.len()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn sign_extension_follows_field_width() {
        assert_eq!(le_i32(&[0xFF]), -1);
        assert_eq!(le_i32(&[0x7F]), 127);
        assert_eq!(le_i32(&[0x00, 0x80]), -32768);
        assert_eq!(le_i32(&[0xFF, 0xFF, 0x7F]), 0x7F_FFFF);
        assert_eq!(le_i32(&[0x00, 0x00, 0x80]), -0x80_0000);
        assert_eq!(le_i64(&[0xFE, 0xFF, 0xFF, 0xFF, 0xFF]), -2);
    }

    #[test]
    fn unsigned_reads_do_not_extend() {
        assert_eq!(le_u32(&[0x90, 0x01]), 400);
        assert_eq!(le_u32(&[0xFF, 0xFF, 0xFF]), 0xFF_FFFF);
        assert_eq!(le_u64(&[1, 0, 0, 0, 0, 0, 0, 0x80]), 0x8000_0000_0000_0001);
    }

    #[test]
    #[should_panic]
    fn u32_family_rejects_five_bytes() {
        le_u32(&[0, 0, 0, 0, 0]);
    }

    #[test]
    #[should_panic]
    fn i64_family_rejects_nine_bytes() {
        le_i64(&[0; 9]);
    }

    #[test]
    fn field_reports_truncation() {
        let data = [1u8, 2, 3];
        assert_eq!(field(&data, 1, 2, "test").unwrap(), &[2, 3]);
        assert!(matches!(field(&data, 2, 2, "test"), Err(BleError::Decode { .. })));
        assert!(matches!(field(&data, usize::MAX, 2, "test"), Err(BleError::Decode { .. })));
        assert!(byte_at(&data, 3, "test").is_err());
    }

    proptest! {
        #[test]
        fn i32_matches_native_for_full_width(value in any::<i32>()) {
            prop_assert_eq!(le_i32(&value.to_le_bytes()), value);
        }

        #[test]
        fn i16_fields_extend_like_native(value in any::<i16>()) {
            prop_assert_eq!(le_i32(&value.to_le_bytes()), value as i32);
            prop_assert_eq!(le_i64(&value.to_le_bytes()), value as i64);
        }

        #[test]
        fn encode_then_read_unsigned(value in any::<u32>(), width in 1usize..=4) {
            let bytes = to_le_bytes(value, width);
            let mask = if width == 4 { u32::MAX } else { (1u32 << (width * 8)) - 1 };
            prop_assert_eq!(le_u32(&bytes), value & mask);
        }
    }
}
