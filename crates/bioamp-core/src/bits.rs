//! Bit cursor and big-endian field helpers
//!
//! Standard packets are byte-aligned (24-bit and 16-bit big-endian words),
//! while the low-power variant packs its deltas into fields that straddle
//! byte boundaries. Both go through this module so every field's width and
//! position can be tested on its own.

use crate::error::ProtocolError;

// ============================================================================
// Byte-aligned helpers
// ============================================================================

/// Sign-extend a 24-bit big-endian two's-complement word.
#[inline]
#[must_use]
pub const fn be_i24(bytes: [u8; 3]) -> i32 {
    let raw = ((bytes[0] as i32) << 16) | ((bytes[1] as i32) << 8) | (bytes[2] as i32);
    // Shift the 24-bit value to the top, then arithmetic shift back down
    (raw << 8) >> 8
}

/// Decode a 16-bit big-endian two's-complement word.
#[inline]
#[must_use]
pub const fn be_i16(bytes: [u8; 2]) -> i16 {
    i16::from_be_bytes(bytes)
}

/// Decode a 32-bit big-endian unsigned word.
#[inline]
#[must_use]
pub const fn be_u32(bytes: [u8; 4]) -> u32 {
    u32::from_be_bytes(bytes)
}

// ============================================================================
// Bit Cursor
// ============================================================================

/// MSB-first reader over a byte slice.
///
/// Bit 0 is the most significant bit of the first byte.
#[derive(Debug, Clone)]
pub struct BitCursor<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> BitCursor<'a> {
    /// Start reading at the first bit of `bytes`.
    #[must_use]
    pub const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    /// Current bit position.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    /// Bits left to read.
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.bytes.len() * 8 - self.position
    }

    /// Read `width` bits (1..=32) as an unsigned value.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::BitFieldOutOfRange`] if the width is zero or
    /// above 32, or if the field runs past the end of the buffer. The cursor
    /// does not move on error.
    pub fn read_unsigned(&mut self, width: u32) -> Result<u32, ProtocolError> {
        let available = self.bytes.len() * 8;
        if width == 0 || width > 32 || self.position + width as usize > available {
            return Err(ProtocolError::BitFieldOutOfRange {
                position: self.position,
                width,
                available,
            });
        }

        let mut value: u32 = 0;
        for _ in 0..width {
            let byte = self.bytes[self.position / 8];
            let bit = (byte >> (7 - (self.position % 8))) & 1;
            value = (value << 1) | u32::from(bit);
            self.position += 1;
        }
        Ok(value)
    }

    /// Read `width` bits as a two's-complement signed value.
    ///
    /// # Errors
    ///
    /// Same conditions as [`BitCursor::read_unsigned`].
    pub fn read_signed(&mut self, width: u32) -> Result<i32, ProtocolError> {
        let raw = self.read_unsigned(width)?;
        Ok(sign_extend(raw, width))
    }

    /// Read a low-power delta field.
    ///
    /// The radio firmware marks negative deltas by the field's least
    /// significant bit rather than its top bit; a set LSB means the value is
    /// `raw - 2^width`.
    ///
    /// # Errors
    ///
    /// Same conditions as [`BitCursor::read_unsigned`].
    pub fn read_delta(&mut self, width: u32) -> Result<i32, ProtocolError> {
        let raw = self.read_unsigned(width)?;
        if raw & 1 == 1 {
            Ok((i64::from(raw) - (1_i64 << width)) as i32)
        } else {
            Ok(raw as i32)
        }
    }
}

/// Sign-extend the low `width` bits of `raw`.
#[inline]
#[must_use]
pub const fn sign_extend(raw: u32, width: u32) -> i32 {
    if width >= 32 {
        return raw as i32;
    }
    let shift = 32 - width;
    ((raw << shift) as i32) >> shift
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_be_i24_sign_extension() {
        assert_eq!(be_i24([0x00, 0x00, 0x01]), 1);
        assert_eq!(be_i24([0x7F, 0xFF, 0xFF]), 8_388_607);
        assert_eq!(be_i24([0x80, 0x00, 0x00]), -8_388_608);
        assert_eq!(be_i24([0xFF, 0xFF, 0xFF]), -1);
    }

    #[test]
    fn test_be_words() {
        assert_eq!(be_i16([0xFF, 0xFE]), -2);
        assert_eq!(be_u32([0x00, 0x01, 0x00, 0x00]), 65_536);
    }

    #[test]
    fn test_cursor_reads_across_bytes() {
        let bytes = [0b1010_1100, 0b0101_0000];
        let mut cursor = BitCursor::new(&bytes);
        assert_eq!(cursor.read_unsigned(3).unwrap(), 0b101);
        assert_eq!(cursor.read_unsigned(7).unwrap(), 0b0_1100_01);
        assert_eq!(cursor.position(), 10);
        assert_eq!(cursor.remaining(), 6);
    }

    #[test]
    fn test_cursor_signed() {
        let bytes = [0b1110_0000];
        let mut cursor = BitCursor::new(&bytes);
        assert_eq!(cursor.read_signed(3).unwrap(), -1);
        assert_eq!(cursor.read_signed(5).unwrap(), 0);
    }

    #[test]
    fn test_cursor_delta_lsb_sign() {
        // 0b101 has its LSB set: 5 - 8 = -3
        let bytes = [0b1010_1000];
        let mut cursor = BitCursor::new(&bytes);
        assert_eq!(cursor.read_delta(3).unwrap(), -3);
        // 0b010 is positive
        assert_eq!(cursor.read_delta(3).unwrap(), 2);
    }

    #[test]
    fn test_cursor_out_of_range() {
        let bytes = [0xFF];
        let mut cursor = BitCursor::new(&bytes);
        assert!(cursor.read_unsigned(6).is_ok());
        let err = cursor.read_unsigned(3).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::BitFieldOutOfRange { position: 6, width: 3, available: 8 }
        );
        assert_eq!(cursor.position(), 6);
        assert!(cursor.read_unsigned(0).is_err());
    }

    #[test]
    fn test_sign_extend() {
        assert_eq!(sign_extend(0x3FFFF, 18), -1);
        assert_eq!(sign_extend(0x1FFFF, 18), 131_071);
        assert_eq!(sign_extend(0xFFFF_FFFF, 32), -1);
    }
}
