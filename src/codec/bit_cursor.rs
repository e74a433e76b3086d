//! MSB-first bit access over hardware frames
//!
//! `BitCursor::take(k)` hands back the next `k` bits right-aligned in
//! `ceil(k/8)` bytes, so a 4-bit level followed by a 12-bit line number read
//! from `[0x61, 0x23]` come out as `[0x06]` and `[0x01, 0x23]`.
//! `BitWriter::put` is the mirror: it appends the low `k` bits of a
//! right-aligned buffer at the current bit position.

use crate::error::CodecError;

/// Reads bits MSB-first from a byte buffer
#[derive(Debug, Clone)]
pub struct BitCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bits not yet consumed
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() * 8 - self.pos
    }

    /// Bits consumed so far
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Take the next `k` bits, right-aligned in `ceil(k/8)` bytes
    pub fn take(&mut self, k: usize) -> Result<Vec<u8>, CodecError> {
        let remaining = self.remaining();
        if k > remaining {
            return Err(CodecError::Underflow {
                requested: k,
                remaining,
            });
        }

        let nbytes = k.div_ceil(8);
        let pad = nbytes * 8 - k;
        let mut out = vec![0u8; nbytes];

        for i in 0..k {
            let src = self.pos + i;
            if (self.data[src / 8] >> (7 - src % 8)) & 1 == 1 {
                let dst = pad + i;
                out[dst / 8] |= 0x80 >> (dst % 8);
            }
        }

        self.pos += k;
        Ok(out)
    }

    /// Take up to 64 bits as an unsigned integer
    pub fn take_uint(&mut self, k: usize) -> Result<u64, CodecError> {
        debug_assert!(k <= 64, "take_uint supports at most 64 bits");
        let bytes = self.take(k)?;
        Ok(bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64))
    }

    /// Everything left, byte-aligned view of the unread tail
    pub fn rest(&mut self) -> Vec<u8> {
        let k = self.remaining();
        // cannot underflow: k is exactly what remains
        self.take(k).unwrap_or_default()
    }
}

/// Assembles an MSB-first frame field by field
#[derive(Debug, Default, Clone)]
pub struct BitWriter {
    bytes: Vec<u8>,
    bit_len: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bits written so far
    #[inline]
    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    /// Append the low `k` bits of a right-aligned big-endian buffer
    pub fn put(&mut self, value: &[u8], k: usize) {
        let needed = (self.bit_len + k).div_ceil(8);
        if self.bytes.len() < needed {
            self.bytes.resize(needed, 0);
        }

        for i in 0..k {
            let significance = k - 1 - i;
            let from_end = significance / 8;
            let bit = if from_end < value.len() {
                (value[value.len() - 1 - from_end] >> (significance % 8)) & 1
            } else {
                0
            };
            if bit == 1 {
                let dst = self.bit_len + i;
                self.bytes[dst / 8] |= 0x80 >> (dst % 8);
            }
        }

        self.bit_len += k;
    }

    /// Append the low `k` bits of `value` (k <= 64)
    pub fn put_uint(&mut self, value: u64, k: usize) {
        debug_assert!(k <= 64, "put_uint supports at most 64 bits");
        let nbytes = k.div_ceil(8);
        let be = value.to_be_bytes();
        self.put(&be[8 - nbytes..], k);
    }

    /// Finished frame, zero-padded to a whole byte
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_right_aligns_sub_byte_fields() {
        let data = [0x61, 0x23];
        let mut cursor = BitCursor::new(&data);

        assert_eq!(cursor.take(4).unwrap(), vec![0x06]);
        assert_eq!(cursor.take(12).unwrap(), vec![0x01, 0x23]);
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn test_take_across_byte_boundaries() {
        // 24-bit timestamp, then 3 + 5 + 8 bits
        let data = [0x01, 0x02, 0x03, 0b1010_1100, 0xFF];
        let mut cursor = BitCursor::new(&data);

        assert_eq!(cursor.take_uint(24).unwrap(), 0x010203);
        assert_eq!(cursor.take(3).unwrap(), vec![0b101]);
        assert_eq!(cursor.take(5).unwrap(), vec![0b01100]);
        assert_eq!(cursor.take_uint(8).unwrap(), 0xFF);
    }

    #[test]
    fn test_underflow_is_reported() {
        let data = [0xAB];
        let mut cursor = BitCursor::new(&data);
        cursor.take(5).unwrap();

        assert_eq!(
            cursor.take(4),
            Err(CodecError::Underflow {
                requested: 4,
                remaining: 3
            })
        );
        // failed take does not move the cursor
        assert_eq!(cursor.remaining(), 3);
    }

    #[test]
    fn test_zero_width_take() {
        let mut cursor = BitCursor::new(&[]);
        assert_eq!(cursor.take(0).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_writer_matches_hand_computed_debug_frame() {
        let mut writer = BitWriter::new();
        writer.put_uint(0x000102, 24);
        writer.put(&[0x06], 4);
        writer.put(&[0x01, 0x23], 12);
        writer.put(b"ABC", 24);

        assert_eq!(
            writer.into_bytes(),
            vec![0x00, 0x01, 0x02, 0x61, 0x23, b'A', b'B', b'C']
        );
    }

    #[test]
    fn test_writer_pads_partial_byte() {
        let mut writer = BitWriter::new();
        writer.put_uint(0b101, 3);
        assert_eq!(writer.bit_len(), 3);
        assert_eq!(writer.into_bytes(), vec![0b1010_0000]);
    }

    #[test]
    fn test_cursor_reads_back_what_writer_wrote() {
        let widths = [1usize, 7, 13, 2, 9, 16, 3, 13];
        let values = [1u64, 0x55, 0x1ABC, 2, 0x101, 0xBEEF, 5, 0x0FFF];

        let mut writer = BitWriter::new();
        for (&k, &v) in widths.iter().zip(values.iter()) {
            writer.put_uint(v, k);
        }
        let bytes = writer.into_bytes();

        let mut cursor = BitCursor::new(&bytes);
        for (&k, &v) in widths.iter().zip(values.iter()) {
            assert_eq!(cursor.take_uint(k).unwrap(), v);
        }
    }
}
