//! Fixed-capacity byte buffer with a bounds-checked cursor
//!
//! All multi-byte values are big-endian. The buffer never grows: writers size
//! it up front from the field layout, readers wrap the received frame.

use crate::error::{Error, Result};
use std::ops::Range;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteCursor {
    buffer: Vec<u8>,
    offset: usize,
}

impl ByteCursor {
    /// Wraps an existing buffer with the cursor at offset 0.
    pub fn new(buffer: Vec<u8>) -> Self {
        Self { buffer, offset: 0 }
    }

    /// Allocates a zero-filled buffer of exactly `len` bytes for writing.
    pub fn zeroed(len: usize) -> Self {
        Self::new(vec![0; len])
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.offset
    }

    /// Moves the cursor; `offset` may equal the buffer length but not exceed it.
    pub fn set_offset(&mut self, offset: usize) -> Result<()> {
        if offset > self.buffer.len() {
            return Err(Error::FrameBounds {
                offset,
                width: 0,
                len: self.buffer.len(),
            });
        }
        self.offset = offset;
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }

    /// Claims the next `width` bytes, failing without moving the cursor if
    /// they are not all inside the buffer.
    fn claim(&mut self, width: usize) -> Result<Range<usize>> {
        let end = self
            .offset
            .checked_add(width)
            .filter(|end| *end <= self.buffer.len())
            .ok_or(Error::FrameBounds {
                offset: self.offset,
                width,
                len: self.buffer.len(),
            })?;
        let range = self.offset..end;
        self.offset = end;
        Ok(range)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let range = self.claim(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buffer[range]);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(u8::from_be_bytes(self.read_array()?))
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_be_bytes(self.read_array()?))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&[u8]> {
        let range = self.claim(len)?;
        Ok(&self.buffer[range])
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_bytes(&value.to_be_bytes())
    }

    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.write_bytes(&value.to_be_bytes())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_bytes(&value.to_be_bytes())
    }

    pub fn write_f32(&mut self, value: f32) -> Result<()> {
        self.write_bytes(&value.to_be_bytes())
    }

    pub fn write_bytes(&mut self, value: &[u8]) -> Result<()> {
        let range = self.claim(value.len())?;
        self.buffer[range].copy_from_slice(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_bounds_error<T: std::fmt::Debug>(result: Result<T>) -> bool {
        matches!(result, Err(Error::FrameBounds { .. }))
    }

    #[test]
    fn test_write_then_read_primitives() {
        let mut cursor = ByteCursor::zeroed(1 + 2 + 4 + 4 + 3);
        cursor.write_u8(0xab).unwrap();
        cursor.write_u16(0x1234).unwrap();
        cursor.write_u32(0xdeadbeef).unwrap();
        cursor.write_f32(-1.5).unwrap();
        cursor.write_bytes(b"abc").unwrap();
        assert_eq!(cursor.remaining(), 0);

        cursor.set_offset(0).unwrap();
        assert_eq!(cursor.read_u8().unwrap(), 0xab);
        assert_eq!(cursor.read_u16().unwrap(), 0x1234);
        assert_eq!(cursor.read_u32().unwrap(), 0xdeadbeef);
        assert_eq!(cursor.read_f32().unwrap(), -1.5);
        assert_eq!(cursor.read_bytes(3).unwrap(), b"abc");
    }

    #[test]
    fn test_big_endian_layout() {
        let mut cursor = ByteCursor::zeroed(6);
        cursor.write_u16(0x0102).unwrap();
        cursor.write_u32(0x03040506).unwrap();
        assert_eq!(cursor.into_inner(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_access_past_end_fails_for_every_width() {
        for len in 0..8usize {
            for width in [1usize, 2, 4] {
                if len + 1 < width {
                    continue;
                }
                // Offset L - k + 1 leaves one byte too few for a k-byte field.
                let start = len + 1 - width;
                let mut reader = ByteCursor::zeroed(len);
                reader.set_offset(start).unwrap();
                let result = match width {
                    1 => reader.read_u8().map(|_| ()),
                    2 => reader.read_u16().map(|_| ()),
                    _ => reader.read_u32().map(|_| ()),
                };
                assert!(is_bounds_error(result), "read k={} L={}", width, len);
                assert_eq!(reader.offset(), start);

                let mut writer = ByteCursor::zeroed(len);
                writer.set_offset(start).unwrap();
                let result = match width {
                    1 => writer.write_u8(0xff),
                    2 => writer.write_u16(0xffff),
                    _ => writer.write_u32(0xffff_ffff),
                };
                assert!(is_bounds_error(result), "write k={} L={}", width, len);
                assert!(writer.as_slice().iter().all(|b| *b == 0));
            }
        }
    }

    #[test]
    fn test_f32_past_end_fails() {
        let mut cursor = ByteCursor::zeroed(3);
        assert!(is_bounds_error(cursor.read_f32()));
        assert!(is_bounds_error(cursor.write_f32(1.0)));
    }

    #[test]
    fn test_partial_write_does_not_mutate() {
        let mut cursor = ByteCursor::zeroed(3);
        cursor.write_u8(7).unwrap();
        assert!(is_bounds_error(cursor.write_bytes(&[1, 2, 3])));
        assert_eq!(cursor.as_slice(), &[7, 0, 0]);
        assert_eq!(cursor.offset(), 1);
    }

    #[test]
    fn test_set_offset_bounds() {
        let mut cursor = ByteCursor::zeroed(4);
        assert!(cursor.set_offset(4).is_ok());
        assert_eq!(cursor.remaining(), 0);
        assert!(is_bounds_error(cursor.set_offset(5)));
        assert_eq!(cursor.offset(), 4);
    }

    #[test]
    fn test_empty_buffer() {
        let mut cursor = ByteCursor::new(Vec::new());
        assert!(cursor.is_empty());
        assert!(is_bounds_error(cursor.read_u8()));
        assert!(cursor.read_bytes(0).unwrap().is_empty());
    }
}
