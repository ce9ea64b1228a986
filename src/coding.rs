//! Binary encoding primitives shared by the table, log and manifest formats.
//!
//! ```text
//! varint:      LEB128, 7 bits per byte, low groups first
//! byte array:  varint(length) | bytes
//! fixed ints:  little-endian
//! ```

use crate::error::LsmError;
use crate::Result;

pub const MAX_VARINT64_LEN: usize = 10;

/// Appends encoded values to an owned buffer.
#[derive(Default)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Encoder {
        Encoder::default()
    }

    pub fn with_capacity(capacity: usize) -> Encoder {
        Encoder {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_varint64(&mut self, mut v: u64) {
        while v >= 0x80 {
            self.buf.push((v as u8) | 0x80);
            v >>= 7;
        }
        self.buf.push(v as u8);
    }

    /// Writes `varint(len) | bytes`.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.put_varint64(bytes.len() as u64);
        self.buf.extend_from_slice(bytes);
    }

    pub fn put_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Reads encoded values from a borrowed buffer.
///
/// Every read fails with [`LsmError::Corrupted`] on truncated input.
pub struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Decoder<'a> {
        Decoder { data, pos: 0 }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or_else(|| LsmError::corrupted("unexpected end of input"))?;
        self.pos += 1;
        Ok(b)
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        let raw = self.get_raw(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        let raw = self.get_raw(8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(raw);
        Ok(u64::from_le_bytes(bytes))
    }

    pub fn get_varint64(&mut self) -> Result<u64> {
        let mut result = 0u64;
        for i in 0..MAX_VARINT64_LEN {
            let b = self.get_u8()?;
            result |= ((b & 0x7f) as u64) << (7 * i);
            if b & 0x80 == 0 {
                return Ok(result);
            }
        }
        Err(LsmError::corrupted("varint64 overflow"))
    }

    /// Reads `varint(len) | bytes`.
    pub fn get_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.get_varint64()?;
        if len > self.remaining() as u64 {
            return Err(LsmError::corrupted("byte array exceeds input"));
        }
        self.get_raw(len as usize)
    }

    pub fn get_raw(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(LsmError::corrupted("unexpected end of input"));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use crate::coding::{Decoder, Encoder};
    use crate::error::Status;

    #[test]
    fn test_varint_boundaries() {
        let values = [0u64, 1, 127, 128, 300, 16383, 16384, u32::MAX as u64, u64::MAX];
        let mut encoder = Encoder::new();
        for &v in values.iter() {
            encoder.put_varint64(v);
        }
        assert_eq!(encoder.len(), 1 + 1 + 1 + 2 + 2 + 2 + 3 + 5 + 10);

        let mut decoder = Decoder::new(encoder.as_slice());
        for &v in values.iter() {
            assert_eq!(decoder.get_varint64().unwrap(), v);
        }
        assert!(decoder.is_empty());
    }

    #[test]
    fn test_mixed_fields() {
        let mut encoder = Encoder::with_capacity(64);
        encoder.put_u8(7);
        encoder.put_bytes(b"hello");
        encoder.put_u32(0xdeadbeef);
        encoder.put_u64(42);
        encoder.put_bytes(b"");

        let mut decoder = Decoder::new(encoder.as_slice());
        assert_eq!(decoder.get_u8().unwrap(), 7);
        assert_eq!(decoder.get_bytes().unwrap(), b"hello");
        assert_eq!(decoder.get_u32().unwrap(), 0xdeadbeef);
        assert_eq!(decoder.get_u64().unwrap(), 42);
        assert_eq!(decoder.get_bytes().unwrap(), b"");
        assert!(decoder.is_empty());
    }

    #[test]
    fn test_truncated_input() {
        let mut encoder = Encoder::new();
        encoder.put_bytes(b"truncated");
        let data = encoder.as_slice();
        let mut decoder = Decoder::new(&data[..data.len() - 1]);
        let err = decoder.get_bytes().unwrap_err();
        assert_eq!(err.status(), Status::Corrupted);

        let mut decoder = Decoder::new(&[0x80, 0x80]);
        assert!(decoder.get_varint64().is_err());

        let mut decoder = Decoder::new(&[0xff; 11]);
        assert_eq!(decoder.get_varint64().unwrap_err().status(), Status::Corrupted);
    }
}
