//! LEB128 varints, zig-zag signed varints and a bounds-checked reader.

use crate::errors::{Error, Result};

pub fn write_uvarint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

pub fn write_varint(buf: &mut Vec<u8>, value: i64) {
    write_uvarint(buf, zigzag_encode(value));
}

/// Maps 0 -> 0, -1 -> 1, 1 -> 2, -2 -> 3, ...
#[inline]
pub fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

#[inline]
pub fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ (-((value & 1) as i64))
}

/// Cursor over a byte range that never reads past its end.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        ByteReader { bytes, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let byte = *self.bytes.get(self.pos).ok_or(Error::Truncated { offset: self.pos })?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let end = self.pos.checked_add(N).filter(|end| *end <= self.bytes.len());
        let end = end.ok_or(Error::Truncated { offset: self.pos })?;
        let mut array = [0u8; N];
        array.copy_from_slice(&self.bytes[self.pos..end]);
        self.pos = end;
        Ok(array)
    }

    pub fn read_u32_le(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_i64_le(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    pub fn read_uvarint(&mut self) -> Result<u64> {
        let start = self.pos;
        let mut result: u64 = 0;
        let mut shift: u32 = 0;
        loop {
            let byte = self.read_u8()?;
            let payload = u64::from(byte & 0x7F);
            if shift >= 63 && payload > 1 {
                return Err(Error::MalformedVarint { offset: start });
            }
            result |= payload << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
            if shift > 63 {
                return Err(Error::MalformedVarint { offset: start });
            }
        }
    }

    pub fn read_varint(&mut self) -> Result<i64> {
        Ok(zigzag_decode(self.read_uvarint()?))
    }

    /// Reads an element count, refusing counts the remaining bytes cannot hold.
    pub fn read_count(&mut self) -> Result<usize> {
        let start = self.pos;
        let count = self.read_uvarint()?;
        if count > self.remaining() as u64 {
            return Err(Error::Truncated { offset: start });
        }
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_values_take_one_byte() {
        for value in [0i64, 1, -1, 63, -64] {
            let mut buf = Vec::new();
            write_varint(&mut buf, value);
            assert_eq!(buf.len(), 1, "{value}");
        }
        let mut buf = Vec::new();
        write_varint(&mut buf, 64);
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_sequential_values() {
        let values = [0, 1, -1, 300, -300, i64::MAX, i64::MIN, 1_234_567_890_123];
        let mut buf = Vec::new();
        for value in values {
            write_varint(&mut buf, value);
        }
        write_uvarint(&mut buf, u64::MAX);

        let mut reader = ByteReader::new(&buf);
        for value in values {
            assert_eq!(reader.read_varint().unwrap(), value);
        }
        assert_eq!(reader.read_uvarint().unwrap(), u64::MAX);
        assert!(reader.is_empty());
    }

    #[test]
    fn test_zigzag_pattern() {
        assert_eq!(zigzag_encode(0), 0);
        assert_eq!(zigzag_encode(-1), 1);
        assert_eq!(zigzag_encode(1), 2);
        assert_eq!(zigzag_encode(-2), 3);
        assert_eq!(zigzag_decode(zigzag_encode(i64::MIN)), i64::MIN);
    }

    #[test]
    fn test_truncated_varint() {
        let mut reader = ByteReader::new(&[0x80, 0x80]);
        assert!(matches!(reader.read_uvarint(), Err(Error::Truncated { .. })));
        let mut empty = ByteReader::new(&[]);
        assert!(matches!(empty.read_u8(), Err(Error::Truncated { offset: 0 })));
    }

    #[test]
    fn test_overlong_varint() {
        let bytes = [0xFF; 11];
        let mut reader = ByteReader::new(&bytes);
        assert!(matches!(reader.read_uvarint(), Err(Error::MalformedVarint { offset: 0 })));
    }

    #[test]
    fn test_count_bounded_by_remaining_bytes() {
        let mut buf = Vec::new();
        write_uvarint(&mut buf, 1000);
        buf.extend_from_slice(&[0; 10]);
        let mut reader = ByteReader::new(&buf);
        assert!(matches!(reader.read_count(), Err(Error::Truncated { .. })));
    }

    #[test]
    fn test_fixed_width() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&7u32.to_le_bytes());
        buf.extend_from_slice(&(-9i64).to_le_bytes());
        let mut reader = ByteReader::new(&buf);
        assert_eq!(reader.read_u32_le().unwrap(), 7);
        assert_eq!(reader.read_i64_le().unwrap(), -9);
        assert!(reader.read_u32_le().is_err());
    }
}
