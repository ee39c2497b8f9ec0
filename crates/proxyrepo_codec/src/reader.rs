//! Cursor over encoded bytes.

use crate::error::{CodecError, CodecResult};
use crate::order::ByteOrder;

/// Reads fields sequentially out of a key or value.
///
/// Every read checks the remaining length first, so truncated input fails
/// with [`CodecError::UnexpectedEof`] instead of panicking.
#[derive(Debug, Clone)]
pub struct KeyReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> KeyReader<'a> {
    /// Creates a reader positioned at the start of `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Returns true once every byte has been consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> CodecResult<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    /// Reads `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        let remaining = self.remaining();
        if len > remaining {
            return Err(CodecError::UnexpectedEof {
                needed: len,
                remaining,
            });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Reads a fixed-width array.
    pub fn read_array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    /// Reads a `u32` in the given order.
    pub fn read_u32(&mut self, order: ByteOrder) -> CodecResult<u32> {
        Ok(order.u32_from(self.read_array()?))
    }

    /// Reads a `u64` in the given order.
    pub fn read_u64(&mut self, order: ByteOrder) -> CodecResult<u64> {
        Ok(order.u64_from(self.read_array()?))
    }

    /// Fails if any bytes are left.
    pub fn finish(&self) -> CodecResult<()> {
        match self.remaining() {
            0 => Ok(()),
            remaining => Err(CodecError::TrailingBytes { remaining }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_reports_short_input() {
        let mut reader = KeyReader::new(&[0, 0, 1]);
        assert_eq!(
            reader.read_u32(ByteOrder::BigEndian),
            Err(CodecError::UnexpectedEof {
                needed: 4,
                remaining: 3
            })
        );
        // A failed read consumes nothing
        assert_eq!(reader.remaining(), 3);
    }

    #[test]
    fn reader_reads_fields_in_sequence() {
        let data = [0u8, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 9, 0xff];
        let mut reader = KeyReader::new(&data);
        assert_eq!(reader.read_u64(ByteOrder::BigEndian).unwrap(), 256);
        assert_eq!(reader.read_u32(ByteOrder::BigEndian).unwrap(), 9);
        assert_eq!(reader.finish(), Err(CodecError::TrailingBytes { remaining: 1 }));
        assert_eq!(reader.read_u8().unwrap(), 0xff);
        assert!(reader.finish().is_ok());
    }
}
