//! Serde implementations for the primitive field types.

use crate::error::{CodecError, CodecResult};
use crate::order::ByteOrder;
use crate::reader::KeyReader;
use bytes::{BufMut, BytesMut};

/// Longest string a [`StringSerde`] accepts, in bytes.
pub const MAX_STRING_LEN: usize = 64 * 1024 * 1024;

/// Encodes and decodes one field type.
///
/// Implementations write into a caller-supplied buffer so that buffers can
/// come from a pool and be reused across many keys.
pub trait Serde<T> {
    /// Appends the encoding of `value` to `buf`.
    fn write(&self, value: &T, buf: &mut BytesMut);

    /// Reads one value from the current position of `reader`.
    fn read(&self, reader: &mut KeyReader<'_>) -> CodecResult<T>;

    /// Encoded width if every value encodes to the same length.
    fn fixed_len(&self) -> Option<usize> {
        None
    }

    /// Encodes `value` into a fresh buffer.
    fn to_bytes(&self, value: &T) -> BytesMut {
        let mut buf = BytesMut::with_capacity(self.fixed_len().unwrap_or(32));
        self.write(value, &mut buf);
        buf
    }

    /// Decodes a value that must span all of `bytes`.
    fn from_bytes(&self, bytes: &[u8]) -> CodecResult<T> {
        let mut reader = KeyReader::new(bytes);
        let value = self.read(&mut reader)?;
        reader.finish()?;
        Ok(value)
    }
}

/// Eight-byte unsigned integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LongSerde {
    order: ByteOrder,
}

impl LongSerde {
    /// Big-endian, order preserving.
    pub const BIG_ENDIAN: Self = Self {
        order: ByteOrder::BigEndian,
    };

    /// Creates a serde using `order`.
    #[must_use]
    pub const fn new(order: ByteOrder) -> Self {
        Self { order }
    }

    /// Returns the byte order in use.
    #[must_use]
    pub const fn order(&self) -> ByteOrder {
        self.order
    }
}

impl Serde<u64> for LongSerde {
    fn write(&self, value: &u64, buf: &mut BytesMut) {
        buf.put_slice(&self.order.u64_bytes(*value));
    }

    fn read(&self, reader: &mut KeyReader<'_>) -> CodecResult<u64> {
        reader.read_u64(self.order)
    }

    fn fixed_len(&self) -> Option<usize> {
        Some(8)
    }
}

/// Four-byte unsigned integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IntSerde {
    order: ByteOrder,
}

impl IntSerde {
    /// Big-endian, order preserving.
    pub const BIG_ENDIAN: Self = Self {
        order: ByteOrder::BigEndian,
    };

    /// Creates a serde using `order`.
    #[must_use]
    pub const fn new(order: ByteOrder) -> Self {
        Self { order }
    }
}

impl Serde<u32> for IntSerde {
    fn write(&self, value: &u32, buf: &mut BytesMut) {
        buf.put_slice(&self.order.u32_bytes(*value));
    }

    fn read(&self, reader: &mut KeyReader<'_>) -> CodecResult<u32> {
        reader.read_u32(self.order)
    }

    fn fixed_len(&self) -> Option<usize> {
        Some(4)
    }
}

/// Single byte flag, `0` or `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BoolSerde;

impl Serde<bool> for BoolSerde {
    fn write(&self, value: &bool, buf: &mut BytesMut) {
        buf.put_u8(u8::from(*value));
    }

    fn read(&self, reader: &mut KeyReader<'_>) -> CodecResult<bool> {
        match reader.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::invalid_value(format!("bool byte {other}"))),
        }
    }

    fn fixed_len(&self) -> Option<usize> {
        Some(1)
    }
}

/// An optional id stored as a signed eight-byte value, `-1` meaning none.
///
/// Item rows use this for the owning aggregate, which is unassigned until
/// the aggregator claims the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NullableIdSerde;

impl Serde<Option<u64>> for NullableIdSerde {
    fn write(&self, value: &Option<u64>, buf: &mut BytesMut) {
        match value {
            Some(id) => buf.put_u64(*id),
            None => buf.put_i64(-1),
        }
    }

    fn read(&self, reader: &mut KeyReader<'_>) -> CodecResult<Option<u64>> {
        let raw = reader.read_u64(ByteOrder::BigEndian)?;
        if raw == u64::MAX {
            return Ok(None);
        }
        if raw > i64::MAX as u64 {
            return Err(CodecError::invalid_value(format!("negative id {}", raw as i64)));
        }
        Ok(Some(raw))
    }

    fn fixed_len(&self) -> Option<usize> {
        Some(8)
    }
}

/// UTF-8 string with a four-byte big-endian length prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StringSerde;

impl StringSerde {
    fn write_str(value: &str, buf: &mut BytesMut) {
        // Strings above u32::MAX bytes never reach the store; MAX_STRING_LEN
        // rejects them on the way back in.
        buf.put_u32(value.len() as u32);
        buf.put_slice(value.as_bytes());
    }
}

impl Serde<String> for StringSerde {
    fn write(&self, value: &String, buf: &mut BytesMut) {
        Self::write_str(value, buf);
    }

    fn read(&self, reader: &mut KeyReader<'_>) -> CodecResult<String> {
        let len = reader.read_u32(ByteOrder::BigEndian)? as usize;
        if len > MAX_STRING_LEN {
            return Err(CodecError::LengthOverflow {
                len,
                max: MAX_STRING_LEN,
            });
        }
        let bytes = reader.read_bytes(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8)
    }
}

/// A string that may be absent, preceded by a presence byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OptionalStringSerde;

impl Serde<Option<String>> for OptionalStringSerde {
    fn write(&self, value: &Option<String>, buf: &mut BytesMut) {
        match value {
            Some(s) => {
                buf.put_u8(1);
                StringSerde::write_str(s, buf);
            }
            None => buf.put_u8(0),
        }
    }

    fn read(&self, reader: &mut KeyReader<'_>) -> CodecResult<Option<String>> {
        if BoolSerde.read(reader)? {
            StringSerde.read(reader).map(Some)
        } else {
            Ok(None)
        }
    }
}

/// Two serdes written back to back.
///
/// With a fixed-width first component the encoding sorts by the first
/// value, then the second, which is what composite keys rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PairSerde<A, B> {
    first: A,
    second: B,
}

impl<A, B> PairSerde<A, B> {
    /// Combines two serdes.
    pub const fn new(first: A, second: B) -> Self {
        Self { first, second }
    }
}

impl<A, B, SA, SB> Serde<(A, B)> for PairSerde<SA, SB>
where
    SA: Serde<A>,
    SB: Serde<B>,
{
    fn write(&self, value: &(A, B), buf: &mut BytesMut) {
        self.first.write(&value.0, buf);
        self.second.write(&value.1, buf);
    }

    fn read(&self, reader: &mut KeyReader<'_>) -> CodecResult<(A, B)> {
        let a = self.first.read(reader)?;
        let b = self.second.read(reader)?;
        Ok((a, b))
    }

    fn fixed_len(&self) -> Option<usize> {
        Some(self.first.fixed_len()? + self.second.fixed_len()?)
    }
}

/// Encodes an id as an eight-byte big-endian key.
#[must_use]
pub const fn encode_u64_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

/// Decodes an eight-byte big-endian key.
pub fn decode_u64_key(key: &[u8]) -> CodecResult<u64> {
    LongSerde::BIG_ENDIAN.from_bytes(key)
}
