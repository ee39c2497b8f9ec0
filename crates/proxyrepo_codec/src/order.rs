//! Byte order selection for fixed-width integers.

/// Byte order used when writing fixed-width integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ByteOrder {
    /// Most significant byte first. Bytewise order matches numeric order
    /// for unsigned values, which is what keys need.
    #[default]
    BigEndian,
    /// The host's order. Only meant for values that are never compared.
    Native,
}

impl ByteOrder {
    /// Returns true if bytewise comparison of encoded unsigned integers
    /// matches numeric comparison on this host.
    #[must_use]
    pub const fn preserves_order(self) -> bool {
        match self {
            Self::BigEndian => true,
            Self::Native => cfg!(target_endian = "big"),
        }
    }

    pub(crate) fn u64_bytes(self, value: u64) -> [u8; 8] {
        match self {
            Self::BigEndian => value.to_be_bytes(),
            Self::Native => value.to_ne_bytes(),
        }
    }

    pub(crate) fn u64_from(self, bytes: [u8; 8]) -> u64 {
        match self {
            Self::BigEndian => u64::from_be_bytes(bytes),
            Self::Native => u64::from_ne_bytes(bytes),
        }
    }

    pub(crate) fn u32_bytes(self, value: u32) -> [u8; 4] {
        match self {
            Self::BigEndian => value.to_be_bytes(),
            Self::Native => value.to_ne_bytes(),
        }
    }

    pub(crate) fn u32_from(self, bytes: [u8; 4]) -> u32 {
        match self {
            Self::BigEndian => u32::from_be_bytes(bytes),
            Self::Native => u32::from_ne_bytes(bytes),
        }
    }
}
