use std::fmt;
use std::hash::{Hash, Hasher};

use bytes::{BufMut, BytesMut};

use crate::common::codec::{get_u32, get_u64, get_u8};
use crate::common::{DbError, Marshal, Result, HEADER_SIZE};

const FLAG_FREE: u8 = 0x01;

/// Persistent handle to a variable-size heap region.
///
/// `address` is the byte offset of the region's header in the data file; the
/// payload follows at `address + HEADER_SIZE`. Two pointers are equal when
/// they address the same region.
#[derive(Debug, Clone, Copy)]
pub struct Pointer {
    pub address: u64,
    /// Payload length in bytes
    pub size: u32,
    pub free: bool,
}

impl Pointer {
    pub fn new(address: u64, size: u32) -> Self {
        Self {
            address,
            size,
            free: false,
        }
    }

    /// Byte offset of the first payload byte.
    pub fn payload_offset(&self) -> u64 {
        self.address + HEADER_SIZE
    }

    /// Header plus payload.
    pub fn span(&self) -> u64 {
        HEADER_SIZE + self.size as u64
    }

    /// Offset of the region immediately after this one.
    pub fn end(&self) -> u64 {
        self.address + self.span()
    }

    pub(crate) fn header(&self) -> [u8; HEADER_SIZE as usize] {
        let mut raw = [0u8; HEADER_SIZE as usize];
        raw[0] = if self.free { FLAG_FREE } else { 0 };
        raw[1..].copy_from_slice(&self.size.to_be_bytes());
        raw
    }

    pub(crate) fn from_header(address: u64, raw: &[u8]) -> Result<Self> {
        let mut buf = raw;
        let flags = get_u8(&mut buf)?;
        if flags & !FLAG_FREE != 0 {
            return Err(DbError::corruption(format!(
                "bad heap header flags {:#04x} at {}",
                flags, address
            )));
        }
        Ok(Self {
            address,
            size: get_u32(&mut buf)?,
            free: flags & FLAG_FREE != 0,
        })
    }
}

impl PartialEq for Pointer {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for Pointer {}

impl Hash for Pointer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}+{}", self.address, self.size)
    }
}

/// Index value encoding: address then size. The free flag is not stored,
/// a referenced pointer is always live.
impl Marshal for Pointer {
    fn marshal_size(&self) -> usize {
        12
    }

    fn marshal(&self, buf: &mut BytesMut) {
        buf.put_u64(self.address);
        buf.put_u32(self.size);
    }

    fn unmarshal(buf: &mut &[u8]) -> Result<Self> {
        Ok(Self::new(get_u64(buf)?, get_u32(buf)?))
    }
}

/// Encoded size of a [`Pointer`] used as a B+ tree value.
pub const POINTER_SIZE: usize = 12;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let mut ptr = Pointer::new(4096, 300);
        ptr.free = true;
        let raw = ptr.header();
        assert_eq!(raw, [1, 0, 0, 1, 44]);
        let back = Pointer::from_header(4096, &raw).unwrap();
        assert!(back.free);
        assert_eq!(back.size, 300);
    }

    #[test]
    fn test_bad_header_flags() {
        assert!(matches!(
            Pointer::from_header(0, &[0x80, 0, 0, 0, 1]),
            Err(DbError::Corruption(_))
        ));
    }

    #[test]
    fn test_equality_is_address() {
        assert_eq!(Pointer::new(10, 4), Pointer::new(10, 8));
        assert_ne!(Pointer::new(10, 4), Pointer::new(11, 4));
        assert_eq!(Pointer::new(10, 4).end(), 10 + HEADER_SIZE + 4);
    }

    #[test]
    fn test_value_encoding() {
        let ptr = Pointer::new(0x0102, 7);
        let bytes = ptr.to_bytes();
        assert_eq!(bytes.len(), POINTER_SIZE);
        assert_eq!(&bytes[..8], &[0, 0, 0, 0, 0, 0, 1, 2]);
        let back = Pointer::unmarshal(&mut &bytes[..]).unwrap();
        assert_eq!((back.address, back.size), (0x0102, 7));
    }
}
