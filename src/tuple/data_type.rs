use std::fmt;

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use crate::common::codec::{get_u16, get_u8};
use crate::common::{DbError, Marshal, Result};

/// Column type codes. Every multi-byte scalar is stored big-endian in an
/// order-preserving form, so the encoded bytes of two values of the same
/// fixed-size type compare like the values themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    /// Variable-length UTF-8
    String,
    /// Up to `cap` bytes of UTF-8, stored zero-padded to `cap` followed by
    /// a 2 byte length
    VarChar(u16),
    /// Seconds since the Unix epoch
    DateTime,
}

impl DataType {
    /// Returns true if every value of this type encodes to the same length.
    pub fn is_fixed_size(&self) -> bool {
        self.fixed_size().is_some()
    }

    /// Returns the encoded size in bytes, or None for variable-length types.
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            DataType::Int8 | DataType::UInt8 => Some(1),
            DataType::Int16 | DataType::UInt16 => Some(2),
            DataType::Int32 | DataType::UInt32 | DataType::Float32 => Some(4),
            DataType::Int64 | DataType::UInt64 | DataType::Float64 | DataType::DateTime => Some(8),
            DataType::VarChar(cap) => Some(*cap as usize + 2),
            DataType::String => None,
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            DataType::Int8
                | DataType::Int16
                | DataType::Int32
                | DataType::Int64
                | DataType::UInt8
                | DataType::UInt16
                | DataType::UInt32
                | DataType::UInt64
        )
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64
        )
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DataType::Float32 | DataType::Float64)
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_float()
    }

    pub fn is_string(&self) -> bool {
        matches!(self, DataType::String | DataType::VarChar(_))
    }

    /// Encoded form of the largest value: all `0xFF` bytes of the type's width.
    pub fn fill_bytes(&self) -> Option<Vec<u8>> {
        self.fixed_size().map(|n| vec![0xFF; n])
    }

    /// Encoded form of the smallest value: all zero bytes of the type's width.
    pub fn zero_bytes(&self) -> Option<Vec<u8>> {
        self.fixed_size().map(|n| vec![0x00; n])
    }

    /// Parses a type name as written in `CREATE TABLE`, case-insensitively.
    /// `VARCHAR` takes its capacity separately.
    pub fn from_name(name: &str) -> Option<DataType> {
        let ty = match name.to_ascii_lowercase().as_str() {
            "int8" => DataType::Int8,
            "int16" => DataType::Int16,
            "int32" => DataType::Int32,
            "int64" => DataType::Int64,
            "uint8" => DataType::UInt8,
            "uint16" => DataType::UInt16,
            "uint32" => DataType::UInt32,
            "uint64" => DataType::UInt64,
            "float32" => DataType::Float32,
            "float64" => DataType::Float64,
            "string" => DataType::String,
            "datetime" => DataType::DateTime,
            _ => return None,
        };
        Some(ty)
    }

    fn type_id(&self) -> u8 {
        match self {
            DataType::Int8 => 0,
            DataType::Int16 => 1,
            DataType::Int32 => 2,
            DataType::Int64 => 3,
            DataType::UInt8 => 4,
            DataType::UInt16 => 5,
            DataType::UInt32 => 6,
            DataType::UInt64 => 7,
            DataType::Float32 => 8,
            DataType::Float64 => 9,
            DataType::String => 10,
            DataType::VarChar(_) => 11,
            DataType::DateTime => 12,
        }
    }
}

/// Layout: type id (1 byte) followed by the VARCHAR capacity (2 bytes, zero
/// for every other type).
impl Marshal for DataType {
    fn marshal_size(&self) -> usize {
        3
    }

    fn marshal(&self, buf: &mut BytesMut) {
        buf.put_u8(self.type_id());
        buf.put_u16(match self {
            DataType::VarChar(cap) => *cap,
            _ => 0,
        });
    }

    fn unmarshal(buf: &mut &[u8]) -> Result<Self> {
        let id = get_u8(buf)?;
        let cap = get_u16(buf)?;
        let ty = match id {
            0 => DataType::Int8,
            1 => DataType::Int16,
            2 => DataType::Int32,
            3 => DataType::Int64,
            4 => DataType::UInt8,
            5 => DataType::UInt16,
            6 => DataType::UInt32,
            7 => DataType::UInt64,
            8 => DataType::Float32,
            9 => DataType::Float64,
            10 => DataType::String,
            11 => DataType::VarChar(cap),
            12 => DataType::DateTime,
            other => return Err(DbError::corruption(format!("unknown type id {}", other))),
        };
        Ok(ty)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Int8 => write!(f, "Int8"),
            DataType::Int16 => write!(f, "Int16"),
            DataType::Int32 => write!(f, "Int32"),
            DataType::Int64 => write!(f, "Int64"),
            DataType::UInt8 => write!(f, "UInt8"),
            DataType::UInt16 => write!(f, "UInt16"),
            DataType::UInt32 => write!(f, "UInt32"),
            DataType::UInt64 => write!(f, "UInt64"),
            DataType::Float32 => write!(f, "Float32"),
            DataType::Float64 => write!(f, "Float64"),
            DataType::String => write!(f, "String"),
            DataType::VarChar(n) => write!(f, "VARCHAR({})", n),
            DataType::DateTime => write!(f, "DateTime"),
        }
    }
}
