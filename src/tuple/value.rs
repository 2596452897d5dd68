use std::cmp::Ordering;
use std::fmt;

use super::datetime::{format_datetime, parse_datetime};
use super::DataType;
use crate::common::{DbError, Result};

/// A typed scalar. VARCHAR columns hold `String` values; the capacity lives
/// in the column's [`DataType`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    String(String),
    /// Seconds since the Unix epoch
    DateTime(i64),
}

/// Maps float bits to an unsigned integer with the same order.
fn order_f32(v: f32) -> u32 {
    let bits = v.to_bits();
    if bits & 0x8000_0000 != 0 {
        !bits
    } else {
        bits | 0x8000_0000
    }
}

fn unorder_f32(enc: u32) -> f32 {
    let bits = if enc & 0x8000_0000 != 0 {
        enc & !0x8000_0000
    } else {
        !enc
    };
    f32::from_bits(bits)
}

fn order_f64(v: f64) -> u64 {
    let bits = v.to_bits();
    if bits & (1 << 63) != 0 {
        !bits
    } else {
        bits | (1 << 63)
    }
}

fn unorder_f64(enc: u64) -> f64 {
    let bits = if enc & (1 << 63) != 0 {
        enc & !(1 << 63)
    } else {
        !enc
    };
    f64::from_bits(bits)
}

fn fixed<const N: usize>(bytes: &[u8], ty: DataType) -> Result<[u8; N]> {
    bytes.try_into().map_err(|_| {
        DbError::corruption(format!(
            "{} needs {} bytes, found {}",
            ty,
            N,
            bytes.len()
        ))
    })
}

impl Value {
    /// The natural type of this value. Strings report `String`.
    pub fn data_type(&self) -> DataType {
        match self {
            Value::Int8(_) => DataType::Int8,
            Value::Int16(_) => DataType::Int16,
            Value::Int32(_) => DataType::Int32,
            Value::Int64(_) => DataType::Int64,
            Value::UInt8(_) => DataType::UInt8,
            Value::UInt16(_) => DataType::UInt16,
            Value::UInt32(_) => DataType::UInt32,
            Value::UInt64(_) => DataType::UInt64,
            Value::Float32(_) => DataType::Float32,
            Value::Float64(_) => DataType::Float64,
            Value::String(_) => DataType::String,
            Value::DateTime(_) => DataType::DateTime,
        }
    }

    pub fn is_fixed_size(&self) -> bool {
        self.data_type().is_fixed_size()
    }

    /// Payload byte length when encoded as `ty`.
    pub fn size(&self, ty: DataType) -> usize {
        match (self, ty.fixed_size()) {
            (_, Some(n)) => n,
            (Value::String(s), None) => s.len(),
            (_, None) => self.to_string().len(),
        }
    }

    fn cast_error(&self, ty: DataType) -> DbError {
        DbError::InvalidCast {
            from: format!("{} {}", self.data_type(), self),
            to: ty.to_string(),
        }
    }

    /// Encodes this value as `ty`, casting first when the types differ.
    pub fn encode(&self, ty: DataType) -> Result<Vec<u8>> {
        let value = self.cast(ty)?;
        let bytes = match (value, ty) {
            (Value::Int8(v), _) => vec![(v as u8) ^ 0x80],
            (Value::Int16(v), _) => ((v as u16) ^ 0x8000).to_be_bytes().to_vec(),
            (Value::Int32(v), _) => ((v as u32) ^ 0x8000_0000).to_be_bytes().to_vec(),
            (Value::Int64(v), _) | (Value::DateTime(v), _) => {
                ((v as u64) ^ (1 << 63)).to_be_bytes().to_vec()
            }
            (Value::UInt8(v), _) => vec![v],
            (Value::UInt16(v), _) => v.to_be_bytes().to_vec(),
            (Value::UInt32(v), _) => v.to_be_bytes().to_vec(),
            (Value::UInt64(v), _) => v.to_be_bytes().to_vec(),
            (Value::Float32(v), _) => order_f32(v).to_be_bytes().to_vec(),
            (Value::Float64(v), _) => order_f64(v).to_be_bytes().to_vec(),
            (Value::String(s), DataType::VarChar(cap)) => {
                let mut out = s.into_bytes();
                let len = out.len() as u16;
                out.resize(cap as usize, 0);
                out.extend_from_slice(&len.to_be_bytes());
                out
            }
            (Value::String(s), _) => s.into_bytes(),
        };
        Ok(bytes)
    }

    /// Decodes bytes produced by [`Value::encode`] for `ty`.
    pub fn decode(bytes: &[u8], ty: DataType) -> Result<Value> {
        let value = match ty {
            DataType::Int8 => Value::Int8((fixed::<1>(bytes, ty)?[0] ^ 0x80) as i8),
            DataType::Int16 => {
                Value::Int16((u16::from_be_bytes(fixed(bytes, ty)?) ^ 0x8000) as i16)
            }
            DataType::Int32 => {
                Value::Int32((u32::from_be_bytes(fixed(bytes, ty)?) ^ 0x8000_0000) as i32)
            }
            DataType::Int64 => {
                Value::Int64((u64::from_be_bytes(fixed(bytes, ty)?) ^ (1 << 63)) as i64)
            }
            DataType::DateTime => {
                Value::DateTime((u64::from_be_bytes(fixed(bytes, ty)?) ^ (1 << 63)) as i64)
            }
            DataType::UInt8 => Value::UInt8(fixed::<1>(bytes, ty)?[0]),
            DataType::UInt16 => Value::UInt16(u16::from_be_bytes(fixed(bytes, ty)?)),
            DataType::UInt32 => Value::UInt32(u32::from_be_bytes(fixed(bytes, ty)?)),
            DataType::UInt64 => Value::UInt64(u64::from_be_bytes(fixed(bytes, ty)?)),
            DataType::Float32 => Value::Float32(unorder_f32(u32::from_be_bytes(fixed(bytes, ty)?))),
            DataType::Float64 => Value::Float64(unorder_f64(u64::from_be_bytes(fixed(bytes, ty)?))),
            DataType::VarChar(cap) => {
                let cap = cap as usize;
                if bytes.len() != cap + 2 {
                    return Err(DbError::corruption(format!(
                        "{} needs {} bytes, found {}",
                        ty,
                        cap + 2,
                        bytes.len()
                    )));
                }
                let len = u16::from_be_bytes([bytes[cap], bytes[cap + 1]]) as usize;
                if len > cap {
                    return Err(DbError::corruption(format!(
                        "VARCHAR length {} exceeds capacity {}",
                        len, cap
                    )));
                }
                Value::String(utf8(&bytes[..len])?)
            }
            DataType::String => Value::String(utf8(bytes)?),
        };
        Ok(value)
    }

    /// Largest value of the type's domain; None for unbounded strings.
    pub fn fill(ty: DataType) -> Option<Value> {
        let value = match ty {
            DataType::Int8 => Value::Int8(i8::MAX),
            DataType::Int16 => Value::Int16(i16::MAX),
            DataType::Int32 => Value::Int32(i32::MAX),
            DataType::Int64 => Value::Int64(i64::MAX),
            DataType::UInt8 => Value::UInt8(u8::MAX),
            DataType::UInt16 => Value::UInt16(u16::MAX),
            DataType::UInt32 => Value::UInt32(u32::MAX),
            DataType::UInt64 => Value::UInt64(u64::MAX),
            DataType::Float32 => Value::Float32(f32::INFINITY),
            DataType::Float64 => Value::Float64(f64::INFINITY),
            DataType::DateTime => Value::DateTime(i64::MAX),
            DataType::String | DataType::VarChar(_) => return None,
        };
        Some(value)
    }

    /// Smallest value of the type's domain.
    pub fn zero(ty: DataType) -> Value {
        match ty {
            DataType::Int8 => Value::Int8(i8::MIN),
            DataType::Int16 => Value::Int16(i16::MIN),
            DataType::Int32 => Value::Int32(i32::MIN),
            DataType::Int64 => Value::Int64(i64::MIN),
            DataType::UInt8 => Value::UInt8(0),
            DataType::UInt16 => Value::UInt16(0),
            DataType::UInt32 => Value::UInt32(0),
            DataType::UInt64 => Value::UInt64(0),
            DataType::Float32 => Value::Float32(f32::NEG_INFINITY),
            DataType::Float64 => Value::Float64(f64::NEG_INFINITY),
            DataType::DateTime => Value::DateTime(i64::MIN),
            DataType::String | DataType::VarChar(_) => Value::String(String::new()),
        }
    }

    /// Value an insert uses for a column it does not mention.
    pub fn default_for(ty: DataType) -> Value {
        match ty {
            DataType::Float32 => Value::Float32(0.0),
            DataType::Float64 => Value::Float64(0.0),
            DataType::String | DataType::VarChar(_) => Value::String(String::new()),
            DataType::DateTime => Value::DateTime(0),
            other => Value::UInt8(0).cast(other).unwrap_or(Value::Int64(0)),
        }
    }

    /// Integer view of an integer or datetime value.
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Value::Int8(v) => Some(*v as i128),
            Value::Int16(v) => Some(*v as i128),
            Value::Int32(v) => Some(*v as i128),
            Value::Int64(v) | Value::DateTime(v) => Some(*v as i128),
            Value::UInt8(v) => Some(*v as i128),
            Value::UInt16(v) => Some(*v as i128),
            Value::UInt32(v) => Some(*v as i128),
            Value::UInt64(v) => Some(*v as i128),
            _ => None,
        }
    }

    /// Float view of any numeric value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float32(v) => Some(*v as f64),
            Value::Float64(v) => Some(*v),
            Value::String(_) | Value::DateTime(_) => None,
            other => other.as_i128().map(|v| v as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.data_type().is_numeric()
    }

    /// Orders two values. Numbers compare across widths and signedness,
    /// strings bytewise, datetimes by instant. Other pairs are incomparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::String(a), Value::String(b)) => Some(a.as_bytes().cmp(b.as_bytes())),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::DateTime(_), _) | (_, Value::DateTime(_)) => None,
            (Value::String(_), _) | (_, Value::String(_)) => None,
            (a, b) => match (a.as_i128(), b.as_i128()) {
                (Some(x), Some(y)) => Some(x.cmp(&y)),
                _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
            },
        }
    }

    /// Converts this value to `ty`.
    pub fn cast(&self, ty: DataType) -> Result<Value> {
        let err = || self.cast_error(ty);

        if ty.is_integer() {
            let n: i128 = match self {
                Value::Float32(_) | Value::Float64(_) => {
                    let f = self.as_f64().ok_or_else(err)?;
                    if !f.is_finite() || f.fract() != 0.0 {
                        return Err(err());
                    }
                    f as i128
                }
                Value::String(s) => s.trim().parse().map_err(|_| err())?,
                other => other.as_i128().ok_or_else(err)?,
            };
            return int_of(n, ty).ok_or_else(err);
        }

        match ty {
            DataType::Float32 | DataType::Float64 => {
                let f = match self {
                    Value::String(s) => s.trim().parse::<f64>().map_err(|_| err())?,
                    Value::DateTime(v) => *v as f64,
                    other => other.as_f64().ok_or_else(err)?,
                };
                Ok(if ty == DataType::Float32 {
                    Value::Float32(f as f32)
                } else {
                    Value::Float64(f)
                })
            }
            DataType::DateTime => match self {
                Value::DateTime(v) => Ok(Value::DateTime(*v)),
                Value::String(s) => Ok(Value::DateTime(parse_datetime(s)?)),
                other => {
                    let n = other.as_i128().ok_or_else(err)?;
                    i64::try_from(n).map(Value::DateTime).map_err(|_| err())
                }
            },
            DataType::String => Ok(Value::String(self.text())),
            DataType::VarChar(cap) => {
                let s = self.text();
                if s.len() > cap as usize {
                    return Err(err());
                }
                Ok(Value::String(s))
            }
            _ => Err(err()),
        }
    }

    fn text(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// JSON scalar for result rows.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Float32(v) => serde_json::Number::from_f64(*v as f64)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Float64(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::DateTime(v) => serde_json::Value::String(format_datetime(*v)),
            Value::UInt64(v) => serde_json::Value::from(*v),
            other => match other.as_i128().and_then(|n| i64::try_from(n).ok()) {
                Some(n) => serde_json::Value::from(n),
                None => serde_json::Value::Null,
            },
        }
    }
}

fn utf8(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| DbError::corruption("string column holds invalid UTF-8"))
}

fn int_of(n: i128, ty: DataType) -> Option<Value> {
    let value = match ty {
        DataType::Int8 => Value::Int8(i8::try_from(n).ok()?),
        DataType::Int16 => Value::Int16(i16::try_from(n).ok()?),
        DataType::Int32 => Value::Int32(i32::try_from(n).ok()?),
        DataType::Int64 => Value::Int64(i64::try_from(n).ok()?),
        DataType::UInt8 => Value::UInt8(u8::try_from(n).ok()?),
        DataType::UInt16 => Value::UInt16(u16::try_from(n).ok()?),
        DataType::UInt32 => Value::UInt32(u32::try_from(n).ok()?),
        DataType::UInt64 => Value::UInt64(u64::try_from(n).ok()?),
        _ => return None,
    };
    Some(value)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int8(v) => write!(f, "{}", v),
            Value::Int16(v) => write!(f, "{}", v),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::UInt8(v) => write!(f, "{}", v),
            Value::UInt16(v) => write!(f, "{}", v),
            Value::UInt32(v) => write!(f, "{}", v),
            Value::UInt64(v) => write!(f, "{}", v),
            Value::Float32(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "{}", s),
            Value::DateTime(v) => write!(f, "{}", format_datetime(*v)),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt32(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}
