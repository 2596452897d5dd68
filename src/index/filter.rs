use std::cmp::Ordering;
use std::fmt;

use crate::common::{DbError, Result};
use crate::tuple::{DataType, Value};

use super::Key;

/// Comparison operator of an index filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Lt,
    Le,
    Eq,
    Ge,
    Gt,
}

impl Op {
    pub fn parse(s: &str) -> Option<Op> {
        match s {
            "<" => Some(Op::Lt),
            "<=" => Some(Op::Le),
            "=" => Some(Op::Eq),
            ">=" => Some(Op::Ge),
            ">" => Some(Op::Gt),
            _ => None,
        }
    }

    /// Whether `lhs op rhs` holds given `lhs.cmp(rhs)`.
    pub fn holds(&self, ord: Ordering) -> bool {
        match self {
            Op::Lt => ord == Ordering::Less,
            Op::Le => ord != Ordering::Greater,
            Op::Eq => ord == Ordering::Equal,
            Op::Ge => ord != Ordering::Less,
            Op::Gt => ord == Ordering::Greater,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Eq => "=",
            Op::Ge => ">=",
            Op::Gt => ">",
        };
        write!(f, "{}", s)
    }
}

/// `op` applied to a partial row naming a prefix of an index's columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub op: Op,
    pub values: Vec<(String, Value)>,
}

impl Filter {
    pub fn new(op: Op, values: Vec<(String, Value)>) -> Self {
        Self { op, values }
    }

    pub fn eq(column: impl Into<String>, value: Value) -> Self {
        Self::new(Op::Eq, vec![(column.into(), value)])
    }

    /// Encodes the filter's values in index column order. The values must
    /// name a non-empty prefix of `columns`.
    pub(crate) fn encode_prefix(
        &self,
        columns: &[String],
        types: &[DataType],
    ) -> Result<Vec<Vec<u8>>> {
        for (name, _) in &self.values {
            if !columns.contains(name) {
                return Err(DbError::schema(format!(
                    "column '{}' is not part of the index",
                    name
                )));
            }
        }

        let mut prefix = Vec::new();
        for (col, ty) in columns.iter().zip(types) {
            match self.values.iter().find(|(name, _)| name == col) {
                Some((_, value)) => prefix.push(value.encode(*ty)?),
                None => break,
            }
        }
        if prefix.is_empty() || prefix.len() != self.values.len() {
            return Err(DbError::schema(format!(
                "filter columns must be a prefix of ({})",
                columns.join(", ")
            )));
        }
        Ok(prefix)
    }

    /// Turns the filter into full-width key bounds. Columns after the prefix
    /// are padded with the encoded minimum or maximum of their type, so the
    /// bound lands just before or just after every key sharing the prefix.
    pub(crate) fn bounds(&self, columns: &[String], types: &[DataType]) -> Result<Bounds> {
        let prefix = self.encode_prefix(columns, types)?;
        let pad = |fill: bool| -> Result<Key> {
            let mut key = Key::new(prefix.clone());
            for ty in &types[prefix.len()..] {
                let bytes = if fill { ty.fill_bytes() } else { ty.zero_bytes() };
                key.push(bytes.ok_or_else(|| {
                    DbError::schema(format!("variable-size {} cannot be part of a key", ty))
                })?);
            }
            Ok(key)
        };

        let bounds = match self.op {
            Op::Eq => Bounds {
                low: Some(Bound::new(pad(false)?, true)),
                high: Some(Bound::new(pad(true)?, true)),
            },
            Op::Ge => Bounds {
                low: Some(Bound::new(pad(false)?, true)),
                high: None,
            },
            Op::Gt => Bounds {
                low: Some(Bound::new(pad(true)?, false)),
                high: None,
            },
            Op::Le => Bounds {
                low: None,
                high: Some(Bound::new(pad(true)?, true)),
            },
            Op::Lt => Bounds {
                low: None,
                high: Some(Bound::new(pad(false)?, false)),
            },
        };
        Ok(bounds)
    }
}

/// One end of a key range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Bound {
    pub key: Key,
    pub inclusive: bool,
}

impl Bound {
    fn new(key: Key, inclusive: bool) -> Self {
        Self { key, inclusive }
    }
}

/// A key range; either end may be open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Bounds {
    pub low: Option<Bound>,
    pub high: Option<Bound>,
}

impl Bounds {
    /// The intersection of two ranges.
    pub fn intersect(self, other: Bounds) -> Bounds {
        let low = match (self.low, other.low) {
            (Some(a), Some(b)) => Some(match a.key.cmp(&b.key) {
                Ordering::Greater => a,
                Ordering::Less => b,
                Ordering::Equal => Bound::new(a.key, a.inclusive && b.inclusive),
            }),
            (a, b) => a.or(b),
        };
        let high = match (self.high, other.high) {
            (Some(a), Some(b)) => Some(match a.key.cmp(&b.key) {
                Ordering::Less => a,
                Ordering::Greater => b,
                Ordering::Equal => Bound::new(a.key, a.inclusive && b.inclusive),
            }),
            (a, b) => a.or(b),
        };
        Bounds { low, high }
    }

    pub fn above_low(&self, key: &Key) -> bool {
        match &self.low {
            Some(b) if b.inclusive => *key >= b.key,
            Some(b) => *key > b.key,
            None => true,
        }
    }

    pub fn below_high(&self, key: &Key) -> bool {
        match &self.high {
            Some(b) if b.inclusive => *key <= b.key,
            Some(b) => *key < b.key,
            None => true,
        }
    }
}
