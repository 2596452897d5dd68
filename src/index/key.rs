use std::cmp::Ordering;
use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::common::codec::{get_bytes, get_u16, get_u8};
use crate::common::{DbError, Marshal, Result};

/// A multi-column key: an ordered sequence of byte strings.
///
/// The derived order is lexicographic element-wise, and a key that runs out
/// of columns first is the smaller one. This is the on-disk order of every
/// tree in the crate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(Vec<Vec<u8>>);

impl Key {
    pub fn new(columns: Vec<Vec<u8>>) -> Self {
        Self(columns)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn columns(&self) -> &[Vec<u8>] {
        &self.0
    }

    pub fn into_columns(self) -> Vec<Vec<u8>> {
        self.0
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, column: Vec<u8>) {
        self.0.push(column);
    }

    /// Total payload bytes across all columns.
    pub fn byte_len(&self) -> usize {
        self.0.iter().map(Vec::len).sum()
    }

    /// The first `n` columns of this key.
    pub fn prefix(&self, n: usize) -> Key {
        Key(self.0.iter().take(n).cloned().collect())
    }

    /// Compares this key, truncated to the probe's column count, with `probe`.
    /// Every stored key extending the probe compares `Equal`.
    pub fn cmp_prefix(&self, probe: &Key) -> Ordering {
        self.0.iter().take(probe.len()).cmp(probe.0.iter())
    }

    pub fn starts_with(&self, probe: &Key) -> bool {
        self.cmp_prefix(probe) == Ordering::Equal && self.len() >= probe.len()
    }
}

impl From<Vec<Vec<u8>>> for Key {
    fn from(columns: Vec<Vec<u8>>) -> Self {
        Self(columns)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, col) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            for b in col {
                write!(f, "{:02x}", b)?;
            }
        }
        write!(f, ")")
    }
}

// Layout: column count (u8), then per column its length (u16) and bytes.
impl Marshal for Key {
    fn marshal_size(&self) -> usize {
        1 + self.0.iter().map(|c| 2 + c.len()).sum::<usize>()
    }

    fn marshal(&self, buf: &mut BytesMut) {
        buf.put_u8(self.0.len() as u8);
        for col in &self.0 {
            buf.put_u16(col.len() as u16);
            buf.put_slice(col);
        }
    }

    fn unmarshal(buf: &mut &[u8]) -> Result<Self> {
        let count = get_u8(buf)? as usize;
        let mut columns = Vec::with_capacity(count);
        for _ in 0..count {
            let len = get_u16(buf)? as usize;
            columns.push(get_bytes(buf, len)?);
        }
        Ok(Self(columns))
    }
}

/// Largest column count a key may carry on disk.
pub const MAX_KEY_COLUMNS: usize = u8::MAX as usize;

pub(crate) fn check_column_count(n: usize) -> Result<()> {
    if n > MAX_KEY_COLUMNS {
        return Err(DbError::schema(format!(
            "key has {} columns, at most {} are supported",
            n, MAX_KEY_COLUMNS
        )));
    }
    Ok(())
}
