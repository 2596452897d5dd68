use std::collections::HashMap;

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use super::DataType;
use crate::common::codec::{get_string, get_u16, get_u8};
use crate::common::{DbError, Marshal, Result};

/// A single column of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name
    pub name: String,

    /// Column type
    #[serde(rename = "type")]
    pub data_type: DataType,

    /// Whether inserts without a value take the next counter value
    #[serde(default)]
    pub auto_increment: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            auto_increment: false,
        }
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }
}

// Layout: name length (2 bytes), name, type (3 bytes), auto-increment flag (1 byte).
impl Marshal for Column {
    fn marshal_size(&self) -> usize {
        2 + self.name.len() + self.data_type.marshal_size() + 1
    }

    fn marshal(&self, buf: &mut BytesMut) {
        buf.put_u16(self.name.len() as u16);
        buf.put_slice(self.name.as_bytes());
        self.data_type.marshal(buf);
        buf.put_u8(self.auto_increment as u8);
    }

    fn unmarshal(buf: &mut &[u8]) -> Result<Self> {
        let len = get_u16(buf)? as usize;
        let name = get_string(buf, len)?;
        let data_type = DataType::unmarshal(buf)?;
        let auto_increment = get_u8(buf)? != 0;
        Ok(Self {
            name,
            data_type,
            auto_increment,
        })
    }
}

/// The ordered columns of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Column>", into = "Vec<Column>")]
pub struct Schema {
    columns: Vec<Column>,
    #[serde(skip)]
    name_to_index: HashMap<String, usize>,
}

impl Schema {
    /// Builds a schema, rejecting empty or duplicate column lists and
    /// auto-increment on non-integer columns.
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        if columns.is_empty() {
            return Err(DbError::schema("a table needs at least one column"));
        }
        let mut name_to_index = HashMap::new();
        for (i, col) in columns.iter().enumerate() {
            if col.name.is_empty() || col.name.len() > u16::MAX as usize {
                return Err(DbError::schema(format!("invalid column name '{}'", col.name)));
            }
            if name_to_index.insert(col.name.clone(), i).is_some() {
                return Err(DbError::schema(format!("duplicate column '{}'", col.name)));
            }
            if col.auto_increment && !col.data_type.is_integer() {
                return Err(DbError::schema(format!(
                    "AUTO INCREMENT column '{}' must be an integer, not {}",
                    col.name, col.data_type
                )));
            }
        }
        Ok(Self {
            columns,
            name_to_index,
        })
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    /// Like [`Schema::index_of`], with an unknown name as a `SchemaViolation`.
    pub fn require(&self, name: &str) -> Result<usize> {
        self.index_of(name)
            .ok_or_else(|| DbError::schema(format!("unknown column '{}'", name)))
    }

    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.index_of(name).map(|i| &self.columns[i])
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }
}

impl TryFrom<Vec<Column>> for Schema {
    type Error = DbError;

    fn try_from(columns: Vec<Column>) -> Result<Self> {
        Schema::new(columns)
    }
}

impl From<Schema> for Vec<Column> {
    fn from(schema: Schema) -> Self {
        schema.columns
    }
}

impl Marshal for Schema {
    fn marshal_size(&self) -> usize {
        2 + self.columns.iter().map(Marshal::marshal_size).sum::<usize>()
    }

    fn marshal(&self, buf: &mut BytesMut) {
        buf.put_u16(self.columns.len() as u16);
        for col in &self.columns {
            col.marshal(buf);
        }
    }

    fn unmarshal(buf: &mut &[u8]) -> Result<Self> {
        let count = get_u16(buf)? as usize;
        let mut columns = Vec::with_capacity(count);
        for _ in 0..count {
            columns.push(Column::unmarshal(buf)?);
        }
        Schema::new(columns).map_err(|e| DbError::corruption(format!("stored schema: {}", e)))
    }
}
