use std::ops::Index;

use bytes::{BufMut, BytesMut};

use super::{Schema, Value};
use crate::common::codec::{get_bytes, get_u32};
use crate::common::{DbError, Result};

/// One table row: values in the schema's column order.
///
/// Encoded as each column's bytes in order; variable-size columns carry a
/// 4 byte big-endian length prefix. The schema itself is never stored with
/// the row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row(Vec<Value>);

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn into_values(self) -> Vec<Value> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    pub fn set(&mut self, index: usize, value: Value) {
        self.0[index] = value;
    }

    /// The value of column `name`.
    pub fn value(&self, schema: &Schema, name: &str) -> Result<&Value> {
        let idx = schema.require(name)?;
        self.0
            .get(idx)
            .ok_or_else(|| DbError::schema(format!("row has no column '{}'", name)))
    }

    pub fn encode(&self, schema: &Schema) -> Result<Vec<u8>> {
        if self.0.len() != schema.len() {
            return Err(DbError::schema(format!(
                "row has {} values, table has {} columns",
                self.0.len(),
                schema.len()
            )));
        }
        let mut buf = BytesMut::new();
        for (value, col) in self.0.iter().zip(schema.columns()) {
            let bytes = value.encode(col.data_type)?;
            if !col.data_type.is_fixed_size() {
                let len = u32::try_from(bytes.len()).map_err(|_| DbError::ValueTooLarge {
                    size: bytes.len(),
                    max: u32::MAX as usize,
                })?;
                buf.put_u32(len);
            }
            buf.put_slice(&bytes);
        }
        Ok(buf.to_vec())
    }

    /// Decodes a row. Bytes past the last column are ignored, so a row
    /// rewritten in place inside a larger region still decodes.
    pub fn decode(schema: &Schema, data: &[u8]) -> Result<Self> {
        let mut buf = data;
        let mut values = Vec::with_capacity(schema.len());
        for col in schema.columns() {
            let len = match col.data_type.fixed_size() {
                Some(n) => n,
                None => get_u32(&mut buf)? as usize,
            };
            let bytes = get_bytes(&mut buf, len)?;
            values.push(Value::decode(&bytes, col.data_type)?);
        }
        Ok(Self(values))
    }
}

impl Index<usize> for Row {
    type Output = Value;

    fn index(&self, index: usize) -> &Value {
        &self.0[index]
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::{Column, DataType};

    fn schema() -> Schema {
        Schema::new(vec![
            Column::new("id", DataType::Int64),
            Column::new("bio", DataType::String),
            Column::new("code", DataType::VarChar(3)),
            Column::new("score", DataType::Float32),
        ])
        .unwrap()
    }

    #[test]
    fn test_encode_layout() {
        let row = Row::new(vec![
            Value::Int64(1),
            Value::from("hi"),
            Value::from("ab"),
            Value::Float32(0.5),
        ]);
        let bytes = row.encode(&schema()).unwrap();
        // 8 + (4 + 2) + (3 + 2) + 4
        assert_eq!(bytes.len(), 23);
        assert_eq!(&bytes[8..14], &[0, 0, 0, 2, b'h', b'i']);

        let mut padded = bytes.clone();
        padded.extend_from_slice(&[0u8; 16]);
        assert_eq!(Row::decode(&schema(), &padded).unwrap(), row);
    }

    #[test]
    fn test_encode_casts_values() {
        let row = Row::new(vec![
            Value::UInt8(9),
            Value::Int64(42),
            Value::from("x"),
            Value::Int64(2),
        ]);
        let back = Row::decode(&schema(), &row.encode(&schema()).unwrap()).unwrap();
        assert_eq!(back[0], Value::Int64(9));
        assert_eq!(back[1], Value::from("42"));
        assert_eq!(back[3], Value::Float32(2.0));
    }

    #[test]
    fn test_arity_and_truncation() {
        let short = Row::new(vec![Value::Int64(1)]);
        assert!(matches!(short.encode(&schema()), Err(DbError::SchemaViolation(_))));
        assert!(matches!(
            Row::decode(&schema(), &[0, 0, 0]),
            Err(DbError::Corruption(_))
        ));
    }
}
