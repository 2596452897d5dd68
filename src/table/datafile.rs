use std::ops::ControlFlow;
use std::path::Path;

use log::debug;

use crate::common::{DbConfig, DbError, Marshal, Result, DATA_FILE, DATA_FREELIST_FILE};
use crate::storage::heap::{Heap, Placement, Pointer};
use crate::tuple::{Row, Schema};

/// Row store: every row is one heap region. The first region of the heap
/// holds the schema the rows were written with.
pub struct Datafile {
    heap: Heap,
    schema: Schema,
    schema_ptr: Pointer,
}

impl Datafile {
    /// Creates `data.dat`/`data.bin` in `dir` and stores `schema` first.
    pub fn create(dir: &Path, schema: &Schema, config: &DbConfig) -> Result<Self> {
        let heap = Heap::open(dir.join(DATA_FILE), dir.join(DATA_FREELIST_FILE), config)?;
        if !heap.is_empty() {
            return Err(DbError::corruption(format!(
                "{}: datafile already holds data",
                dir.display()
            )));
        }
        let blob = schema.to_bytes();
        let schema_ptr = heap.alloc(blob.len() as u64)?;
        debug_assert_eq!(schema_ptr, heap.first_pointer(schema_ptr.size));
        heap.write(&schema_ptr, &blob)?;
        debug!("created datafile in {}", dir.display());
        Ok(Self {
            heap,
            schema: schema.clone(),
            schema_ptr,
        })
    }

    /// Opens an existing datafile, checking its stored schema against
    /// `expected`.
    pub fn open(dir: &Path, expected: &Schema, config: &DbConfig) -> Result<Self> {
        let heap = Heap::open(dir.join(DATA_FILE), dir.join(DATA_FREELIST_FILE), config)?;
        if heap.is_empty() {
            return Err(DbError::corruption(format!(
                "{}: datafile has no schema",
                dir.display()
            )));
        }
        let schema_ptr = heap.pointer_at(0)?;
        if schema_ptr.free {
            return Err(DbError::corruption("datafile schema region is free"));
        }
        let blob = heap.read(&schema_ptr)?;
        let schema = Schema::unmarshal(&mut &blob[..])?;
        if schema != *expected {
            return Err(DbError::corruption(
                "datafile schema does not match table metadata",
            ));
        }
        Ok(Self {
            heap,
            schema,
            schema_ptr,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn encode(&self, row: &Row) -> Result<Vec<u8>> {
        row.encode(&self.schema)
    }

    pub fn insert(&self, row: &Row) -> Result<Pointer> {
        let bytes = self.encode(row)?;
        self.alloc_row(&bytes)
    }

    /// Allocates a region for already encoded row bytes.
    pub fn alloc_row(&self, bytes: &[u8]) -> Result<Pointer> {
        self.place_row(bytes).map(|(ptr, _)| ptr)
    }

    /// Allocates and writes a row region, keeping what it takes to
    /// [`Datafile::unplace`] it again.
    pub fn place_row(&self, bytes: &[u8]) -> Result<(Pointer, Placement)> {
        let (ptr, placement) = self.heap.place(bytes.len() as u64)?;
        if let Err(e) = self.heap.write(&ptr, bytes) {
            self.heap.unplace(&ptr, placement)?;
            return Err(e);
        }
        Ok((ptr, placement))
    }

    /// Takes back a region from [`Datafile::place_row`], newest first.
    pub fn unplace(&self, ptr: &Pointer, placement: Placement) -> Result<()> {
        self.check_row_pointer(ptr)?;
        self.heap.unplace(ptr, placement)
    }

    pub fn get(&self, ptr: &Pointer) -> Result<Row> {
        self.check_row_pointer(ptr)?;
        let bytes = self.heap.read(ptr)?;
        Row::decode(&self.schema, &bytes)
    }

    /// Raw payload of a row region.
    pub fn read_raw(&self, ptr: &Pointer) -> Result<Vec<u8>> {
        self.check_row_pointer(ptr)?;
        self.heap.read(ptr)
    }

    /// Overwrites a row region's payload with raw bytes.
    pub fn write_raw(&self, ptr: &Pointer, bytes: &[u8]) -> Result<()> {
        self.check_row_pointer(ptr)?;
        self.heap.write(ptr, bytes)
    }

    /// Writes encoded bytes over `ptr` when they fit. Returns false, leaving
    /// the region untouched, when they do not.
    pub fn write_in_place(&self, ptr: &Pointer, bytes: &[u8]) -> Result<bool> {
        if bytes.len() > ptr.size as usize {
            return Ok(false);
        }
        self.write_raw(ptr, bytes)?;
        Ok(true)
    }

    /// Rewrites a row, moving it when the new encoding outgrows its region.
    pub fn update(&self, ptr: &Pointer, row: &Row) -> Result<Pointer> {
        let bytes = self.encode(row)?;
        if self.write_in_place(ptr, &bytes)? {
            return Ok(*ptr);
        }
        let moved = self.alloc_row(&bytes)?;
        self.free(ptr)?;
        Ok(moved)
    }

    pub fn delete(&self, ptr: &Pointer) -> Result<()> {
        self.free(ptr)
    }

    pub fn free(&self, ptr: &Pointer) -> Result<()> {
        self.check_row_pointer(ptr)?;
        self.heap.free(ptr).map(|_| ())
    }

    /// Visits every live row in address order.
    pub fn scan<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(Pointer, Row) -> Result<ControlFlow<()>>,
    {
        self.heap.scan(Some(&self.schema_ptr), |ptr| {
            if ptr.free {
                return Ok(ControlFlow::Continue(()));
            }
            let bytes = self.heap.read(&ptr)?;
            f(ptr, Row::decode(&self.schema, &bytes)?)
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.heap.flush()
    }

    pub fn check(&self) -> Result<()> {
        self.heap.check()
    }

    fn check_row_pointer(&self, ptr: &Pointer) -> Result<()> {
        if ptr.address == self.schema_ptr.address {
            return Err(DbError::InvalidPointer(ptr.address));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tuple::{Column, DataType, Value};
    use tempfile::TempDir;

    fn schema() -> Schema {
        Schema::new(vec![
            Column::new("id", DataType::UInt32),
            Column::new("note", DataType::String),
        ])
        .unwrap()
    }

    fn row(id: u32, note: &str) -> Row {
        Row::new(vec![Value::UInt32(id), note.into()])
    }

    fn rows(df: &Datafile) -> Vec<(u64, Row)> {
        let mut out = Vec::new();
        df.scan(|ptr, row| {
            out.push((ptr.address, row));
            Ok(ControlFlow::Continue(()))
        })
        .unwrap();
        out
    }

    #[test]
    fn test_insert_get_scan() {
        let dir = TempDir::new().unwrap();
        let df = Datafile::create(dir.path(), &schema(), &DbConfig::new()).unwrap();
        let a = df.insert(&row(1, "one")).unwrap();
        let b = df.insert(&row(2, "two")).unwrap();
        assert!(a.address < b.address);
        assert_eq!(df.get(&b).unwrap(), row(2, "two"));

        df.delete(&a).unwrap();
        let live = rows(&df);
        assert_eq!(live, vec![(b.address, row(2, "two"))]);
        df.check().unwrap();
    }

    #[test]
    fn test_update_moves_when_grown() {
        let dir = TempDir::new().unwrap();
        let df = Datafile::create(dir.path(), &schema(), &DbConfig::new()).unwrap();
        let p = df.insert(&row(1, "abcdef")).unwrap();

        let same = df.update(&p, &row(1, "abc")).unwrap();
        assert_eq!(same, p);
        assert_eq!(df.get(&p).unwrap(), row(1, "abc"));

        let moved = df.update(&p, &row(1, "a much longer note")).unwrap();
        assert_ne!(moved, p);
        assert_eq!(df.get(&moved).unwrap(), row(1, "a much longer note"));
        assert!(matches!(df.get(&p), Err(DbError::InvalidPointer(_))));
        assert_eq!(rows(&df).len(), 1);
    }

    #[test]
    fn test_reopen_checks_schema() {
        let dir = TempDir::new().unwrap();
        let config = DbConfig::new();
        {
            let df = Datafile::create(dir.path(), &schema(), &config).unwrap();
            df.insert(&row(7, "seven")).unwrap();
            df.flush().unwrap();
        }
        let df = Datafile::open(dir.path(), &schema(), &config).unwrap();
        assert_eq!(rows(&df)[0].1, row(7, "seven"));
        drop(df);

        let other = Schema::new(vec![Column::new("id", DataType::UInt64)]).unwrap();
        assert!(matches!(
            Datafile::open(dir.path(), &other, &config),
            Err(DbError::Corruption(_))
        ));
    }

    #[test]
    fn test_schema_region_is_protected() {
        let dir = TempDir::new().unwrap();
        let df = Datafile::create(dir.path(), &schema(), &DbConfig::new()).unwrap();
        let schema_ptr = df.heap().pointer_at(0).unwrap();
        assert!(matches!(df.delete(&schema_ptr), Err(DbError::InvalidPointer(0))));
    }
}
