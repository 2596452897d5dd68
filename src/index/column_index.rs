use std::fs;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::common::{
    DbConfig, DbError, Marshal, Result, INDEX_DIR, INDEX_EXT, INDEX_FREELIST_EXT,
};
use crate::storage::heap::{Heap, Pointer, POINTER_SIZE};
use crate::tuple::{DataType, Row, Schema, Value};

use super::filter::Bounds;
use super::{BTree, BTreeConfig, Filter, HeapNodeStore, Key, ScanOptions};

/// An index's B+ tree: nodes are heap blobs in the index's own files.
pub type IndexTree = BTree<HeapNodeStore>;

/// Index declaration as kept in table metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl IndexDef {
    pub fn new(name: impl Into<String>, columns: Vec<String>, unique: bool) -> Self {
        Self {
            name: name.into(),
            columns,
            unique,
        }
    }
}

/// A B+ tree bound to a set of table columns. Values are datafile
/// pointers. A non-unique index appends the primary key columns to every
/// stored key so that stored keys stay distinct; the suffix is stripped
/// again from the keys handed to scan callbacks.
pub struct Index {
    def: IndexDef,
    /// Row positions of the index columns, then of the suffix columns
    positions: Vec<usize>,
    /// Types matching `positions`
    types: Vec<DataType>,
    tree: IndexTree,
}

fn index_paths(table_dir: &Path, name: &str) -> (PathBuf, PathBuf) {
    let dir = table_dir.join(INDEX_DIR);
    (
        dir.join(format!("{}.{}", name, INDEX_EXT)),
        dir.join(format!("{}.{}", name, INDEX_FREELIST_EXT)),
    )
}

impl Index {
    /// Resolves the key layout of `def` against the table schema.
    fn layout(
        def: &IndexDef,
        schema: &Schema,
        primary: Option<&IndexDef>,
    ) -> Result<(Vec<usize>, Vec<DataType>, usize)> {
        if def.columns.is_empty() {
            return Err(DbError::schema(format!("index '{}' has no columns", def.name)));
        }
        let mut positions = Vec::new();
        for name in &def.columns {
            let pos = schema.require(name)?;
            if positions.contains(&pos) {
                return Err(DbError::schema(format!(
                    "column '{}' repeated in index '{}'",
                    name, def.name
                )));
            }
            positions.push(pos);
        }
        let key_cols = positions.len();

        if !def.unique {
            let primary = primary.ok_or_else(|| {
                DbError::schema(format!(
                    "non-unique index '{}' needs a primary key",
                    def.name
                ))
            })?;
            for name in &primary.columns {
                positions.push(schema.require(name)?);
            }
        }

        let mut types = Vec::with_capacity(positions.len());
        for &pos in &positions {
            let col = &schema.columns()[pos];
            if !col.data_type.is_fixed_size() {
                return Err(DbError::schema(format!(
                    "variable-size column '{}' cannot be part of index '{}'",
                    col.name, def.name
                )));
            }
            types.push(col.data_type);
        }
        Ok((positions, types, key_cols))
    }

    fn tree_config(types: &[DataType], key_cols: usize, unique: bool, config: &DbConfig) -> BTreeConfig {
        let size = |tys: &[DataType]| tys.iter().filter_map(DataType::fixed_size).sum::<usize>();
        BTreeConfig::new(key_cols, size(&types[..key_cols]), POINTER_SIZE)
            .suffix(types.len() - key_cols, size(&types[key_cols..]))
            .unique(unique)
            .page_size(config.page_size)
            .cache_size(config.cache_size)
    }

    fn open_tree(
        table_dir: &Path,
        def: &IndexDef,
        schema: &Schema,
        primary: Option<&IndexDef>,
        config: &DbConfig,
        create: bool,
    ) -> Result<Self> {
        let (positions, types, key_cols) = Self::layout(def, schema, primary)?;
        let tree_config = Self::tree_config(&types, key_cols, def.unique, config);

        let (idx_path, bin_path) = index_paths(table_dir, &def.name);
        if create {
            fs::create_dir_all(table_dir.join(INDEX_DIR))?;
            if idx_path.exists() {
                return Err(DbError::IndexExists(def.name.clone()));
            }
        }
        let heap = Arc::new(Heap::open(&idx_path, &bin_path, config)?);
        let store = HeapNodeStore::new(heap);
        let tree = if create {
            BTree::create(store, tree_config)?
        } else {
            BTree::open(store, tree_config)?
        };

        debug!(
            "opened index '{}' ({} entries, height {})",
            def.name,
            tree.len(),
            tree.height()
        );
        Ok(Self {
            def: def.clone(),
            positions,
            types,
            tree,
        })
    }

    /// Creates the files of a new, empty index under `table_dir`.
    pub fn create(
        table_dir: &Path,
        def: &IndexDef,
        schema: &Schema,
        primary: Option<&IndexDef>,
        config: &DbConfig,
    ) -> Result<Self> {
        let index = Self::open_tree(table_dir, def, schema, primary, config, true)?;
        info!("created index '{}' on ({})", def.name, def.columns.join(", "));
        Ok(index)
    }

    pub fn open(
        table_dir: &Path,
        def: &IndexDef,
        schema: &Schema,
        primary: Option<&IndexDef>,
        config: &DbConfig,
    ) -> Result<Self> {
        Self::open_tree(table_dir, def, schema, primary, config, false)
    }

    /// Deletes an index's files. Missing files are not an error.
    pub fn remove_files(table_dir: &Path, name: &str) -> Result<()> {
        let (idx_path, bin_path) = index_paths(table_dir, name);
        for path in [idx_path, bin_path] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub fn def(&self) -> &IndexDef {
        &self.def
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn columns(&self) -> &[String] {
        &self.def.columns
    }

    pub fn is_unique(&self) -> bool {
        self.def.unique
    }

    pub fn tree(&self) -> &IndexTree {
        &self.tree
    }

    pub fn len(&self) -> u64 {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    fn key_cols(&self) -> usize {
        self.def.columns.len()
    }

    /// Whether an update touching `columns` changes this index's stored key.
    pub fn covers_any(&self, positions: &[usize]) -> bool {
        self.positions.iter().any(|p| positions.contains(p))
    }

    /// The stored key of `row`, suffix included.
    pub fn key_of(&self, row: &Row) -> Result<Key> {
        let mut key = Key::empty();
        for (&pos, ty) in self.positions.iter().zip(&self.types) {
            let value = row
                .get(pos)
                .ok_or_else(|| DbError::schema("row is shorter than the schema"))?;
            key.push(value.encode(*ty)?);
        }
        Ok(key)
    }

    /// True if inserting `row` would not collide with a stored key.
    /// Non-unique keys always differ by their primary key suffix.
    pub fn can_insert(&self, row: &Row) -> Result<bool> {
        if !self.def.unique {
            return Ok(true);
        }
        let key = self.key_of(row)?;
        Ok(!self.tree.contains(&key)?)
    }

    pub fn insert(&self, row: &Row, ptr: &Pointer) -> Result<()> {
        let key = self.key_of(row)?;
        match self.tree.insert(&key, &ptr.to_bytes()) {
            Err(DbError::DuplicateKey) => Err(DbError::Conflict(self.def.name.clone())),
            other => other,
        }
    }

    /// Repoints the entry of `row` at `ptr`.
    pub fn repoint(&self, row: &Row, ptr: &Pointer) -> Result<()> {
        let key = self.key_of(row)?;
        self.tree.upsert(&key, &ptr.to_bytes()).map(|_| ())
    }

    pub fn delete(&self, row: &Row) -> Result<()> {
        let key = self.key_of(row)?;
        self.tree.delete(&key).map(|_| ())
    }

    /// Pointers of every entry whose leading columns equal `values`.
    pub fn lookup(&self, values: &[Value]) -> Result<Vec<Pointer>> {
        if values.is_empty() || values.len() > self.key_cols() {
            return Err(DbError::schema(format!(
                "index '{}' lookup needs 1 to {} values",
                self.def.name,
                self.key_cols()
            )));
        }
        let mut prefix = Key::empty();
        for (value, ty) in values.iter().zip(&self.types) {
            prefix.push(value.encode(*ty)?);
        }
        self.tree
            .get_all(&prefix)?
            .into_iter()
            .map(|(_, v)| Pointer::unmarshal(&mut &v[..]))
            .collect()
    }

    /// Key bounds of an optional start and end filter.
    fn bounds(&self, start: Option<&Filter>, end: Option<&Filter>) -> Result<Bounds> {
        let mut bounds = Bounds::default();
        for filter in [start, end].into_iter().flatten() {
            let cast = Filter::new(
                filter.op,
                filter
                    .values
                    .iter()
                    .map(|(name, value)| {
                        let ty = self.column_type(name)?;
                        Ok((name.clone(), value.cast(ty)?))
                    })
                    .collect::<Result<Vec<_>>>()?,
            );
            bounds = bounds.intersect(cast.bounds(&self.def.columns, &self.types)?);
        }
        Ok(bounds)
    }

    fn column_type(&self, name: &str) -> Result<DataType> {
        self.def
            .columns
            .iter()
            .position(|c| c == name)
            .map(|i| self.types[i])
            .ok_or_else(|| {
                DbError::schema(format!(
                    "column '{}' is not part of index '{}'",
                    name, self.def.name
                ))
            })
    }

    /// Walks the entries inside the range the filters describe, in key order
    /// or reversed. The callback gets the key without any primary key suffix.
    pub fn scan<F>(
        &self,
        start: Option<&Filter>,
        end: Option<&Filter>,
        reverse: bool,
        mut f: F,
    ) -> Result<()>
    where
        F: FnMut(Key, Pointer) -> Result<ControlFlow<()>>,
    {
        let bounds = self.bounds(start, end)?;
        let opts = if reverse {
            match &bounds.high {
                Some(b) => ScanOptions::reverse_from(b.key.clone(), b.inclusive),
                None => ScanOptions::all().reversed(),
            }
        } else {
            match &bounds.low {
                Some(b) => ScanOptions::from(b.key.clone(), b.inclusive),
                None => ScanOptions::all(),
            }
        };
        let key_cols = self.key_cols();

        self.tree.scan(opts, |key, value| {
            let in_range = if reverse {
                bounds.above_low(key)
            } else {
                bounds.below_high(key)
            };
            if !in_range {
                return Ok(ControlFlow::Break(()));
            }
            let ptr = Pointer::unmarshal(&mut &value[..])?;
            f(key.prefix(key_cols), ptr)
        })
    }

    /// Decodes the index columns of a key yielded by [`Index::scan`].
    pub fn decode_key(&self, key: &Key) -> Result<Vec<Value>> {
        key.columns()
            .iter()
            .zip(&self.types)
            .map(|(bytes, ty)| Value::decode(bytes, *ty))
            .collect()
    }

    pub fn flush(&self) -> Result<()> {
        self.tree.flush()
    }

    pub fn check(&self) -> Result<()> {
        self.tree.check()?;
        self.tree.store().heap().check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Op;
    use crate::tuple::Column;
    use tempfile::TempDir;

    fn schema() -> Schema {
        Schema::new(vec![
            Column::new("id", DataType::UInt32),
            Column::new("first", DataType::VarChar(4)),
            Column::new("last", DataType::VarChar(4)),
        ])
        .unwrap()
    }

    fn row(id: u32, first: &str, last: &str) -> Row {
        Row::new(vec![Value::UInt32(id), first.into(), last.into()])
    }

    fn collect(index: &Index, start: Option<&Filter>, end: Option<&Filter>, reverse: bool) -> Vec<u64> {
        let mut out = Vec::new();
        index
            .scan(start, end, reverse, |_, ptr| {
                out.push(ptr.address);
                Ok(ControlFlow::Continue(()))
            })
            .unwrap();
        out
    }

    #[test]
    fn test_unique_conflict() {
        let dir = TempDir::new().unwrap();
        let config = DbConfig::new();
        let def = IndexDef::new("pk", vec!["id".into()], true);
        let index = Index::create(dir.path(), &def, &schema(), None, &config).unwrap();

        index.insert(&row(1, "a", "b"), &Pointer::new(100, 10)).unwrap();
        assert!(!index.can_insert(&row(1, "x", "y")).unwrap());
        assert!(index.can_insert(&row(2, "x", "y")).unwrap());
        assert!(matches!(
            index.insert(&row(1, "x", "y"), &Pointer::new(200, 10)),
            Err(DbError::Conflict(name)) if name == "pk"
        ));
        assert_eq!(index.lookup(&[Value::UInt32(1)]).unwrap(), vec![Pointer::new(100, 10)]);
    }

    #[test]
    fn test_non_unique_prefix_scan() {
        let dir = TempDir::new().unwrap();
        let config = DbConfig::new();
        let pk = IndexDef::new("pk", vec!["id".into()], true);
        let def = IndexDef::new("fl", vec!["first".into(), "last".into()], false);
        let index = Index::create(dir.path(), &def, &schema(), Some(&pk), &config).unwrap();

        index.insert(&row(1, "aaaa", "zzzz"), &Pointer::new(1, 1)).unwrap();
        index.insert(&row(2, "aaaa", "yyyy"), &Pointer::new(2, 1)).unwrap();
        index.insert(&row(3, "bbbb", "aaaa"), &Pointer::new(3, 1)).unwrap();
        index.insert(&row(4, "aaaa", "yyyy"), &Pointer::new(4, 1)).unwrap();

        let eq = Filter::eq("first", "aaaa".into());
        assert_eq!(collect(&index, Some(&eq), None, false), vec![2, 4, 1]);
        assert_eq!(collect(&index, Some(&eq), None, true), vec![1, 4, 2]);

        let gt = Filter::new(Op::Gt, vec![("first".into(), "aaaa".into())]);
        assert_eq!(collect(&index, Some(&gt), None, false), vec![3]);

        let lt = Filter::new(Op::Lt, vec![("first".into(), "bbbb".into())]);
        assert_eq!(collect(&index, None, Some(&lt), true), vec![1, 4, 2]);

        let mut keys = Vec::new();
        index
            .scan(Some(&eq), None, false, |key, _| {
                keys.push(index.decode_key(&key)?);
                Ok(ControlFlow::Continue(()))
            })
            .unwrap();
        assert_eq!(keys[0], vec![Value::from("aaaa"), Value::from("yyyy")]);
        assert_eq!(keys[0].len(), 2);
    }

    #[test]
    fn test_variable_column_rejected() {
        let dir = TempDir::new().unwrap();
        let schema = Schema::new(vec![Column::new("s", DataType::String)]).unwrap();
        let def = IndexDef::new("s_idx", vec!["s".into()], true);
        assert!(matches!(
            Index::create(dir.path(), &def, &schema, None, &DbConfig::new()),
            Err(DbError::SchemaViolation(_))
        ));
    }

    #[test]
    fn test_reopen_and_remove() {
        let dir = TempDir::new().unwrap();
        let config = DbConfig::new();
        let def = IndexDef::new("pk", vec!["id".into()], true);
        {
            let index = Index::create(dir.path(), &def, &schema(), None, &config).unwrap();
            for id in 0..500u32 {
                index.insert(&row(id, "a", "b"), &Pointer::new(id as u64, 1)).unwrap();
            }
            index.flush().unwrap();
        }
        {
            let index = Index::open(dir.path(), &def, &schema(), None, &config).unwrap();
            assert_eq!(index.len(), 500);
            index.check().unwrap();
            let ge = Filter::new(Op::Ge, vec![("id".into(), Value::Int64(495))]);
            assert_eq!(collect(&index, Some(&ge), None, false), vec![495, 496, 497, 498, 499]);
        }
        Index::remove_files(dir.path(), "pk").unwrap();
        assert!(Index::open(dir.path(), &def, &schema(), None, &config).is_err());
    }
}
