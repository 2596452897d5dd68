use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use parking_lot::RwLock;

use crate::common::{DbConfig, DbError, Result, METADATA_FILE};
use crate::index::{Filter, Index, IndexDef, Key};
use crate::storage::heap::{Placement, Pointer};
use crate::tuple::{Column, DataType, Row, Schema, Value};

use super::{Datafile, TableMeta};

/// Declaration of a new table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableDef {
    pub name: String,
    pub columns: Vec<Column>,
    pub primary: IndexDef,
    /// Secondary indexes
    pub indexes: Vec<IndexDef>,
}

impl TableDef {
    pub fn new(name: impl Into<String>, columns: Vec<Column>, primary: IndexDef) -> Self {
        Self {
            name: name.into(),
            columns,
            primary,
            indexes: Vec::new(),
        }
    }

    pub fn index(mut self, def: IndexDef) -> Self {
        self.indexes.push(def);
        self
    }
}

/// Which rows a statement touches: every row in heap order, or the range
/// of one index between two optional filters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub index: Option<String>,
    pub start: Option<Filter>,
    pub end: Option<Filter>,
    pub reverse: bool,
}

impl Selection {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn index(name: impl Into<String>) -> Self {
        Self {
            index: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn start(mut self, filter: Filter) -> Self {
        self.start = Some(filter);
        self
    }

    pub fn end(mut self, filter: Filter) -> Self {
        self.end = Some(filter);
        self
    }

    pub fn reverse(mut self) -> Self {
        self.reverse = true;
        self
    }
}

/// A table directory: one datafile plus its indexes, the primary one first.
///
/// Readers share the table lock, writers take it exclusively. Every write
/// keeps each index holding exactly one entry per live row, pointing at
/// that row's region.
pub struct Table {
    name: String,
    dir: PathBuf,
    config: DbConfig,
    inner: RwLock<TableInner>,
}

struct TableInner {
    meta: TableMeta,
    datafile: Datafile,
    indexes: Vec<Index>,
    /// Set once the table's directory is removed; handles held elsewhere
    /// then refuse writes.
    dropped: bool,
}

/// How an updated row was stored.
enum Rewrite {
    /// Overwritten in its region; holds the previous payload
    InPlace(Vec<u8>),
    /// Written to a new region
    Moved(Placement),
}

/// One row rewritten by an update, kept until the statement commits.
struct AppliedUpdate {
    old_ptr: Pointer,
    new_ptr: Pointer,
    old_row: Row,
    new_row: Row,
    rewrite: Rewrite,
    /// Indexes whose key was rewritten
    rekeyed: Vec<usize>,
}

fn check_table_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(DbError::schema(format!("invalid table name '{}'", name)));
    }
    Ok(())
}

impl Table {
    /// Creates the table's directory under `root` with empty datafile and
    /// indexes. A half-built directory is removed again on failure.
    pub fn create(root: &Path, def: &TableDef, config: &DbConfig) -> Result<Self> {
        check_table_name(&def.name)?;
        let dir = root.join(&def.name);
        if dir.join(METADATA_FILE).exists() {
            return Err(DbError::TableExists(def.name.clone()));
        }
        if config.read_only {
            return Err(DbError::ReadOnly);
        }

        let schema = Schema::new(def.columns.clone())?;
        let mut indexes = vec![def.primary.clone()];
        indexes.extend(def.indexes.iter().cloned());
        let auto_increment = schema
            .columns()
            .iter()
            .filter(|c| c.auto_increment)
            .map(|c| (c.name.clone(), 1))
            .collect();
        let meta = TableMeta {
            name: def.name.clone(),
            page_size: config.page_size,
            columns: schema,
            indexes,
            primary: def.primary.name.clone(),
            auto_increment,
        };
        meta.validate()?;

        fs::create_dir_all(&dir)?;
        match Self::build(&dir, meta, config) {
            Ok(table) => {
                info!("created table '{}'", def.name);
                Ok(table)
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&dir) {
                    warn!("failed to remove {}: {}", dir.display(), cleanup);
                }
                Err(e)
            }
        }
    }

    fn build(dir: &Path, meta: TableMeta, config: &DbConfig) -> Result<Self> {
        let datafile = Datafile::create(dir, &meta.columns, config)?;
        let primary = meta.primary_def()?.clone();
        let mut indexes = Vec::with_capacity(meta.indexes.len());
        for def in &meta.indexes {
            indexes.push(Index::create(dir, def, &meta.columns, Some(&primary), config)?);
        }
        meta.save(dir)?;
        Ok(Self {
            name: meta.name.clone(),
            dir: dir.to_path_buf(),
            config: config.clone(),
            inner: RwLock::new(TableInner {
                meta,
                datafile,
                indexes,
                dropped: false,
            }),
        })
    }

    /// Opens the table stored in `dir`.
    pub fn open(dir: &Path, config: &DbConfig) -> Result<Self> {
        let meta = TableMeta::load(dir)?;
        if meta.page_size != config.page_size {
            return Err(DbError::corruption(format!(
                "table '{}' uses page size {}, configured {}",
                meta.name, meta.page_size, config.page_size
            )));
        }
        let datafile = Datafile::open(dir, &meta.columns, config)?;
        let primary = meta.primary_def()?.clone();
        let mut indexes = Vec::with_capacity(meta.indexes.len());
        for def in &meta.indexes {
            indexes.push(Index::open(dir, def, &meta.columns, Some(&primary), config)?);
        }
        debug!("opened table '{}' ({} rows)", meta.name, indexes[0].len());
        Ok(Self {
            name: meta.name.clone(),
            dir: dir.to_path_buf(),
            config: config.clone(),
            inner: RwLock::new(TableInner {
                meta,
                datafile,
                indexes,
                dropped: false,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn schema(&self) -> Schema {
        self.inner.read().meta.columns.clone()
    }

    /// Index declarations, the primary one first.
    pub fn indexes(&self) -> Vec<IndexDef> {
        self.inner.read().meta.indexes.clone()
    }

    pub fn primary(&self) -> String {
        self.inner.read().meta.primary.clone()
    }

    pub fn row_count(&self) -> u64 {
        self.inner.read().indexes[0].len()
    }

    /// Next value of each AUTO INCREMENT column.
    pub fn auto_increment(&self) -> BTreeMap<String, u64> {
        self.inner.read().meta.auto_increment.clone()
    }

    /// Inserts one row given as `(column, value)` pairs and returns it as
    /// stored. Missing columns take their type default or next counter value.
    pub fn insert(&self, values: &[(String, Value)]) -> Result<Row> {
        let mut inner = self.inner.write();
        inner.writable(&self.name)?;
        let row = inner.insert(values)?;
        inner.meta.save(&self.dir)?;
        Ok(row)
    }

    /// Inserts `count` generated rows and returns how many went in.
    pub fn prepare(&self, count: u64) -> Result<u64> {
        let mut inner = self.inner.write();
        inner.writable(&self.name)?;
        let columns: Vec<Column> = inner
            .meta
            .columns
            .columns()
            .iter()
            .filter(|c| !c.auto_increment)
            .cloned()
            .collect();

        let mut inserted = 0;
        let mut result = Ok(());
        while inserted < count {
            let ordinal = inner.indexes[0].len() + 1;
            let values = match columns
                .iter()
                .map(|col| Ok((col.name.clone(), generated(col, ordinal)?)))
                .collect::<Result<Vec<_>>>()
            {
                Ok(values) => values,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            };
            if let Err(e) = inner.insert(&values) {
                debug!("prepare stopped after {} rows: {}", inserted, e);
                result = Err(e);
                break;
            }
            inserted += 1;
        }
        inner.meta.save(&self.dir)?;
        result.map(|()| inserted)
    }

    /// Applies `assignments` to every selected row accepted by `predicate`
    /// and returns how many rows were rewritten. On any failure every row
    /// already rewritten by this call is restored.
    pub fn update<P>(
        &self,
        selection: &Selection,
        assignments: &[(String, Value)],
        predicate: P,
    ) -> Result<usize>
    where
        P: FnMut(&Row) -> Result<bool>,
    {
        let mut inner = self.inner.write();
        inner.writable(&self.name)?;
        let changes = inner.assignments(assignments)?;
        let positions: Vec<usize> = changes.iter().map(|(p, _)| *p).collect();
        let rows = inner.select(selection, predicate)?;

        let mut applied = Vec::with_capacity(rows.len());
        for (ptr, old_row) in rows {
            let mut new_row = old_row.clone();
            for (pos, value) in &changes {
                new_row.set(*pos, value.clone());
            }
            match inner.update_row(ptr, old_row, new_row, &positions) {
                Ok(done) => applied.push(done),
                Err(e) => {
                    for done in applied.into_iter().rev() {
                        inner.revert(done)?;
                    }
                    return Err(e);
                }
            }
        }

        for done in &applied {
            if done.new_ptr != done.old_ptr {
                inner.datafile.free(&done.old_ptr)?;
            }
            inner.bump_counters(&done.new_row);
        }
        inner.meta.save(&self.dir)?;
        Ok(applied.len())
    }

    /// Deletes every selected row accepted by `predicate`.
    pub fn delete<P>(&self, selection: &Selection, predicate: P) -> Result<usize>
    where
        P: FnMut(&Row) -> Result<bool>,
    {
        let inner = self.inner.write();
        inner.writable(&self.name)?;
        let rows = inner.select(selection, predicate)?;
        for (ptr, row) in &rows {
            inner.delete_row(ptr, row)?;
        }
        Ok(rows.len())
    }

    /// Every live row in heap allocation order.
    pub fn full_scan<F>(&self, f: F) -> Result<()>
    where
        F: FnMut(Pointer, Row) -> Result<ControlFlow<()>>,
    {
        self.inner.read().datafile.scan(f)
    }

    /// Rows in the order of `index`, between the optional filters. The key
    /// handed to `f` holds the index columns only.
    pub fn index_scan<F>(
        &self,
        index: &str,
        start: Option<&Filter>,
        end: Option<&Filter>,
        reverse: bool,
        mut f: F,
    ) -> Result<()>
    where
        F: FnMut(Key, Row) -> Result<ControlFlow<()>>,
    {
        let inner = self.inner.read();
        let index = inner.index(index)?;
        index.scan(start, end, reverse, |key, ptr| {
            let row = inner.datafile.get(&ptr)?;
            f(key, row)
        })
    }

    /// Visits the selected rows.
    pub fn scan<F>(&self, selection: &Selection, mut f: F) -> Result<()>
    where
        F: FnMut(Row) -> Result<ControlFlow<()>>,
    {
        match &selection.index {
            None => self.full_scan(|_, row| f(row)),
            Some(name) => self.index_scan(
                name,
                selection.start.as_ref(),
                selection.end.as_ref(),
                selection.reverse,
                |_, row| f(row),
            ),
        }
    }

    /// Rows whose leading `index` columns equal `values`.
    pub fn find_by_index(&self, index: &str, values: &[Value]) -> Result<Vec<Row>> {
        let inner = self.inner.read();
        inner
            .index(index)?
            .lookup(values)?
            .iter()
            .map(|ptr| inner.datafile.get(ptr))
            .collect()
    }

    /// Builds a new index over the existing rows.
    pub fn create_index(&self, def: IndexDef) -> Result<()> {
        let mut inner = self.inner.write();
        inner.writable(&self.name)?;
        if inner.meta.indexes.iter().any(|d| d.name == def.name) {
            return Err(DbError::IndexExists(def.name));
        }
        let primary = inner.meta.primary_def()?.clone();
        let index = Index::create(&self.dir, &def, &inner.meta.columns, Some(&primary), &self.config)?;

        let built = inner.datafile.scan(|ptr, row| {
            index.insert(&row, &ptr)?;
            Ok(ControlFlow::Continue(()))
        });
        if let Err(e) = built {
            drop(index);
            Index::remove_files(&self.dir, &def.name)?;
            return Err(e);
        }

        info!(
            "built index '{}' on '{}' ({} entries)",
            def.name,
            self.name,
            index.len()
        );
        inner.indexes.push(index);
        inner.meta.indexes.push(def);
        inner.meta.save(&self.dir)
    }

    pub fn drop_index(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.write();
        inner.writable(&self.name)?;
        if inner.meta.primary == name {
            return Err(DbError::schema(format!("cannot drop primary index '{}'", name)));
        }
        let pos = inner
            .indexes
            .iter()
            .position(|i| i.name() == name)
            .ok_or_else(|| DbError::IndexNotFound(name.to_string()))?;
        drop(inner.indexes.remove(pos));
        inner.meta.indexes.retain(|d| d.name != name);
        inner.meta.save(&self.dir)?;
        Index::remove_files(&self.dir, name)?;
        info!("dropped index '{}' on '{}'", name, self.name);
        Ok(())
    }

    /// Verifies every structure and that each index holds exactly one
    /// entry per live row, pointing at a row with the same key.
    pub fn check(&self) -> Result<()> {
        let inner = self.inner.read();
        inner.datafile.check()?;

        let mut rows = HashMap::new();
        inner.datafile.scan(|ptr, row| {
            rows.insert(ptr.address, row);
            Ok(ControlFlow::Continue(()))
        })?;

        for index in &inner.indexes {
            index.check()?;
            let mut seen = HashSet::new();
            index.scan(None, None, false, |key, ptr| {
                let row = rows.get(&ptr.address).ok_or_else(|| {
                    DbError::corruption(format!(
                        "index '{}' points at {} which holds no row",
                        index.name(),
                        ptr
                    ))
                })?;
                if index.key_of(row)?.prefix(key.len()) != key {
                    return Err(DbError::corruption(format!(
                        "index '{}' key {} does not match its row",
                        index.name(),
                        key
                    )));
                }
                if !seen.insert(ptr.address) {
                    return Err(DbError::corruption(format!(
                        "index '{}' points at {} twice",
                        index.name(),
                        ptr
                    )));
                }
                Ok(ControlFlow::Continue(()))
            })?;
            if seen.len() != rows.len() {
                return Err(DbError::corruption(format!(
                    "index '{}' covers {} of {} rows",
                    index.name(),
                    seen.len(),
                    rows.len()
                )));
            }
        }
        Ok(())
    }

    /// Writes every cache back and syncs all files.
    pub fn flush(&self) -> Result<()> {
        let inner = self.inner.read();
        inner.datafile.flush()?;
        for index in &inner.indexes {
            index.flush()?;
        }
        if !self.config.read_only && !inner.dropped {
            inner.meta.save(&self.dir)?;
        }
        Ok(())
    }

    /// Marks the table as removed. Waits for running statements, then every
    /// later write through any handle fails with `TableNotFound`.
    pub(crate) fn mark_dropped(&self) {
        self.inner.write().dropped = true;
    }

    pub fn is_dropped(&self) -> bool {
        self.inner.read().dropped
    }

    pub fn close(self) -> Result<()> {
        self.flush()?;
        debug!("closed table '{}'", self.name);
        Ok(())
    }
}

/// Value `prepare` generates for a column of row `ordinal`.
fn generated(col: &Column, ordinal: u64) -> Result<Value> {
    let value = match col.data_type {
        DataType::String => Value::String(format!("{}{}", col.name, ordinal)),
        DataType::VarChar(cap) => {
            let mut s = format!("{}{}", col.name, ordinal);
            s.truncate(cap as usize);
            Value::String(s)
        }
        DataType::DateTime => Value::DateTime(ordinal as i64),
        DataType::Float32 | DataType::Float64 => Value::Float64(ordinal as f64),
        _ => Value::UInt64(ordinal),
    };
    value.cast(col.data_type)
}

impl TableInner {
    fn writable(&self, name: &str) -> Result<()> {
        if self.dropped {
            return Err(DbError::TableNotFound(name.to_string()));
        }
        Ok(())
    }

    fn index(&self, name: &str) -> Result<&Index> {
        self.indexes
            .iter()
            .find(|i| i.name() == name)
            .ok_or_else(|| DbError::IndexNotFound(name.to_string()))
    }

    /// Resolves assignments to `(position, cast value)`.
    fn assignments(&self, values: &[(String, Value)]) -> Result<Vec<(usize, Value)>> {
        let schema = &self.meta.columns;
        let mut out: Vec<(usize, Value)> = Vec::with_capacity(values.len());
        for (name, value) in values {
            let pos = schema.require(name)?;
            if out.iter().any(|(p, _)| *p == pos) {
                return Err(DbError::schema(format!("column '{}' given twice", name)));
            }
            out.push((pos, value.cast(schema.columns()[pos].data_type)?));
        }
        Ok(out)
    }

    fn insert(&mut self, values: &[(String, Value)]) -> Result<Row> {
        let given = self.assignments(values)?;
        let mut row = Vec::with_capacity(self.meta.columns.len());
        for (pos, col) in self.meta.columns.columns().iter().enumerate() {
            let value = match given.iter().find(|(p, _)| *p == pos) {
                Some((_, v)) => v.clone(),
                None if col.auto_increment => {
                    let next = self.meta.auto_increment.get(&col.name).copied().unwrap_or(1);
                    Value::UInt64(next).cast(col.data_type)?
                }
                None => Value::default_for(col.data_type),
            };
            row.push(value);
        }
        let row = Row::new(row);

        for index in &self.indexes {
            if !index.can_insert(&row)? {
                return Err(DbError::Conflict(index.name().to_string()));
            }
        }

        let (ptr, placement) = self.datafile.place_row(&self.datafile.encode(&row)?)?;
        for (i, index) in self.indexes.iter().enumerate() {
            if let Err(e) = index.insert(&row, &ptr) {
                for done in &self.indexes[..i] {
                    done.delete(&row)?;
                }
                self.datafile.unplace(&ptr, placement)?;
                return Err(e);
            }
        }
        self.bump_counters(&row);
        Ok(row)
    }

    /// Moves auto-increment counters past the values in `row`.
    fn bump_counters(&mut self, row: &Row) {
        for (pos, col) in self.meta.columns.columns().iter().enumerate() {
            if !col.auto_increment {
                continue;
            }
            let used = match row.get(pos).and_then(Value::as_i128) {
                Some(v) if v >= 0 => v,
                _ => continue,
            };
            let next = u64::try_from(used + 1).unwrap_or(u64::MAX);
            let counter = self.meta.auto_increment.entry(col.name.clone()).or_insert(1);
            if next > *counter {
                *counter = next;
            }
        }
    }

    /// Pointer and row of every selected row accepted by `predicate`.
    fn select<P>(&self, selection: &Selection, mut predicate: P) -> Result<Vec<(Pointer, Row)>>
    where
        P: FnMut(&Row) -> Result<bool>,
    {
        let mut out = Vec::new();
        let mut keep = |ptr: Pointer, row: Row| -> Result<ControlFlow<()>> {
            if predicate(&row)? {
                out.push((ptr, row));
            }
            Ok(ControlFlow::Continue(()))
        };
        match &selection.index {
            None => self.datafile.scan(&mut keep)?,
            Some(name) => self.index(name)?.scan(
                selection.start.as_ref(),
                selection.end.as_ref(),
                selection.reverse,
                |_, ptr| {
                    let row = self.datafile.get(&ptr)?;
                    keep(ptr, row)
                },
            )?,
        }
        Ok(out)
    }

    /// Removes one row and its index entries. A failure puts back the
    /// entries already removed.
    fn delete_row(&self, ptr: &Pointer, row: &Row) -> Result<()> {
        for (i, index) in self.indexes.iter().enumerate() {
            if let Err(e) = index.delete(row) {
                for done in &self.indexes[..i] {
                    done.insert(row, ptr)?;
                }
                return Err(e);
            }
        }
        if let Err(e) = self.datafile.delete(ptr) {
            for index in &self.indexes {
                index.insert(row, ptr)?;
            }
            return Err(e);
        }
        Ok(())
    }

    /// Rewrites one row and the index entries it affects. On failure
    /// everything this call touched is restored before the error returns.
    fn update_row(
        &self,
        ptr: Pointer,
        old_row: Row,
        new_row: Row,
        changed: &[usize],
    ) -> Result<AppliedUpdate> {
        let affected: Vec<usize> = (0..self.indexes.len())
            .filter(|&i| i == 0 || self.indexes[i].covers_any(changed))
            .collect();

        // Unique collisions are caught before the heap is touched.
        for &i in &affected {
            let index = &self.indexes[i];
            if index.is_unique()
                && index.key_of(&new_row)? != index.key_of(&old_row)?
                && !index.can_insert(&new_row)?
            {
                return Err(DbError::Conflict(index.name().to_string()));
            }
        }

        let bytes = self.datafile.encode(&new_row)?;
        let placed = if bytes.len() <= ptr.size as usize {
            None
        } else {
            Some(self.datafile.place_row(&bytes)?)
        };
        let new_ptr = placed.map_or(ptr, |(p, _)| p);

        let mut rekeyed = Vec::with_capacity(affected.len());
        let mut failure = None;
        for &i in &affected {
            let index = &self.indexes[i];
            index.delete(&old_row)?;
            let result = if index.can_insert(&new_row)? {
                index.insert(&new_row, &new_ptr)
            } else {
                Err(DbError::Conflict(index.name().to_string()))
            };
            match result {
                Ok(()) => rekeyed.push(i),
                Err(e) => {
                    index.insert(&old_row, &ptr)?;
                    failure = Some(e);
                    break;
                }
            }
        }

        if let Some(e) = failure {
            for &i in rekeyed.iter().rev() {
                self.indexes[i].delete(&new_row)?;
                self.indexes[i].insert(&old_row, &ptr)?;
            }
            if let Some((new_ptr, placement)) = placed {
                self.datafile.unplace(&new_ptr, placement)?;
            }
            return Err(e);
        }

        let rewrite = match placed {
            None => {
                let old = self.datafile.read_raw(&ptr)?;
                self.datafile.write_raw(&ptr, &bytes)?;
                Rewrite::InPlace(old)
            }
            Some((_, placement)) => {
                for (i, index) in self.indexes.iter().enumerate() {
                    if !rekeyed.contains(&i) {
                        index.repoint(&new_row, &new_ptr)?;
                    }
                }
                Rewrite::Moved(placement)
            }
        };

        Ok(AppliedUpdate {
            old_ptr: ptr,
            new_ptr,
            old_row,
            new_row,
            rewrite,
            rekeyed,
        })
    }

    /// Undoes an [`AppliedUpdate`] whose statement failed later on. Updates
    /// are undone newest first so moved rows give back their regions in
    /// allocation order.
    fn revert(&self, done: AppliedUpdate) -> Result<()> {
        let moved = done.new_ptr != done.old_ptr;
        for (i, index) in self.indexes.iter().enumerate() {
            if done.rekeyed.contains(&i) {
                index.delete(&done.new_row)?;
                index.insert(&done.old_row, &done.old_ptr)?;
            } else if moved {
                index.repoint(&done.old_row, &done.old_ptr)?;
            }
        }
        match done.rewrite {
            Rewrite::InPlace(bytes) => self.datafile.write_raw(&done.old_ptr, &bytes),
            Rewrite::Moved(placement) => self.datafile.unplace(&done.new_ptr, placement),
        }
    }
}
