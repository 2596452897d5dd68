//! A data root: one directory per table.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use parking_lot::RwLock;

use crate::common::{DbConfig, DbError, Result, METADATA_FILE};
use crate::table::{Table, TableDef};

/// Every table under one data root, opened eagerly.
pub struct Database {
    root: PathBuf,
    config: DbConfig,
    tables: RwLock<HashMap<String, Arc<Table>>>,
}

impl Database {
    /// Opens every table directory under `root`, creating `root` if needed.
    pub fn open<P: AsRef<Path>>(root: P, config: DbConfig) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !config.read_only {
            fs::create_dir_all(&root)?;
        }

        let mut tables = HashMap::new();
        for entry in fs::read_dir(&root)? {
            let path = entry?.path();
            if !path.join(METADATA_FILE).is_file() {
                continue;
            }
            let table = Table::open(&path, &config)?;
            tables.insert(table.name().to_string(), Arc::new(table));
        }
        info!("opened database {} ({} tables)", root.display(), tables.len());

        Ok(Self {
            root,
            config,
            tables: RwLock::new(tables),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    pub fn create_table(&self, def: &TableDef) -> Result<Arc<Table>> {
        let mut tables = self.tables.write();
        if tables.contains_key(&def.name) {
            return Err(DbError::TableExists(def.name.clone()));
        }
        let table = Arc::new(Table::create(&self.root, def, &self.config)?);
        tables.insert(def.name.clone(), table.clone());
        Ok(table)
    }

    /// Removes a table and its directory. Handles still held elsewhere keep
    /// serving reads from the open files but refuse every write.
    pub fn drop_table(&self, name: &str) -> Result<()> {
        if self.config.read_only {
            return Err(DbError::ReadOnly);
        }
        let table = self
            .tables
            .write()
            .remove(name)
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))?;
        table.mark_dropped();
        let dir = table.dir().to_path_buf();
        drop(table);
        fs::remove_dir_all(&dir)?;
        info!("dropped table '{}'", name);
        Ok(())
    }

    pub fn table(&self, name: &str) -> Result<Arc<Table>> {
        self.tables
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    /// Table names in sorted order.
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn flush(&self) -> Result<()> {
        for table in self.tables.read().values() {
            table.flush()?;
        }
        Ok(())
    }

    pub fn close(self) -> Result<()> {
        for (name, table) in self.tables.into_inner() {
            match Arc::try_unwrap(table) {
                Ok(table) => table.close()?,
                Err(shared) => {
                    warn!("table '{}' still in use at close", name);
                    shared.flush()?;
                }
            }
        }
        info!("closed database {}", self.root.display());
        Ok(())
    }
}
