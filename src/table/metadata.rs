use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::common::{DbError, Result, METADATA_FILE};
use crate::index::IndexDef;
use crate::tuple::Schema;

/// Everything `metadata.json` records about a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMeta {
    pub name: String,
    pub page_size: usize,
    pub columns: Schema,
    /// Every index, the primary one first
    pub indexes: Vec<IndexDef>,
    /// Name of the primary index
    pub primary: String,
    /// Next value of each AUTO INCREMENT column
    #[serde(default)]
    pub auto_increment: BTreeMap<String, u64>,
}

impl TableMeta {
    pub fn primary_def(&self) -> Result<&IndexDef> {
        self.index_def(&self.primary)
    }

    pub fn index_def(&self, name: &str) -> Result<&IndexDef> {
        self.indexes
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| DbError::IndexNotFound(name.to_string()))
    }

    /// Checks the cross references a hand-edited file could break.
    pub fn validate(&self) -> Result<()> {
        let primary = self.primary_def()?;
        if !primary.unique {
            return Err(DbError::schema(format!(
                "primary index '{}' must be unique",
                primary.name
            )));
        }
        if self.indexes.first().map(|d| d.name.as_str()) != Some(self.primary.as_str()) {
            return Err(DbError::schema("primary index must be listed first"));
        }
        for (i, def) in self.indexes.iter().enumerate() {
            if self.indexes[..i].iter().any(|d| d.name == def.name) {
                return Err(DbError::IndexExists(def.name.clone()));
            }
            for col in &def.columns {
                self.columns.require(col)?;
            }
        }
        for name in self.auto_increment.keys() {
            let col = self.columns.column_by_name(name).ok_or_else(|| {
                DbError::schema(format!("auto increment counter for unknown column '{}'", name))
            })?;
            if !col.auto_increment {
                return Err(DbError::schema(format!(
                    "column '{}' is not AUTO INCREMENT",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Reads and validates `metadata.json` in `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let file = File::open(dir.join(METADATA_FILE))?;
        let meta: TableMeta = serde_json::from_reader(BufReader::new(file))?;
        meta.validate()
            .map_err(|e| DbError::corruption(format!("{}: {}", METADATA_FILE, e)))?;
        Ok(meta)
    }

    /// Replaces `metadata.json` in `dir` through a synced temporary file.
    /// `dir` must already exist.
    pub fn save(&self, dir: &Path) -> Result<()> {
        if !dir.is_dir() {
            return Err(DbError::TableNotFound(self.name.clone()));
        }
        let json = serde_json::to_string_pretty(self)?;
        let tmp = NamedTempFile::new_in(dir)?;
        {
            let mut f = tmp.as_file();
            f.write_all(json.as_bytes())?;
            f.sync_all()?;
        }
        tmp.persist(dir.join(METADATA_FILE))
            .map_err(|e| DbError::Io(e.error))?;
        Ok(())
    }
}
