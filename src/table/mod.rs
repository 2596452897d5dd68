//! Tables: a row datafile plus the indexes that point into it.

mod datafile;
mod metadata;
#[allow(clippy::module_inception)]
mod table;

pub use datafile::Datafile;
pub use metadata::TableMeta;
pub use table::{Selection, Table, TableDef};
