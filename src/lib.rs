//! Tabula - a heap-backed relational table store in Rust
//!
//! Tables live in a data root, one directory per table. Each table keeps
//! its rows in a heap file and its indexes in B+ trees whose nodes are
//! themselves heap blobs, with a node cache in front.
//!
//! # Architecture
//!
//! The system is organized into several layers:
//!
//! - **Storage** (`storage`): fixed-size page files and the heap allocator
//!   - `Pager`: page-granular reads and writes over one file
//!   - `Heap`: variable-size regions addressed by `Pointer`, with a
//!     freelist B+ tree keyed by `(size, address)`
//!
//! - **Buffer** (`buffer`): the `PageCache` of decoded B+ tree nodes, handed
//!   out as locked `CacheHandle`s and written back when dirty
//!
//! - **Tuple** (`tuple`): `DataType`, `Value`, `Schema` and the `Row` codec
//!
//! - **Index** (`index`): order-preserving `Key`s, the generic `BTree`, and
//!   the column `Index` with `Filter` ranges
//!
//! - **Table** (`table`): a `Datafile` of rows plus its indexes, kept in step
//!   by `Table`, and the `metadata.json` beside them
//!
//! - **Catalog** (`catalog`): the `Database`, a data root of tables
//!
//! - **Execution** (`execution`): bounded row streams, predicates,
//!   aggregates and the statement `Executor`
//!
//! - **SQL** (`sql`): tokenizer, AST and parser for the statement surface
//!
//! - **Server** (`server`): the length-prefixed TCP protocol
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tabula::catalog::Database;
//! use tabula::execution::Executor;
//! use tabula::DbConfig;
//!
//! let db = Arc::new(Database::open("data", DbConfig::new()).unwrap());
//! let executor = Executor::new(db);
//!
//! executor
//!     .execute("CREATE TABLE users (id UInt32 AUTO INCREMENT, name VARCHAR(16)) PRIMARY KEY(id) pk")
//!     .unwrap();
//! executor
//!     .execute("INSERT INTO users (name) VALUES ('ada'), ('grace')")
//!     .unwrap();
//!
//! for row in executor.execute("SELECT * FROM users WHERE_INDEX pk id >= 1").unwrap() {
//!     println!("{:?}", row.unwrap());
//! }
//! ```

pub mod buffer;
pub mod catalog;
pub mod common;
pub mod execution;
pub mod index;
pub mod server;
pub mod sql;
pub mod storage;
pub mod table;
pub mod tuple;

// Re-export commonly used types at the crate root
pub use common::{DbConfig, DbError, Result};
pub use storage::heap::Pointer;
pub use tuple::{Column, DataType, Row, Schema, Value};
