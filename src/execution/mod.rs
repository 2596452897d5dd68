//! Query execution: row streams between pipeline stages, `WHERE`
//! predicates, grouping with aggregates, and the statement executor.

mod aggregate;
mod executor;
mod expr;
mod group;
mod stream;

pub use aggregate::{AggFunc, Aggregator};
pub use executor::{Executor, QueryOutput};
pub use expr::Predicate;
pub use group::GroupTrie;
pub use stream::{spawn_producer, stream, StreamReader, StreamWriter};
