mod data_type;
pub mod datetime;
mod row;
mod schema;
mod value;

pub use data_type::DataType;
pub use row::Row;
pub use schema::{Column, Schema};
pub use value::Value;
