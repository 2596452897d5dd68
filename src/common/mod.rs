pub mod codec;
mod config;
mod error;
mod types;

pub use codec::Marshal;
pub use config::*;
pub use error::*;
pub use types::*;
