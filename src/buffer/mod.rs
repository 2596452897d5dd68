mod cache_handle;
mod page_cache;

pub use cache_handle::*;
pub use page_cache::*;
