mod allocator;
mod pointer;

pub use allocator::{Heap, Placement};
pub use pointer::{Pointer, POINTER_SIZE};
