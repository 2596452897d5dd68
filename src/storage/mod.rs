pub mod disk;
pub mod heap;
