//! Core A: explicit-free-list heap allocator over an sbrk-style arena.

mod allocator;
mod arena;
mod check;

pub use allocator::{BlockPtr, Heap};
pub use arena::{SbrkArena, DEFAULT_HEAP_LIMIT};
