//! Core B: bounded LRU response cache with readers-preference concurrency.

mod list;
mod lru;
mod shared;

pub use list::{Entry, EntryId, EntryList};
pub use lru::{CacheCore, MAX_CACHE_SIZE, MAX_OBJECT_SIZE};
pub use shared::SharedCache;
