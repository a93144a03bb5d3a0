//! proxykit: an explicit-free-list heap allocator and a concurrent caching
//! HTTP/1.0 forward proxy.
//!
//! See `DESIGN.md` for internal architecture and invariants.

pub mod cache;
pub mod error;
pub mod heap;
pub mod proxy;
pub mod sync;
