//! Readers-preference concurrency wrapper around [`CacheCore`].
//!
//! Three primitives guard the core, matching the classic readers-writers
//! protocol (readers-preference):
//!
//! - the write gate, a binary [`Semaphore`] held by a writer for its whole
//!   insert/evict critical section, and held on behalf of all readers from
//!   the moment the first one enters until the last one leaves;
//! - the reader count lock, which serializes updates to the reader count;
//! - the timestamp lock, which serializes `last_access` stores done by
//!   readers on a hit.
//!
//! Readers run in parallel and a new reader may join while others are
//! inside; under sustained read load writers starve, which this workload
//! accepts. While a writer holds the gate no reader is inside the search
//! path.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::cache::lru::CacheCore;
use crate::error::InvariantError;
use crate::sync::Semaphore;

/// Thread-safe response cache: many concurrent readers, one writer.
#[derive(Debug)]
pub struct SharedCache {
    state: UnsafeCell<CacheCore>,
    /// Binary write gate; see the module docs for who holds it when.
    write_gate: Semaphore,
    /// Count of readers currently inside the search path.
    readers: Mutex<usize>,
    /// Serializes `last_access` stores made by readers.
    stamp_lock: Mutex<()>,
    /// Monotonic logical clock behind the access stamps.
    clock: AtomicU64,
}

// SAFETY: all access to `state` goes through the readers-writers protocol.
// `enter_read`/`exit_read` hold the write gate on behalf of every reader in
// the search path, so shared references handed to readers never coexist with
// the writer's exclusive reference, and writers (`insert`, `check_invariants`)
// take the gate for their whole critical section. The only field readers
// mutate is the atomic `last_access` stamp, stored under `stamp_lock`.
unsafe impl Sync for SharedCache {}

impl SharedCache {
    /// Creates an empty shared cache.
    pub fn new() -> Self {
        Self {
            state: UnsafeCell::new(CacheCore::new()),
            write_gate: Semaphore::new(1),
            readers: Mutex::new(0),
            stamp_lock: Mutex::new(()),
            clock: AtomicU64::new(0),
        }
    }

    /// Looks up `url`; on a hit, refreshes the entry's access stamp and
    /// returns a shared handle to the response bytes.
    ///
    /// The returned bytes stay valid even if eviction later drops the
    /// entry. Never allocates a cache entry: the only miss is `None`.
    pub fn lookup(&self, url: &str) -> Option<Arc<[u8]>> {
        self.enter_read();

        // SAFETY: between enter_read and exit_read the write gate is held on
        // behalf of this reader, so no exclusive reference to the core exists.
        let core = unsafe { &*self.state.get() };
        let hit = core.find(url).map(|entry| {
            let _stamp = self.stamp_lock.lock();
            entry.touch(self.clock.fetch_add(1, Ordering::Relaxed) + 1);
            Arc::clone(entry.response())
        });

        self.exit_read();
        hit
    }

    /// Stores `response` under `url`, evicting as needed.
    ///
    /// Writer-exclusive: holds the write gate for the whole insert/evict
    /// critical section. Returns `true` if the response was cached.
    pub fn insert(&self, url: &str, response: Arc<[u8]>) -> bool {
        self.write_gate.acquire();

        // Writers stamp under the gate, which already excludes readers.
        let stamp = self.clock.fetch_add(1, Ordering::Relaxed) + 1;
        // SAFETY: the write gate is held, so no reader holds a reference.
        let core = unsafe { &mut *self.state.get() };
        let stored = core.insert(url, response, stamp);

        self.write_gate.release();
        stored
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.read_with(CacheCore::len)
    }

    /// Returns `true` if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.read_with(CacheCore::is_empty)
    }

    /// Bytes still available before eviction is needed.
    pub fn remaining(&self) -> usize {
        self.read_with(CacheCore::remaining)
    }

    /// Number of readers currently inside the search path.
    pub fn reader_count(&self) -> usize {
        *self.readers.lock()
    }

    /// Proves the core invariants under the write gate.
    pub fn check_invariants(&self) -> Result<(), InvariantError> {
        self.write_gate.acquire();
        // SAFETY: the write gate is held, so no reader holds a reference.
        let result = unsafe { &*self.state.get() }.check_invariants();
        self.write_gate.release();
        result
    }

    /// Runs `f` on the core from inside the reader protocol.
    fn read_with<R>(&self, f: impl FnOnce(&CacheCore) -> R) -> R {
        self.enter_read();
        // SAFETY: as in `lookup`.
        let result = f(unsafe { &*self.state.get() });
        self.exit_read();
        result
    }

    fn enter_read(&self) {
        let mut readers = self.readers.lock();
        *readers += 1;
        if *readers == 1 {
            self.write_gate.acquire();
        }
    }

    fn exit_read(&self) {
        let mut readers = self.readers.lock();
        *readers -= 1;
        if *readers == 0 {
            self.write_gate.release();
        }
    }
}

impl Default for SharedCache {
    fn default() -> Self {
        Self::new()
    }
}
