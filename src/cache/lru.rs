//! Bounded in-memory response cache with LRU eviction.
//!
//! ## Architecture
//!
//! ```text
//!   ┌───────────────────────────────────────────────────────────────┐
//!   │                        CacheCore                              │
//!   │                                                               │
//!   │   FxHashMap<Arc<str>, EntryId>       EntryList (recency)     │
//!   │   ┌──────────┬─────────┐             front          back      │
//!   │   │ url      │ EntryId │             ┌────┐ ◄──► ┌────┐       │
//!   │   │ /logo    │ ──────────────────►   │ e2 │      │ e1 │       │
//!   │   │ /index   │ ──────────────────►   └────┘      └────┘       │
//!   │   └──────────┴─────────┘             newest      oldest       │
//!   │                                      insertion   insertion    │
//!   │   remaining: bytes still available                            │
//!   └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! The map answers URL lookups and enforces URL uniqueness; the list records
//! insertion order and carries the per-entry access stamps that LRU eviction
//! ranks by. Recency is a property of the stamps, not of list position: a
//! hit refreshes the matched entry's stamp and leaves the list alone, and
//! `find_lru` scans the list for the smallest stamp.
//!
//! ## Capacity accounting
//!
//! `sum(entry.response_size) + remaining == MAX_CACHE_SIZE` at every public
//! boundary. Objects larger than [`MAX_OBJECT_SIZE`] are never admitted.
//! When an insertion does not fit, eviction deletes least-recently-used
//! entries until one more victim would make room, then repurposes that final
//! victim in place: its URL and bytes are replaced and the byte budget is
//! adjusted by the size difference, saving one unlink/relink pair.
//!
//! `CacheCore` is single-threaded; [`SharedCache`](crate::cache::SharedCache)
//! adds the readers-writers discipline on top.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::cache::list::{Entry, EntryId, EntryList};
use crate::error::InvariantError;

/// Total bytes of response data the cache may hold.
pub const MAX_CACHE_SIZE: usize = 1_049_000;
/// Largest single response the cache will admit.
pub const MAX_OBJECT_SIZE: usize = 102_400;

/// Single-threaded cache core: slot-table recency list, URL index, and the
/// remaining-byte budget.
#[derive(Debug)]
pub struct CacheCore {
    list: EntryList,
    index: FxHashMap<Arc<str>, EntryId>,
    remaining: usize,
}

impl CacheCore {
    /// Creates an empty cache with the full byte budget available.
    pub fn new() -> Self {
        Self {
            list: EntryList::new(),
            index: FxHashMap::default(),
            remaining: MAX_CACHE_SIZE,
        }
    }

    /// Number of live entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.list.len()
    }

    /// Returns `true` if the cache holds no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Bytes still available before eviction is needed.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.remaining
    }

    /// Looks up the entry stored under `url`.
    pub fn find(&self, url: &str) -> Option<&Entry> {
        let id = *self.index.get(url)?;
        self.list.get(id)
    }

    /// Stores `response` under `url` with the given access stamp.
    ///
    /// Returns `false` without touching the cache when the object is larger
    /// than [`MAX_OBJECT_SIZE`] or the URL is already present (the first
    /// writer wins). Evicts least-recently-used entries as needed.
    pub fn insert(&mut self, url: &str, response: Arc<[u8]>, stamp: u64) -> bool {
        let size = response.len();
        if size > MAX_OBJECT_SIZE {
            trace!(url, size, "object too large to cache");
            return false;
        }
        if self.index.contains_key(url) {
            trace!(url, "url already cached");
            return false;
        }
        let url: Arc<str> = Arc::from(url);

        if self.remaining >= size {
            let id = self.list.push_front(Entry::new(Arc::clone(&url), response, stamp));
            self.index.insert(url, id);
            self.remaining -= size;
            return true;
        }

        // Not enough room: free least-recently-used entries until a single
        // further victim would make the insertion fit, then repurpose that
        // victim in place instead of unlinking and reinserting.
        loop {
            let Some(victim) = self.find_lru() else {
                return false;
            };
            let Some(entry) = self.list.get_mut(victim) else {
                return false;
            };
            let victim_size = entry.response_size();

            if self.remaining + victim_size >= size {
                let old_url = std::mem::replace(&mut entry.url, Arc::clone(&url));
                entry.response = response;
                *entry.last_access.get_mut() = stamp;

                self.index.remove(old_url.as_ref());
                self.index.insert(url, victim);
                self.remaining = self.remaining + victim_size - size;
                debug!(
                    evicted = old_url.as_ref(),
                    slot = victim.index(),
                    "repurposing cache entry"
                );
                return true;
            }

            if let Some(evicted) = self.delete(victim) {
                debug!(evicted = evicted.url(), "evicting cache entry");
            }
        }
    }

    /// Returns the entry with the smallest access stamp, scanning the list
    /// from the front. Ties go to the first entry encountered.
    pub fn find_lru(&self) -> Option<EntryId> {
        let mut best: Option<(EntryId, u64)> = None;
        for (id, entry) in self.list.iter() {
            let stamp = entry.last_access();
            match best {
                Some((_, best_stamp)) if stamp >= best_stamp => {}
                _ => best = Some((id, stamp)),
            }
        }
        best.map(|(id, _)| id)
    }

    /// Unlinks the entry at `id`, returns its byte budget, and drops its
    /// storage.
    pub fn delete(&mut self, id: EntryId) -> Option<Entry> {
        let entry = self.list.remove(id)?;
        self.index.remove(entry.url());
        self.remaining += entry.response_size();
        Some(entry)
    }

    /// Iterates live entries from newest to oldest insertion.
    pub fn iter(&self) -> impl Iterator<Item = (EntryId, &Entry)> {
        self.list.iter()
    }

    /// Proves the cache invariants; returns the first violation found.
    ///
    /// Checked: the byte budget balances against the live entries, no URL
    /// appears twice, the index and the list agree on membership, and the
    /// list links are consistent in both directions.
    pub fn check_invariants(&self) -> Result<(), InvariantError> {
        self.list.validate_links()?;

        let mut total = 0;
        for (id, entry) in self.list.iter() {
            total += entry.response_size();
            match self.index.get(entry.url()) {
                Some(&indexed) if indexed == id => {}
                Some(_) => {
                    return Err(InvariantError::new(format!(
                        "url {:?} is indexed under a different entry",
                        entry.url()
                    )))
                }
                None => {
                    return Err(InvariantError::new(format!(
                        "url {:?} is live but not indexed",
                        entry.url()
                    )))
                }
            }
        }
        if self.index.len() != self.list.len() {
            return Err(InvariantError::new(
                "index and recency list disagree on entry count",
            ));
        }
        if total + self.remaining != MAX_CACHE_SIZE {
            return Err(InvariantError::new(format!(
                "byte budget out of balance: {total} cached + {} remaining != {MAX_CACHE_SIZE}",
                self.remaining
            )));
        }
        Ok(())
    }
}

impl Default for CacheCore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(size: usize, fill: u8) -> Arc<[u8]> {
        Arc::from(vec![fill; size].into_boxed_slice())
    }

    #[test]
    fn insert_then_find_returns_bytes() {
        let mut cache = CacheCore::new();
        assert!(cache.insert("http://a/", body(10, 1), 1));
        let entry = cache.find("http://a/").unwrap();
        assert_eq!(entry.response_size(), 10);
        assert_eq!(entry.response()[0], 1);
        assert!(cache.find("http://b/").is_none());
        cache.check_invariants().unwrap();
    }

    #[test]
    fn budget_tracks_insertions_and_deletions() {
        let mut cache = CacheCore::new();
        cache.insert("http://a/", body(1000, 0), 1);
        cache.insert("http://b/", body(500, 0), 2);
        assert_eq!(cache.remaining(), MAX_CACHE_SIZE - 1500);

        let id = *cache.index.get("http://a/").unwrap();
        cache.delete(id);
        assert_eq!(cache.remaining(), MAX_CACHE_SIZE - 500);
        cache.check_invariants().unwrap();
    }

    #[test]
    fn oversized_object_is_rejected() {
        let mut cache = CacheCore::new();
        assert!(!cache.insert("http://big/", body(MAX_OBJECT_SIZE + 1, 0), 1));
        assert!(cache.is_empty());
        assert_eq!(cache.remaining(), MAX_CACHE_SIZE);
    }

    #[test]
    fn duplicate_url_keeps_first_entry() {
        let mut cache = CacheCore::new();
        assert!(cache.insert("http://a/", body(10, 1), 1));
        assert!(!cache.insert("http://a/", body(20, 2), 2));
        assert_eq!(cache.find("http://a/").unwrap().response_size(), 10);
        cache.check_invariants().unwrap();
    }

    #[test]
    fn max_object_exactly_fits() {
        let mut cache = CacheCore::new();
        assert!(cache.insert("http://a/", body(MAX_OBJECT_SIZE, 0), 1));
        assert_eq!(cache.remaining(), MAX_CACHE_SIZE - MAX_OBJECT_SIZE);
    }

    #[test]
    fn find_lru_tracks_smallest_stamp() {
        let mut cache = CacheCore::new();
        cache.insert("http://a/", body(10, 0), 5);
        cache.insert("http://b/", body(10, 0), 3);
        cache.insert("http://c/", body(10, 0), 9);

        let lru = cache.find_lru().unwrap();
        assert_eq!(cache.list.get(lru).unwrap().url(), "http://b/");

        // A hit on b moves the minimum to a.
        cache.find("http://b/").unwrap().touch(10);
        let lru = cache.find_lru().unwrap();
        assert_eq!(cache.list.get(lru).unwrap().url(), "http://a/");
    }

    #[test]
    fn eviction_repurposes_final_victim_in_place() {
        let mut cache = CacheCore::new();
        // Twenty 52,000-byte objects leave 9,000 bytes of budget.
        for i in 0..20 {
            assert!(cache.insert(&format!("http://o/{i}"), body(52_000, 0), i as u64));
        }
        assert_eq!(cache.remaining(), MAX_CACHE_SIZE - 20 * 52_000);

        // A full-size object must delete the oldest entry and repurpose the
        // second-oldest in place.
        assert!(cache.insert("http://new/", body(MAX_OBJECT_SIZE, 7), 100));
        assert!(cache.find("http://o/0").is_none());
        assert!(cache.find("http://o/1").is_none());
        assert!(cache.find("http://o/2").is_some());
        assert_eq!(
            cache.find("http://new/").unwrap().response_size(),
            MAX_OBJECT_SIZE
        );
        assert_eq!(cache.len(), 19);
        assert_eq!(
            cache.remaining(),
            MAX_CACHE_SIZE - (18 * 52_000 + MAX_OBJECT_SIZE)
        );
        cache.check_invariants().unwrap();
    }

    #[test]
    fn eviction_respects_access_stamps() {
        let mut cache = CacheCore::new();
        for i in 0..10 {
            assert!(cache.insert(&format!("http://o/{i}"), body(MAX_OBJECT_SIZE, 0), i as u64));
        }
        // Refresh the oldest entry; the next eviction must pick o/1 instead.
        cache.find("http://o/0").unwrap().touch(50);

        assert!(cache.insert("http://new/", body(MAX_OBJECT_SIZE, 0), 100));
        assert!(cache.find("http://o/0").is_some());
        assert!(cache.find("http://o/1").is_none());
        cache.check_invariants().unwrap();
    }

    #[test]
    fn repurposed_victim_keeps_list_position() {
        let mut cache = CacheCore::new();
        for i in 0..10 {
            cache.insert(&format!("http://o/{i}"), body(MAX_OBJECT_SIZE, 0), i as u64);
        }
        cache.insert("http://new/", body(MAX_OBJECT_SIZE, 0), 100);

        // The new URL occupies the old victim's slot at the back of the
        // list rather than the front.
        let back_urls: Vec<_> = cache.iter().map(|(_, e)| e.url().to_string()).collect();
        assert_eq!(back_urls.last().map(String::as_str), Some("http://new/"));
        cache.check_invariants().unwrap();
    }
}
