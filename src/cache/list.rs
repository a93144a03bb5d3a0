//! Cache entries and the recency list that threads them together.
//!
//! Entries live in a slot table (`Vec<Option<Entry>>` with freed slots
//! recycled through a free-slot stack), so an [`EntryId`] stays valid until
//! its entry is removed and no entry ever moves. The doubly linked list is
//! expressed through `prev`/`next` ids stored in the entries themselves;
//! insertion is at the front, matching the cache's publication order.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Stable handle to a cache entry in the slot table.
///
/// Ids remain valid until the referenced entry is deleted; after that the
/// numeric index may be reused by a later insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(pub(crate) usize);

impl EntryId {
    /// Returns the underlying slot index.
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

/// One cached response: the request-URI it was fetched for, the response
/// bytes, and the access stamp eviction ranks by.
///
/// `last_access` is atomic so concurrent readers can stamp a hit through a
/// shared reference; every store still happens under the cache's timestamp
/// lock (readers) or while the writer gate is held (writers).
#[derive(Debug)]
pub struct Entry {
    pub(crate) url: Arc<str>,
    pub(crate) response: Arc<[u8]>,
    pub(crate) last_access: AtomicU64,
    prev: Option<EntryId>,
    next: Option<EntryId>,
}

impl Entry {
    pub(crate) fn new(url: Arc<str>, response: Arc<[u8]>, stamp: u64) -> Self {
        Self {
            url,
            response,
            last_access: AtomicU64::new(stamp),
            prev: None,
            next: None,
        }
    }

    /// The request-URI this entry was stored under.
    #[inline]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Shared handle to the cached response bytes.
    #[inline]
    pub fn response(&self) -> &Arc<[u8]> {
        &self.response
    }

    /// Number of response bytes this entry accounts for.
    #[inline]
    pub fn response_size(&self) -> usize {
        self.response.len()
    }

    /// The entry's current access stamp.
    #[inline]
    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    /// Refreshes the access stamp. Callers serialize stores through the
    /// cache's timestamp lock.
    #[inline]
    pub(crate) fn touch(&self, stamp: u64) {
        self.last_access.store(stamp, Ordering::Relaxed);
    }
}

/// Slot table plus the doubly linked recency list over it.
#[derive(Debug, Default)]
pub struct EntryList {
    slots: Vec<Option<Entry>>,
    free_slots: Vec<usize>,
    len: usize,
    head: Option<EntryId>,
    tail: Option<EntryId>,
}

impl EntryList {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no entries are live.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The id at the front of the list, if any.
    #[inline]
    pub fn front(&self) -> Option<EntryId> {
        self.head
    }

    /// Borrows the entry at `id`, if live.
    pub fn get(&self, id: EntryId) -> Option<&Entry> {
        self.slots.get(id.0).and_then(|slot| slot.as_ref())
    }

    /// Mutably borrows the entry at `id`, if live.
    pub fn get_mut(&mut self, id: EntryId) -> Option<&mut Entry> {
        self.slots.get_mut(id.0).and_then(|slot| slot.as_mut())
    }

    /// Inserts an entry at the front of the list and returns its id.
    pub fn push_front(&mut self, mut entry: Entry) -> EntryId {
        entry.prev = None;
        entry.next = self.head;
        let id = self.store(entry);

        if let Some(old_head) = self.head {
            if let Some(node) = self.get_mut(old_head) {
                node.prev = Some(id);
            }
        } else {
            self.tail = Some(id);
        }
        self.head = Some(id);
        id
    }

    /// Unlinks the entry at `id` and returns it, freeing its slot.
    pub fn remove(&mut self, id: EntryId) -> Option<Entry> {
        self.detach(id)?;
        let entry = self.slots.get_mut(id.0)?.take()?;
        self.free_slots.push(id.0);
        self.len -= 1;
        Some(entry)
    }

    /// Iterates entries from front to back.
    pub fn iter(&self) -> EntryIter<'_> {
        EntryIter {
            list: self,
            current: self.head,
        }
    }

    fn store(&mut self, entry: Entry) -> EntryId {
        let idx = if let Some(idx) = self.free_slots.pop() {
            self.slots[idx] = Some(entry);
            idx
        } else {
            self.slots.push(Some(entry));
            self.slots.len() - 1
        };
        self.len += 1;
        EntryId(idx)
    }

    fn detach(&mut self, id: EntryId) -> Option<()> {
        let (prev, next) = {
            let entry = self.get(id)?;
            (entry.prev, entry.next)
        };

        match prev {
            Some(prev_id) => {
                if let Some(prev_entry) = self.get_mut(prev_id) {
                    prev_entry.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(next_id) => {
                if let Some(next_entry) = self.get_mut(next_id) {
                    next_entry.prev = prev;
                }
            }
            None => self.tail = prev,
        }

        if let Some(entry) = self.get_mut(id) {
            entry.prev = None;
            entry.next = None;
        }
        Some(())
    }

    /// Walks the links front to back and reports the first inconsistency.
    pub(crate) fn validate_links(&self) -> Result<(), crate::error::InvariantError> {
        use crate::error::InvariantError;

        if self.head.is_none() || self.tail.is_none() {
            if self.head.is_some() || self.tail.is_some() || self.len != 0 {
                return Err(InvariantError::new("empty list has a dangling end"));
            }
            return Ok(());
        }

        let mut count = 0;
        let mut prev = None;
        let mut current = self.head;
        while let Some(id) = current {
            let entry = self
                .get(id)
                .ok_or_else(|| InvariantError::new(format!("dead slot {} is linked", id.0)))?;
            if entry.prev != prev {
                return Err(InvariantError::new(format!(
                    "entry {} back-link does not match its predecessor",
                    id.0
                )));
            }
            count += 1;
            if count > self.len {
                return Err(InvariantError::new("recency list is cyclic"));
            }
            prev = Some(id);
            current = entry.next;
        }
        if prev != self.tail {
            return Err(InvariantError::new("tail does not terminate the list"));
        }
        if count != self.len {
            return Err(InvariantError::new(format!(
                "list walk found {count} entries but {len} are live",
                len = self.len
            )));
        }
        Ok(())
    }
}

/// Front-to-back iterator over `(EntryId, &Entry)`.
pub struct EntryIter<'a> {
    list: &'a EntryList,
    current: Option<EntryId>,
}

impl<'a> Iterator for EntryIter<'a> {
    type Item = (EntryId, &'a Entry);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.current?;
        let entry = self.list.get(id)?;
        self.current = entry.next;
        Some((id, entry))
    }
}
