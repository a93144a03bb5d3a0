//! Heap invariant prover.
//!
//! Walks both views of the heap: every block from the prologue to the
//! epilogue, and every node of the free list. The two walks must agree on
//! the number of free blocks. Checking reads the arena but never writes it.

use crate::error::InvariantError;
use crate::heap::allocator::{Heap, DSIZE, MIN_BLOCK_SIZE, WSIZE};

impl Heap {
    /// Proves the heap invariants; returns the first violation found.
    ///
    /// Checked, in order:
    /// 1. every block's header equals its footer (size and allocated bit);
    /// 2. every block size is a positive multiple of 8 and at least the
    ///    minimum block size, sentinels excepted;
    /// 3. no two adjacent blocks are both free (coalescing is complete);
    /// 4. every free-list node lies inside the heap and is marked free;
    /// 5. free-list links are consistent in both directions;
    /// 6. the heap walk and the free-list walk count the same free blocks.
    pub fn check_heap(&self) -> Result<(), InvariantError> {
        let heap_free = self.check_blocks()?;
        let list_free = self.check_free_list()?;
        if heap_free != list_free {
            return Err(InvariantError::new(format!(
                "{heap_free} free blocks in the heap but {list_free} on the free list"
            )));
        }
        Ok(())
    }

    /// Walks blocks from the prologue to the epilogue; returns the free count.
    fn check_blocks(&self) -> Result<usize, InvariantError> {
        let hi = self.hi();

        // Prologue: allocated, one double word, header equals footer.
        if self.block_size(self.base) != DSIZE || !self.is_allocated(self.base) {
            return Err(InvariantError::new("prologue sentinel is damaged"));
        }

        let mut free_count = 0;
        let mut prev_was_free = false;
        let mut bp = self.next_block(self.base);
        loop {
            if bp > hi || bp < self.base {
                return Err(InvariantError::new(format!(
                    "heap walk left the heap at offset {bp}"
                )));
            }
            let size = self.block_size(bp);
            let allocated = self.is_allocated(bp);

            // Epilogue: zero-size allocated header terminates the walk.
            if size == 0 {
                if !allocated {
                    return Err(InvariantError::new("epilogue sentinel is not allocated"));
                }
                if bp != hi {
                    return Err(InvariantError::new("epilogue sentinel is not at the heap end"));
                }
                break;
            }

            if bp % DSIZE != 0 {
                return Err(InvariantError::new(format!(
                    "block at offset {bp} is not double-word aligned"
                )));
            }
            if size % 8 != 0 || size < MIN_BLOCK_SIZE {
                return Err(InvariantError::new(format!(
                    "block at offset {bp} has illegal size {size}"
                )));
            }
            if bp + size > hi {
                return Err(InvariantError::new(format!(
                    "block at offset {bp} runs past the heap end"
                )));
            }

            let footer = self.arena.read_word(bp + size - DSIZE);
            let header = self.arena.read_word(bp - WSIZE);
            if footer != header {
                return Err(InvariantError::new(format!(
                    "header and footer disagree at offset {bp}"
                )));
            }

            if !allocated {
                if prev_was_free {
                    return Err(InvariantError::new(format!(
                        "two adjacent free blocks at offset {bp}"
                    )));
                }
                free_count += 1;
            }
            prev_was_free = !allocated;
            bp = self.next_block(bp);
        }
        Ok(free_count)
    }

    /// Walks the free list; returns the node count.
    fn check_free_list(&self) -> Result<usize, InvariantError> {
        let hi = self.hi();
        // A legal heap cannot hold more free blocks than this; anything past
        // it means the list is cyclic.
        let max_nodes = hi / MIN_BLOCK_SIZE + 1;

        let mut count = 0;
        let mut bp = self.free_root;
        while bp != 0 {
            if count > max_nodes {
                return Err(InvariantError::new("free list is cyclic"));
            }
            if bp <= self.base || bp + MIN_BLOCK_SIZE - DSIZE > hi {
                return Err(InvariantError::new(format!(
                    "free-list node {bp} is outside the heap"
                )));
            }
            if self.is_allocated(bp) {
                return Err(InvariantError::new(format!(
                    "free-list node {bp} is marked allocated"
                )));
            }
            let next = self.next_free(bp);
            if next != 0 && self.prev_free(next) != bp {
                return Err(InvariantError::new(format!(
                    "free-list node {next} does not point back to {bp}"
                )));
            }
            count += 1;
            bp = next;
        }
        Ok(count)
    }
}
