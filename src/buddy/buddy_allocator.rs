//! Buddy allocator over page indices
//!
//! Hands out naturally aligned power-of-two runs of page indices. Free
//! blocks are kept in per-order lists threaded through the caller's page
//! metadata store; freeing a block performs at most one coalescing attempt
//! per order, so a single `free` is bounded by `MAX_ORDER` merge steps.

use crate::{align_down, is_aligned, AllocError, AllocResult, IdAllocator};

#[cfg(feature = "log")]
use log::{debug, warn};

use super::{
    buddy_block::{buddy_index, order_for_count, order_pages, PageState, MAX_ORDER_LIMIT},
    free_list::FreeLists,
    page_store::{PageIndex, PageMetadataStore, StoreExt},
    DEFAULT_MAX_ORDER,
};

#[cfg(feature = "tracking")]
use super::stats::{BuddyStats, MemoryStatsReporter};

/// A block found by probing the page records: its head, order and state.
#[derive(Debug, Clone, Copy)]
struct Block {
    head: usize,
    order: usize,
    state: PageState,
}

impl Block {
    fn end(&self) -> usize {
        self.head + order_pages(self.order)
    }
}

/// Buddy allocator managing `total_pages` page indices.
///
/// All per-page bookkeeping goes through the metadata store `S`; the
/// allocator itself only owns the free-list heads and two counters. It does
/// no locking: shared use must be serialized by the caller, see
/// [`LockedBuddyAllocator`](crate::LockedBuddyAllocator).
pub struct BuddyAllocator<S: PageMetadataStore, const MAX_ORDER: usize = DEFAULT_MAX_ORDER> {
    store: S,
    total_pages: usize,
    free_pages: usize,
    free_lists: FreeLists,
}

impl<S: PageMetadataStore, const MAX_ORDER: usize> BuddyAllocator<S, MAX_ORDER> {
    const ORDER_IN_RANGE: () = assert!(MAX_ORDER < MAX_ORDER_LIMIT, "order too large");

    /// Create an allocator over pages `[0, total_pages)`.
    ///
    /// The largest prefix that is a multiple of `2^MAX_ORDER` pages starts out
    /// as top-order blocks; the rest starts as single pages and is then
    /// coalesced as far as buddy alignment allows.
    ///
    /// # Panics
    ///
    /// Panics if the store holds fewer than `total_pages` records, or if the
    /// store's index type cannot represent `total_pages`.
    pub fn new(total_pages: usize, store: S) -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::ORDER_IN_RANGE;

        assert!(
            total_pages <= S::Index::MAX_VALUE,
            "{} pages exceed the range of the page index type",
            total_pages
        );
        assert!(
            store.capacity() >= total_pages,
            "metadata store holds {} pages, {} required",
            store.capacity(),
            total_pages
        );

        let mut this = Self {
            store,
            total_pages,
            free_pages: total_pages,
            free_lists: FreeLists::new(total_pages),
        };

        let top_pages = order_pages(MAX_ORDER);
        let aligned_pages = total_pages / top_pages * top_pages;
        this.free_lists
            .push_run(&mut this.store, 0, aligned_pages, MAX_ORDER);
        this.free_lists
            .push_run(&mut this.store, aligned_pages, total_pages, 0);
        this.merge(0, usize::MAX);

        debug!(
            "buddy: {} pages, {} in order-{} blocks, {} trailing",
            total_pages,
            aligned_pages,
            MAX_ORDER,
            total_pages - aligned_pages
        );
        this
    }

    /// Allocate a block of at least `count` pages.
    ///
    /// `count` is rounded up to the next power of two and the returned index
    /// is aligned to the block size.
    pub fn alloc(&mut self, count: usize) -> AllocResult<S::Index> {
        let order = order_for_count(count)?;
        self.alloc_order(order)
    }

    /// Allocate a block of at least `count` pages whose index is a multiple of
    /// `align_pages`.
    pub fn alloc_aligned(&mut self, count: usize, align_pages: usize) -> AllocResult<S::Index> {
        if !align_pages.is_power_of_two() {
            return Err(AllocError::InvalidParam);
        }
        let order = order_for_count(count)?.max(align_pages.trailing_zeros() as usize);
        self.alloc_order(order)
    }

    fn alloc_order(&mut self, order: usize) -> AllocResult<S::Index> {
        if order > MAX_ORDER {
            debug!(
                "buddy: order {} exceeds maximum order {}",
                order, MAX_ORDER
            );
            return Err(AllocError::InvalidParam);
        }

        let Some(top) = (order..=MAX_ORDER).find(|&o| !self.free_lists.is_empty(o)) else {
            debug!(
                "buddy: allocation failure: {} pages, {} of {} free",
                order_pages(order),
                self.free_pages,
                self.total_pages
            );
            #[cfg(feature = "tracking")]
            MemoryStatsReporter::print_alloc_failure_stats(&self.stats(), order_pages(order));
            return Err(AllocError::NoMemory);
        };

        for o in (order + 1..=top).rev() {
            self.split(self.free_lists.head(o));
        }

        let index = self.free_lists.head(order);
        debug_assert_ne!(index, self.free_lists.empty());
        debug_assert!(is_aligned(index, order_pages(order)));
        self.free_lists.remove(&mut self.store, index);
        self.store.mark(index, PageState::Used);

        let pages = order_pages(order);
        debug_assert!(self.free_pages >= pages);
        self.free_pages -= pages;
        Ok(S::Index::from_usize(index))
    }

    /// Return a block previously handed out by `alloc`, `alloc_aligned` or
    /// `alloc_at`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not the head of a block currently in use
    /// (double free, never allocated, or an interior page of a block).
    pub fn free(&mut self, index: S::Index) {
        let index = index.into_usize();
        assert!(
            index < self.total_pages,
            "page {} out of range ({} pages)",
            index,
            self.total_pages
        );
        let page = self.store.load(index);
        assert!(
            page.state == PageState::Used,
            "freeing page {} which is not an allocated block ({:?})",
            index,
            page.state
        );

        self.free_lists.push_front(&mut self.store, index, page.order);
        self.merge(page.order, 1);

        self.free_pages += order_pages(page.order);
        debug_assert!(self.free_pages <= self.total_pages);
    }

    /// Reserve exactly the pages `[index, index + count)`.
    ///
    /// The range is covered by the largest aligned blocks that fit inside it;
    /// each of them is marked used and can later be returned with `free` at its
    /// own head index. Free blocks straddling the range edges are split and
    /// their outside parts stay free.
    ///
    /// Fails with [`AllocError::MemoryOverlap`] and changes nothing if any
    /// page of the range is already in use.
    pub fn alloc_at(&mut self, index: S::Index, count: usize) -> AllocResult {
        let start = index.into_usize();
        let end = match start.checked_add(count) {
            Some(end) if count > 0 && end <= self.total_pages => end,
            _ => {
                warn!(
                    "buddy: alloc_at: range of {} pages at {} outside [0, {})",
                    count, start, self.total_pages
                );
                return Err(AllocError::InvalidParam);
            }
        };

        let mut cur = start;
        while cur < end {
            match self.block_containing(cur) {
                Some(block) if block.state == PageState::Free => cur = block.end(),
                _ => {
                    warn!(
                        "buddy: alloc_at: page {} of [{}, {}) is already in use",
                        cur, start, end
                    );
                    return Err(AllocError::MemoryOverlap);
                }
            }
        }

        let mut cur = start;
        while cur < end {
            let Some(block) = self.block_containing(cur) else {
                unreachable!("page {} lost its block while reserving", cur);
            };
            self.free_lists.remove(&mut self.store, block.head);
            self.carve(block.head, block.order, start, end);
            cur = block.end();
        }
        Ok(())
    }

    /// Whether `page` lies inside a block that is currently in use.
    pub fn is_allocated(&self, page: usize) -> bool {
        self.used_block(page).is_some()
    }

    /// The block in use that covers `page`, as its head index and size in pages.
    pub fn used_block(&self, page: usize) -> Option<(S::Index, usize)> {
        if page >= self.total_pages {
            return None;
        }
        self.block_containing(page)
            .filter(|block| block.state == PageState::Used)
            .map(|block| (S::Index::from_usize(block.head), order_pages(block.order)))
    }

    /// Number of free pages.
    pub fn free_pages(&self) -> usize {
        self.free_pages
    }

    /// Number of pages managed by the allocator.
    pub fn total_pages(&self) -> usize {
        self.total_pages
    }

    /// Recount the free pages by walking every free list.
    ///
    /// Must always equal [`free_pages`](Self::free_pages).
    pub fn debug_free_pages(&self) -> usize {
        (0..=MAX_ORDER)
            .map(|order| self.free_lists.iter(&self.store, order).count() * order_pages(order))
            .sum()
    }

    /// Get statistics for the allocator
    #[cfg(feature = "tracking")]
    pub fn stats(&self) -> BuddyStats {
        let mut stats = BuddyStats::new();
        stats.total_pages = self.total_pages;

        for order in 0..=MAX_ORDER {
            let block_count = self.free_lists.iter(&self.store, order).count();
            stats.free_blocks_by_order[order] = block_count;
            stats.free_pages += block_count * order_pages(order);
        }

        stats.used_pages = stats.total_pages.saturating_sub(stats.free_pages);
        stats
    }

    /// Borrow the metadata store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Give back the metadata store
    pub fn into_store(self) -> S {
        self.store
    }

    /// Coalesce free blocks, starting at `from_order`.
    ///
    /// At each order below `MAX_ORDER` at most `budget` list entries are
    /// examined, starting from the list head. A free block whose buddy is a
    /// free block of the same order is merged with it; the lower index becomes
    /// the head of the merged block and the upper one is absorbed.
    fn merge(&mut self, from_order: usize, budget: usize) {
        for order in from_order..MAX_ORDER {
            let mut remaining = budget;
            let mut cur = self.free_lists.head(order);
            while cur != self.free_lists.empty() && remaining > 0 {
                remaining -= 1;
                let index = cur;
                let page = self.store.load(index);
                cur = page.next;

                if page.state != PageState::Free {
                    continue;
                }
                let Some(buddy) = buddy_index(index, page.order, self.total_pages) else {
                    continue;
                };
                let buddy_page = self.store.load(buddy);
                if buddy_page.state != PageState::Free || buddy_page.order != page.order {
                    // buddy is in use or still split
                    continue;
                }
                debug_assert_eq!(page.order, order);

                if cur == buddy {
                    cur = buddy_page.next;
                }

                self.free_lists.remove(&mut self.store, index);
                self.free_lists.remove(&mut self.store, buddy);
                let (low, high) = if buddy < index {
                    (buddy, index)
                } else {
                    (index, buddy)
                };
                self.free_lists.push_front(&mut self.store, low, order + 1);
                self.store.mark_order(high, order + 1);
                self.store.mark(high, PageState::Absorbed);
            }
        }
    }

    /// Split the free block at `index` into its two halves, both put at the
    /// front of the next lower list with the lower half first.
    fn split(&mut self, index: usize) {
        let page = self.store.load(index);
        assert!(
            page.order > 0 && page.state == PageState::Free,
            "splitting page {} of order {} in state {:?}",
            index,
            page.order,
            page.state
        );
        self.free_lists.remove(&mut self.store, index);

        let lower = page.order - 1;
        match buddy_index(index, lower, self.total_pages) {
            Some(buddy) => {
                debug_assert_eq!(self.store.load(buddy).state, PageState::Absorbed);
                let (first, second) = if buddy < index {
                    (buddy, index)
                } else {
                    (index, buddy)
                };
                self.free_lists
                    .push_pair_front(&mut self.store, first, second, lower);
            }
            None => self.free_lists.push_front(&mut self.store, index, lower),
        }
    }

    /// Cut the detached block `[head, head + 2^order)` along `[start, end)`:
    /// parts inside the range become used blocks, parts outside go back to
    /// the free lists, and blocks crossing an edge are halved again.
    fn carve(&mut self, head: usize, order: usize, start: usize, end: usize) {
        let pages = order_pages(order);
        if head >= start && head + pages <= end {
            let empty = self.free_lists.empty();
            self.store.write(head, empty, empty, order, PageState::Used);
            self.free_pages -= pages;
        } else if head + pages <= start || head >= end {
            self.free_lists.push_front(&mut self.store, head, order);
        } else {
            debug_assert!(order > 0);
            let half = pages / 2;
            self.carve(head, order - 1, start, end);
            self.carve(head + half, order - 1, start, end);
        }
    }

    /// Find the free or used block covering `page` by probing the aligned
    /// candidate head at every order.
    fn block_containing(&self, page: usize) -> Option<Block> {
        (0..=MAX_ORDER).find_map(|order| {
            let head = align_down(page, order_pages(order));
            let meta = self.store.load(head);
            (meta.state != PageState::Absorbed && meta.order == order).then_some(Block {
                head,
                order,
                state: meta.state,
            })
        })
    }
}

impl<S: PageMetadataStore, const MAX_ORDER: usize> IdAllocator for BuddyAllocator<S, MAX_ORDER> {
    fn alloc_id(&mut self, count: usize, alignment: usize) -> AllocResult<usize> {
        self.alloc_aligned(count, alignment.max(1))
            .map(PageIndex::into_usize)
    }

    fn dealloc_id(&mut self, start_id: usize, count: usize) {
        if start_id < self.total_pages {
            let order = self.store.load(start_id).order;
            if order_for_count(count) != Ok(order) {
                warn!(
                    "buddy: dealloc_id({}, {}) frees an order-{} block",
                    start_id, count, order
                );
            }
        }
        self.free(S::Index::from_usize(start_id));
    }

    fn is_allocated(&self, id: usize) -> bool {
        BuddyAllocator::is_allocated(self, id)
    }

    fn alloc_fixed_id(&mut self, id: usize) -> AllocResult {
        if id >= self.total_pages {
            return Err(AllocError::InvalidParam);
        }
        self.alloc_at(S::Index::from_usize(id), 1)
    }

    fn size(&self) -> usize {
        self.total_pages
    }

    fn used(&self) -> usize {
        self.total_pages - self.free_pages
    }

    fn available(&self) -> usize {
        self.free_pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buddy::page_store::VecStore;
    use alloc::vec::Vec;

    type TestBuddy = BuddyAllocator<VecStore<u32>>;

    fn new_buddy(pages: usize) -> TestBuddy {
        BuddyAllocator::new(pages, VecStore::new(pages))
    }

    fn free_heads(buddy: &TestBuddy, order: usize) -> Vec<usize> {
        buddy.free_lists.iter(&buddy.store, order).collect()
    }

    #[test]
    fn test_init_aligned_prefix_and_trailing_merge() {
        // 2 * 2048 top blocks plus 13 trailing pages: 8 + 4 + 1
        let buddy = new_buddy(2 * 2048 + 13);
        assert_eq!(free_heads(&buddy, 11), [0, 2048]);
        assert_eq!(free_heads(&buddy, 3), [4096]);
        assert_eq!(free_heads(&buddy, 2), [4104]);
        assert_eq!(free_heads(&buddy, 0), [4108]);
        assert_eq!(buddy.free_pages(), 2 * 2048 + 13);
        assert_eq!(buddy.debug_free_pages(), buddy.free_pages());
    }

    #[test]
    fn test_init_small_arena() {
        let buddy = new_buddy(5);
        assert_eq!(free_heads(&buddy, 2), [0]);
        assert_eq!(free_heads(&buddy, 0), [4]);
        assert_eq!(buddy.debug_free_pages(), 5);

        let empty = new_buddy(0);
        assert_eq!(empty.free_pages(), 0);
        assert_eq!(empty.debug_free_pages(), 0);
    }

    #[test]
    fn test_alloc_splits_lower_half_first() {
        let mut buddy = new_buddy(2048);
        let index = buddy.alloc(1).unwrap();
        assert_eq!(index, 0);
        for order in 0..11 {
            assert_eq!(free_heads(&buddy, order), [1 << order]);
        }
        assert_eq!(buddy.store.load(0).state, PageState::Used);
        assert_eq!(buddy.free_pages(), 2047);
    }

    #[test]
    fn test_free_merges_one_step_per_order() {
        let mut buddy = new_buddy(2048);
        let index = buddy.alloc(1).unwrap();
        buddy.free(index);
        // each order's head is the block that just merged, so the cascade
        // climbs all the way back up
        assert_eq!(free_heads(&buddy, 11), [0]);
        for order in 0..11 {
            assert!(free_heads(&buddy, order).is_empty());
        }
        assert_eq!(buddy.store.load(1024).state, PageState::Absorbed);
        assert_eq!(buddy.store.load(1024).order, 11);
    }

    #[test]
    fn test_lazy_merge_defers_unrelated_pairs() {
        let mut buddy = new_buddy(16);
        let a = buddy.alloc(1).unwrap();
        let b = buddy.alloc(1).unwrap();
        let c = buddy.alloc(1).unwrap();
        assert_eq!((a, b, c), (0, 1, 2));

        buddy.free(b);
        buddy.free(c);
        // 2 merges with 3; 1 is still alone at order 0
        assert_eq!(free_heads(&buddy, 0), [1]);
        assert_eq!(free_heads(&buddy, 1), [2]);
        buddy.free(a);
        assert_eq!(free_heads(&buddy, 4), [0]);
        assert_eq!(buddy.debug_free_pages(), 16);
    }

    #[test]
    fn test_alloc_rounds_up_and_aligns() {
        let mut buddy = new_buddy(4096);
        let a = buddy.alloc(3).unwrap();
        assert_eq!(buddy.free_pages(), 4092);
        let b = buddy.alloc(31).unwrap();
        assert_eq!(b % 32, 0);
        assert_eq!(buddy.free_pages(), 4092 - 32);
        let c = buddy.alloc_aligned(1, 64).unwrap();
        assert_eq!(c % 64, 0);
        assert_eq!(buddy.free_pages(), 4092 - 32 - 64);
        buddy.free(a);
        buddy.free(b);
        buddy.free(c);
        assert_eq!(buddy.free_pages(), 4096);
        assert_eq!(buddy.debug_free_pages(), 4096);
    }

    #[test]
    fn test_alloc_rejects_bad_requests() {
        let mut buddy = new_buddy(8192);
        assert_eq!(buddy.alloc(0), Err(AllocError::InvalidParam));
        assert_eq!(buddy.alloc(2049), Err(AllocError::InvalidParam));
        assert_eq!(buddy.alloc_aligned(1, 3), Err(AllocError::InvalidParam));
        assert_eq!(buddy.alloc_aligned(1, 4096), Err(AllocError::InvalidParam));
        assert_eq!(buddy.free_pages(), 8192);
    }

    #[test]
    fn test_exhaustion_has_no_side_effects() {
        let mut buddy = new_buddy(6);
        let a = buddy.alloc(4).unwrap();
        assert_eq!(buddy.alloc(4), Err(AllocError::NoMemory));
        let b = buddy.alloc(2).unwrap();
        assert_eq!(buddy.alloc(1), Err(AllocError::NoMemory));
        assert_eq!(buddy.free_pages(), 0);
        buddy.free(a);
        buddy.free(b);
        assert_eq!(buddy.debug_free_pages(), 6);
    }

    #[test]
    #[should_panic(expected = "not an allocated block")]
    fn test_double_free_panics() {
        let mut buddy = new_buddy(64);
        let index = buddy.alloc(2).unwrap();
        buddy.free(index);
        buddy.free(index);
    }

    #[test]
    #[should_panic(expected = "not an allocated block")]
    fn test_free_interior_page_panics() {
        let mut buddy = new_buddy(64);
        let index = buddy.alloc(4).unwrap();
        buddy.free(index + 2);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_free_out_of_range_panics() {
        let mut buddy = new_buddy(64);
        buddy.free(64);
    }

    #[test]
    #[should_panic(expected = "metadata store holds")]
    fn test_store_too_small_panics() {
        let _ = TestBuddy::new(64, VecStore::new(32));
    }

    #[test]
    #[should_panic(expected = "range of the page index type")]
    fn test_index_type_too_narrow_panics() {
        let _: BuddyAllocator<VecStore<u16>> = BuddyAllocator::new(70_000, VecStore::new(70_000));
    }

    #[test]
    fn test_alloc_at_splits_around_range() {
        let mut buddy = new_buddy(16);
        buddy.alloc_at(5, 6).unwrap();
        assert_eq!(buddy.free_pages(), 10);
        assert_eq!(buddy.debug_free_pages(), 10);
        for page in 0..16 {
            assert_eq!(buddy.is_allocated(page), (5..11).contains(&page), "page {}", page);
        }
        // [5,6) [6,8) [8,10) [10,11) are individual blocks
        assert_eq!(buddy.store.load(5).order, 0);
        assert_eq!(buddy.store.load(6).order, 1);
        assert_eq!(buddy.store.load(8).order, 1);
        assert_eq!(buddy.store.load(10).order, 0);

        assert_eq!(buddy.used_block(7), Some((6, 2)));
        assert_eq!(buddy.used_block(11), None);
        assert_eq!(buddy.used_block(16), None);

        assert_eq!(buddy.alloc_at(10, 2), Err(AllocError::MemoryOverlap));
        assert_eq!(buddy.free_pages(), 10);

        for head in [5, 6, 8, 10] {
            buddy.free(head);
        }
        assert_eq!(buddy.debug_free_pages(), 16);
    }

    #[test]
    fn test_alloc_at_invalid_range() {
        let mut buddy = new_buddy(16);
        assert_eq!(buddy.alloc_at(0, 0), Err(AllocError::InvalidParam));
        assert_eq!(buddy.alloc_at(15, 2), Err(AllocError::InvalidParam));
        assert_eq!(buddy.alloc_at(16, 1), Err(AllocError::InvalidParam));
        assert_eq!(buddy.free_pages(), 16);
    }

    #[test]
    fn test_alloc_at_whole_free_block() {
        let mut buddy = new_buddy(4096);
        buddy.alloc_at(2048, 2048).unwrap();
        assert_eq!(buddy.store.load(2048).state, PageState::Used);
        assert_eq!(buddy.store.load(2048).order, 11);
        assert_eq!(free_heads(&buddy, 11), [0]);
        assert_eq!(buddy.alloc(2048), Ok(0));
        assert_eq!(buddy.alloc(1), Err(AllocError::NoMemory));
    }

    #[test]
    fn test_id_allocator() {
        let mut buddy = new_buddy(128);
        let id = buddy.alloc_id(3, 8).unwrap();
        assert_eq!(id % 8, 0);
        assert_eq!(IdAllocator::used(&buddy), 8);
        assert!(IdAllocator::is_allocated(&buddy, id + 7));
        assert!(!IdAllocator::is_allocated(&buddy, id + 8));

        buddy.alloc_fixed_id(100).unwrap();
        assert_eq!(buddy.alloc_fixed_id(100), Err(AllocError::MemoryOverlap));
        assert_eq!(buddy.alloc_fixed_id(128), Err(AllocError::InvalidParam));
        assert_eq!(buddy.available(), 128 - 8 - 1);

        buddy.dealloc_id(id, 3);
        buddy.dealloc_id(100, 1);
        assert_eq!(buddy.available(), buddy.size());
    }
}
