//! Buddy block metadata
//!
//! Per-page records kept by the metadata store, plus the order and buddy
//! index arithmetic shared by the allocator and its free lists.

use crate::{AllocError, AllocResult};

/// Default maximum order: blocks of up to 2^11 pages
pub const DEFAULT_MAX_ORDER: usize = 11;

/// Exclusive upper bound for `MAX_ORDER`; also the size of the free-list head table
pub const MAX_ORDER_LIMIT: usize = 20;

/// State of a single page record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageState {
    /// Head of a free block, linked into the free list of its order.
    Free,
    /// Head of a block handed out to a caller.
    Used,
    /// Not a block head: the page was absorbed into a larger block by a merge
    /// (or was never split out of one). Its links and order are stale.
    #[default]
    Absorbed,
}

/// Per-page record.
///
/// `prev`/`next` are only meaningful while `state` is [`PageState::Free`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageMeta<I> {
    pub prev: I,
    pub next: I,
    pub order: u8,
    pub state: PageState,
}

impl<I> PageMeta<I> {
    pub const fn new(prev: I, next: I, order: u8, state: PageState) -> Self {
        Self {
            prev,
            next,
            order,
            state,
        }
    }
}

/// Number of pages in a block of `order`.
#[inline]
pub const fn order_pages(order: usize) -> usize {
    1 << order
}

/// Smallest order whose block holds `count` pages.
pub(crate) fn order_for_count(count: usize) -> AllocResult<usize> {
    if count == 0 {
        return Err(AllocError::InvalidParam);
    }
    count
        .checked_next_power_of_two()
        .map(|pages| pages.trailing_zeros() as usize)
        .ok_or(AllocError::InvalidParam)
}

/// Index of the buddy of the block at `index` with the given `order`.
///
/// An even block (`index / 2^order` even) pairs with the block to its right,
/// which only exists when the merged block would still end inside
/// `total_pages`. An odd block always has its buddy on the left.
#[inline]
pub(crate) fn buddy_index(index: usize, order: usize, total_pages: usize) -> Option<usize> {
    let pages = order_pages(order);
    if (index / pages) % 2 == 0 {
        if index + pages * 2 <= total_pages {
            Some(index + pages)
        } else {
            None
        }
    } else {
        debug_assert!(index >= pages);
        Some(index - pages)
    }
}
