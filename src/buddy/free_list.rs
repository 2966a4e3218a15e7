//! Index-linked free lists
//!
//! One doubly linked list per order, threaded through the `prev`/`next`
//! fields of the page records themselves. The lists only keep their heads;
//! the nodes live in the metadata store, the same way pages live in the
//! caller's memory. A list is empty when its head equals the sentinel,
//! which is the total page count.

use super::buddy_block::{PageState, MAX_ORDER_LIMIT};
use super::page_store::{PageMetadataStore, StoreExt};

pub(crate) struct FreeLists {
    heads: [usize; MAX_ORDER_LIMIT],
    empty: usize,
}

impl FreeLists {
    /// Create empty lists whose sentinel is `empty`
    pub const fn new(empty: usize) -> Self {
        Self {
            heads: [empty; MAX_ORDER_LIMIT],
            empty,
        }
    }

    #[inline]
    pub fn empty(&self) -> usize {
        self.empty
    }

    #[inline]
    pub fn head(&self, order: usize) -> usize {
        self.heads[order]
    }

    #[inline]
    pub fn is_empty(&self, order: usize) -> bool {
        self.heads[order] == self.empty
    }

    /// Link a run of equally sized blocks `[beg, end)` in ascending order in
    /// front of the list for `order`. Every page of the run is first reset to
    /// an absorbed record so that non-head pages carry no stale links.
    pub fn push_run<S: PageMetadataStore + ?Sized>(
        &mut self,
        store: &mut S,
        beg: usize,
        end: usize,
        order: usize,
    ) {
        if beg >= end {
            return;
        }
        for index in beg..end {
            store.write(index, self.empty, self.empty, order, PageState::Absorbed);
        }

        let pages = 1 << order;
        let old_head = self.heads[order];
        let last = end - pages;
        let mut cur = beg;
        while cur < end {
            let prev = if cur == beg { self.empty } else { cur - pages };
            let next = if cur == last { old_head } else { cur + pages };
            store.write(cur, prev, next, order, PageState::Free);
            cur += pages;
        }
        if old_head != self.empty {
            store.link_prev(old_head, last);
        }
        self.heads[order] = beg;
    }

    /// Make `index` a free block of `order` at the front of its list.
    pub fn push_front<S: PageMetadataStore + ?Sized>(
        &mut self,
        store: &mut S,
        index: usize,
        order: usize,
    ) {
        let head = self.heads[order];
        store.write(index, self.empty, head, order, PageState::Free);
        if head != self.empty {
            store.link_prev(head, index);
        }
        self.heads[order] = index;
    }

    /// Make `first` and `second` free blocks of `order`, in that list order,
    /// at the front of the list.
    pub fn push_pair_front<S: PageMetadataStore + ?Sized>(
        &mut self,
        store: &mut S,
        first: usize,
        second: usize,
        order: usize,
    ) {
        let head = self.heads[order];
        store.write(first, self.empty, second, order, PageState::Free);
        store.write(second, first, head, order, PageState::Free);
        if head != self.empty {
            store.link_prev(head, second);
        }
        self.heads[order] = first;
    }

    /// Unlink `index` from the list of its recorded order.
    ///
    /// The page state is left untouched; callers immediately overwrite it.
    pub fn remove<S: PageMetadataStore + ?Sized>(&mut self, store: &mut S, index: usize) {
        let page = store.load(index);
        if page.prev != self.empty {
            store.link_next(page.prev, page.next);
        }
        if page.next != self.empty {
            store.link_prev(page.next, page.prev);
        }
        if self.heads[page.order] == index {
            self.heads[page.order] = page.next;
        }
        store.link_prev(index, self.empty);
        store.link_next(index, self.empty);
    }

    /// Iterate the block heads of one order, front to back
    pub fn iter<'a, S: PageMetadataStore + ?Sized>(
        &self,
        store: &'a S,
        order: usize,
    ) -> FreeListIter<'a, S> {
        FreeListIter {
            store,
            current: self.heads[order],
            empty: self.empty,
            visited: 0,
        }
    }
}

/// Iterator over the heads of one free list.
pub(crate) struct FreeListIter<'a, S: ?Sized> {
    store: &'a S,
    current: usize,
    empty: usize,
    visited: usize,
}

impl<S: PageMetadataStore + ?Sized> Iterator for FreeListIter<'_, S> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.current == self.empty {
            return None;
        }
        // a list can never hold more heads than there are pages
        assert!(
            self.visited < self.empty,
            "free list cycle detected at page {}",
            self.current
        );
        let index = self.current;
        self.current = self.store.next_of(index);
        self.visited += 1;
        Some(index)
    }
}
