//! Page metadata storage
//!
//! The allocator keeps no per-page state of its own. Every page record lives
//! in a [`PageMetadataStore`] owned by the caller, which lets the same engine
//! run over a plain array, a memory-mapped descriptor table or any other
//! representation.

use alloc::vec::Vec;
use core::fmt::Debug;

use super::buddy_block::{PageMeta, PageState};

/// Unsigned integer type used for page indices and free-list links.
pub trait PageIndex: Copy + Eq + Ord + Default + Debug {
    /// Largest index value representable by the type.
    const MAX_VALUE: usize;

    fn from_usize(value: usize) -> Self;

    fn into_usize(self) -> usize;
}

macro_rules! impl_page_index {
    ($($ty:ty),*) => {
        $(
            impl PageIndex for $ty {
                const MAX_VALUE: usize = <$ty>::MAX as usize;

                #[inline]
                fn from_usize(value: usize) -> Self {
                    debug_assert!(value <= Self::MAX_VALUE);
                    value as $ty
                }

                #[inline]
                fn into_usize(self) -> usize {
                    self as usize
                }
            }
        )*
    };
}

impl_page_index!(u16, u32, u64, usize);

/// Get/set access to the per-page records used by the buddy allocator.
///
/// Only [`get`](Self::get), [`set`](Self::set) and
/// [`capacity`](Self::capacity) are required; the field accessors default to
/// read-modify-write through them and may be overridden by stores that can
/// touch a single field more cheaply.
pub trait PageMetadataStore {
    type Index: PageIndex;

    /// Number of page records the store can hold.
    fn capacity(&self) -> usize;

    /// Read the whole record of a page.
    fn get(&self, index: Self::Index) -> PageMeta<Self::Index>;

    /// Overwrite the whole record of a page.
    fn set(&mut self, index: Self::Index, meta: PageMeta<Self::Index>);

    fn set_prev(&mut self, index: Self::Index, prev: Self::Index) {
        let mut meta = self.get(index);
        meta.prev = prev;
        self.set(index, meta);
    }

    fn set_next(&mut self, index: Self::Index, next: Self::Index) {
        let mut meta = self.get(index);
        meta.next = next;
        self.set(index, meta);
    }

    fn set_order(&mut self, index: Self::Index, order: u8) {
        let mut meta = self.get(index);
        meta.order = order;
        self.set(index, meta);
    }

    fn set_state(&mut self, index: Self::Index, state: PageState) {
        let mut meta = self.get(index);
        meta.state = state;
        self.set(index, meta);
    }

    fn prev(&self, index: Self::Index) -> Self::Index {
        self.get(index).prev
    }

    fn next(&self, index: Self::Index) -> Self::Index {
        self.get(index).next
    }

    fn order(&self, index: Self::Index) -> u8 {
        self.get(index).order
    }

    fn state(&self, index: Self::Index) -> PageState {
        self.get(index).state
    }
}

impl<S: PageMetadataStore + ?Sized> PageMetadataStore for &mut S {
    type Index = S::Index;

    fn capacity(&self) -> usize {
        (**self).capacity()
    }

    fn get(&self, index: Self::Index) -> PageMeta<Self::Index> {
        (**self).get(index)
    }

    fn set(&mut self, index: Self::Index, meta: PageMeta<Self::Index>) {
        (**self).set(index, meta)
    }

    fn set_prev(&mut self, index: Self::Index, prev: Self::Index) {
        (**self).set_prev(index, prev)
    }

    fn set_next(&mut self, index: Self::Index, next: Self::Index) {
        (**self).set_next(index, next)
    }

    fn set_order(&mut self, index: Self::Index, order: u8) {
        (**self).set_order(index, order)
    }

    fn set_state(&mut self, index: Self::Index, state: PageState) {
        (**self).set_state(index, state)
    }

    fn prev(&self, index: Self::Index) -> Self::Index {
        (**self).prev(index)
    }

    fn next(&self, index: Self::Index) -> Self::Index {
        (**self).next(index)
    }

    fn order(&self, index: Self::Index) -> u8 {
        (**self).order(index)
    }

    fn state(&self, index: Self::Index) -> PageState {
        (**self).state(index)
    }
}

/// Store over a caller-provided table of records, e.g. a descriptor array
/// carved out of early boot memory.
pub struct SliceStore<'a, I> {
    pages: &'a mut [PageMeta<I>],
}

impl<'a, I: PageIndex> SliceStore<'a, I> {
    pub fn new(pages: &'a mut [PageMeta<I>]) -> Self {
        Self { pages }
    }
}

impl<I: PageIndex> PageMetadataStore for SliceStore<'_, I> {
    type Index = I;

    fn capacity(&self) -> usize {
        self.pages.len()
    }

    #[inline]
    fn get(&self, index: I) -> PageMeta<I> {
        self.pages[index.into_usize()]
    }

    #[inline]
    fn set(&mut self, index: I, meta: PageMeta<I>) {
        self.pages[index.into_usize()] = meta;
    }

    #[inline]
    fn set_prev(&mut self, index: I, prev: I) {
        self.pages[index.into_usize()].prev = prev;
    }

    #[inline]
    fn set_next(&mut self, index: I, next: I) {
        self.pages[index.into_usize()].next = next;
    }

    #[inline]
    fn set_order(&mut self, index: I, order: u8) {
        self.pages[index.into_usize()].order = order;
    }

    #[inline]
    fn set_state(&mut self, index: I, state: PageState) {
        self.pages[index.into_usize()].state = state;
    }
}

/// Heap-backed store owning one record per page.
pub struct VecStore<I> {
    pages: Vec<PageMeta<I>>,
}

impl<I: PageIndex> VecStore<I> {
    /// Create a store with `pages` default (absorbed) records.
    pub fn new(pages: usize) -> Self {
        let mut records = Vec::with_capacity(pages);
        records.resize(pages, PageMeta::default());
        Self { pages: records }
    }

    /// Borrow the records as a slice-backed store.
    pub fn as_slice_store(&mut self) -> SliceStore<'_, I> {
        SliceStore::new(&mut self.pages)
    }
}

impl<I: PageIndex> PageMetadataStore for VecStore<I> {
    type Index = I;

    fn capacity(&self) -> usize {
        self.pages.len()
    }

    #[inline]
    fn get(&self, index: I) -> PageMeta<I> {
        self.pages[index.into_usize()]
    }

    #[inline]
    fn set(&mut self, index: I, meta: PageMeta<I>) {
        self.pages[index.into_usize()] = meta;
    }

    #[inline]
    fn set_prev(&mut self, index: I, prev: I) {
        self.pages[index.into_usize()].prev = prev;
    }

    #[inline]
    fn set_next(&mut self, index: I, next: I) {
        self.pages[index.into_usize()].next = next;
    }

    #[inline]
    fn set_order(&mut self, index: I, order: u8) {
        self.pages[index.into_usize()].order = order;
    }

    #[inline]
    fn set_state(&mut self, index: I, state: PageState) {
        self.pages[index.into_usize()].state = state;
    }
}

/// `usize`-based helpers the allocator uses on top of any store.
pub(crate) trait StoreExt: PageMetadataStore {
    #[inline]
    fn load(&self, index: usize) -> Page {
        let meta = self.get(Self::Index::from_usize(index));
        Page {
            prev: meta.prev.into_usize(),
            next: meta.next.into_usize(),
            order: meta.order as usize,
            state: meta.state,
        }
    }

    #[inline]
    fn write(&mut self, index: usize, prev: usize, next: usize, order: usize, state: PageState) {
        self.set(
            Self::Index::from_usize(index),
            PageMeta::new(
                Self::Index::from_usize(prev),
                Self::Index::from_usize(next),
                order as u8,
                state,
            ),
        );
    }

    #[inline]
    fn link_prev(&mut self, index: usize, prev: usize) {
        self.set_prev(Self::Index::from_usize(index), Self::Index::from_usize(prev));
    }

    #[inline]
    fn link_next(&mut self, index: usize, next: usize) {
        self.set_next(Self::Index::from_usize(index), Self::Index::from_usize(next));
    }

    #[inline]
    fn next_of(&self, index: usize) -> usize {
        self.next(Self::Index::from_usize(index)).into_usize()
    }

    #[inline]
    fn mark(&mut self, index: usize, state: PageState) {
        self.set_state(Self::Index::from_usize(index), state);
    }

    #[inline]
    fn mark_order(&mut self, index: usize, order: usize) {
        self.set_order(Self::Index::from_usize(index), order as u8);
    }
}

impl<S: PageMetadataStore + ?Sized> StoreExt for S {}

/// A page record widened to `usize`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Page {
    pub prev: usize,
    pub next: usize,
    pub order: usize,
    pub state: PageState,
}
