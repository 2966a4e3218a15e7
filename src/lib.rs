//! Buddy Page Allocator
//!
//! A freestanding buddy allocator that hands out abstract page indices in
//! `[0, total_pages)`, featuring:
//! - Order-indexed intrusive free lists stored in caller-owned page metadata
//! - Top-down block splitting and bounded ("lazy") coalescing on free
//! - Fixed-range reservation (`alloc_at`) for boot-time reserved regions
//! - An optional spinlock wrapper for callers that share the allocator
//!
//! The allocator never touches the memory the indices stand for and never
//! allocates its own metadata: every per-page record lives in a
//! [`PageMetadataStore`] supplied by the caller.

#![no_std]

extern crate alloc;

// Logging support - conditionally import log crate
#[cfg(feature = "log")]
extern crate log;

// Stub macros when log is disabled - these become no-ops
#[cfg(not(feature = "log"))]
macro_rules! error {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
macro_rules! warn {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! info {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
macro_rules! debug {
    ($($arg:tt)*) => {};
}
#[cfg(not(feature = "log"))]
#[allow(unused_macros)]
macro_rules! trace {
    ($($arg:tt)*) => {};
}

/// The error type used for allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// Invalid page count, alignment or range (e.g. zero pages, order above the maximum).
    InvalidParam,
    /// Range requested by `alloc_at` overlapped with pages already in use.
    MemoryOverlap,
    /// No free block large enough to satisfy the request.
    NoMemory,
}

/// A [`Result`] type with [`AllocError`] as the error type.
pub type AllocResult<T = ()> = Result<T, AllocError>;

/// Used to allocate unique IDs (e.g., page frame numbers).
pub trait IdAllocator {
    /// Allocate contiguous IDs with given count and alignment.
    fn alloc_id(&mut self, count: usize, alignment: usize) -> AllocResult<usize>;

    /// Deallocate contiguous IDs with given position and count.
    fn dealloc_id(&mut self, start_id: usize, count: usize);

    /// Whether the given `id` was allocated.
    fn is_allocated(&self, id: usize) -> bool;

    /// Mark the given `id` has been allocated and cannot be reallocated.
    fn alloc_fixed_id(&mut self, id: usize) -> AllocResult;

    /// Returns the maximum number of supported IDs.
    fn size(&self) -> usize;

    /// Returns the number of allocated IDs.
    fn used(&self) -> usize;

    /// Returns the number of available IDs.
    fn available(&self) -> usize;
}

#[inline]
const fn align_down(pos: usize, align: usize) -> usize {
    pos & !(align - 1)
}

/// Checks whether the index has the demanded alignment.
///
/// Equivalent to `index % align == 0`, but the alignment must be a power of two.
#[inline]
const fn is_aligned(index: usize, align: usize) -> bool {
    index & (align - 1) == 0
}

pub mod buddy;
#[cfg(feature = "tracking")]
pub use buddy::BuddyStats;
pub use buddy::{
    BuddyAllocator, PageIndex, PageMeta, PageMetadataStore, PageState, SliceStore, VecStore,
    DEFAULT_MAX_ORDER, MAX_ORDER_LIMIT,
};

pub mod locked;
pub use locked::LockedBuddyAllocator;
