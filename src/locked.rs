//! Spinlock-protected buddy allocator.
//!
//! The buddy engine itself never synchronizes. This wrapper is the external
//! lock for callers that share one allocator, e.g. a kernel page-frame
//! allocator kept in a `static`: every operation runs to completion under a
//! `SpinNoIrq`, so the whole read-modify-write of the free lists is atomic
//! with respect to other cores and local interrupts.

use crate::buddy::{BuddyAllocator, PageMetadataStore, DEFAULT_MAX_ORDER};
use crate::{AllocError, AllocResult};
use kspin::SpinNoIrq;

#[cfg(feature = "tracking")]
use crate::buddy::BuddyStats;

#[cfg(feature = "log")]
use log::error;

/// Buddy allocator behind a spinlock, usable from `&self`
pub struct LockedBuddyAllocator<S: PageMetadataStore, const MAX_ORDER: usize = DEFAULT_MAX_ORDER> {
    inner: SpinNoIrq<Option<BuddyAllocator<S, MAX_ORDER>>>,
}

impl<S: PageMetadataStore, const MAX_ORDER: usize> LockedBuddyAllocator<S, MAX_ORDER> {
    /// Create an uninitialized allocator; every request fails until `init`.
    pub const fn new() -> Self {
        Self {
            inner: SpinNoIrq::new(None),
        }
    }

    /// Create an allocator around an already constructed engine
    pub fn from_allocator(allocator: BuddyAllocator<S, MAX_ORDER>) -> Self {
        Self {
            inner: SpinNoIrq::new(Some(allocator)),
        }
    }

    /// Build the engine over `total_pages` pages of `store`.
    pub fn init(&self, total_pages: usize, store: S) -> AllocResult {
        let mut inner = self.inner.lock();
        if inner.is_some() {
            error!("locked buddy: already initialized");
            return Err(AllocError::InvalidParam);
        }
        *inner = Some(BuddyAllocator::new(total_pages, store));
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.lock().is_some()
    }

    /// Run `f` on the engine with the lock held, for compound operations
    /// that must not interleave with other callers.
    pub fn with<R>(&self, f: impl FnOnce(&mut BuddyAllocator<S, MAX_ORDER>) -> R) -> Option<R> {
        self.inner.lock().as_mut().map(f)
    }

    /// See [`BuddyAllocator::alloc`]
    pub fn alloc(&self, count: usize) -> AllocResult<S::Index> {
        self.with(|buddy| buddy.alloc(count))
            .unwrap_or(Err(AllocError::NoMemory))
    }

    /// See [`BuddyAllocator::alloc_aligned`]
    pub fn alloc_aligned(&self, count: usize, align_pages: usize) -> AllocResult<S::Index> {
        self.with(|buddy| buddy.alloc_aligned(count, align_pages))
            .unwrap_or(Err(AllocError::NoMemory))
    }

    /// See [`BuddyAllocator::alloc_at`]
    pub fn alloc_at(&self, index: S::Index, count: usize) -> AllocResult {
        self.with(|buddy| buddy.alloc_at(index, count))
            .unwrap_or(Err(AllocError::NoMemory))
    }

    /// See [`BuddyAllocator::free`]
    pub fn free(&self, index: S::Index) {
        if self.with(|buddy| buddy.free(index)).is_none() {
            error!("locked buddy: freeing page {:?} before initializing", index);
        }
    }

    pub fn free_pages(&self) -> usize {
        self.with(|buddy| buddy.free_pages()).unwrap_or(0)
    }

    pub fn total_pages(&self) -> usize {
        self.with(|buddy| buddy.total_pages()).unwrap_or(0)
    }

    /// Get buddy allocator statistics
    #[cfg(feature = "tracking")]
    pub fn stats(&self) -> BuddyStats {
        self.with(|buddy| buddy.stats()).unwrap_or_default()
    }

    /// Take the engine back out of the lock
    pub fn into_inner(self) -> Option<BuddyAllocator<S, MAX_ORDER>> {
        self.inner.into_inner()
    }
}

impl<S: PageMetadataStore, const MAX_ORDER: usize> Default for LockedBuddyAllocator<S, MAX_ORDER> {
    fn default() -> Self {
        Self::new()
    }
}
