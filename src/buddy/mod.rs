//! Buddy page allocator module
//!
//! This module provides the buddy system over page indices with:
//! - Caller-owned page metadata behind the `PageMetadataStore` trait
//! - Index-linked free lists, one per order
//! - Bounded lazy coalescing and fixed-range reservation

pub mod buddy_allocator;
pub mod buddy_block;
mod free_list;
pub mod page_store;
#[cfg(feature = "tracking")]
pub mod stats;

pub use buddy_allocator::BuddyAllocator;
pub use buddy_block::{PageMeta, PageState, DEFAULT_MAX_ORDER, MAX_ORDER_LIMIT};
pub use page_store::{PageIndex, PageMetadataStore, SliceStore, VecStore};
#[cfg(feature = "tracking")]
pub use stats::BuddyStats;
