//! Statistics and debugging for buddy allocator
//!
//! Provides per-order statistics and failure reporting.

use super::buddy_block::{order_pages, MAX_ORDER_LIMIT};

/// Buddy system statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuddyStats {
    pub total_pages: usize,
    pub free_pages: usize,
    pub used_pages: usize,
    /// Number of free blocks in each order's list
    pub free_blocks_by_order: [usize; MAX_ORDER_LIMIT],
}

impl Default for BuddyStats {
    fn default() -> Self {
        Self::new()
    }
}

impl BuddyStats {
    pub const fn new() -> Self {
        Self {
            total_pages: 0,
            free_pages: 0,
            used_pages: 0,
            free_blocks_by_order: [0; MAX_ORDER_LIMIT],
        }
    }

    /// Largest order with at least one free block
    pub fn largest_free_order(&self) -> Option<usize> {
        self.free_blocks_by_order.iter().rposition(|&count| count > 0)
    }
}

/// Detailed memory statistics reporter
pub struct MemoryStatsReporter;

impl MemoryStatsReporter {
    /// Print the allocator state after a failed request for `request_pages`
    #[allow(unused_variables)]
    pub fn print_alloc_failure_stats(stats: &BuddyStats, request_pages: usize) {
        #[cfg(feature = "log")]
        use log::error;

        error!("========================================");
        error!("Request: {} pages", request_pages);
        error!(
            "  Total pages: {}, free: {}, used: {}",
            stats.total_pages, stats.free_pages, stats.used_pages
        );
        error!("  Free blocks by order:");
        for order in (0..MAX_ORDER_LIMIT).rev() {
            let count = stats.free_blocks_by_order[order];
            if count > 0 {
                error!(
                    "    Order {}: {} blocks ({} pages)",
                    order,
                    count,
                    count * order_pages(order)
                );
            }
        }
        error!("========================================");
    }
}
