//! Randomized stress tests
//!
//! Interleaves allocations and frees of random sizes and checks the
//! allocator's accounting against independent bookkeeping.

#![no_std]

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use buddy_page_allocator::{AllocError, BuddyAllocator, VecStore};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

type Buddy = BuddyAllocator<VecStore<u32>>;

/// Outstanding blocks keyed by head index, with their size in pages.
struct Ledger {
    blocks: BTreeMap<usize, usize>,
}

impl Ledger {
    fn new() -> Self {
        Self {
            blocks: BTreeMap::new(),
        }
    }

    fn insert(&mut self, start: usize, pages: usize) {
        if let Some((&prev, &prev_pages)) = self.blocks.range(..start).next_back() {
            assert!(prev + prev_pages <= start, "block {} overlaps {}", start, prev);
        }
        if let Some((&next, _)) = self.blocks.range(start..).next() {
            assert!(start + pages <= next, "block {} overlaps {}", start, next);
        }
        self.blocks.insert(start, pages);
    }

    fn remove(&mut self, start: usize) {
        assert!(self.blocks.remove(&start).is_some());
    }

    fn used_pages(&self) -> usize {
        self.blocks.values().sum()
    }
}

#[test]
fn test_random_alloc_free() {
    const TEST_PAGES: usize = 1 << 20;
    let mut buddy: Buddy = BuddyAllocator::new(TEST_PAGES, VecStore::new(TEST_PAGES));
    let mut rng = StdRng::seed_from_u64(0x5eed_b0dd);
    let mut ledger = Ledger::new();
    let mut live: Vec<usize> = Vec::new();

    for round in 0..100_000 {
        if rng.gen_bool(0.5) || live.is_empty() {
            let pages = 1usize << rng.gen_range(0..10u32);
            if let Ok(index) = buddy.alloc(pages) {
                let index = index as usize;
                assert_eq!(index % pages, 0);
                ledger.insert(index, pages);
                live.push(index);
                continue;
            }
        }
        let victim = live.swap_remove(rng.gen_range(0..live.len()));
        buddy.free(victim as u32);
        ledger.remove(victim);

        if round % 10_000 == 0 {
            assert_eq!(buddy.free_pages(), buddy.debug_free_pages());
        }
    }

    let free = TEST_PAGES - ledger.used_pages();
    assert_eq!(buddy.free_pages(), free);
    assert_eq!(buddy.debug_free_pages(), free);

    for index in live {
        buddy.free(index as u32);
    }
    assert_eq!(buddy.free_pages(), TEST_PAGES);
    assert_eq!(buddy.debug_free_pages(), TEST_PAGES);
}

#[test]
fn test_random_mixed_with_reservations() {
    const TEST_PAGES: usize = 5000;
    let mut buddy: Buddy = BuddyAllocator::new(TEST_PAGES, VecStore::new(TEST_PAGES));
    let mut rng = StdRng::seed_from_u64(42);
    let mut ledger = Ledger::new();
    let mut live: Vec<usize> = Vec::new();

    for _ in 0..20_000 {
        match rng.gen_range(0..4) {
            0 | 1 => {
                let count = rng.gen_range(1..=70);
                match buddy.alloc(count) {
                    Ok(index) => {
                        ledger.insert(index as usize, count.next_power_of_two());
                        live.push(index as usize);
                    }
                    Err(err) => assert_eq!(err, AllocError::NoMemory),
                }
            }
            2 => {
                let start = rng.gen_range(0..TEST_PAGES);
                let count = rng.gen_range(1..=(TEST_PAGES - start).min(40));
                let before = buddy.free_pages();
                match buddy.alloc_at(start as u32, count) {
                    Ok(()) => {
                        assert_eq!(before - buddy.free_pages(), count);
                        // the range is covered by blocks that are each freed on their own
                        let mut page = start;
                        while page < start + count {
                            let (head, pages) = buddy.used_block(page).unwrap();
                            assert_eq!(head as usize, page);
                            assert!(page + pages <= start + count);
                            ledger.insert(page, pages);
                            live.push(page);
                            page += pages;
                        }
                    }
                    Err(err) => {
                        assert_eq!(err, AllocError::MemoryOverlap);
                        assert_eq!(buddy.free_pages(), before);
                    }
                }
            }
            _ => {
                if !live.is_empty() {
                    let victim = live.swap_remove(rng.gen_range(0..live.len()));
                    buddy.free(victim as u32);
                    ledger.remove(victim);
                }
            }
        }
        assert_eq!(buddy.free_pages(), TEST_PAGES - ledger.used_pages());
        assert_eq!(buddy.free_pages(), buddy.debug_free_pages());
    }
}
