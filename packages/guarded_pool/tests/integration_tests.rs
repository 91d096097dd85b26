//! Integration tests for the `guarded_pool` package.
//!
//! These drive the public API through the allocator's end-to-end scenarios:
//! page growth up to the configured ceiling, drain-and-refill reuse, the
//! debug-mode corruption detectors, whole-page reclamation, and header
//! bookkeeping across block reuse.
#![allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    reason = "test code doesn't need the same safety rigor as production code"
)]

use std::collections::BTreeSet;
use std::ptr::NonNull;

use guarded_pool::{GuardedPool, HeaderKind, PoolError};
use new_zealand::nz;

fn addresses(blocks: &[NonNull<u8>]) -> BTreeSet<usize> {
    blocks.iter().map(|block| block.addr().get()).collect()
}

#[test]
fn fill_drain_refill_across_the_page_limit() {
    let mut pool = GuardedPool::builder()
        .object_size(16)
        .objects_per_page(nz!(4))
        .max_pages(nz!(2))
        .header(HeaderKind::Basic)
        .debug_enabled(true)
        .pad_bytes(2)
        .build()
        .unwrap();

    // Fill the preallocated page.
    let mut blocks = Vec::new();
    for _ in 0..4 {
        blocks.push(pool.allocate().unwrap());
    }
    assert_eq!(pool.stats().pages_in_use, 1);

    // The fifth allocation grows a second page.
    blocks.push(pool.allocate().unwrap());
    assert_eq!(pool.stats().pages_in_use, 2);

    for _ in 0..3 {
        blocks.push(pool.allocate().unwrap());
    }

    // The ninth hits the page ceiling.
    let error = pool.allocate().unwrap_err();
    assert_eq!(error, PoolError::PageLimitReached { max_pages: 2 });

    // Drain everything.
    for block in &blocks {
        unsafe { pool.free(*block) }.unwrap();
    }
    assert_eq!(pool.stats().objects_in_use, 0);
    assert_eq!(pool.stats().free_objects, 8);

    // Refill: the same eight block addresses come back, in some order.
    let mut refill = Vec::new();
    for _ in 0..8 {
        refill.push(pool.allocate().unwrap());
    }

    assert_eq!(addresses(&refill), addresses(&blocks));
    assert_eq!(pool.stats().most_objects, 8);
}

#[test]
fn double_free_is_rejected_without_counter_damage() {
    let mut pool = GuardedPool::builder()
        .object_size(16)
        .debug_enabled(true)
        .build()
        .unwrap();

    let block = pool.allocate().unwrap();
    unsafe { pool.free(block) }.unwrap();

    let error = unsafe { pool.free(block) }.unwrap_err();
    assert!(matches!(error, PoolError::DoubleFree { .. }));

    // The rejected free mutated nothing: one deallocation on record and no
    // phantom in-use block.
    let stats = pool.stats();
    assert_eq!(stats.deallocations, 1);
    assert_eq!(stats.objects_in_use, 0);
    assert_eq!(stats.free_objects, 4);
}

#[test]
fn overrun_into_the_right_pad_is_detected_at_free() {
    let mut pool = GuardedPool::builder()
        .object_size(16)
        .pad_bytes(2)
        .debug_enabled(true)
        .build()
        .unwrap();

    let block = pool.allocate().unwrap();

    // Write one byte past the block body.
    unsafe { block.byte_add(16).write(0x00) };

    let error = unsafe { pool.free(block) }.unwrap_err();
    assert!(matches!(error, PoolError::CorruptedBlock { .. }));
}

#[test]
fn off_block_pointer_is_rejected_at_the_boundary() {
    let mut pool = GuardedPool::builder()
        .object_size(16)
        .debug_enabled(true)
        .build()
        .unwrap();

    let block = pool.allocate().unwrap();
    let off = unsafe { block.byte_add(1) };

    let error = unsafe { pool.free(off) }.unwrap_err();
    assert!(matches!(error, PoolError::BadBoundary { .. }));
}

#[test]
fn empty_pages_are_reclaimed_wholesale() {
    let mut pool = GuardedPool::builder()
        .object_size(16)
        .objects_per_page(nz!(2))
        .max_pages(nz!(4))
        .build()
        .unwrap();

    // Seven allocations force all four pages into existence.
    let mut blocks = Vec::new();
    for _ in 0..7 {
        blocks.push(pool.allocate().unwrap());
    }
    assert_eq!(pool.stats().pages_in_use, 4);

    for block in &blocks {
        unsafe { pool.free(*block) }.unwrap();
    }

    assert_eq!(pool.free_empty_pages(), 4);
    assert_eq!(pool.stats().pages_in_use, 0);
    assert_eq!(pool.stats().free_objects, 0);

    // The pool recovers by growing fresh pages: three allocations fill a new
    // first page and start a second.
    let mut fresh = Vec::new();
    for _ in 0..3 {
        fresh.push(pool.allocate().unwrap());
    }
    assert_eq!(pool.stats().pages_in_use, 2);

    // Neither page is fully free (one holds two live blocks, the other one
    // live and one free), so nothing is reclaimed.
    assert_eq!(pool.free_empty_pages(), 0);
    assert_eq!(pool.stats().pages_in_use, 2);
}

#[test]
fn extended_header_counts_reuses_and_keeps_the_user_field() {
    let header = HeaderKind::Extended { user_bytes: 4 };
    let mut pool = GuardedPool::builder()
        .object_size(16)
        .header(header)
        .build()
        .unwrap();

    let block = pool.allocate().unwrap();

    // The user field leads the header region; stash a sentinel in it.
    let header_start = unsafe { block.byte_sub(header.size()) };
    let sentinel = [0x10_u8, 0x20, 0x30, 0x40];
    unsafe {
        header_start
            .as_ptr()
            .copy_from_nonoverlapping(sentinel.as_ptr(), 4);
    }

    unsafe { pool.free(block) }.unwrap();

    // LIFO reuse returns the same block.
    let again = pool.allocate().unwrap();
    assert_eq!(again, block);

    // The use count (after the user field) reads 2; the sentinel survived
    // the free/reallocate cycle.
    let use_count = unsafe {
        header_start
            .byte_add(4)
            .cast::<u16>()
            .as_ptr()
            .read_unaligned()
    };
    assert_eq!(u16::from_le(use_count), 2);

    let mut preserved = [0_u8; 4];
    unsafe {
        header_start
            .as_ptr()
            .copy_to_nonoverlapping(preserved.as_mut_ptr(), 4);
    }
    assert_eq!(preserved, sentinel);

    unsafe { pool.free(again) }.unwrap();
}

#[test]
fn freed_block_is_the_next_handed_out() {
    let mut pool = GuardedPool::builder()
        .object_size(32)
        .debug_enabled(true)
        .build()
        .unwrap();

    let block = pool.allocate().unwrap();
    unsafe { pool.free(block) }.unwrap();

    assert_eq!(pool.allocate().unwrap(), block);
}

#[test]
fn blocks_are_aligned_as_configured() {
    for alignment in [8_usize, 16, 64, 256] {
        let mut pool = GuardedPool::builder()
            .object_size(40)
            .alignment(alignment)
            .pad_bytes(3)
            .header(HeaderKind::Basic)
            .objects_per_page(nz!(3))
            .build()
            .unwrap();

        for _ in 0..9 {
            let block = pool.allocate().unwrap();
            assert_eq!(
                block.addr().get() % alignment,
                0,
                "block must be {alignment}-byte aligned"
            );
        }
    }
}

#[test]
fn counter_identities_hold_under_interleaved_traffic() {
    let mut pool = GuardedPool::builder()
        .object_size(24)
        .objects_per_page(nz!(3))
        .header(HeaderKind::Basic)
        .debug_enabled(true)
        .pad_bytes(2)
        .build()
        .unwrap();

    let mut live = Vec::new();

    // A deterministic interleaving of bursts of allocation, scattered
    // frees, and mid-stream reclamation.
    for round in 0_usize..6 {
        for _ in 0..(round * 2 + 1) {
            live.push(pool.allocate().unwrap());
        }

        // Free every other live block, oldest first.
        let mut index = 0;
        live.retain(|block| {
            index += 1;
            if index % 2 == 0 {
                unsafe { pool.free(*block) }.unwrap();
                false
            } else {
                true
            }
        });

        if round % 2 == 1 {
            pool.free_empty_pages();
        }

        let stats = pool.stats();
        assert_eq!(stats.objects_in_use, live.len());
        assert_eq!(
            stats.free_objects + stats.objects_in_use,
            stats.pages_in_use * 3,
            "block conservation must hold after round {round}"
        );
        assert_eq!(
            (stats.allocations - stats.deallocations) as usize,
            stats.objects_in_use,
            "allocation ledger must hold after round {round}"
        );
        assert_eq!(pool.dump_memory_in_use(|_, _| {}), stats.objects_in_use);
        assert_eq!(pool.validate_pages(|_, _| {}), 0);
    }

    for block in &live {
        unsafe { pool.free(*block) }.unwrap();
    }
    assert_eq!(pool.stats().objects_in_use, 0);
}

#[test]
fn labels_travel_through_external_headers() {
    let mut pool = GuardedPool::builder()
        .object_size(16)
        .header(HeaderKind::External)
        .build()
        .unwrap();

    let labeled = pool.allocate_labeled("enemy #7").unwrap();
    let unlabeled = pool.allocate().unwrap();

    let read_info = |block: NonNull<u8>| {
        let header_start = unsafe { block.byte_sub(HeaderKind::External.size()) };
        let info = unsafe {
            header_start
                .cast::<*mut guarded_pool::BlockInfo>()
                .as_ptr()
                .read_unaligned()
        };
        unsafe { &*info }
    };

    assert_eq!(read_info(labeled).label.as_deref(), Some("enemy #7"));
    assert_eq!(read_info(labeled).alloc_num, 1);
    assert!(read_info(unlabeled).label.is_none());
    assert_eq!(read_info(unlabeled).alloc_num, 2);

    unsafe { pool.free(labeled) }.unwrap();
    unsafe { pool.free(unlabeled) }.unwrap();

    // Dropping the pool with live external headers must release them too.
    let _survivor = pool.allocate_labeled("never freed").unwrap();
    drop(pool);
}

#[test]
fn passthrough_pools_count_like_pool_mode() {
    let mut pool = GuardedPool::builder()
        .object_size(64)
        .passthrough(true)
        .build()
        .unwrap();

    let mut blocks = Vec::new();
    for _ in 0..5 {
        blocks.push(pool.allocate().unwrap());
    }

    let stats = pool.stats();
    assert_eq!(stats.allocations, 5);
    assert_eq!(stats.objects_in_use, 5);
    assert_eq!(stats.most_objects, 5);
    assert_eq!(stats.pages_in_use, 0);

    for block in blocks {
        unsafe { pool.free(block) }.unwrap();
    }

    let stats = pool.stats();
    assert_eq!(stats.deallocations, 5);
    assert_eq!(stats.objects_in_use, 0);
    assert_eq!(stats.most_objects, 5);
}

#[test]
fn list_observers_expose_the_lifo_discipline() {
    let mut pool = GuardedPool::builder().object_size(16).build().unwrap();

    // The head of the free list is exactly the block the next allocation
    // returns.
    let head = pool.free_list_head().unwrap();
    let block = pool.allocate().unwrap();
    assert_eq!(block, head);

    // Freeing puts the block back in front.
    unsafe { pool.free(block) }.unwrap();
    assert_eq!(pool.free_list_head(), Some(block));

    assert!(pool.page_list_head().is_some());
}
