//! Basic example demonstrating the pool's lifecycle and its debug-mode
//! corruption detectors.
//!
//! Run with: `cargo run --example guarded_basic`

use guarded_pool::{GuardedPool, HeaderKind};
use new_zealand::nz;

fn main() {
    let mut pool = GuardedPool::builder()
        .object_size(48)
        .objects_per_page(nz!(8))
        .pad_bytes(4)
        .header(HeaderKind::Basic)
        .debug_enabled(true)
        .build()
        .expect("initial page allocation failed");

    println!("page size: {} bytes", pool.page_layout().page_size());

    // Take out a dozen blocks; the pool grows a second page on the ninth.
    let mut blocks = Vec::new();
    for _ in 0..12 {
        blocks.push(pool.allocate().expect("pool can grow"));
    }

    let stats = pool.stats();
    println!(
        "after 12 allocations: {} pages, {} in use, {} free",
        stats.pages_in_use, stats.objects_in_use, stats.free_objects
    );

    // Leak detection: every block we still hold shows up.
    let leaks = pool.dump_memory_in_use(|body, size| {
        println!("in use: {size} bytes at {body:p}");
    });
    println!("{leaks} blocks currently in use");

    // Scribble past the end of one block, then let the pool catch it.
    let victim = blocks[3];
    // SAFETY: deliberately writing one byte past the body, into the pad.
    unsafe { victim.byte_add(48).write(0xFF) };

    let damaged = pool.validate_pages(|body, _| {
        println!("damaged guard bytes around {body:p}");
    });
    println!("{damaged} damaged block(s) found");

    // SAFETY: `victim` came from this pool and is unused after the free.
    let error = unsafe { pool.free(victim) }.expect_err("the overrun is caught");
    println!("free rejected: {error}");

    // Return the rest and hand the empty pages back to the host.
    for block in blocks {
        if block == victim {
            continue;
        }

        // SAFETY: each block came from this pool and is unused afterwards.
        unsafe { pool.free(block) }.expect("block is intact");
    }

    let reclaimed = pool.free_empty_pages();
    println!("reclaimed {reclaimed} page(s)");
}
