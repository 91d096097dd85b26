//! Basic benchmarks for the `guarded_pool` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::iter;
use std::time::Instant;

use criterion::{Criterion, criterion_group, criterion_main};
use guarded_pool::GuardedPool;
use new_zealand::nz;

criterion_group!(benches, entrypoint);
criterion_main!(benches);

const OBJECT_SIZE: usize = 64;

fn build_pool(debug_enabled: bool) -> GuardedPool {
    GuardedPool::builder()
        .object_size(OBJECT_SIZE)
        .objects_per_page(nz!(128))
        .debug_enabled(debug_enabled)
        .build()
        .expect("initial page allocation failed")
}

fn entrypoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("gp_basic");

    group.bench_function("build_empty", |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();

            for _ in 0..iters {
                drop(black_box(build_pool(false)));
            }

            start.elapsed()
        });
    });

    group.bench_function("allocate_one", |b| {
        b.iter_custom(|iters| {
            let mut pools = iter::repeat_with(|| build_pool(false))
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let start = Instant::now();

            for pool in &mut pools {
                _ = black_box(pool.allocate().unwrap());
            }

            start.elapsed()
        });
    });

    group.bench_function("allocate_free_cycle", |b| {
        b.iter_custom(|iters| {
            let mut pool = build_pool(false);

            let start = Instant::now();

            for _ in 0..iters {
                let block = black_box(pool.allocate().unwrap());

                // SAFETY: the block came from this pool and is unused
                // afterwards.
                unsafe { pool.free(block) }.unwrap();
            }

            start.elapsed()
        });
    });

    group.bench_function("allocate_free_cycle_debug", |b| {
        b.iter_custom(|iters| {
            let mut pool = build_pool(true);

            let start = Instant::now();

            for _ in 0..iters {
                let block = black_box(pool.allocate().unwrap());

                // SAFETY: the block came from this pool and is unused
                // afterwards.
                unsafe { pool.free(block) }.unwrap();
            }

            start.elapsed()
        });
    });

    group.finish();

    let mut group = c.benchmark_group("gp_slow");

    group.bench_function("fill_4k_then_reclaim", |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();

            for _ in 0..iters {
                let mut pool = build_pool(false);

                let blocks = iter::repeat_with(|| pool.allocate().unwrap())
                    .take(4096)
                    .collect::<Vec<_>>();

                for block in blocks {
                    // SAFETY: each block came from this pool and is unused
                    // afterwards.
                    unsafe { pool.free(block) }.unwrap();
                }

                _ = black_box(pool.free_empty_pages());
            }

            start.elapsed()
        });
    });

    group.finish();
}
