//! A fixed-size object pool allocator with signature-pattern corruption
//! detection.
//!
//! This crate provides [`GuardedPool`], a memory manager that services
//! fixed-size allocation requests by carving equally-sized blocks out of
//! larger pages obtained from the host allocator and recycling freed blocks
//! through an embedded free list. Allocate and free are O(1) and block
//! addresses never move.
//!
//! # Key features
//!
//! - **Amortized host-allocator cost**: one host allocation per page, not
//!   per block.
//! - **Deterministic O(1) allocate/free**: a pop and a push on the embedded
//!   free list.
//! - **Corruption detection** (debug mode): signature byte patterns stamped
//!   into every distinguishable memory state expose out-of-bounds writes,
//!   double frees, use of freed memory, stray pointers, and leaks.
//! - **Per-block headers**: optional allocation bookkeeping per block, from
//!   a 5-byte inline record to an out-of-band labeled struct.
//! - **Whole-page reclamation**: [`GuardedPool::free_empty_pages`] returns
//!   fully-free pages to the host even when the free list interleaves
//!   blocks of all pages in arbitrary order.
//! - **Passthrough mode**: delegate every request to the host allocator
//!   while keeping the counters, for A/B comparison.
//!
//! # Example
//!
//! ```rust
//! use guarded_pool::{GuardedPool, HeaderKind, PoolError};
//!
//! let mut pool = GuardedPool::builder()
//!     .object_size(32)
//!     .pad_bytes(4)
//!     .header(HeaderKind::Basic)
//!     .debug_enabled(true)
//!     .build()
//!     .expect("initial page allocation failed");
//!
//! let block = pool.allocate().expect("pool can grow");
//!
//! // SAFETY: the pool handed us 32 writable bytes at `block`.
//! unsafe { block.as_ptr().write_bytes(0x11, 32) };
//!
//! // SAFETY: `block` came from this pool and is not used after the free.
//! unsafe { pool.free(block) }.expect("block is intact");
//!
//! // A stale pointer is caught rather than corrupting the pool.
//! // SAFETY: double free attempted deliberately; debug mode rejects it.
//! let error = unsafe { pool.free(block) }.unwrap_err();
//! assert!(matches!(error, PoolError::DoubleFree { .. }));
//! ```
//!
//! # Thread safety
//!
//! [`GuardedPool`] can be moved between threads ([`Send`]) but not shared
//! between them (not [`Sync`]); wrap it in a mutex if concurrent access is
//! required.

mod builder;
mod config;
mod error;
mod header;
mod layout;
mod page;
mod pool;
mod signature;
mod stats;

pub use builder::*;
pub use config::PoolConfig;
pub use error::PoolError;
pub use header::{BASIC_HEADER_SIZE, BlockInfo, HeaderKind};
pub use layout::PageLayout;
pub use pool::GuardedPool;
pub use signature::*;
pub use stats::PoolStats;
