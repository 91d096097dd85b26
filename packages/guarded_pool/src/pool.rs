use std::alloc::{alloc, dealloc};
use std::ptr::{self, NonNull};
use std::slice;

use crate::error::Result;
use crate::page::{LINK_BYTES, PageRef, read_link, write_link};
use crate::signature::{ALIGN_PATTERN, ALLOCATED_PATTERN, FREED_PATTERN, PAD_PATTERN,
    UNALLOCATED_PATTERN};
use crate::{GuardedPoolBuilder, HeaderKind, PageLayout, PoolConfig, PoolError, PoolStats};

/// A fixed-size object pool with signature-pattern corruption detection.
///
/// `GuardedPool` services a stream of fixed-size allocate/free requests by
/// carving equally-sized blocks out of larger pages obtained from the host
/// allocator, recycling freed blocks through an embedded free list. Both
/// allocate and free are O(1); pages are created lazily and reclaimed only
/// on request ([`free_empty_pages()`](Self::free_empty_pages)) or at drop.
///
/// # Key features
///
/// - **Deterministic reuse**: a freed block is the next one handed out
///   (LIFO), and block addresses never move.
/// - **Debug mode**: signature patterns written into every distinguishable
///   memory state make heap corruption observable — out-of-bounds writes,
///   double frees, use of freed memory, and stray pointers are detected at
///   free time, leaks at any time via
///   [`dump_memory_in_use()`](Self::dump_memory_in_use).
/// - **Per-block headers**: optional allocation bookkeeping in front of each
///   block, from a 5-byte inline record to an out-of-band labeled struct —
///   see [`HeaderKind`].
/// - **Passthrough mode**: every request delegated to the host allocator
///   while the counters keep working, for A/B comparison against the pool.
///
/// # Memory layout
///
/// Pages are single host allocations threaded into a singly-linked list
/// through their first pointer-width bytes. Free blocks store the free-list
/// link in the first pointer-width bytes of their own body, so the pool
/// spends no memory on free-list nodes. See [`PageLayout`] for the full
/// on-page byte layout.
///
/// # Thread safety
///
/// The pool is thread-mobile ([`Send`]) but not thread-safe (not [`Sync`]):
/// every entry point mutates the list heads, so sharing across threads
/// requires external synchronization.
///
/// # Examples
///
/// ```
/// use guarded_pool::{GuardedPool, HeaderKind};
///
/// let mut pool = GuardedPool::builder()
///     .object_size(48)
///     .header(HeaderKind::Basic)
///     .debug_enabled(true)
///     .pad_bytes(4)
///     .build()
///     .expect("initial page allocation failed");
///
/// let block = pool.allocate().expect("pool can grow");
///
/// // The block is ours until freed; write through the returned pointer.
/// // SAFETY: the pool handed us object_size writable bytes at `block`.
/// unsafe { block.as_ptr().write_bytes(0x42, 48) };
///
/// assert_eq!(pool.stats().objects_in_use, 1);
///
/// // SAFETY: `block` came from this pool and is not used after the free.
/// unsafe { pool.free(block) }.expect("block is intact");
///
/// assert_eq!(pool.stats().objects_in_use, 0);
/// ```
#[derive(Debug)]
pub struct GuardedPool {
    /// The configuration the pool was built with. Only the debug flag ever
    /// changes after construction.
    config: PoolConfig,

    /// Precomputed byte layout shared by every page.
    layout: PageLayout,

    /// Head of the singly-linked page list. Each page's first pointer-width
    /// bytes hold the link to the next page.
    page_list: Option<PageRef>,

    /// Head of the singly-linked free list. Each free block's first
    /// pointer-width bytes hold the link to the next free block; the list
    /// may interleave blocks of all pages in any order.
    free_list: Option<NonNull<u8>>,

    /// Counters observable through [`stats()`](Self::stats).
    stats: PoolStats,
}

impl GuardedPool {
    /// Creates a builder for configuring and constructing a [`GuardedPool`].
    ///
    /// The object size is mandatory; see [`GuardedPoolBuilder`] for the
    /// optional settings.
    ///
    /// # Example
    ///
    /// ```
    /// use guarded_pool::GuardedPool;
    ///
    /// let pool = GuardedPool::builder()
    ///     .object_size(16)
    ///     .build()
    ///     .expect("initial page allocation failed");
    ///
    /// assert_eq!(pool.stats().free_objects, 4);
    /// ```
    #[inline]
    pub fn builder() -> GuardedPoolBuilder {
        GuardedPoolBuilder::new()
    }

    /// Creates a new pool with the given configuration, preallocating the
    /// first page unless passthrough mode is selected.
    pub(crate) fn new_inner(object_size: usize, config: PoolConfig) -> Result<Self> {
        let layout = PageLayout::calculate(object_size, &config);

        let mut pool = Self {
            config,
            layout,
            page_list: None,
            free_list: None,
            stats: PoolStats {
                object_size,
                page_size: layout.page_size(),
                ..PoolStats::default()
            },
        };

        if !pool.config.passthrough {
            pool.allocate_new_page()?;
        }

        Ok(pool)
    }

    /// Hands out one block.
    ///
    /// Equivalent to [`allocate_labeled`](Self::allocate_labeled) without a
    /// label; under [`HeaderKind::External`] the recorded label is empty.
    ///
    /// # Errors
    ///
    /// - [`PoolError::PageLimitReached`] when the free list is empty and the
    ///   page ceiling prevents growth.
    /// - [`PoolError::HostAllocFailed`] when the host allocator refuses a
    ///   new page (or, in passthrough mode, the block itself).
    ///
    /// # Example
    ///
    /// ```
    /// use guarded_pool::GuardedPool;
    ///
    /// let mut pool = GuardedPool::builder().object_size(16).build().unwrap();
    ///
    /// let block = pool.allocate().expect("pool can grow");
    /// assert_eq!(pool.stats().allocations, 1);
    /// # // SAFETY: block came from this pool and is unused afterwards.
    /// # unsafe { pool.free(block) }.unwrap();
    /// ```
    pub fn allocate(&mut self) -> Result<NonNull<u8>> {
        self.allocate_inner(None)
    }

    /// Hands out one block, recording `label` when the pool keeps
    /// [external headers](HeaderKind::External).
    ///
    /// The label is copied into the block's out-of-band
    /// [`BlockInfo`](crate::BlockInfo) record; other header variants ignore
    /// it.
    ///
    /// # Errors
    ///
    /// As for [`allocate`](Self::allocate).
    pub fn allocate_labeled(&mut self, label: &str) -> Result<NonNull<u8>> {
        self.allocate_inner(Some(label))
    }

    fn allocate_inner(&mut self, label: Option<&str>) -> Result<NonNull<u8>> {
        if self.config.passthrough {
            return self.allocate_passthrough();
        }

        if self.free_list.is_none() {
            self.allocate_new_page()?;
        }

        let alloc_num = self.stats.allocations.wrapping_add(1);

        // For external headers the BlockInfo is created before the free
        // list advances, so no failure can leave a block popped but
        // unowned.
        let external = self.config.header.prepare_external(alloc_num, label);

        let block = self
            .pop_free()
            .expect("free list cannot be empty right after page growth");

        if self.config.debug_enabled {
            // SAFETY: block is a live block body of object_size bytes.
            unsafe {
                ptr::write_bytes(block.as_ptr(), ALLOCATED_PATTERN, self.layout.object_size());
            }
        }

        // Cannot overflow: bounded by pages_in_use * objects_per_page.
        self.stats.objects_in_use = self.stats.objects_in_use.wrapping_add(1);
        self.stats.allocations = alloc_num;
        self.stats.most_objects = self.stats.most_objects.max(self.stats.objects_in_use);

        if self.layout.header_size() > 0 {
            let header_start = self.header_start(block);

            // SAFETY: every block body is preceded by its maintained header
            // region inside the same page.
            unsafe { self.config.header.on_allocate(header_start, alloc_num, external) };
        }

        #[cfg(debug_assertions)]
        self.integrity_check();

        Ok(block)
    }

    fn allocate_passthrough(&mut self) -> Result<NonNull<u8>> {
        let layout = self.object_host_layout();

        // SAFETY: layout has non-zero size; the builder rejects zero-sized
        // objects.
        let raw = unsafe { alloc(layout) };

        let Some(block) = NonNull::new(raw) else {
            return Err(PoolError::HostAllocFailed {
                size: layout.size(),
            });
        };

        self.stats.objects_in_use = self.stats.objects_in_use.wrapping_add(1);
        self.stats.allocations = self.stats.allocations.wrapping_add(1);
        self.stats.most_objects = self.stats.most_objects.max(self.stats.objects_in_use);

        Ok(block)
    }

    /// Returns a block to the pool.
    ///
    /// With debug mode on, the block is validated before any state changes:
    /// it must address a block body of a live page, its guard bytes must be
    /// intact, and it must not already be free. A failed validation leaves
    /// the pool — counters included — exactly as it was.
    ///
    /// # Errors
    ///
    /// - [`PoolError::BadBoundary`] — `block` is not a block body of any
    ///   live page.
    /// - [`PoolError::CorruptedBlock`] — a guard byte around the block was
    ///   overwritten.
    /// - [`PoolError::DoubleFree`] — the block is already on the free list.
    ///
    /// All three are only detected while debug mode is on.
    ///
    /// # Safety
    ///
    /// `block` must have been returned by [`allocate`](Self::allocate) /
    /// [`allocate_labeled`](Self::allocate_labeled) on this pool, must not
    /// have been freed since, and must not be read or written after this
    /// call. Debug mode downgrades most violations of this contract to
    /// errors, but the contract itself always stands — with debug off, a
    /// stray pointer here corrupts arbitrary memory.
    ///
    /// # Example
    ///
    /// ```
    /// use guarded_pool::GuardedPool;
    ///
    /// let mut pool = GuardedPool::builder().object_size(16).build().unwrap();
    /// let block = pool.allocate().unwrap();
    ///
    /// // SAFETY: `block` came from this pool and is not used after the free.
    /// unsafe { pool.free(block) }.expect("block is intact");
    /// ```
    pub unsafe fn free(&mut self, block: NonNull<u8>) -> Result<()> {
        if self.config.passthrough {
            self.stats.deallocations = self.stats.deallocations.wrapping_add(1);
            // Cannot underflow: the caller guarantees the block is live.
            self.stats.objects_in_use = self.stats.objects_in_use.wrapping_sub(1);

            // SAFETY: the caller guarantees the block came from
            // allocate() on this pool, which used this same layout.
            unsafe { dealloc(block.as_ptr(), self.object_host_layout()) };

            return Ok(());
        }

        // Validation first; counters and lists are only touched once the
        // block is known good, so a rejected free mutates nothing.
        if self.config.debug_enabled {
            self.boundary_check(block)?;
            self.padding_check(block)?;
            self.double_free_check(block)?;

            // SAFETY: the boundary check proved block is a block body of a
            // live page.
            unsafe {
                ptr::write_bytes(block.as_ptr(), FREED_PATTERN, self.layout.object_size());
            }
        }

        if self.layout.header_size() > 0 {
            let header_start = self.header_start(block);

            // SAFETY: every block body is preceded by its maintained header
            // region inside the same page.
            unsafe { self.config.header.on_free(header_start) };
        }

        self.stats.deallocations = self.stats.deallocations.wrapping_add(1);
        // Cannot underflow: the caller guarantees the block is live.
        self.stats.objects_in_use = self.stats.objects_in_use.wrapping_sub(1);
        self.push_free(block);

        #[cfg(debug_assertions)]
        self.integrity_check();

        Ok(())
    }

    /// Releases every page whose blocks are all on the free list.
    ///
    /// The free list may interleave blocks of all pages in any order; a page
    /// counts as empty once a single walk of the free list finds all of its
    /// blocks. Returns the number of pages released. Never fails; a pool
    /// with no empty pages returns 0.
    ///
    /// # Example
    ///
    /// ```
    /// use guarded_pool::GuardedPool;
    ///
    /// let mut pool = GuardedPool::builder().object_size(16).build().unwrap();
    ///
    /// let block = pool.allocate().unwrap();
    /// assert_eq!(pool.free_empty_pages(), 0); // the page has a live block
    ///
    /// // SAFETY: block came from this pool and is unused afterwards.
    /// unsafe { pool.free(block) }.unwrap();
    /// assert_eq!(pool.free_empty_pages(), 1);
    /// assert_eq!(pool.stats().pages_in_use, 0);
    /// ```
    pub fn free_empty_pages(&mut self) -> usize {
        let mut freed = 0;
        let mut prev: Option<PageRef> = None;
        let mut current = self.page_list;

        while let Some(page) = current {
            // SAFETY: pages on the page list are live.
            let next = unsafe { page.next() };

            if self.is_page_empty(page) {
                let unlinked = self.unlink_free_blocks_in(page);
                debug_assert_eq!(unlinked, self.layout.objects_per_page());

                match prev {
                    None => self.page_list = next,
                    // SAFETY: prev is a live page; rewriting its link keeps
                    // the remaining list intact.
                    Some(p) => unsafe { p.set_next(next) },
                }

                // SAFETY: the page came from the host allocator with
                // host_layout and is unreachable from here on.
                unsafe { dealloc(page.base().as_ptr(), self.layout.host_layout()) };

                // Cannot underflow: the page we just released was counted.
                self.stats.pages_in_use = self.stats.pages_in_use.wrapping_sub(1);
                freed += 1;
            } else {
                prev = Some(page);
            }

            current = next;
        }

        #[cfg(debug_assertions)]
        self.integrity_check();

        freed
    }

    /// Scans every block of every page and reports each one whose guard
    /// bytes are damaged.
    ///
    /// `report` receives the block body address and the object size once
    /// per damaged block; the return value is the damage count. Returns 0
    /// without scanning when debug mode is off or the pool has no guard
    /// bytes. Read-only: never fails and changes nothing.
    ///
    /// # Example
    ///
    /// ```
    /// use guarded_pool::GuardedPool;
    ///
    /// let mut pool = GuardedPool::builder()
    ///     .object_size(16)
    ///     .pad_bytes(2)
    ///     .debug_enabled(true)
    ///     .build()
    ///     .unwrap();
    ///
    /// let block = pool.allocate().unwrap();
    ///
    /// let mut damaged = Vec::new();
    /// assert_eq!(pool.validate_pages(|body, _size| damaged.push(body)), 0);
    /// assert!(damaged.is_empty());
    /// # // SAFETY: block came from this pool and is unused afterwards.
    /// # unsafe { pool.free(block) }.unwrap();
    /// ```
    pub fn validate_pages(&self, mut report: impl FnMut(NonNull<u8>, usize)) -> usize {
        if !self.config.debug_enabled || self.layout.pad_bytes() == 0 {
            return 0;
        }

        let mut corrupted = 0;
        let mut current = self.page_list;

        while let Some(page) = current {
            for index in 0..self.layout.objects_per_page() {
                let body = page.body(&self.layout, index);

                if !self.pads_intact(body) {
                    corrupted += 1;
                    report(body, self.layout.object_size());
                }
            }

            // SAFETY: pages on the page list are live.
            current = unsafe { page.next() };
        }

        corrupted
    }

    /// Reports every block whose header says it is still in use.
    ///
    /// `report` receives the block body address and the object size once per
    /// in-use block; the return value is the leak count. Only the header
    /// variants with an inline in-use flag ([`HeaderKind::Basic`] and
    /// [`HeaderKind::Extended`]) can be enumerated; the others return 0
    /// without reporting.
    pub fn dump_memory_in_use(&self, mut report: impl FnMut(NonNull<u8>, usize)) -> usize {
        if self.config.header.in_use_flag_offset().is_none() {
            return 0;
        }

        let mut leaks = 0;
        let mut current = self.page_list;

        while let Some(page) = current {
            for index in 0..self.layout.objects_per_page() {
                let body = page.body(&self.layout, index);
                let header_start = self.header_start(body);

                // SAFETY: every block body is preceded by its maintained
                // header region, and the kind keeps an inline flag.
                if unsafe { self.config.header.read_in_use(header_start) } {
                    leaks += 1;
                    report(body, self.layout.object_size());
                }
            }

            // SAFETY: pages on the page list are live.
            current = unsafe { page.next() };
        }

        leaks
    }

    /// Turns signature stamping and the free-time corruption checks on or
    /// off.
    ///
    /// Blocks freed while debug mode was off carry no `FREED` signature, so
    /// a double free of such a block goes undetected even after debug mode
    /// is re-enabled.
    #[inline]
    pub fn set_debug_enabled(&mut self, enabled: bool) {
        self.config.debug_enabled = enabled;
    }

    /// A point-in-time snapshot of the pool's counters.
    #[must_use]
    #[inline]
    pub fn stats(&self) -> PoolStats {
        self.stats
    }

    /// The configuration the pool was built with (plus the current debug
    /// flag).
    #[must_use]
    #[inline]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// The byte layout shared by every page of this pool.
    #[must_use]
    #[inline]
    pub fn page_layout(&self) -> &PageLayout {
        &self.layout
    }

    /// Body address of the block at the head of the free list — the block
    /// the next allocation will hand out — or `None` when the free list is
    /// empty.
    #[must_use]
    #[inline]
    pub fn free_list_head(&self) -> Option<NonNull<u8>> {
        self.free_list
    }

    /// Base address of the most recently created page, or `None` when the
    /// pool owns no pages.
    #[must_use]
    #[inline]
    pub fn page_list_head(&self) -> Option<NonNull<u8>> {
        self.page_list.map(PageRef::base)
    }

    fn allocate_new_page(&mut self) -> Result<()> {
        if let Some(max) = self.config.max_pages {
            if self.stats.pages_in_use >= max.get() {
                return Err(PoolError::PageLimitReached {
                    max_pages: max.get(),
                });
            }
        }

        let host_layout = self.layout.host_layout();

        // SAFETY: host_layout has non-zero size; the page prefix alone is
        // at least pointer-sized.
        let raw = unsafe { alloc(host_layout) };

        let Some(base) = NonNull::new(raw) else {
            return Err(PoolError::HostAllocFailed {
                size: host_layout.size(),
            });
        };

        // Alignment signature under debug, zero otherwise, so inspectors
        // never read uninitialized bytes.
        let fill = if self.config.debug_enabled {
            ALIGN_PATTERN
        } else {
            0
        };

        // SAFETY: base points to a fresh page_size-byte allocation.
        unsafe { ptr::write_bytes(base.as_ptr(), fill, self.layout.page_size()) };

        let page = PageRef::new(base);

        // SAFETY: the page is live; its first link bytes are reserved for
        // the page list.
        unsafe { page.set_next(self.page_list) };
        self.page_list = Some(page);
        // Cannot overflow: bounded by max_pages or by virtual memory.
        self.stats.pages_in_use = self.stats.pages_in_use.wrapping_add(1);

        for index in 0..self.layout.objects_per_page() {
            let body = page.body(&self.layout, index);

            if self.layout.header_size() > 0 {
                let header_start = self.header_start(body);

                // SAFETY: the header region precedes each body inside the
                // page.
                unsafe {
                    ptr::write_bytes(header_start.as_ptr(), 0, self.layout.header_size());
                }
            }

            // Front insertion in index order: the highest-index block is
            // handed out first.
            self.push_free(body);

            if self.config.debug_enabled {
                // SAFETY: body is a block body of the freshly created page.
                unsafe { self.stamp_fresh_block(body) };
            }
        }

        Ok(())
    }

    /// Stamps the never-allocated signature over a fresh block's body (past
    /// the embedded link) and the guard pattern over its pads.
    ///
    /// # Safety
    ///
    /// `body` must be a block body of a live page.
    unsafe fn stamp_fresh_block(&self, body: NonNull<u8>) {
        // SAFETY: the body bytes past the link lie inside the block.
        unsafe {
            ptr::write_bytes(
                body.byte_add(LINK_BYTES).as_ptr(),
                UNALLOCATED_PATTERN,
                self.layout.object_size() - LINK_BYTES,
            );
        }

        let pad_bytes = self.layout.pad_bytes();
        if pad_bytes == 0 {
            return;
        }

        // SAFETY: both pad regions border the body inside the same page.
        unsafe {
            ptr::write_bytes(body.as_ptr().sub(pad_bytes), PAD_PATTERN, pad_bytes);
        }
        // SAFETY: as above.
        unsafe {
            ptr::write_bytes(
                body.as_ptr().add(self.layout.object_size()),
                PAD_PATTERN,
                pad_bytes,
            );
        }
    }

    fn push_free(&mut self, block: NonNull<u8>) {
        // SAFETY: a free block's first link bytes are free-list storage.
        unsafe { write_link(block, self.free_list) };
        self.free_list = Some(block);
        // Cannot overflow: bounded by pages_in_use * objects_per_page.
        self.stats.free_objects = self.stats.free_objects.wrapping_add(1);
    }

    fn pop_free(&mut self) -> Option<NonNull<u8>> {
        let block = self.free_list?;

        // SAFETY: blocks on the free list always carry a maintained link.
        self.free_list = unsafe { read_link(block) };
        // Cannot underflow: the list was non-empty.
        self.stats.free_objects = self.stats.free_objects.wrapping_sub(1);

        Some(block)
    }

    fn page_of(&self, addr: NonNull<u8>) -> Option<PageRef> {
        let mut current = self.page_list;

        while let Some(page) = current {
            if page.contains(&self.layout, addr) {
                return Some(page);
            }

            // SAFETY: pages on the page list are live.
            current = unsafe { page.next() };
        }

        None
    }

    fn boundary_check(&self, block: NonNull<u8>) -> Result<()> {
        let address = block.addr().get();

        let page = self
            .page_of(block)
            .ok_or(PoolError::BadBoundary { address })?;

        // Inside the page is not enough: the address must land exactly on a
        // block body start.
        if page.body_index(&self.layout, block).is_none() {
            return Err(PoolError::BadBoundary { address });
        }

        Ok(())
    }

    fn padding_check(&self, block: NonNull<u8>) -> Result<()> {
        if self.pads_intact(block) {
            Ok(())
        } else {
            Err(PoolError::CorruptedBlock {
                address: block.addr().get(),
            })
        }
    }

    fn double_free_check(&self, block: NonNull<u8>) -> Result<()> {
        // The first link bytes of a free body hold the free-list link, so
        // the freed signature is probed right after them. Pointer-sized
        // objects have no byte to probe; their double frees go undetected.
        if self.layout.object_size() <= LINK_BYTES {
            return Ok(());
        }

        // SAFETY: the boundary check proved block is a block body wider
        // than the link.
        let probe = unsafe { block.byte_add(LINK_BYTES).read() };

        if probe == FREED_PATTERN {
            return Err(PoolError::DoubleFree {
                address: block.addr().get(),
            });
        }

        Ok(())
    }

    /// Whether both guard regions of `block` hold the guard pattern
    /// throughout. Trivially true for pools without guard bytes.
    fn pads_intact(&self, block: NonNull<u8>) -> bool {
        let pad_bytes = self.layout.pad_bytes();
        if pad_bytes == 0 {
            return true;
        }

        // SAFETY: block is a block body, so its left pad directly precedes
        // it inside the same page.
        let left = unsafe { slice::from_raw_parts(block.as_ptr().sub(pad_bytes), pad_bytes) };

        // SAFETY: the right pad directly follows the body inside the page.
        let right = unsafe {
            slice::from_raw_parts(block.as_ptr().add(self.layout.object_size()), pad_bytes)
        };

        left.iter().all(|&byte| byte == PAD_PATTERN)
            && right.iter().all(|&byte| byte == PAD_PATTERN)
    }

    /// Whether every block of `page` is on the free list.
    ///
    /// One walk of the free list, counting hits inside the page; no
    /// assumption about ordering or contiguity.
    fn is_page_empty(&self, page: PageRef) -> bool {
        let mut hits = 0;
        let mut current = self.free_list;

        while let Some(block) = current {
            if page.contains(&self.layout, block) {
                hits += 1;

                if hits == self.layout.objects_per_page() {
                    return true;
                }
            }

            // SAFETY: blocks on the free list always carry a maintained
            // link.
            current = unsafe { read_link(block) };
        }

        false
    }

    /// Unlinks every free-list block that lies inside `page`, including a
    /// head that does. Returns the number unlinked.
    fn unlink_free_blocks_in(&mut self, page: PageRef) -> usize {
        let mut removed = 0;
        let mut prev: Option<NonNull<u8>> = None;
        let mut current = self.free_list;

        while let Some(block) = current {
            // SAFETY: blocks on the free list always carry a maintained
            // link.
            let next = unsafe { read_link(block) };

            if page.contains(&self.layout, block) {
                match prev {
                    None => self.free_list = next,
                    // SAFETY: prev is a free block; rewriting its link keeps
                    // the remaining list intact.
                    Some(p) => unsafe { write_link(p, next) },
                }

                // Cannot underflow: the block we just unlinked was counted.
                self.stats.free_objects = self.stats.free_objects.wrapping_sub(1);
                removed += 1;
            } else {
                prev = Some(block);
            }

            current = next;
        }

        removed
    }

    fn header_start(&self, body: NonNull<u8>) -> NonNull<u8> {
        // SAFETY: every block body is preceded by pad_bytes + header_size
        // bytes inside the same page.
        unsafe { body.byte_sub(self.layout.pad_bytes() + self.layout.header_size()) }
    }

    fn object_host_layout(&self) -> std::alloc::Layout {
        std::alloc::Layout::from_size_align(
            self.layout.object_size(),
            self.config.alignment.max(1),
        )
        .expect("object layout is valid for any configuration the builder accepts")
    }

    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(debug_assertions)]
    /// Asserts the counter identities and list sanity after a mutation.
    ///
    /// Debug builds only; the walks would wreck the O(1) guarantees in
    /// release builds.
    #[allow(
        clippy::cast_possible_truncation,
        reason = "counter identities are checked at test scale"
    )]
    fn integrity_check(&self) {
        if self.config.passthrough {
            return;
        }

        let mut observed_pages = 0_usize;
        let mut current = self.page_list;

        while let Some(page) = current {
            observed_pages += 1;
            assert!(
                observed_pages <= self.stats.pages_in_use,
                "page list is longer than pages_in_use; cycle suspected"
            );

            // SAFETY: pages on the page list are live.
            current = unsafe { page.next() };
        }

        assert_eq!(
            observed_pages, self.stats.pages_in_use,
            "page list length does not match pages_in_use"
        );

        let mut observed_free = 0_usize;
        let mut node = self.free_list;

        while let Some(block) = node {
            observed_free += 1;
            assert!(
                observed_free <= self.stats.free_objects,
                "free list is longer than free_objects; cycle suspected"
            );

            let page = self
                .page_of(block)
                .expect("free-list block lies outside every page");
            assert!(
                page.body_index(&self.layout, block).is_some(),
                "free-list block is not a block body"
            );

            // SAFETY: blocks on the free list always carry a maintained
            // link.
            node = unsafe { read_link(block) };
        }

        assert_eq!(
            observed_free, self.stats.free_objects,
            "free list length does not match free_objects"
        );

        assert_eq!(
            self.stats.free_objects + self.stats.objects_in_use,
            self.stats.pages_in_use * self.layout.objects_per_page(),
            "block conservation identity violated"
        );

        assert_eq!(
            self.stats.allocations.wrapping_sub(self.stats.deallocations) as usize,
            self.stats.objects_in_use,
            "allocation ledger identity violated"
        );
    }
}

impl Drop for GuardedPool {
    fn drop(&mut self) {
        let mut current = self.page_list;

        while let Some(page) = current {
            // SAFETY: the page stays live until deallocated below.
            let next = unsafe { page.next() };

            if matches!(self.config.header, HeaderKind::External) {
                // Destroy any still-live external header of any block;
                // freed and never-allocated blocks hold a null pointer and
                // are skipped.
                for index in 0..self.layout.objects_per_page() {
                    let header_start = self.header_start(page.body(&self.layout, index));

                    // SAFETY: the header region is maintained for every
                    // block; on_free tolerates a null slot.
                    unsafe { HeaderKind::External.on_free(header_start) };
                }
            }

            // SAFETY: the page came from the host allocator with
            // host_layout and is unreachable from here on.
            unsafe { dealloc(page.base().as_ptr(), self.layout.host_layout()) };

            current = next;
        }
    }
}

// SAFETY: GuardedPool owns all the memory its raw pointers address (the
// pages and the external header records), shares none of it, and keeps no
// thread-local state. It is therefore safe to move between threads; it is
// deliberately not Sync because every entry point mutates the list heads.
unsafe impl Send for GuardedPool {}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use new_zealand::nz;
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(GuardedPool: Send);
    assert_not_impl_any!(GuardedPool: Sync);

    #[test]
    fn construct_preallocates_one_page() {
        let pool = GuardedPool::builder().object_size(16).build().unwrap();
        let stats = pool.stats();

        assert_eq!(stats.pages_in_use, 1);
        assert_eq!(stats.free_objects, 4);
        assert_eq!(stats.objects_in_use, 0);
        assert!(pool.page_list_head().is_some());
        assert!(pool.free_list_head().is_some());
    }

    #[test]
    fn allocate_free_round_trip_updates_counters() {
        let mut pool = GuardedPool::builder().object_size(16).build().unwrap();

        let block = pool.allocate().unwrap();

        let stats = pool.stats();
        assert_eq!(stats.objects_in_use, 1);
        assert_eq!(stats.free_objects, 3);
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.most_objects, 1);

        unsafe { pool.free(block) }.unwrap();

        let stats = pool.stats();
        assert_eq!(stats.objects_in_use, 0);
        assert_eq!(stats.free_objects, 4);
        assert_eq!(stats.deallocations, 1);
        assert_eq!(stats.most_objects, 1);
    }

    #[test]
    fn freed_block_is_reused_first() {
        let mut pool = GuardedPool::builder().object_size(16).build().unwrap();

        let first = pool.allocate().unwrap();
        let _second = pool.allocate().unwrap();

        unsafe { pool.free(first) }.unwrap();

        let reused = pool.allocate().unwrap();
        assert_eq!(reused, first);
    }

    #[test]
    fn page_growth_when_the_free_list_empties() {
        let mut pool = GuardedPool::builder()
            .object_size(16)
            .objects_per_page(nz!(2))
            .build()
            .unwrap();

        let _a = pool.allocate().unwrap();
        let _b = pool.allocate().unwrap();
        assert_eq!(pool.stats().pages_in_use, 1);

        let _c = pool.allocate().unwrap();
        assert_eq!(pool.stats().pages_in_use, 2);
    }

    #[test]
    fn page_limit_is_enforced() {
        let mut pool = GuardedPool::builder()
            .object_size(16)
            .objects_per_page(nz!(1))
            .max_pages(nz!(1))
            .build()
            .unwrap();

        let _only = pool.allocate().unwrap();

        let error = pool.allocate().unwrap_err();
        assert_eq!(error, PoolError::PageLimitReached { max_pages: 1 });
    }

    #[test]
    fn returned_blocks_honor_the_alignment() {
        let mut pool = GuardedPool::builder()
            .object_size(24)
            .alignment(32)
            .pad_bytes(3)
            .header(HeaderKind::Basic)
            .build()
            .unwrap();

        for _ in 0..8 {
            let block = pool.allocate().unwrap();
            assert_eq!(block.addr().get() % 32, 0);
        }
    }

    #[test]
    fn debug_patterns_cover_the_block_states() {
        let mut pool = GuardedPool::builder()
            .object_size(16)
            .debug_enabled(true)
            .build()
            .unwrap();

        // A fresh block on the free list: link bytes, then the
        // never-allocated signature.
        let fresh = pool.free_list_head().unwrap();
        let body = unsafe { slice::from_raw_parts(fresh.as_ptr(), 16) };
        assert!(body[LINK_BYTES..]
            .iter()
            .all(|&byte| byte == UNALLOCATED_PATTERN));

        let block = pool.allocate().unwrap();
        let body = unsafe { slice::from_raw_parts(block.as_ptr(), 16) };
        assert!(body.iter().all(|&byte| byte == ALLOCATED_PATTERN));

        unsafe { pool.free(block) }.unwrap();
        let body = unsafe { slice::from_raw_parts(block.as_ptr(), 16) };
        assert!(body[LINK_BYTES..].iter().all(|&byte| byte == FREED_PATTERN));
    }

    #[test]
    fn double_free_is_detected() {
        let mut pool = GuardedPool::builder()
            .object_size(16)
            .debug_enabled(true)
            .build()
            .unwrap();

        let block = pool.allocate().unwrap();
        unsafe { pool.free(block) }.unwrap();

        let error = unsafe { pool.free(block) }.unwrap_err();
        assert!(matches!(error, PoolError::DoubleFree { .. }));
    }

    #[test]
    fn failed_free_leaves_the_counters_alone() {
        let mut pool = GuardedPool::builder()
            .object_size(16)
            .debug_enabled(true)
            .build()
            .unwrap();

        let block = pool.allocate().unwrap();
        unsafe { pool.free(block) }.unwrap();

        let before = pool.stats();
        assert!(unsafe { pool.free(block) }.is_err());

        assert_eq!(pool.stats(), before);
    }

    #[test]
    fn interior_pointer_is_a_boundary_error() {
        let mut pool = GuardedPool::builder()
            .object_size(16)
            .debug_enabled(true)
            .build()
            .unwrap();

        let block = pool.allocate().unwrap();
        let interior = unsafe { block.byte_add(1) };

        let error = unsafe { pool.free(interior) }.unwrap_err();
        assert!(matches!(error, PoolError::BadBoundary { .. }));
    }

    #[test]
    fn foreign_pointer_is_a_boundary_error() {
        let mut pool = GuardedPool::builder()
            .object_size(16)
            .debug_enabled(true)
            .build()
            .unwrap();

        let mut foreign = [0_u8; 16];

        let error = unsafe { pool.free(NonNull::from(&mut foreign[0])) }.unwrap_err();
        assert!(matches!(error, PoolError::BadBoundary { .. }));
    }

    #[test]
    fn pad_overwrite_is_a_corruption_error() {
        let mut pool = GuardedPool::builder()
            .object_size(16)
            .pad_bytes(2)
            .debug_enabled(true)
            .build()
            .unwrap();

        let block = pool.allocate().unwrap();

        // One byte past the body: the first byte of the right pad.
        unsafe { block.byte_add(16).write(0) };

        let error = unsafe { pool.free(block) }.unwrap_err();
        assert!(matches!(error, PoolError::CorruptedBlock { .. }));
    }

    #[test]
    fn validate_pages_counts_damaged_blocks() {
        let mut pool = GuardedPool::builder()
            .object_size(16)
            .pad_bytes(2)
            .debug_enabled(true)
            .build()
            .unwrap();

        let block = pool.allocate().unwrap();
        assert_eq!(pool.validate_pages(|_, _| {}), 0);

        unsafe { block.byte_add(16).write(0) };

        let mut reported = Vec::new();
        assert_eq!(pool.validate_pages(|body, size| reported.push((body, size))), 1);
        assert_eq!(reported, vec![(block, 16)]);
    }

    #[test]
    fn validate_pages_is_inert_without_debug_or_pads() {
        let pool = GuardedPool::builder().object_size(16).build().unwrap();
        assert_eq!(pool.validate_pages(|_, _| {}), 0);

        let pool = GuardedPool::builder()
            .object_size(16)
            .debug_enabled(true)
            .build()
            .unwrap();
        assert_eq!(pool.validate_pages(|_, _| {}), 0);
    }

    #[test]
    fn leak_dump_matches_objects_in_use() {
        let mut pool = GuardedPool::builder()
            .object_size(16)
            .header(HeaderKind::Basic)
            .build()
            .unwrap();

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let _c = pool.allocate().unwrap();

        unsafe { pool.free(b) }.unwrap();

        let mut leaked = Vec::new();
        let leaks = pool.dump_memory_in_use(|body, _| leaked.push(body));

        assert_eq!(leaks, pool.stats().objects_in_use);
        assert_eq!(leaks, 2);
        assert!(leaked.contains(&a));
        assert!(!leaked.contains(&b));
    }

    #[test]
    fn leak_dump_is_inert_for_headerless_pools() {
        let mut pool = GuardedPool::builder().object_size(16).build().unwrap();
        let _block = pool.allocate().unwrap();

        assert_eq!(pool.dump_memory_in_use(|_, _| {}), 0);
    }

    #[test]
    fn passthrough_maintains_only_object_counters() {
        let mut pool = GuardedPool::builder()
            .object_size(16)
            .passthrough(true)
            .build()
            .unwrap();

        assert_eq!(pool.stats().pages_in_use, 0);
        assert!(pool.page_list_head().is_none());

        let block = pool.allocate().unwrap();

        let stats = pool.stats();
        assert_eq!(stats.objects_in_use, 1);
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.free_objects, 0);
        assert_eq!(stats.pages_in_use, 0);

        unsafe { pool.free(block) }.unwrap();

        let stats = pool.stats();
        assert_eq!(stats.objects_in_use, 0);
        assert_eq!(stats.deallocations, 1);
    }

    #[test]
    fn debug_can_be_toggled_at_runtime() {
        let mut pool = GuardedPool::builder().object_size(16).build().unwrap();
        assert!(!pool.config().debug_enabled);

        pool.set_debug_enabled(true);
        assert!(pool.config().debug_enabled);

        // Enabling debug does not restamp existing free blocks; the double
        // free below is caught via the signature written by the first
        // (debug-mode) free.
        let block = pool.allocate().unwrap();
        unsafe { pool.free(block) }.unwrap();
        assert!(unsafe { pool.free(block) }.is_err());
    }

    #[test]
    fn external_headers_record_the_label() {
        let mut pool = GuardedPool::builder()
            .object_size(16)
            .header(HeaderKind::External)
            .build()
            .unwrap();

        let block = pool.allocate_labeled("projectile").unwrap();

        let header_start = unsafe { block.byte_sub(HeaderKind::External.size()) };
        let info = unsafe {
            header_start
                .cast::<*mut crate::BlockInfo>()
                .as_ptr()
                .read_unaligned()
        };

        let info = unsafe { &*info };
        assert!(info.in_use);
        assert_eq!(info.alloc_num, 1);
        assert_eq!(info.label.as_deref(), Some("projectile"));

        unsafe { pool.free(block) }.unwrap();
    }

    #[test]
    fn drop_releases_live_external_headers() {
        let mut pool = GuardedPool::builder()
            .object_size(16)
            .header(HeaderKind::External)
            .build()
            .unwrap();

        // Leak two labeled blocks into the drop path; every block of every
        // page is inspected at teardown.
        let _a = pool.allocate_labeled("left behind").unwrap();
        let _b = pool.allocate_labeled("also left behind").unwrap();

        drop(pool);
    }

    #[test]
    fn free_empty_pages_reclaims_only_fully_free_pages() {
        let mut pool = GuardedPool::builder()
            .object_size(16)
            .objects_per_page(nz!(2))
            .build()
            .unwrap();

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let c = pool.allocate().unwrap();
        assert_eq!(pool.stats().pages_in_use, 2);

        // First page still holds a and b; only the second page's remaining
        // block is free.
        assert_eq!(pool.free_empty_pages(), 0);

        unsafe { pool.free(a) }.unwrap();
        unsafe { pool.free(b) }.unwrap();

        // Now the first page is fully free while the second still holds c.
        assert_eq!(pool.free_empty_pages(), 1);
        assert_eq!(pool.stats().pages_in_use, 1);
        assert_eq!(pool.stats().free_objects, 1);

        unsafe { pool.free(c) }.unwrap();
        assert_eq!(pool.free_empty_pages(), 1);
        assert_eq!(pool.stats().pages_in_use, 0);

        // The pool grows again on demand afterwards.
        let _fresh = pool.allocate().unwrap();
        assert_eq!(pool.stats().pages_in_use, 1);
    }

    #[test]
    fn empty_pool_has_nothing_to_reclaim() {
        let mut pool = GuardedPool::builder()
            .object_size(16)
            .passthrough(true)
            .build()
            .unwrap();

        assert_eq!(pool.free_empty_pages(), 0);
    }

    #[test]
    fn page_layout_observer_matches_stats() {
        let pool = GuardedPool::builder()
            .object_size(16)
            .pad_bytes(2)
            .header(HeaderKind::Basic)
            .alignment(8)
            .build()
            .unwrap();

        assert_eq!(pool.page_layout().page_size(), pool.stats().page_size);
        assert_eq!(pool.page_layout().object_size(), 16);
        assert_eq!(pool.page_layout().stride() % 8, 0);
    }
}
