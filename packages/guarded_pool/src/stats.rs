/// A point-in-time snapshot of the pool's counters.
///
/// Returned by value from [`GuardedPool::stats()`][crate::GuardedPool::stats];
/// the snapshot does not track the pool after it is taken.
///
/// In pool mode the counters satisfy two identities at every observable
/// moment: `free_objects + objects_in_use == pages_in_use * objects_per_page`
/// and `allocations - deallocations == objects_in_use`. In passthrough mode
/// only the per-object counters are maintained; `free_objects` and
/// `pages_in_use` stay zero because no pages exist.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub struct PoolStats {
    /// Size in bytes of the blocks this pool hands out.
    pub object_size: usize,

    /// Size in bytes of each page obtained from the host allocator.
    pub page_size: usize,

    /// Number of blocks currently on the free list.
    pub free_objects: usize,

    /// Number of blocks currently held by the client.
    pub objects_in_use: usize,

    /// Number of live pages.
    pub pages_in_use: usize,

    /// Total number of allocations ever performed. Monotonic.
    pub allocations: u32,

    /// Total number of deallocations ever performed. Monotonic.
    pub deallocations: u32,

    /// High-water mark of `objects_in_use`.
    pub most_objects: usize,
}
