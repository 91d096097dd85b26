use std::num::NonZero;

use crate::page::LINK_BYTES;
use crate::{GuardedPool, HeaderKind, PoolConfig, PoolError};

/// Builder for configuring and constructing a [`GuardedPool`].
///
/// The object size is mandatory — it is the one parameter with no sensible
/// default — and must be at least pointer-wide, because a free block's body
/// doubles as free-list link storage. Everything else is optional.
///
/// # Examples
///
/// ```
/// use guarded_pool::{GuardedPool, HeaderKind};
///
/// let pool = GuardedPool::builder()
///     .object_size(64)
///     .pad_bytes(4)
///     .header(HeaderKind::Basic)
///     .debug_enabled(true)
///     .build()
///     .expect("initial page allocation failed");
///
/// assert_eq!(pool.stats().object_size, 64);
/// assert_eq!(pool.stats().pages_in_use, 1);
/// ```
#[derive(Debug)]
#[must_use]
pub struct GuardedPoolBuilder {
    object_size: Option<usize>,
    config: PoolConfig,
}

impl GuardedPoolBuilder {
    pub(crate) fn new() -> Self {
        Self {
            object_size: None,
            config: PoolConfig::default(),
        }
    }

    /// Sets the size in bytes of the blocks the pool hands out.
    ///
    /// # Panics
    ///
    /// Panics if `size` is smaller than a pointer; free blocks store the
    /// free-list link in their first pointer-width bytes.
    pub fn object_size(mut self, size: usize) -> Self {
        assert!(
            size >= LINK_BYTES,
            "object size {size} cannot hold a free-list link of {LINK_BYTES} bytes"
        );

        self.object_size = Some(size);
        self
    }

    /// Sets the block size from a type.
    ///
    /// This is a convenience wrapper around [`object_size`](Self::object_size)
    /// and carries the same minimum-size requirement; the type's alignment
    /// is *not* adopted — configure [`alignment`](Self::alignment) separately
    /// if the blocks will hold instances of `T`.
    pub fn object_size_of<T>(self) -> Self {
        self.object_size(size_of::<T>())
    }

    /// Sets the number of blocks carved out of each page. Default: 4.
    pub fn objects_per_page(mut self, count: NonZero<usize>) -> Self {
        self.config.objects_per_page = count;
        self
    }

    /// Caps the number of live pages. Default: unlimited.
    pub fn max_pages(mut self, limit: NonZero<usize>) -> Self {
        self.config.max_pages = Some(limit);
        self
    }

    /// Routes every allocate/free to the host allocator, bypassing the page
    /// machinery while still maintaining counters. Default: off.
    pub fn passthrough(mut self, enabled: bool) -> Self {
        self.config.passthrough = enabled;
        self
    }

    /// Enables signature-pattern stamping and the free-time corruption
    /// checks. Default: off. Can be toggled later through
    /// [`GuardedPool::set_debug_enabled`].
    pub fn debug_enabled(mut self, enabled: bool) -> Self {
        self.config.debug_enabled = enabled;
        self
    }

    /// Sets the width of the guard regions before and after each block
    /// body. Default: 0.
    pub fn pad_bytes(mut self, bytes: usize) -> Self {
        self.config.pad_bytes = bytes;
        self
    }

    /// Requires block body addresses to be aligned to `alignment` bytes.
    /// Zero (the default) means no alignment requirement.
    ///
    /// # Panics
    ///
    /// Panics if `alignment` is neither zero nor a power of two.
    pub fn alignment(mut self, alignment: usize) -> Self {
        assert!(
            alignment == 0 || alignment.is_power_of_two(),
            "alignment {alignment} must be zero or a power of two"
        );

        self.config.alignment = alignment;
        self
    }

    /// Selects the per-block header variant. Default: [`HeaderKind::None`].
    pub fn header(mut self, header: HeaderKind) -> Self {
        self.config.header = header;
        self
    }

    /// Builds the pool, preallocating its first page unless passthrough
    /// mode is selected.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::HostAllocFailed`] if the host allocator refuses
    /// the first page.
    ///
    /// # Panics
    ///
    /// Panics if no object size has been set.
    pub fn build(self) -> Result<GuardedPool, PoolError> {
        let object_size = self
            .object_size
            .expect("object size must be set with .object_size() or .object_size_of::<T>()");

        GuardedPool::new_inner(object_size, self.config)
    }
}

#[cfg(test)]
mod tests {
    use new_zealand::nz;

    use crate::GuardedPool;

    #[test]
    fn defaults_match_the_documented_configuration() {
        let pool = GuardedPool::builder().object_size(16).build().unwrap();
        let config = pool.config();

        assert_eq!(config.objects_per_page.get(), 4);
        assert!(config.max_pages.is_none());
        assert!(!config.passthrough);
        assert!(!config.debug_enabled);
        assert_eq!(config.pad_bytes, 0);
        assert_eq!(config.alignment, 0);
    }

    #[test]
    fn settings_reach_the_pool() {
        let pool = GuardedPool::builder()
            .object_size(32)
            .objects_per_page(nz!(7))
            .max_pages(nz!(2))
            .pad_bytes(3)
            .alignment(16)
            .debug_enabled(true)
            .build()
            .unwrap();

        let config = pool.config();
        assert_eq!(config.objects_per_page.get(), 7);
        assert_eq!(config.max_pages.map(std::num::NonZero::get), Some(2));
        assert_eq!(config.pad_bytes, 3);
        assert_eq!(config.alignment, 16);
        assert!(config.debug_enabled);
    }

    #[test]
    #[should_panic(expected = "cannot hold a free-list link")]
    fn undersized_objects_are_rejected() {
        _ = GuardedPool::builder().object_size(2);
    }

    #[test]
    #[should_panic(expected = "must be zero or a power of two")]
    fn non_power_of_two_alignment_is_rejected() {
        _ = GuardedPool::builder().object_size(16).alignment(12);
    }

    #[test]
    #[should_panic(expected = "object size must be set")]
    fn missing_object_size_is_rejected() {
        _ = GuardedPool::builder().build();
    }
}
