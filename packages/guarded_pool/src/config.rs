use std::num::NonZero;

use new_zealand::nz;

use crate::HeaderKind;

/// Number of blocks carved per page unless the builder overrides it.
pub(crate) const DEFAULT_OBJECTS_PER_PAGE: NonZero<usize> = nz!(4);

/// The configuration a [`GuardedPool`][crate::GuardedPool] was built with.
///
/// Produced by [`GuardedPoolBuilder`][crate::GuardedPoolBuilder] and
/// observable through [`GuardedPool::config()`][crate::GuardedPool::config].
/// All fields except `debug_enabled` are fixed for the life of the pool;
/// the debug flag can be toggled at runtime through
/// [`GuardedPool::set_debug_enabled()`][crate::GuardedPool::set_debug_enabled].
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Number of blocks carved out of each page.
    pub objects_per_page: NonZero<usize>,

    /// Ceiling on live pages; `None` means the pool may grow without limit.
    pub max_pages: Option<NonZero<usize>>,

    /// When set, every allocate/free delegates to the host allocator and the
    /// page machinery is bypassed entirely.
    pub passthrough: bool,

    /// When set, signature patterns are written into pool memory and
    /// verified on free.
    pub debug_enabled: bool,

    /// Width of the guard regions placed immediately before and after each
    /// block body.
    pub pad_bytes: usize,

    /// Required byte alignment of block body addresses. Zero means no
    /// alignment requirement; otherwise a power of two.
    pub alignment: usize,

    /// Per-block header variant maintained in front of each block.
    pub header: HeaderKind,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            objects_per_page: DEFAULT_OBJECTS_PER_PAGE,
            max_pages: None,
            passthrough: false,
            debug_enabled: false,
            pad_bytes: 0,
            alignment: 0,
            header: HeaderKind::default(),
        }
    }
}
