use std::ptr::{self, NonNull};

use crate::PageLayout;

/// Width of an embedded list link: the next-page link at the start of each
/// page and the next-free link at the start of each free block body.
pub(crate) const LINK_BYTES: usize = size_of::<*mut u8>();

/// Reads an embedded link.
///
/// # Safety
///
/// `at` must point to [`LINK_BYTES`] readable bytes holding a link written
/// by [`write_link`] (or zeroed).
pub(crate) unsafe fn read_link(at: NonNull<u8>) -> Option<NonNull<u8>> {
    // SAFETY: forwarded to the caller; links have no alignment guarantee,
    // hence read_unaligned.
    let raw = unsafe { at.cast::<*mut u8>().as_ptr().read_unaligned() };

    NonNull::new(raw)
}

/// Writes an embedded link.
///
/// # Safety
///
/// `at` must point to [`LINK_BYTES`] writable bytes.
pub(crate) unsafe fn write_link(at: NonNull<u8>, link: Option<NonNull<u8>>) {
    let raw = link.map_or(ptr::null_mut(), NonNull::as_ptr);

    // SAFETY: forwarded to the caller; links have no alignment guarantee,
    // hence write_unaligned.
    unsafe { at.cast::<*mut u8>().as_ptr().write_unaligned(raw) };
}

/// Non-owning handle to one page of the pool.
///
/// A page is a raw host allocation whose first [`LINK_BYTES`] bytes hold the
/// link to the next page; everything else about its interior is described by
/// the pool's [`PageLayout`]. The handle is address arithmetic only — it
/// never touches page memory except through the explicitly unsafe link
/// accessors.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct PageRef {
    base: NonNull<u8>,
}

impl PageRef {
    pub(crate) fn new(base: NonNull<u8>) -> Self {
        Self { base }
    }

    #[inline]
    pub(crate) fn base(self) -> NonNull<u8> {
        self.base
    }

    /// Follows the page's next-page link.
    ///
    /// # Safety
    ///
    /// The page must be live (allocated by the pool and not yet released).
    pub(crate) unsafe fn next(self) -> Option<PageRef> {
        // SAFETY: a live page always has a maintained link in its first
        // LINK_BYTES bytes.
        unsafe { read_link(self.base) }.map(PageRef::new)
    }

    /// Rewrites the page's next-page link.
    ///
    /// # Safety
    ///
    /// The page must be live.
    pub(crate) unsafe fn set_next(self, next: Option<PageRef>) {
        // SAFETY: a live page's first LINK_BYTES bytes are reserved for
        // this link.
        unsafe { write_link(self.base, next.map(PageRef::base)) };
    }

    /// Whether `addr` falls inside this page's `[base, base + page_size)`.
    pub(crate) fn contains(self, layout: &PageLayout, addr: NonNull<u8>) -> bool {
        let base = self.base.addr().get();
        let addr = addr.addr().get();

        addr >= base && addr < base + layout.page_size()
    }

    /// Address of block body `index` inside this page.
    pub(crate) fn body(self, layout: &PageLayout, index: usize) -> NonNull<u8> {
        assert!(
            index < layout.objects_per_page(),
            "block index {index} out of bounds in a page of {} blocks",
            layout.objects_per_page()
        );

        // SAFETY: guarded by the bounds check above; every body offset lies
        // inside the page allocation.
        unsafe { self.base.byte_add(layout.body_offset(index)) }
    }

    /// Maps an address inside this page back to its block index, or `None`
    /// if it does not land exactly on a block body start.
    pub(crate) fn body_index(self, layout: &PageLayout, addr: NonNull<u8>) -> Option<usize> {
        let offset = addr.addr().get().checked_sub(self.base.addr().get())?;
        let from_first_body = offset.checked_sub(layout.page_header())?;

        if from_first_body % layout.stride() != 0 {
            return None;
        }

        let index = from_first_body / layout.stride();
        (index < layout.objects_per_page()).then_some(index)
    }
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use std::num::NonZero;

    use super::*;
    use crate::{HeaderKind, PoolConfig};

    fn layout() -> PageLayout {
        let config = PoolConfig {
            objects_per_page: NonZero::new(3).unwrap(),
            pad_bytes: 2,
            header: HeaderKind::Basic,
            ..PoolConfig::default()
        };

        PageLayout::calculate(16, &config)
    }

    #[test]
    fn link_round_trip() {
        let layout = layout();
        let mut backing = vec![0_u8; layout.page_size()];
        let base = NonNull::from(&mut backing[0]);
        let page = PageRef::new(base);

        unsafe {
            assert!(page.next().is_none());

            page.set_next(Some(page));
            assert_eq!(page.next(), Some(page));

            page.set_next(None);
            assert!(page.next().is_none());
        }
    }

    #[test]
    fn containment_is_half_open() {
        let layout = layout();
        let mut backing = vec![0_u8; layout.page_size() + 1];
        let base = NonNull::from(&mut backing[0]);
        let page = PageRef::new(base);

        assert!(page.contains(&layout, base));

        let last = unsafe { base.byte_add(layout.page_size() - 1) };
        assert!(page.contains(&layout, last));

        let one_past = unsafe { base.byte_add(layout.page_size()) };
        assert!(!page.contains(&layout, one_past));
    }

    #[test]
    fn body_index_rejects_interior_addresses() {
        let layout = layout();
        let mut backing = vec![0_u8; layout.page_size()];
        let base = NonNull::from(&mut backing[0]);
        let page = PageRef::new(base);

        for index in 0..3 {
            let body = page.body(&layout, index);
            assert_eq!(page.body_index(&layout, body), Some(index));

            let interior = unsafe { body.byte_add(1) };
            assert_eq!(page.body_index(&layout, interior), None);
        }

        assert_eq!(page.body_index(&layout, base), None);
    }
}
