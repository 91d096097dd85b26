use std::alloc::Layout;

use crate::PoolConfig;
use crate::page::LINK_BYTES;

/// Rounds `n` up to the next multiple of `alignment`.
///
/// An alignment of zero means "no alignment" and returns `n` unchanged.
pub(crate) fn align_up(n: usize, alignment: usize) -> usize {
    if alignment == 0 {
        return n;
    }

    n.div_ceil(alignment)
        .checked_mul(alignment)
        .expect("aligned size cannot overflow for reasonable configurations")
}

/// Precomputed byte layout of one pool page.
///
/// A page is a single host allocation of exactly [`page_size`](Self::page_size)
/// bytes, laid out from low address to high as:
///
/// ```text
/// [ next-page link | first header | first left pad | left alignment gap ]
/// [ block 0 body ]
/// [ right pad | inter alignment gap | header | left pad ]
/// [ block 1 body ]
/// ...
/// [ block n-1 body ]
/// [ right pad ]
/// ```
///
/// Block body `i` sits at offset [`page_header`](Self::page_header)` + i *
/// `[`stride`](Self::stride). The final block carries no trailing
/// inter-block region, only its right pad.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PageLayout {
    object_size: usize,
    header_size: usize,
    pad_bytes: usize,
    alignment: usize,
    objects_per_page: usize,
    page_header: usize,
    stride: usize,
    page_size: usize,
    left_align_size: usize,
    inter_align_size: usize,
}

impl PageLayout {
    /// Computes the page layout for the given object size and configuration.
    ///
    /// # Panics
    ///
    /// Panics if the layout arithmetic overflows; the builder has already
    /// rejected statically invalid configurations before this runs.
    #[must_use]
    pub(crate) fn calculate(object_size: usize, config: &PoolConfig) -> Self {
        let header_size = config.header.size();
        let pad_bytes = config.pad_bytes;
        let alignment = config.alignment;
        let objects_per_page = config.objects_per_page.get();

        let unaligned_header = LINK_BYTES + header_size + pad_bytes;
        let page_header = align_up(unaligned_header, alignment);
        let left_align_size = page_header - unaligned_header;

        let unaligned_stride = object_size + 2 * pad_bytes + header_size;
        let stride = align_up(unaligned_stride, alignment);
        let inter_align_size = stride - unaligned_stride;

        // Cannot overflow for configurations that fit in virtual memory;
        // the checked variant documents the page-count factor anyway.
        let page_size = stride
            .checked_mul(objects_per_page - 1)
            .and_then(|blocks| blocks.checked_add(page_header))
            .and_then(|prefix| prefix.checked_add(object_size + pad_bytes))
            .expect("page size cannot overflow for reasonable configurations");

        Self {
            object_size,
            header_size,
            pad_bytes,
            alignment,
            objects_per_page,
            page_header,
            stride,
            page_size,
            left_align_size,
            inter_align_size,
        }
    }

    /// Size in bytes of the blocks carved out of each page.
    #[must_use]
    #[inline]
    pub fn object_size(&self) -> usize {
        self.object_size
    }

    /// Offset of the first block body from the page base: the page link, the
    /// first block's header and left pad, and the left alignment gap.
    #[must_use]
    #[inline]
    pub fn page_header(&self) -> usize {
        self.page_header
    }

    /// Byte distance between consecutive block body addresses.
    #[must_use]
    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Total size in bytes of one page.
    #[must_use]
    #[inline]
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Width of the alignment gap between the page prefix and the first
    /// block body's left pad.
    #[must_use]
    #[inline]
    pub fn left_align_size(&self) -> usize {
        self.left_align_size
    }

    /// Width of the alignment gap inside each inter-block region.
    #[must_use]
    #[inline]
    pub fn inter_align_size(&self) -> usize {
        self.inter_align_size
    }

    #[inline]
    pub(crate) fn pad_bytes(&self) -> usize {
        self.pad_bytes
    }

    #[inline]
    pub(crate) fn header_size(&self) -> usize {
        self.header_size
    }

    #[inline]
    pub(crate) fn objects_per_page(&self) -> usize {
        self.objects_per_page
    }

    /// Offset of block body `index` from the page base.
    pub(crate) fn body_offset(&self, index: usize) -> usize {
        debug_assert!(index < self.objects_per_page);

        // Cannot overflow because the offset lies inside page_size.
        self.page_header.wrapping_add(index.wrapping_mul(self.stride))
    }

    /// The layout requested from the host allocator for each page.
    ///
    /// The alignment is raised to the configured block alignment so that an
    /// aligned page base makes every block body address aligned as well.
    pub(crate) fn host_layout(&self) -> Layout {
        let align = self.alignment.max(align_of::<*mut u8>());

        Layout::from_size_align(self.page_size, align)
            .expect("page layout is valid for any configuration the builder accepts")
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZero;

    use super::*;
    use crate::HeaderKind;

    fn config(
        objects_per_page: usize,
        pad_bytes: usize,
        alignment: usize,
        header: HeaderKind,
    ) -> PoolConfig {
        PoolConfig {
            objects_per_page: NonZero::new(objects_per_page).unwrap(),
            pad_bytes,
            alignment,
            header,
            ..PoolConfig::default()
        }
    }

    #[test]
    fn align_up_basics() {
        assert_eq!(align_up(13, 0), 13);
        assert_eq!(align_up(13, 8), 16);
        assert_eq!(align_up(16, 8), 16);
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 1), 1);
    }

    #[test]
    fn unaligned_layout_packs_tightly() {
        let layout = PageLayout::calculate(16, &config(4, 2, 0, HeaderKind::Basic));

        assert_eq!(layout.page_header(), LINK_BYTES + 5 + 2);
        assert_eq!(layout.stride(), 16 + 2 * 2 + 5);
        assert_eq!(layout.left_align_size(), 0);
        assert_eq!(layout.inter_align_size(), 0);
        assert_eq!(
            layout.page_size(),
            layout.page_header() + layout.stride() * 3 + 16 + 2
        );
    }

    #[test]
    fn alignment_pads_header_and_stride() {
        let layout = PageLayout::calculate(14, &config(3, 1, 8, HeaderKind::Basic));

        let unaligned_header = LINK_BYTES + 5 + 1;
        assert_eq!(layout.page_header() % 8, 0);
        assert_eq!(
            layout.left_align_size(),
            layout.page_header() - unaligned_header
        );

        let unaligned_stride = 14 + 2 + 5;
        assert_eq!(layout.stride() % 8, 0);
        assert_eq!(
            layout.inter_align_size(),
            layout.stride() - unaligned_stride
        );
    }

    #[test]
    fn body_offsets_are_aligned_when_requested() {
        let layout = PageLayout::calculate(24, &config(5, 3, 16, HeaderKind::External));

        for index in 0..5 {
            assert_eq!(layout.body_offset(index) % 16, 0);
        }
    }

    #[test]
    fn no_header_no_pad_is_just_link_and_bodies() {
        let layout = PageLayout::calculate(32, &config(2, 0, 0, HeaderKind::None));

        assert_eq!(layout.page_header(), LINK_BYTES);
        assert_eq!(layout.stride(), 32);
        assert_eq!(layout.page_size(), LINK_BYTES + 2 * 32);
    }

    #[test]
    fn host_layout_requests_the_block_alignment() {
        let layout = PageLayout::calculate(16, &config(4, 0, 64, HeaderKind::None));

        assert_eq!(layout.host_layout().align(), 64);
        assert_eq!(layout.host_layout().size(), layout.page_size());
    }
}
