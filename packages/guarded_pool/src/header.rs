use std::ptr::{self, NonNull};

/// Serialized width of the basic header: a 4-byte allocation number followed
/// by a 1-byte in-use flag.
pub const BASIC_HEADER_SIZE: usize = ALLOC_NUM_BYTES + FLAG_BYTES;

const ALLOC_NUM_BYTES: usize = size_of::<u32>();
const USE_COUNT_BYTES: usize = size_of::<u16>();
const FLAG_BYTES: usize = 1;

/// The per-block header variant maintained in front of each block body.
///
/// The four variants differ only in their serialized layout inside the
/// block's header region and in the bookkeeping performed on each
/// allocate/free transition:
///
/// - `None` — no header region at all.
/// - `Basic` — `[alloc_num: u32 LE][in_use: u8]`.
/// - `Extended` — `[user field][use_count: u16 LE][alloc_num: u32 LE][in_use: u8]`.
///   The user field and the use count survive free/reallocate cycles.
/// - `External` — a pointer-wide slot holding the address of a heap-allocated
///   [`BlockInfo`].
///
/// Header regions carry no alignment guarantee of their own, so all field
/// access goes through unaligned reads and writes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum HeaderKind {
    /// No per-block header.
    #[default]
    None,

    /// Allocation number plus in-use flag.
    Basic,

    /// A client-owned field of `user_bytes` bytes and a reuse counter in
    /// front of the basic fields.
    Extended {
        /// Width of the client-owned field at the start of the header.
        user_bytes: usize,
    },

    /// A pointer to a heap-allocated [`BlockInfo`].
    External,
}

/// Out-of-band bookkeeping record for one in-use block under
/// [`HeaderKind::External`].
///
/// Owned by the block whose header points at it: created on allocate,
/// destroyed on free (or at pool teardown for blocks never freed).
#[derive(Debug)]
pub struct BlockInfo {
    /// Whether the owning block is currently held by the client.
    pub in_use: bool,

    /// Copy of the label passed to the allocating call, if any.
    pub label: Option<Box<str>>,

    /// Allocation number of the allocating call.
    pub alloc_num: u32,
}

impl HeaderKind {
    /// Serialized width of this header variant inside the block's header
    /// region.
    #[must_use]
    pub fn size(self) -> usize {
        match self {
            Self::None => 0,
            Self::Basic => BASIC_HEADER_SIZE,
            Self::Extended { user_bytes } => user_bytes + USE_COUNT_BYTES + BASIC_HEADER_SIZE,
            Self::External => size_of::<*mut BlockInfo>(),
        }
    }

    /// Offset of the 1-byte in-use flag from the start of the header region,
    /// for the variants that keep the flag inline.
    ///
    /// The flag is the last byte of the header region; deriving the offset
    /// here keeps every inspector in agreement with the serialized layout.
    #[must_use]
    pub fn in_use_flag_offset(self) -> Option<usize> {
        match self {
            Self::Basic | Self::Extended { .. } => Some(self.size() - FLAG_BYTES),
            Self::None | Self::External => None,
        }
    }

    /// Heap-allocates the [`BlockInfo`] for an upcoming allocation.
    ///
    /// Returns `None` for every variant other than `External`. Called before
    /// the free list advances so that no failure mode can leave a block
    /// popped but unowned.
    pub(crate) fn prepare_external(
        self,
        alloc_num: u32,
        label: Option<&str>,
    ) -> Option<NonNull<BlockInfo>> {
        match self {
            Self::External => {
                let info = Box::new(BlockInfo {
                    in_use: true,
                    label: label.map(Box::from),
                    alloc_num,
                });

                Some(NonNull::from(Box::leak(info)))
            }
            _ => None,
        }
    }

    /// Records an allocation in the header region at `header_start`.
    ///
    /// # Safety
    ///
    /// The caller must ensure that `header_start` points to a writable,
    /// zero-initialized-or-previously-maintained header region of at least
    /// [`size()`](Self::size) bytes, and that `external` is the value
    /// returned by [`prepare_external`](Self::prepare_external) for this
    /// allocation.
    pub(crate) unsafe fn on_allocate(
        self,
        header_start: NonNull<u8>,
        alloc_num: u32,
        external: Option<NonNull<BlockInfo>>,
    ) {
        match self {
            Self::None => {}
            Self::Basic => {
                // SAFETY: the caller guarantees BASIC_HEADER_SIZE writable
                // bytes at header_start.
                unsafe { write_alloc_num_and_flag(header_start, alloc_num) };
            }
            Self::Extended { user_bytes } => {
                // The user field at the front stays untouched across
                // allocations; only the fields after it are maintained.

                // SAFETY: user_bytes is within the header region the caller
                // guarantees writable.
                let use_count_at = unsafe { header_start.byte_add(user_bytes) };

                // SAFETY: the use count occupies the two bytes after the
                // user field.
                let count = unsafe { read_u16_unaligned(use_count_at) };

                // SAFETY: as above; the region is writable.
                unsafe { write_u16_unaligned(use_count_at, count.wrapping_add(1)) };

                // SAFETY: the basic fields trail the use count, still inside
                // the header region.
                let basic_at = unsafe { use_count_at.byte_add(USE_COUNT_BYTES) };

                // SAFETY: as above.
                unsafe { write_alloc_num_and_flag(basic_at, alloc_num) };
            }
            Self::External => {
                let info = external.expect("external header must be prepared before allocation");

                // SAFETY: the header region holds one pointer-wide slot; it
                // may be unaligned, hence write_unaligned.
                unsafe {
                    header_start
                        .cast::<*mut BlockInfo>()
                        .as_ptr()
                        .write_unaligned(info.as_ptr());
                }
            }
        }
    }

    /// Records a deallocation in the header region at `header_start`.
    ///
    /// For `External` this destroys the pointed-to [`BlockInfo`] (a no-op on
    /// a null slot, which is how never-allocated and already-freed blocks
    /// present) and nulls the slot.
    ///
    /// # Safety
    ///
    /// The caller must ensure `header_start` points to a maintained header
    /// region of at least [`size()`](Self::size) bytes.
    pub(crate) unsafe fn on_free(self, header_start: NonNull<u8>) {
        match self {
            Self::None => {}
            Self::Basic => {
                // SAFETY: the caller guarantees BASIC_HEADER_SIZE writable
                // bytes at header_start.
                unsafe { ptr::write_bytes(header_start.as_ptr(), 0, BASIC_HEADER_SIZE) };
            }
            Self::Extended { user_bytes } => {
                // Zero only the trailing basic fields; the user field and
                // the use count persist across reuse.

                // SAFETY: the basic fields start after the user field and
                // use count, inside the guaranteed header region.
                let basic_at = unsafe { header_start.byte_add(user_bytes + USE_COUNT_BYTES) };

                // SAFETY: as above.
                unsafe { ptr::write_bytes(basic_at.as_ptr(), 0, BASIC_HEADER_SIZE) };
            }
            Self::External => {
                // SAFETY: the header region holds one pointer-wide slot.
                let raw = unsafe {
                    header_start
                        .cast::<*mut BlockInfo>()
                        .as_ptr()
                        .read_unaligned()
                };

                if !raw.is_null() {
                    // SAFETY: a non-null pointer here is a live BlockInfo
                    // created by prepare_external and not yet destroyed.
                    drop(unsafe { Box::from_raw(raw) });
                }

                // SAFETY: as above; the slot is writable.
                unsafe {
                    header_start
                        .cast::<*mut BlockInfo>()
                        .as_ptr()
                        .write_unaligned(ptr::null_mut());
                }
            }
        }
    }

    /// Reads the in-use flag from a `Basic` or `Extended` header region.
    ///
    /// # Safety
    ///
    /// `header_start` must point to a maintained header region of this
    /// variant, and the variant must keep an inline flag
    /// ([`in_use_flag_offset`](Self::in_use_flag_offset) returns `Some`).
    pub(crate) unsafe fn read_in_use(self, header_start: NonNull<u8>) -> bool {
        let offset = self
            .in_use_flag_offset()
            .expect("only Basic and Extended headers keep an inline flag");

        // SAFETY: the flag byte lies inside the header region the caller
        // guarantees readable.
        unsafe { header_start.byte_add(offset).read() != 0 }
    }
}

/// Writes the basic header fields: allocation number, then the raised flag.
///
/// # Safety
///
/// `at` must point to [`BASIC_HEADER_SIZE`] writable bytes.
unsafe fn write_alloc_num_and_flag(at: NonNull<u8>, alloc_num: u32) {
    let bytes = alloc_num.to_le_bytes();

    // SAFETY: the caller guarantees ALLOC_NUM_BYTES + FLAG_BYTES writable
    // bytes; the source is a local array of exactly ALLOC_NUM_BYTES bytes.
    unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), at.as_ptr(), ALLOC_NUM_BYTES) };

    // SAFETY: the flag byte directly follows the allocation number.
    unsafe { at.as_ptr().add(ALLOC_NUM_BYTES).write(1) };
}

/// # Safety
///
/// `at` must point to two readable bytes.
pub(crate) unsafe fn read_u16_unaligned(at: NonNull<u8>) -> u16 {
    // SAFETY: forwarded to the caller; unaligned access is always legal.
    let raw = unsafe { at.cast::<u16>().as_ptr().read_unaligned() };
    u16::from_le(raw)
}

/// # Safety
///
/// `at` must point to two writable bytes.
unsafe fn write_u16_unaligned(at: NonNull<u8>, value: u16) {
    // SAFETY: forwarded to the caller; unaligned access is always legal.
    unsafe { at.cast::<u16>().as_ptr().write_unaligned(value.to_le()) };
}

/// # Safety
///
/// `at` must point to four readable bytes.
#[cfg(test)]
unsafe fn read_u32_unaligned(at: NonNull<u8>) -> u32 {
    // SAFETY: forwarded to the caller; unaligned access is always legal.
    let raw = unsafe { at.cast::<u32>().as_ptr().read_unaligned() };
    u32::from_le(raw)
}

#[cfg(test)]
#[allow(
    clippy::undocumented_unsafe_blocks,
    clippy::multiple_unsafe_ops_per_block,
    reason = "test code doesn't need the same safety rigor as production code"
)]
mod tests {
    use super::*;

    #[test]
    fn serialized_widths() {
        assert_eq!(HeaderKind::None.size(), 0);
        assert_eq!(HeaderKind::Basic.size(), 5);
        assert_eq!(HeaderKind::Extended { user_bytes: 4 }.size(), 11);
        assert_eq!(HeaderKind::External.size(), size_of::<usize>());
    }

    #[test]
    fn flag_is_the_last_header_byte() {
        assert_eq!(HeaderKind::Basic.in_use_flag_offset(), Some(4));
        assert_eq!(
            HeaderKind::Extended { user_bytes: 2 }.in_use_flag_offset(),
            Some(8)
        );
        assert_eq!(HeaderKind::None.in_use_flag_offset(), None);
        assert_eq!(HeaderKind::External.in_use_flag_offset(), None);
    }

    #[test]
    fn basic_allocate_then_free() {
        let kind = HeaderKind::Basic;
        let mut region = [0_u8; BASIC_HEADER_SIZE];
        let start = NonNull::from(&mut region[0]);

        unsafe {
            kind.on_allocate(start, 7, None);

            assert_eq!(read_u32_unaligned(start), 7);
            assert!(kind.read_in_use(start));

            kind.on_free(start);
        }

        assert_eq!(region, [0; BASIC_HEADER_SIZE]);
    }

    #[test]
    fn extended_use_count_survives_free() {
        let kind = HeaderKind::Extended { user_bytes: 4 };
        let mut region = vec![0_u8; kind.size()];

        // Client scribbles into the user field before any allocation.
        region[..4].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);

        let start = NonNull::from(&mut region[0]);

        unsafe {
            kind.on_allocate(start, 1, None);
            kind.on_free(start);
            kind.on_allocate(start, 2, None);

            assert_eq!(read_u16_unaligned(start.byte_add(4)), 2);
            assert_eq!(read_u32_unaligned(start.byte_add(6)), 2);
            assert!(kind.read_in_use(start));
        }

        assert_eq!(&region[..4], &[0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn extended_free_clears_only_the_basic_tail() {
        let kind = HeaderKind::Extended { user_bytes: 2 };
        let mut region = vec![0_u8; kind.size()];
        let start = NonNull::from(&mut region[0]);

        unsafe {
            kind.on_allocate(start, 9, None);
            kind.on_free(start);

            assert_eq!(read_u16_unaligned(start.byte_add(2)), 1);
            assert!(!kind.read_in_use(start));
        }
    }

    #[test]
    fn external_round_trip_copies_the_label() {
        let kind = HeaderKind::External;
        let mut region = vec![0_u8; kind.size()];
        let start = NonNull::from(&mut region[0]);

        let info = kind.prepare_external(3, Some("particles"));
        let info = info.expect("External always prepares a BlockInfo");

        unsafe {
            kind.on_allocate(start, 3, Some(info));

            let stored = start.cast::<*mut BlockInfo>().as_ptr().read_unaligned();
            assert_eq!(stored, info.as_ptr());
            assert!((*stored).in_use);
            assert_eq!((*stored).alloc_num, 3);
            assert_eq!((*stored).label.as_deref(), Some("particles"));

            kind.on_free(start);

            let cleared = start.cast::<*mut BlockInfo>().as_ptr().read_unaligned();
            assert!(cleared.is_null());
        }
    }

    #[test]
    fn external_free_of_a_null_slot_is_a_no_op() {
        let kind = HeaderKind::External;
        let mut region = vec![0_u8; kind.size()];
        let start = NonNull::from(&mut region[0]);

        unsafe { kind.on_free(start) };
    }

    #[test]
    fn non_external_variants_prepare_nothing() {
        assert!(HeaderKind::None.prepare_external(1, None).is_none());
        assert!(HeaderKind::Basic.prepare_external(1, None).is_none());
        assert!(
            HeaderKind::Extended { user_bytes: 8 }
                .prepare_external(1, Some("x"))
                .is_none()
        );
    }
}
