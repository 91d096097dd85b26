use thiserror::Error;

/// Errors reported by pool operations.
///
/// Failures are surfaced to the caller of the failing operation; nothing is
/// retried internally. The address-carrying variants store the offending
/// address as a plain integer so the error type stays [`Send`] and [`Sync`].
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[non_exhaustive]
pub enum PoolError {
    /// The pool needs another page but the configured page ceiling is reached.
    #[error("page limit of {max_pages} reached; cannot grow the pool")]
    PageLimitReached {
        /// The configured ceiling on live pages.
        max_pages: usize,
    },

    /// The host allocator refused to provide memory.
    #[error("host allocator failed to provide {size} bytes")]
    HostAllocFailed {
        /// The number of bytes requested from the host allocator.
        size: usize,
    },

    /// A freed pointer does not address a block inside any page owned by
    /// the pool.
    #[error("pointer {address:#x} is not a block of any page owned by this pool")]
    BadBoundary {
        /// The address handed to `free`.
        address: usize,
    },

    /// The guard bytes around a block were overwritten while the block was
    /// in use.
    #[error("guard bytes around block {address:#x} were overwritten")]
    CorruptedBlock {
        /// The body address of the damaged block.
        address: usize,
    },

    /// A block was freed while already sitting on the free list.
    #[error("block {address:#x} was freed twice")]
    DoubleFree {
        /// The body address of the block freed twice.
        address: usize,
    },
}

/// A specialized `Result` type for pool operations, returning the crate's
/// [`PoolError`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use std::fmt::Debug;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(PoolError: Send, Sync, Debug);

    #[test]
    fn messages_name_the_address() {
        let error = PoolError::DoubleFree { address: 0xABCD };

        assert!(error.to_string().contains("0xabcd"));
    }

    #[test]
    fn usable_in_result_context() {
        let result: Result<()> = Err(PoolError::PageLimitReached { max_pages: 2 });

        assert!(result.is_err());
    }
}
