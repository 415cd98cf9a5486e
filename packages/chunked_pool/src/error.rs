use thiserror::Error;

/// Errors that can occur when allocating from or returning memory to a chunked pool.
///
/// None of these leave the pool partially mutated: after an error, the pool is in the same state
/// as before the failed call and may continue to be used.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The system allocator could not satisfy a request for a new chunk or for growth of the
    /// bookkeeping collections. It is safe to retry with the same or a smaller request.
    #[error("memory allocation of {size} bytes (alignment {align}) failed")]
    AllocationFailed {
        /// Size in bytes of the allocation that failed.
        size: usize,

        /// Alignment in bytes of the allocation that failed.
        align: usize,
    },

    /// The requested number of items cannot be held by a single chunk because its size in bytes
    /// would not be representable. Detected before any memory is allocated.
    #[error("capacity overflow: {requested} items requested but at most {maximum} fit in a chunk")]
    CapacityOverflow {
        /// The number of items that was requested.
        requested: usize,

        /// The greatest number of items of the pool's layout that one chunk can hold.
        maximum: usize,
    },

    /// The pointer does not point to the start of a slot in any chunk owned by this pool.
    #[error("pointer {address:#x} is not owned by this pool")]
    NotOwned {
        /// Address of the rejected pointer.
        address: usize,
    },

    /// The pointer points to a slot that is already vacant.
    #[error("pointer {address:#x} refers to a slot that has already been removed")]
    DoubleRemove {
        /// Address of the rejected pointer.
        address: usize,
    },
}

/// A specialized `Result` type for chunked pool operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;
