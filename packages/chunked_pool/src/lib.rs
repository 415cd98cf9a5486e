//! A growable memory pool for fixed-layout items whose addresses never change.
//!
//! This crate provides [`RawChunkedPool`], which hands out uninitialized slots sized and aligned
//! for a [`std::alloc::Layout`] chosen when the pool is created, and [`ChunkedPool<T>`], a typed
//! layer over it that moves values in and out of those slots.
//!
//! # Key Features
//!
//! - **Stable addresses**: An item stays at the same address until it is removed, no matter how
//!   much the pool grows meanwhile.
//! - **Chunked growth**: Memory comes in chunks, each about 1.625 times the size of the one before.
//!   Growing never copies or moves existing items.
//! - **Prompt release**: Once a chunk is no longer used for new items, its memory is returned the
//!   moment its last item is removed.
//! - **Compact reuse**: Vacated slots are reused highest-first and removals at the top shrink the
//!   occupied region, so steady churn stays packed at the front of the active chunk.
//! - **Failure safety**: Allocation failures and invalid pointers are reported as [`Error`]s and
//!   never leave the pool partially changed.
//! - **Thread mobility**: Pools can be moved between threads but not shared without
//!   synchronization.
//!
//! # Example
//!
//! ```rust
//! use chunked_pool::ChunkedPool;
//!
//! let mut pool = ChunkedPool::<u64>::new();
//!
//! let pointers = (0..100)
//!     .map(|i| pool.insert(i).unwrap())
//!     .collect::<Vec<_>>();
//!
//! // The pool grew several times, yet every item is still where it was put.
//! for (i, ptr) in pointers.iter().enumerate() {
//!     // SAFETY: All items are still in the pool.
//!     assert_eq!(unsafe { ptr.read() }, i as u64);
//! }
//!
//! for ptr in pointers {
//!     // SAFETY: Each item is removed exactly once.
//!     unsafe { pool.remove(ptr) }.unwrap();
//! }
//!
//! assert!(pool.is_empty());
//!
//! // Only the chunk that serves new items is left.
//! assert_eq!(pool.chunk_count(), 1);
//! ```
//!
//! # Untyped usage
//!
//! ```rust
//! use std::alloc::Layout;
//!
//! use chunked_pool::RawChunkedPool;
//!
//! let mut pool = RawChunkedPool::new(Layout::from_size_align(24, 8).unwrap());
//!
//! let slot = pool.allocate().unwrap();
//! assert!(pool.contains(slot));
//!
//! pool.remove(slot).unwrap();
//! assert!(!pool.contains(slot));
//! ```
//!
//! # Iteration
//!
//! Only the items in the active chunk, the one currently serving new allocations, can be
//! enumerated (see [`RawChunkedPool::active_slots()`]). Older chunks only count their items.
//!
//! # Logging
//!
//! Structural events such as chunk allocation, retirement and release are reported through the
//! [`tracing`](https://docs.rs/tracing) facade at debug level.

mod active_slots;
mod builder;
mod chunk;
mod chunk_layout;
mod directory;
mod drop_policy;
mod error;
mod free_heap;
mod pool;
mod raw_pool;

pub use active_slots::ActiveSlots;
pub use builder::*;
pub(crate) use chunk::*;
pub(crate) use chunk_layout::*;
pub(crate) use directory::*;
pub use drop_policy::*;
pub use error::Error;
pub(crate) use error::Result;
pub(crate) use free_heap::*;
pub use pool::ChunkedPool;
pub(crate) use raw_pool::DEFAULT_MINIMUM_CAPACITY;
pub use raw_pool::RawChunkedPool;
