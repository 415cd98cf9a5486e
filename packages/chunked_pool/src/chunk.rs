use std::alloc::{Layout, alloc, dealloc};
use std::num::NonZero;
use std::ptr::NonNull;

use crate::{ChunkLayout, Error, Result};

/// One contiguous block of memory holding up to `capacity` slots of the pool's item layout.
///
/// A chunk never moves or resizes its memory block. New capacity always comes from a new chunk,
/// which is what keeps every pointer handed out by the pool stable.
///
/// The meaning of `live_count` depends on the role of the chunk in the pool:
///
/// * For the active chunk, it is a high-water mark: the number of leading slots that have ever
///   been handed out. Vacant slots below the mark are tracked by the pool's free-index heap.
/// * For a retired chunk, it is the exact number of items still held by callers.
///
/// The chunk does not create or keep references to its slots, so it is valid to access slot
/// memory via pointers from unsafe code even when not holding a reference to the chunk.
#[derive(Debug)]
pub(crate) struct Chunk {
    /// Start of the slot array. Slot `i` starts at `base + i * stride`.
    base: NonNull<u8>,

    capacity: NonZero<usize>,

    live_count: usize,

    layout: ChunkLayout,

    /// The layout the memory block was allocated with; required again to release it.
    memory_layout: Layout,
}

impl Chunk {
    /// Allocates the memory block for a new, empty chunk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityOverflow`] if the chunk size is not representable and
    /// [`Error::AllocationFailed`] if the system allocator refuses the request.
    pub(crate) fn new(layout: ChunkLayout, capacity: NonZero<usize>) -> Result<Self> {
        let memory_layout = layout.chunk_layout(capacity)?;

        // SAFETY: The layout is non-zero-sized because both the item size (checked by
        // ChunkLayout::new) and the capacity are non-zero.
        let base = NonNull::new(unsafe { alloc(memory_layout) }).ok_or(
            Error::AllocationFailed {
                size: memory_layout.size(),
                align: memory_layout.align(),
            },
        )?;

        Ok(Self {
            base,
            capacity,
            live_count: 0,
            layout,
            memory_layout,
        })
    }

    #[must_use]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity.get()
    }

    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Can be mutated to infinitely growing memory use.
    pub(crate) fn live_count(&self) -> usize {
        self.live_count
    }

    #[must_use]
    pub(crate) fn is_full(&self) -> bool {
        self.live_count >= self.capacity.get()
    }

    /// Slots never handed out since the chunk was created or last reset.
    #[must_use]
    pub(crate) fn untouched_slots(&self) -> usize {
        // Cannot wrap because live_count <= capacity is an invariant of the chunk.
        self.capacity.get().wrapping_sub(self.live_count)
    }

    /// Address of the first byte of the slot array.
    #[must_use]
    pub(crate) fn base_addr(&self) -> usize {
        self.base.as_ptr().addr()
    }

    /// Address one past the last byte of the slot array.
    #[must_use]
    fn end_addr(&self) -> usize {
        // Cannot wrap because the block was successfully allocated at this size.
        self.base_addr().wrapping_add(self.memory_layout.size())
    }

    /// Whether the address falls anywhere inside this chunk's memory block.
    #[must_use]
    pub(crate) fn contains(&self, addr: usize) -> bool {
        (self.base_addr()..self.end_addr()).contains(&addr)
    }

    /// Index of the slot that starts at `addr`, or `None` if no slot of this chunk starts there.
    #[must_use]
    pub(crate) fn index_of(&self, addr: usize) -> Option<usize> {
        if !self.contains(addr) {
            return None;
        }

        // Cannot wrap because contains() verified that addr >= base.
        self.layout
            .index_of_offset(addr.wrapping_sub(self.base_addr()))
    }

    /// # Panics
    ///
    /// Panics if the index is out of bounds.
    #[must_use]
    pub(crate) fn slot_ptr(&self, index: usize) -> NonNull<u8> {
        assert!(
            index < self.capacity.get(),
            "slot {index} index out of bounds in chunk of capacity {}",
            self.capacity.get()
        );

        // Cannot wrap because the index is in bounds, so the offset is within the block.
        let offset = index.wrapping_mul(self.layout.stride());

        // SAFETY: The offset is within the allocated block, as guaranteed by the bounds check.
        unsafe { self.base.byte_add(offset) }
    }

    /// Hands out the first never-used slot, raising the high-water mark.
    ///
    /// # Panics
    ///
    /// Panics if the chunk is full.
    #[must_use]
    pub(crate) fn bump(&mut self) -> usize {
        assert!(
            !self.is_full(),
            "cannot bump a full chunk of capacity {}",
            self.capacity.get()
        );

        let index = self.live_count;

        // Cannot wrap because live_count < capacity as asserted above.
        self.live_count = self.live_count.wrapping_add(1);

        index
    }

    /// Lowers the live count by one.
    ///
    /// # Panics
    ///
    /// Panics if the live count is already zero.
    pub(crate) fn decrement(&mut self) {
        self.live_count = self
            .live_count
            .checked_sub(1)
            .expect("live count of a chunk cannot drop below zero - caller broke the bookkeeping");
    }

    /// Overwrites the live count. Used when the chunk changes role and when the pool is cleared.
    ///
    /// # Panics
    ///
    /// Panics if the new count exceeds the capacity.
    pub(crate) fn set_live_count(&mut self, live_count: usize) {
        assert!(
            live_count <= self.capacity.get(),
            "live count {live_count} exceeds chunk capacity {}",
            self.capacity.get()
        );

        self.live_count = live_count;
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        // SAFETY: The block was allocated in new() with exactly this layout and is released
        // nowhere else.
        unsafe {
            dealloc(self.base.as_ptr(), self.memory_layout);
        }
    }
}

// SAFETY: The chunk exclusively owns a plain memory block and holds no thread-bound state. Moving
// it to another thread is no different from moving a Vec<u8>.
unsafe impl Send for Chunk {}
