use std::alloc::Layout;
use std::num::NonZero;

use num_integer::Integer;

use crate::{Error, Result};

/// Precalculates the slot geometry of the chunks in a pool, based on the item layout.
///
/// All chunks in a pool share the same slot stride and alignment. Only the capacity differs from
/// chunk to chunk, so the per-chunk memory layout is derived on demand via [`Self::chunk_layout`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct ChunkLayout {
    /// Layout of a single item as requested by the owner of the pool.
    item_layout: Layout,

    /// Layout of a single slot, which is the item layout padded to its own alignment. The size of
    /// this layout is the stride between consecutive slots in a chunk's memory block.
    slot_layout: Layout,

    /// The greatest number of slots a single chunk can hold before its total size would exceed
    /// what `Layout` can describe (`isize::MAX` bytes, rounded to alignment).
    max_capacity: NonZero<usize>,
}

impl ChunkLayout {
    /// # Panics
    ///
    /// Panics if the item layout has zero size.
    #[must_use]
    pub(crate) fn new(item_layout: Layout) -> Self {
        assert!(
            item_layout.size() > 0,
            "ChunkLayout cannot be calculated for zero-sized item layout"
        );

        // Layout::pad_to_align() ensures the size is a multiple of alignment,
        // which is exactly what we need for proper array element spacing.
        let slot_layout = item_layout.pad_to_align();

        // The stride is a multiple of the alignment, so any whole number of slots is already
        // aligned and the only limit is the isize::MAX size ceiling of Layout.
        let max_capacity = Integer::div_floor(&isize::MAX.unsigned_abs(), &slot_layout.size());

        Self {
            item_layout,
            slot_layout,
            max_capacity: NonZero::new(max_capacity)
                .expect("a non-zero item size that fits in a Layout always fits at least once"),
        }
    }

    #[must_use]
    pub(crate) fn item_layout(&self) -> Layout {
        self.item_layout
    }

    /// Distance in bytes between the starts of two neighboring slots.
    #[must_use]
    pub(crate) fn stride(&self) -> usize {
        self.slot_layout.size()
    }

    #[must_use]
    pub(crate) fn max_capacity(&self) -> NonZero<usize> {
        self.max_capacity
    }

    /// Memory layout of the slot array of a chunk with the given capacity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityOverflow`] if the chunk would be larger than a `Layout` can
    /// describe for this item layout.
    pub(crate) fn chunk_layout(&self, capacity: NonZero<usize>) -> Result<Layout> {
        let overflow = || Error::CapacityOverflow {
            requested: capacity.get(),
            maximum: self.max_capacity.get(),
        };

        let total_size = self
            .slot_layout
            .size()
            .checked_mul(capacity.get())
            .ok_or_else(overflow)?;

        Layout::from_size_align(total_size, self.slot_layout.align()).map_err(|_| overflow())
    }

    /// Converts a byte offset from the start of a chunk into a slot index.
    ///
    /// Returns `None` if the offset does not land exactly on the start of a slot.
    #[must_use]
    pub(crate) fn index_of_offset(&self, offset: usize) -> Option<usize> {
        let (index, remainder) = offset.div_rem(&self.slot_layout.size());

        (remainder == 0).then_some(index)
    }
}
