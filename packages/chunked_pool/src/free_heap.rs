use std::collections::BinaryHeap;

use num_integer::Integer;

use crate::{Error, Result};

const BITS_PER_WORD: usize = u64::BITS as usize;

/// Vacant slot indices of the active chunk, largest index first.
///
/// Every entry is below the active chunk's high-water mark. The heap is a max-heap so that the
/// pool can tell in O(1) whether the largest vacancy sits right below the high-water mark, in
/// which case the mark can drop instead of the vacancy being remembered.
///
/// Next to the heap we keep one bit per slot of the active chunk, set while the slot is in the
/// heap, so "is this slot vacant?" is answered in O(1).
#[derive(Debug, Default)]
pub(crate) struct FreeIndexHeap {
    indices: BinaryHeap<usize>,

    vacant: Vec<u64>,
}

impl FreeIndexHeap {
    /// An empty heap that owns no memory and can track no slots.
    ///
    /// Only suitable for a pool without an active chunk.
    #[must_use]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// An empty heap able to track vacancies of a chunk with `capacity` slots.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`] if the vacancy bitmap cannot be allocated.
    pub(crate) fn for_capacity(capacity: usize) -> Result<Self> {
        let words = capacity.div_ceil(BITS_PER_WORD);

        let mut vacant = Vec::new();
        vacant
            .try_reserve_exact(words)
            .map_err(|_| Error::AllocationFailed {
                size: words.saturating_mul(size_of::<u64>()),
                align: align_of::<u64>(),
            })?;
        vacant.resize(words, 0);

        Ok(Self {
            indices: BinaryHeap::new(),
            vacant,
        })
    }

    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Can be mutated to infinitely growing memory use.
    pub(crate) fn len(&self) -> usize {
        self.indices.len()
    }

    #[must_use]
    pub(crate) fn peek_max(&self) -> Option<usize> {
        self.indices.peek().copied()
    }

    pub(crate) fn pop_max(&mut self) -> Option<usize> {
        let index = self.indices.pop()?;
        self.set_vacant(index, false);
        Some(index)
    }

    /// Ensures the next [`push()`][Self::push] will not need to allocate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`] if the backing storage cannot grow.
    pub(crate) fn reserve_one(&mut self) -> Result<()> {
        self.indices.try_reserve(1).map_err(|_| Error::AllocationFailed {
            // The heap doubles its storage when growing; the exact request is not observable
            // through TryReserveError, so we report the size of the element we tried to add.
            size: size_of::<usize>(),
            align: align_of::<usize>(),
        })
    }

    /// Adds an index to the heap.
    ///
    /// Call [`reserve_one()`][Self::reserve_one] first when allocation failure must be handled.
    ///
    /// # Panics
    ///
    /// Panics if the index is beyond the capacity the heap was created for.
    pub(crate) fn push(&mut self, index: usize) {
        debug_assert!(!self.contains(index), "vacancy {index} recorded twice");

        self.set_vacant(index, true);
        self.indices.push(index);
    }

    /// Forgets every vacancy, keeping the memory for reuse.
    pub(crate) fn clear(&mut self) {
        self.indices.clear();
        self.vacant.fill(0);
    }

    #[must_use]
    pub(crate) fn contains(&self, index: usize) -> bool {
        let (word, mask) = word_and_mask(index);

        self.vacant.get(word).is_some_and(|bits| bits & mask != 0)
    }

    /// All indices in ascending order, as a new vector.
    #[must_use]
    pub(crate) fn to_sorted_vec(&self) -> Vec<usize> {
        self.indices.clone().into_sorted_vec()
    }

    /// Number of slots marked vacant in the bitmap. Matches [`len()`][Self::len] unless the heap
    /// is corrupted.
    #[cfg(any(test, debug_assertions))]
    #[must_use]
    pub(crate) fn marked_count(&self) -> usize {
        self.vacant
            .iter()
            .map(|bits| bits.count_ones() as usize)
            .sum()
    }

    fn set_vacant(&mut self, index: usize, vacant: bool) {
        let (word, mask) = word_and_mask(index);

        let bits = self
            .vacant
            .get_mut(word)
            .expect("vacancy index is beyond the capacity of the active chunk");

        if vacant {
            *bits |= mask;
        } else {
            *bits &= !mask;
        }
    }
}

fn word_and_mask(index: usize) -> (usize, u64) {
    let (word, bit) = index.div_rem(&BITS_PER_WORD);

    let bit = u32::try_from(bit).expect("remainder of division by 64 always fits in u32");

    (word, 1_u64.wrapping_shl(bit))
}
