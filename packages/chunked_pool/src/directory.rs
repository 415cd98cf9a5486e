use tracing::{debug, trace};

use crate::{Chunk, Error, Result};

/// The set of chunks owned by a pool, organized for fast lookup by address.
///
/// The active chunk (the only one that accepts new items) is kept apart from the rest and is
/// always checked first, as most traffic is against it. The retired chunks are kept sorted by base
/// address so the owner of any pointer can be found by binary search. Chunk memory blocks never
/// overlap, so at most one retired chunk can contain a given address.
///
/// Chunk capacities grow geometrically, so the number of retired chunks is logarithmic in the
/// number of items, making the lookup effectively O(log log n).
#[derive(Debug, Default)]
pub(crate) struct SlotDirectory {
    active: Option<Chunk>,

    /// Sorted ascending by base address. Every chunk here has a non-zero live count.
    retired: Vec<Chunk>,
}

/// Which chunk owns a pointer, as determined by [`SlotDirectory::locate()`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Owner {
    /// The pointer is slot `index` of the active chunk.
    Active { index: usize },

    /// The pointer is in the retired chunk at `position` in the address-sorted sequence.
    Retired { position: usize },
}

impl SlotDirectory {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub(crate) fn active(&self) -> Option<&Chunk> {
        self.active.as_ref()
    }

    #[must_use]
    pub(crate) fn active_mut(&mut self) -> Option<&mut Chunk> {
        self.active.as_mut()
    }

    #[must_use]
    #[cfg(any(test, debug_assertions))]
    pub(crate) fn retired(&self) -> &[Chunk] {
        &self.retired
    }

    #[must_use]
    pub(crate) fn retired_count(&self) -> usize {
        self.retired.len()
    }

    #[must_use]
    pub(crate) fn chunk_count(&self) -> usize {
        // Cannot wrap because that would imply more chunks than virtual memory.
        self.retired
            .len()
            .wrapping_add(usize::from(self.active.is_some()))
    }

    /// Determines which chunk owns the slot starting at `addr`.
    ///
    /// Returns `None` if no chunk contains the address or if the address is inside a chunk but
    /// not at the start of a slot.
    #[must_use]
    pub(crate) fn locate(&self, addr: usize) -> Option<Owner> {
        let active = self.active.as_ref()?;

        if active.contains(addr) {
            return active.index_of(addr).map(|index| Owner::Active { index });
        }

        // The candidate is the last chunk whose base is at or below the address. If the address
        // is in any retired chunk, it can only be in that one.
        let position = self
            .retired
            .partition_point(|chunk| chunk.base_addr() <= addr)
            .checked_sub(1)?;

        let candidate = self.retired.get(position)?;

        candidate
            .index_of(addr)
            .map(|_| Owner::Retired { position })
    }

    /// Ensures that retiring the active chunk will not need to allocate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`] if the directory storage cannot grow.
    pub(crate) fn reserve_retirement(&mut self) -> Result<()> {
        self.retired
            .try_reserve(1)
            .map_err(|_| Error::AllocationFailed {
                size: size_of::<Chunk>(),
                align: align_of::<Chunk>(),
            })
    }

    /// Installs a new active chunk, demoting the previous one.
    ///
    /// `previous_live_items` is the exact number of items still held by callers in the previous
    /// active chunk. If it is zero, the previous chunk is released right away. Otherwise it is
    /// retired with that count and inserted at its address-ordered position.
    ///
    /// Call [`reserve_retirement()`][Self::reserve_retirement] first to avoid allocating here.
    pub(crate) fn replace_active(&mut self, chunk: Chunk, previous_live_items: usize) {
        debug!(capacity = chunk.capacity(), "chunk activated");

        let Some(mut previous) = self.active.replace(chunk) else {
            return;
        };

        if previous_live_items == 0 {
            debug!(
                capacity = previous.capacity(),
                "previous active chunk held no items and was released"
            );
            return;
        }

        previous.set_live_count(previous_live_items);

        let base_addr = previous.base_addr();
        let position = self
            .retired
            .partition_point(|chunk| chunk.base_addr() < base_addr);

        debug!(
            capacity = previous.capacity(),
            live_items = previous_live_items,
            position,
            "chunk retired"
        );

        self.retired.insert(position, previous);
    }

    /// Records that one item of the retired chunk at `position` was removed.
    ///
    /// Returns `true` if that was the last item, in which case the chunk has been released and
    /// every retired chunk after it has moved one position down.
    ///
    /// # Panics
    ///
    /// Panics if there is no retired chunk at `position`.
    pub(crate) fn release_retired_item(&mut self, position: usize) -> bool {
        let chunk = self
            .retired
            .get_mut(position)
            .expect("caller obtained the position from locate() without mutating in between");

        chunk.decrement();

        trace!(
            position,
            remaining = chunk.live_count(),
            "item removed from retired chunk"
        );

        if chunk.live_count() > 0 {
            return false;
        }

        let chunk = self.retired.remove(position);

        debug!(capacity = chunk.capacity(), "retired chunk emptied and released");

        true
    }

    /// Releases every retired chunk, keeping the active one.
    pub(crate) fn release_retired(&mut self) {
        if !self.retired.is_empty() {
            debug!(count = self.retired.len(), "releasing retired chunks");
        }

        self.retired.clear();
    }

    /// Releases every chunk, returning the directory to its initial state.
    pub(crate) fn release_all(&mut self) {
        self.release_retired();

        if let Some(active) = self.active.take() {
            debug!(capacity = active.capacity(), "releasing active chunk");
        }

        // Give back the directory storage itself, too.
        self.retired = Vec::new();
    }

    /// Total slots across all chunks.
    #[must_use]
    pub(crate) fn capacity(&self) -> usize {
        self.active
            .iter()
            .chain(&self.retired)
            .map(Chunk::capacity)
            .fold(0_usize, |total, capacity| {
                total
                    .checked_add(capacity)
                    .expect("chunks cannot hold more slots than there are bytes in virtual memory")
            })
    }

    /// Number of items held by callers in retired chunks.
    #[must_use]
    pub(crate) fn retired_live_count(&self) -> usize {
        self.retired
            .iter()
            .map(Chunk::live_count)
            .fold(0_usize, |total, count| {
                total
                    .checked_add(count)
                    .expect("chunks cannot hold more items than there are bytes in virtual memory")
            })
    }
}
