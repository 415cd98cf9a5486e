use std::alloc::Layout;
use std::num::NonZero;
use std::ptr::NonNull;
use std::thread;

use new_zealand::nz;
use tracing::debug;

use crate::{
    ActiveSlots, Chunk, ChunkLayout, DropPolicy, Error, FreeIndexHeap, Owner, RawChunkedPoolBuilder,
    Result, SlotDirectory,
};

/// Capacity of the first chunk of a pool unless configured otherwise, and the floor for every
/// chunk after it.
pub(crate) const DEFAULT_MINIMUM_CAPACITY: NonZero<usize> = nz!(8);

/// Each new chunk is this many eighths of the previous active chunk's capacity (1.625x), which is
/// between binary doubling and the golden ratio.
const GROWTH_EIGHTHS: usize = 13;

/// An untyped pool of fixed-layout memory slots whose addresses never change.
///
/// The pool hands out pointers to uninitialized slots of the layout given at creation time. A
/// pointer stays valid, and the memory behind it stays in place, until that exact pointer is
/// returned via [`remove()`][Self::remove] or the pool is cleared, destroyed or dropped. The pool
/// never reads or writes the contents of a slot.
///
/// # Memory model
///
/// Memory comes in chunks, each a single allocation holding a fixed number of slots. Exactly one
/// chunk, the *active* chunk, serves new allocations. When it runs out of room, the pool allocates
/// a new, larger chunk (about 1.625 times the previous capacity) and *retires* the old one. A
/// retired chunk accepts no new items; it only counts how many of its items are still out, and its
/// memory is released the moment that count reaches zero.
///
/// Within the active chunk, vacated slots are remembered in a max-heap of indices and reused
/// largest-first. Removing the highest occupied slot lowers the chunk's high-water mark instead,
/// cascading through any vacancies that become the new top, so a pool under steady churn settles
/// into one contiguous region at the front of the active chunk.
///
/// Allocation and removal are O(1) amortized. Finding the chunk that owns a pointer is O(1) for the
/// active chunk and a binary search over the retired chunks otherwise.
///
/// # Examples
///
/// ```
/// use chunked_pool::RawChunkedPool;
///
/// let mut pool = RawChunkedPool::builder().layout_of::<u64>().build();
///
/// let slot = pool.allocate().unwrap().cast::<u64>();
///
/// // SAFETY: The slot is sized and aligned for a u64 and belongs to us until removed.
/// unsafe {
///     slot.write(42);
///     assert_eq!(slot.read(), 42);
/// }
///
/// pool.remove(slot.cast()).unwrap();
/// assert!(pool.is_empty());
/// ```
///
/// # Thread safety
///
/// The pool is thread-mobile ([`Send`]) but not thread-safe ([`Sync`]). Callers that share a pool
/// between threads must wrap it in a lock.
#[derive(Debug)]
pub struct RawChunkedPool {
    layout: ChunkLayout,

    minimum_capacity: NonZero<usize>,

    drop_policy: DropPolicy,

    directory: SlotDirectory,

    /// Vacancies below the active chunk's high-water mark.
    free: FreeIndexHeap,

    /// Capacity the next chunk will have unless a larger reservation demands more.
    next_capacity_hint: NonZero<usize>,
}

impl RawChunkedPool {
    pub(crate) fn new_inner(
        item_layout: Layout,
        minimum_capacity: NonZero<usize>,
        drop_policy: DropPolicy,
    ) -> Self {
        let layout = ChunkLayout::new(item_layout);

        Self {
            next_capacity_hint: minimum_capacity.min(layout.max_capacity()),
            layout,
            minimum_capacity,
            drop_policy,
            directory: SlotDirectory::new(),
            free: FreeIndexHeap::new(),
        }
    }

    /// Creates an idle pool for items of the given layout, with the default configuration.
    ///
    /// No memory is allocated until the first allocation or reservation.
    ///
    /// # Panics
    ///
    /// Panics if the layout has zero size.
    #[must_use]
    pub fn new(item_layout: Layout) -> Self {
        Self::builder().layout(item_layout).build()
    }

    /// Creates a pool whose first chunk is allocated up front with room for at least `capacity`
    /// items.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityOverflow`] if `capacity` items of this layout cannot fit in one
    /// chunk and [`Error::AllocationFailed`] if the memory cannot be allocated.
    ///
    /// # Panics
    ///
    /// Panics if the layout has zero size.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::alloc::Layout;
    ///
    /// use chunked_pool::RawChunkedPool;
    ///
    /// let pool = RawChunkedPool::with_capacity(Layout::new::<u32>(), 100).unwrap();
    ///
    /// assert!(pool.capacity() >= 100);
    /// assert_eq!(pool.chunk_count(), 1);
    /// ```
    pub fn with_capacity(item_layout: Layout, capacity: usize) -> Result<Self> {
        let mut pool = Self::new(item_layout);
        pool.reserve(capacity)?;
        Ok(pool)
    }

    /// Starts building a new [`RawChunkedPool`].
    pub fn builder() -> RawChunkedPoolBuilder {
        RawChunkedPoolBuilder::new()
    }

    /// The memory layout of the slots handed out by this pool.
    #[must_use]
    pub fn item_layout(&self) -> Layout {
        self.layout.item_layout()
    }

    /// The smallest capacity any chunk of this pool will have.
    #[must_use]
    pub fn minimum_capacity(&self) -> usize {
        self.minimum_capacity.get()
    }

    /// The number of items currently allocated and not yet removed, across all chunks.
    #[must_use]
    #[cfg_attr(test, mutants::skip)] // Can be mutated to infinitely growing memory use.
    pub fn len(&self) -> usize {
        self.active_len()
            .checked_add(self.directory.retired_live_count())
            .expect("the pool cannot hold more items than there are bytes in virtual memory")
    }

    /// Whether no items are currently allocated. An empty pool may still hold memory.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total slots across all chunks, occupied or not. Slots in retired chunks are included even
    /// though they can no longer be handed out.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.directory.capacity()
    }

    /// Number of chunks currently holding memory, including the active chunk.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.directory.chunk_count()
    }

    /// Number of retired chunks that still hold at least one item.
    #[must_use]
    pub fn retired_chunk_count(&self) -> usize {
        self.directory.retired_count()
    }

    /// Capacity of the active chunk, or zero if the pool is idle.
    #[must_use]
    pub fn active_capacity(&self) -> usize {
        self.directory.active().map_or(0, Chunk::capacity)
    }

    /// The active chunk's high-water mark: how many of its leading slots have been handed out,
    /// including any that are currently vacant.
    #[must_use]
    pub fn active_high_water(&self) -> usize {
        self.directory.active().map_or(0, Chunk::live_count)
    }

    /// Number of vacant slots below the active chunk's high-water mark, awaiting reuse.
    #[must_use]
    pub fn free_slot_count(&self) -> usize {
        self.free.len()
    }

    /// Capacity the next chunk will be created with, unless a reservation requires more.
    #[must_use]
    pub fn next_capacity_hint(&self) -> usize {
        self.next_capacity_hint.get()
    }

    /// Items currently held in the active chunk.
    fn active_len(&self) -> usize {
        // Cannot wrap because every free index is below the high-water mark.
        self.active_high_water().wrapping_sub(self.free.len())
    }

    /// Slots the active chunk can still hand out without the pool growing.
    fn available(&self) -> usize {
        self.directory.active().map_or(0, |active| {
            // Cannot wrap because both together are bounded by the chunk capacity.
            active.untouched_slots().wrapping_add(self.free.len())
        })
    }

    /// Ensures that the next `additional` allocations will be served without allocating memory.
    ///
    /// If the active chunk cannot serve them, a new active chunk is created with room for at least
    /// `additional` items and the current active chunk is retired. Existing items never move.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapacityOverflow`] if `additional` items of this layout cannot fit in one
    /// chunk and [`Error::AllocationFailed`] if the memory cannot be allocated. On error the pool
    /// is unchanged.
    ///
    /// # Examples
    ///
    /// ```
    /// use chunked_pool::RawChunkedPool;
    ///
    /// let mut pool = RawChunkedPool::builder().layout_of::<u8>().build();
    ///
    /// pool.reserve(50).unwrap();
    /// let chunks = pool.chunk_count();
    ///
    /// for _ in 0..50 {
    ///     pool.allocate().unwrap();
    /// }
    ///
    /// assert_eq!(pool.chunk_count(), chunks);
    /// # pool.clear();
    /// ```
    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        if self.available() >= additional {
            return Ok(());
        }

        self.grow(additional)
    }

    /// Replaces the active chunk with a new one that has room for at least `required` items.
    fn grow(&mut self, required: usize) -> Result<()> {
        let maximum = self.layout.max_capacity();

        if required > maximum.get() {
            return Err(Error::CapacityOverflow {
                requested: required,
                maximum: maximum.get(),
            });
        }

        let capacity = NonZero::new(required)
            .map_or(self.next_capacity_hint, |required| {
                required.max(self.next_capacity_hint)
            });

        // Everything that can fail happens before the first mutation, so a failure leaves the
        // pool untouched.
        self.directory.reserve_retirement()?;
        let chunk = Chunk::new(self.layout, capacity)?;
        let vacancies = FreeIndexHeap::for_capacity(capacity.get())?;

        let previous_live_items = self.active_len();

        self.directory.replace_active(chunk, previous_live_items);
        self.free = vacancies;
        self.next_capacity_hint = next_capacity(capacity, self.minimum_capacity, maximum);

        debug!(
            capacity = capacity.get(),
            next_capacity = self.next_capacity_hint.get(),
            chunks = self.directory.chunk_count(),
            item_size = self.layout.item_layout().size(),
            "pool grew"
        );

        #[cfg(debug_assertions)]
        self.integrity_check();

        Ok(())
    }

    /// Allocates an uninitialized slot and returns a pointer to it.
    ///
    /// The slot is sized and aligned for the pool's item layout. Its address stays the same until
    /// the pointer is passed to [`remove()`][Self::remove] or the pool is cleared, destroyed or
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AllocationFailed`] or [`Error::CapacityOverflow`] if the pool needed to
    /// grow and could not. On error the pool is unchanged.
    pub fn allocate(&mut self) -> Result<NonNull<u8>> {
        if let Some(index) = self.free.pop_max() {
            let active = self
                .directory
                .active()
                .expect("vacancies can only be recorded while there is an active chunk");

            return Ok(active.slot_ptr(index));
        }

        if self.directory.active().is_none_or(Chunk::is_full) {
            self.grow(1)?;
        }

        let active = self
            .directory
            .active_mut()
            .expect("we just ensured there is an active chunk with room");

        let index = active.bump();
        Ok(active.slot_ptr(index))
    }

    /// Returns a slot to the pool.
    ///
    /// After this call, the memory behind the pointer may be handed out again or released, so the
    /// caller must not access it anymore. The pool does not run any destructor on the contents.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotOwned`] if the pointer is not the start of a slot of this pool and
    /// [`Error::DoubleRemove`] if it is a slot of the active chunk that is already vacant. Slots
    /// vacated in a retired chunk cannot be told apart from occupied ones, so removing them twice
    /// is not detected.
    ///
    /// Returns [`Error::AllocationFailed`] if the vacancy could not be recorded, in which case
    /// the slot remains allocated.
    pub fn remove(&mut self, ptr: NonNull<u8>) -> Result<()> {
        self.remove_with(ptr, |_| {})
    }

    /// Removes a slot, calling `before_release` with the slot pointer after every check has passed
    /// and before the slot can be reused or its chunk released.
    pub(crate) fn remove_with(
        &mut self,
        ptr: NonNull<u8>,
        before_release: impl FnOnce(NonNull<u8>),
    ) -> Result<()> {
        let address = ptr.as_ptr().addr();

        match self.directory.locate(address) {
            None => Err(Error::NotOwned { address }),
            Some(Owner::Active { index }) => {
                self.remove_from_active(index, address, ptr, before_release)
            }
            Some(Owner::Retired { position }) => {
                before_release(ptr);
                self.directory.release_retired_item(position);
                Ok(())
            }
        }
    }

    fn remove_from_active(
        &mut self,
        index: usize,
        address: usize,
        ptr: NonNull<u8>,
        before_release: impl FnOnce(NonNull<u8>),
    ) -> Result<()> {
        let active = self
            .directory
            .active_mut()
            .expect("locate() only reports the active chunk if there is one");

        if index >= active.live_count() {
            return Err(Error::DoubleRemove { address });
        }

        if self.free.contains(index) {
            return Err(Error::DoubleRemove { address });
        }

        // Cannot wrap because index < live_count, so live_count >= 1.
        let is_top = index == active.live_count().wrapping_sub(1);

        if !is_top {
            self.free.reserve_one()?;
            before_release(ptr);
            self.free.push(index);
            return Ok(());
        }

        before_release(ptr);
        active.decrement();

        // Any vacancies that are now at the top fall away as well.
        while self
            .free
            .peek_max()
            .is_some_and(|max| max.checked_add(1) == Some(active.live_count()))
        {
            _ = self.free.pop_max();
            active.decrement();
        }

        Ok(())
    }

    /// Whether `ptr` is the start of a slot of this pool that is currently allocated.
    ///
    /// This is a diagnostic aid. Slots in retired chunks are reported as allocated because a
    /// retired chunk does not remember which of its slots are vacant.
    #[must_use]
    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        match self.directory.locate(ptr.as_ptr().addr()) {
            None => false,
            Some(Owner::Active { index }) => {
                index < self.active_high_water() && !self.free.contains(index)
            }
            Some(Owner::Retired { .. }) => true,
        }
    }

    /// Removes all items, invalidating every pointer handed out so far.
    ///
    /// Retired chunks are released. The active chunk keeps its memory so that refilling the pool
    /// does not immediately need to grow again.
    pub fn clear(&mut self) {
        self.directory.release_retired();
        self.free.clear();

        if let Some(active) = self.directory.active_mut() {
            active.set_live_count(0);
        }

        debug!(
            capacity = self.active_capacity(),
            item_size = self.layout.item_layout().size(),
            "pool cleared"
        );
    }

    /// Releases all memory held by the pool, invalidating every pointer handed out so far.
    ///
    /// The pool returns to the same idle state it had right after creation and can be used again.
    /// Calling this on an idle pool does nothing.
    pub fn destroy(&mut self) {
        if self.directory.chunk_count() == 0 {
            return;
        }

        debug!(
            chunks = self.directory.chunk_count(),
            item_size = self.layout.item_layout().size(),
            "pool destroyed"
        );

        self.directory.release_all();
        self.free = FreeIndexHeap::new();
        self.next_capacity_hint = self.minimum_capacity.min(self.layout.max_capacity());
    }

    /// Iterates over pointers to the occupied slots of the active chunk, in ascending address order.
    ///
    /// This is a debugging and testing facility. Items in retired chunks are not visited, because a
    /// retired chunk only counts its items and cannot be scanned slot by slot.
    ///
    /// Each call copies and sorts the active chunk's vacancies, costing O(k log k) time and one
    /// allocation for k vacancies, before the first item is yielded.
    ///
    /// # Examples
    ///
    /// ```
    /// use chunked_pool::RawChunkedPool;
    ///
    /// let mut pool = RawChunkedPool::builder().layout_of::<u32>().build();
    ///
    /// let a = pool.allocate().unwrap();
    /// let b = pool.allocate().unwrap();
    /// let c = pool.allocate().unwrap();
    /// pool.remove(b).unwrap();
    ///
    /// assert_eq!(pool.active_slots().collect::<Vec<_>>(), vec![a, c]);
    /// # pool.clear();
    /// ```
    #[must_use]
    pub fn active_slots(&self) -> ActiveSlots<'_> {
        ActiveSlots::new(self.directory.active(), self.free.to_sorted_vec())
    }

    /// Calls `visitor` with a pointer to every occupied slot of the active chunk.
    ///
    /// See [`active_slots()`][Self::active_slots] for which slots are visited.
    pub fn for_each_in_active_chunk(&self, visitor: impl FnMut(NonNull<u8>)) {
        self.active_slots().for_each(visitor);
    }

    #[cfg_attr(test, mutants::skip)] // This is essentially test logic, mutation is meaningless.
    #[cfg(any(test, debug_assertions))]
    pub(crate) fn integrity_check(&self) {
        let high_water = self.active_high_water();

        let vacancies = self.free.to_sorted_vec();

        assert_eq!(
            self.free.marked_count(),
            vacancies.len(),
            "vacancy bitmap disagrees with the vacancy heap"
        );

        for pair in vacancies.windows(2) {
            assert!(
                pair.first() != pair.last(),
                "vacancy {:?} recorded twice",
                pair.first()
            );
        }

        if let Some(&top) = vacancies.last() {
            assert!(
                top.checked_add(1).is_some_and(|end| end < high_water),
                "vacancy {top} is not below the slot at the top of the high-water mark {high_water}"
            );
        }

        let retired = self.directory.retired();

        for pair in retired.windows(2) {
            let (Some(lower), Some(upper)) = (pair.first(), pair.last()) else {
                continue;
            };

            assert!(
                lower.base_addr() < upper.base_addr(),
                "retired chunks are not sorted by address"
            );
            assert!(
                !lower.contains(upper.base_addr()),
                "retired chunks overlap"
            );
        }

        for chunk in retired {
            assert!(
                chunk.live_count() > 0,
                "empty retired chunk was not released"
            );
        }

        assert!(
            self.next_capacity_hint <= self.layout.max_capacity(),
            "next capacity hint exceeds the maximum chunk capacity"
        );
    }
}

impl Drop for RawChunkedPool {
    fn drop(&mut self) {
        let was_empty = self.is_empty();

        self.destroy();

        // We check at the end so the memory is released first. If we are already panicking, we do
        // not want to panic again because that would obscure the original panic.
        if self.drop_policy == DropPolicy::MustNotDropItems && !thread::panicking() {
            assert!(
                was_empty,
                "dropped a non-empty pool with a policy that says it must be empty when dropped"
            );
        }
    }
}

/// Capacity of the chunk that follows an active chunk of `current` capacity.
fn next_capacity(
    current: NonZero<usize>,
    minimum: NonZero<usize>,
    maximum: NonZero<usize>,
) -> NonZero<usize> {
    let grown = current.get().saturating_mul(GROWTH_EIGHTHS) >> 3;

    NonZero::new(grown.max(minimum.get()).min(maximum.get()))
        .expect("the maximum capacity is never zero and the minimum is never zero")
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::indexing_slicing,
        clippy::arithmetic_side_effects,
        reason = "we do not need to worry about these things when writing test code"
    )]

    use std::collections::HashSet;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    assert_impl_all!(RawChunkedPool: Send, std::fmt::Debug);
    assert_not_impl_any!(RawChunkedPool: Sync);

    fn pool_of_u64() -> RawChunkedPool {
        RawChunkedPool::builder().layout_of::<u64>().build()
    }

    fn allocate_n(pool: &mut RawChunkedPool, count: usize) -> Vec<NonNull<u8>> {
        (0..count).map(|_| pool.allocate().unwrap()).collect()
    }

    #[test]
    fn smoke_test() {
        let mut pool = pool_of_u64();

        assert_eq!(pool.len(), 0);
        assert!(pool.is_empty());
        assert_eq!(pool.chunk_count(), 0);

        let a = pool.allocate().unwrap();
        let b = pool.allocate().unwrap();
        let c = pool.allocate().unwrap();

        assert_eq!(pool.len(), 3);
        assert!(!pool.is_empty());
        assert_eq!(pool.chunk_count(), 1);
        assert_eq!(pool.capacity(), 8);

        // SAFETY: Each pointer is a distinct u64 slot that we own.
        unsafe {
            a.cast::<u64>().write(1);
            b.cast::<u64>().write(2);
            c.cast::<u64>().write(3);
        }

        pool.remove(b).unwrap();

        let d = pool.allocate().unwrap();
        assert_eq!(d, b);

        // SAFETY: Still allocated, written above.
        unsafe {
            assert_eq!(a.cast::<u64>().read(), 1);
            assert_eq!(c.cast::<u64>().read(), 3);
        }

        pool.integrity_check();
    }

    #[test]
    fn slots_are_aligned_and_distinct() {
        #[repr(align(64))]
        #[allow(dead_code, reason = "only the layout matters")]
        struct Aligned([u8; 3]);

        let mut pool = RawChunkedPool::builder().layout_of::<Aligned>().build();

        let pointers = allocate_n(&mut pool, 40);

        let unique = pointers.iter().copied().collect::<HashSet<_>>();
        assert_eq!(unique.len(), 40);

        for ptr in pointers {
            assert_eq!(ptr.as_ptr().addr() % 64, 0);
        }
    }

    #[test]
    fn idle_pool_has_no_memory() {
        let pool = pool_of_u64();

        assert_eq!(pool.capacity(), 0);
        assert_eq!(pool.active_capacity(), 0);
        assert_eq!(pool.active_high_water(), 0);
        assert_eq!(pool.next_capacity_hint(), 8);
        assert_eq!(pool.active_slots().count(), 0);
    }

    #[test]
    fn tail_removal_cascades() {
        let mut pool = pool_of_u64();

        let items = allocate_n(&mut pool, 5);

        pool.remove(items[4]).unwrap();
        pool.remove(items[3]).unwrap();
        pool.remove(items[2]).unwrap();

        assert_eq!(pool.active_high_water(), 2);
        assert_eq!(pool.free_slot_count(), 0);
        assert_eq!(pool.len(), 2);

        pool.integrity_check();
    }

    #[test]
    fn tail_removal_cascades_through_earlier_vacancies() {
        let mut pool = pool_of_u64();

        let items = allocate_n(&mut pool, 6);

        // Vacancies at 2 and 3 are remembered because they are not at the top.
        pool.remove(items[2]).unwrap();
        pool.remove(items[3]).unwrap();
        assert_eq!(pool.free_slot_count(), 2);
        assert_eq!(pool.active_high_water(), 6);

        // Removing 5 only lowers the mark to 5, as slot 4 is occupied.
        pool.remove(items[5]).unwrap();
        assert_eq!(pool.active_high_water(), 5);
        assert_eq!(pool.free_slot_count(), 2);

        // Removing 4 lets the mark fall through 3 and 2 down to 2.
        pool.remove(items[4]).unwrap();
        assert_eq!(pool.active_high_water(), 2);
        assert_eq!(pool.free_slot_count(), 0);

        pool.integrity_check();
    }

    #[test]
    fn hole_is_reused() {
        let mut pool = pool_of_u64();

        let items = allocate_n(&mut pool, 5);

        pool.remove(items[1]).unwrap();
        assert_eq!(pool.free_slot_count(), 1);
        assert_eq!(pool.active_high_water(), 5);

        let reused = pool.allocate().unwrap();
        assert_eq!(reused, items[1]);
        assert_eq!(pool.free_slot_count(), 0);
        assert_eq!(pool.active_high_water(), 5);
    }

    #[test]
    fn largest_hole_is_reused_first() {
        let mut pool = pool_of_u64();

        let items = allocate_n(&mut pool, 6);

        pool.remove(items[1]).unwrap();
        pool.remove(items[3]).unwrap();
        pool.remove(items[2]).unwrap();

        assert_eq!(pool.allocate().unwrap(), items[3]);
        assert_eq!(pool.allocate().unwrap(), items[2]);
        assert_eq!(pool.allocate().unwrap(), items[1]);
        assert_eq!(pool.free_slot_count(), 0);
    }

    #[test]
    fn growth_retires_full_chunk() {
        let mut pool = pool_of_u64();

        let items = allocate_n(&mut pool, 9);

        assert_eq!(pool.chunk_count(), 2);
        assert_eq!(pool.retired_chunk_count(), 1);
        assert_eq!(pool.active_capacity(), 13);
        assert_eq!(pool.capacity(), 21);
        assert_eq!(pool.active_high_water(), 1);
        assert_eq!(pool.len(), 9);
        assert_eq!(pool.next_capacity_hint(), 21);

        // The ninth item is the first one in the new active chunk.
        assert_eq!(pool.active_slots().collect::<Vec<_>>(), vec![items[8]]);

        pool.integrity_check();
    }

    #[test]
    fn retired_chunk_released_when_emptied() {
        let mut pool = pool_of_u64();

        let items = allocate_n(&mut pool, 9);
        let survivor = items[8].cast::<u64>();

        // SAFETY: The slot is ours and sized for a u64.
        unsafe { survivor.write(0xDEAD_BEEF) };

        // Remove in an arbitrary order.
        for index in [3, 0, 7, 5, 1, 6, 2] {
            pool.remove(items[index]).unwrap();
            assert_eq!(pool.retired_chunk_count(), 1);
        }

        pool.remove(items[4]).unwrap();
        assert_eq!(pool.retired_chunk_count(), 0);
        assert_eq!(pool.chunk_count(), 1);
        assert_eq!(pool.len(), 1);

        // SAFETY: Still allocated, written above.
        assert_eq!(unsafe { survivor.read() }, 0xDEAD_BEEF);

        pool.integrity_check();
    }

    #[test]
    fn retired_chunk_keeps_exact_count_of_holes() {
        let mut pool = pool_of_u64();

        let items = allocate_n(&mut pool, 8);

        // Two holes in the active chunk before it is retired.
        pool.remove(items[2]).unwrap();
        pool.remove(items[5]).unwrap();

        // Fill the holes again and then force growth.
        let refilled = allocate_n(&mut pool, 2);
        let extra = pool.allocate().unwrap();
        assert_eq!(pool.retired_chunk_count(), 1);
        assert_eq!(pool.len(), 9);

        // 8 live items in the retired chunk.
        for ptr in [items[0], items[1], items[3], items[4], items[6], items[7]] {
            pool.remove(ptr).unwrap();
        }
        assert_eq!(pool.retired_chunk_count(), 1);

        for ptr in refilled {
            pool.remove(ptr).unwrap();
        }
        assert_eq!(pool.retired_chunk_count(), 0);

        pool.remove(extra).unwrap();
        assert!(pool.is_empty());
    }

    #[test]
    fn holes_are_dropped_from_count_when_retiring() {
        let mut pool = pool_of_u64();

        let items = allocate_n(&mut pool, 8);
        pool.remove(items[1]).unwrap();

        // Needs more room than the one vacancy, forcing growth with a live vacancy.
        pool.reserve(2).unwrap();
        assert_eq!(pool.retired_chunk_count(), 1);
        assert_eq!(pool.free_slot_count(), 0);
        assert_eq!(pool.len(), 7);

        for (index, ptr) in items.iter().enumerate() {
            if index != 1 {
                pool.remove(*ptr).unwrap();
            }
        }

        assert_eq!(pool.retired_chunk_count(), 0);
        assert!(pool.is_empty());
    }

    #[test]
    fn empty_active_chunk_is_released_not_retired() {
        let mut pool = pool_of_u64();

        let items = allocate_n(&mut pool, 3);
        for ptr in items.into_iter().rev() {
            pool.remove(ptr).unwrap();
        }

        assert_eq!(pool.active_high_water(), 0);

        pool.reserve(100).unwrap();

        assert_eq!(pool.chunk_count(), 1);
        assert_eq!(pool.retired_chunk_count(), 0);
        assert!(pool.active_capacity() >= 100);
    }

    #[test]
    fn removal_straddling_several_retired_chunks() {
        let mut pool = pool_of_u64();

        // 8 + 13 + 21 + 34 slots; the last chunk is active.
        let items = allocate_n(&mut pool, 8 + 13 + 21 + 5);
        assert_eq!(pool.retired_chunk_count(), 3);

        // Interleave removals across the retired chunks: every chunk loses items long before
        // any chunk becomes empty.
        let mut order = (0..42).collect::<Vec<_>>();
        order.sort_by_key(|index| (index % 7, *index));

        let mut released = 0;
        for index in order {
            let before = pool.retired_chunk_count();
            pool.remove(items[index]).unwrap();

            if pool.retired_chunk_count() < before {
                released += 1;
            }

            pool.integrity_check();
        }

        assert_eq!(released, 3);
        assert_eq!(pool.retired_chunk_count(), 0);
        assert_eq!(pool.len(), 5);

        for ptr in &items[42..] {
            assert!(pool.contains(*ptr));
        }
    }

    #[test]
    fn reserve_then_allocate_does_not_grow() {
        let mut pool = pool_of_u64();

        pool.reserve(100).unwrap();
        let chunks = pool.chunk_count();
        let capacity = pool.capacity();

        _ = allocate_n(&mut pool, 100);

        assert_eq!(pool.chunk_count(), chunks);
        assert_eq!(pool.capacity(), capacity);
    }

    #[test]
    fn reserve_counts_vacancies() {
        let mut pool = pool_of_u64();

        let items = allocate_n(&mut pool, 8);
        pool.remove(items[0]).unwrap();
        pool.remove(items[1]).unwrap();

        pool.reserve(2).unwrap();
        assert_eq!(pool.chunk_count(), 1);

        pool.reserve(3).unwrap();
        assert_eq!(pool.chunk_count(), 2);
    }

    #[test]
    fn reserve_zero_on_idle_pool_is_noop() {
        let mut pool = pool_of_u64();

        pool.reserve(0).unwrap();

        assert_eq!(pool.chunk_count(), 0);
    }

    #[test]
    fn reserve_overflow_is_reported_before_allocating() {
        let mut pool = pool_of_u64();
        let _keep = pool.allocate().unwrap();

        let result = pool.reserve(usize::MAX);

        assert!(matches!(result, Err(Error::CapacityOverflow { .. })));
        assert_eq!(pool.chunk_count(), 1);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn reserve_allocation_failure_leaves_pool_unchanged() {
        let mut pool = RawChunkedPool::builder().layout_of::<[u8; 4096]>().build();
        let kept = pool.allocate().unwrap();

        // Representable as a layout but far beyond any real memory.
        let result = pool.reserve(1 << 40);

        assert!(matches!(result, Err(Error::AllocationFailed { .. })));
        assert_eq!(pool.chunk_count(), 1);
        assert_eq!(pool.active_capacity(), 8);
        assert!(pool.contains(kept));
    }

    #[test]
    fn growth_is_geometric() {
        let mut pool = pool_of_u64();

        let mut capacities = Vec::new();
        for _ in 0..100 {
            _ = pool.allocate().unwrap();

            if capacities.last() != Some(&pool.active_capacity()) {
                capacities.push(pool.active_capacity());
            }
        }

        assert_eq!(capacities, vec![8, 13, 21, 34, 55]);
    }

    #[test]
    fn next_capacity_respects_bounds() {
        assert_eq!(next_capacity(nz!(8), nz!(8), nz!(1000)).get(), 13);
        assert_eq!(next_capacity(nz!(1), nz!(8), nz!(1000)).get(), 8);
        assert_eq!(next_capacity(nz!(800), nz!(8), nz!(1000)).get(), 1000);
        assert_eq!(
            next_capacity(NonZero::new(usize::MAX).unwrap(), nz!(8), nz!(1000)).get(),
            1000
        );
    }

    #[test]
    fn minimum_capacity_above_maximum_is_clamped() {
        let pool = RawChunkedPool::builder()
            .layout_of::<[u8; 1 << 20]>()
            .minimum_capacity(NonZero::new(usize::MAX).unwrap())
            .build();

        assert!(pool.next_capacity_hint() < usize::MAX);
    }

    #[test]
    fn remove_foreign_pointer_is_not_owned() {
        let mut pool = pool_of_u64();
        _ = allocate_n(&mut pool, 20);

        let mut foreign = 0_u64;
        let foreign = NonNull::from(&mut foreign).cast::<u8>();

        assert!(matches!(pool.remove(foreign), Err(Error::NotOwned { .. })));
        assert_eq!(pool.len(), 20);
    }

    #[test]
    fn remove_from_idle_pool_is_not_owned() {
        let mut pool = pool_of_u64();

        let mut foreign = 0_u64;
        let foreign = NonNull::from(&mut foreign).cast::<u8>();

        assert!(matches!(pool.remove(foreign), Err(Error::NotOwned { .. })));
    }

    #[test]
    fn remove_misaligned_pointer_is_not_owned() {
        let mut pool = pool_of_u64();
        let items = allocate_n(&mut pool, 20);

        for ptr in [items[2], items[15]] {
            // SAFETY: Offsetting by one byte stays within the slot.
            let inside = unsafe { ptr.byte_add(1) };
            assert!(matches!(pool.remove(inside), Err(Error::NotOwned { .. })));
        }

        assert_eq!(pool.len(), 20);
    }

    #[test]
    fn remove_above_high_water_is_double_remove() {
        let mut pool = pool_of_u64();

        let items = allocate_n(&mut pool, 3);
        pool.remove(items[2]).unwrap();

        assert!(matches!(
            pool.remove(items[2]),
            Err(Error::DoubleRemove { .. })
        ));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn remove_of_recorded_vacancy_is_double_remove() {
        let mut pool = pool_of_u64();

        let items = allocate_n(&mut pool, 3);
        pool.remove(items[0]).unwrap();

        assert!(matches!(
            pool.remove(items[0]),
            Err(Error::DoubleRemove { .. })
        ));
        assert_eq!(pool.free_slot_count(), 1);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn double_remove_of_hole_leaves_slot_reusable_once() {
        let mut pool = pool_of_u64();

        let items = allocate_n(&mut pool, 5);
        pool.remove(items[1]).unwrap();

        assert!(matches!(
            pool.remove(items[1]),
            Err(Error::DoubleRemove { .. })
        ));
        assert_eq!(pool.len(), 4);
        assert_eq!(pool.free_slot_count(), 1);

        // The hole is handed out exactly once, then the pool bumps past the high-water mark.
        let first = pool.allocate().unwrap();
        let second = pool.allocate().unwrap();

        assert_eq!(first, items[1]);
        assert_ne!(first, second);
        assert!(!items.contains(&second));
        assert_eq!(pool.len(), 6);
        assert_eq!(pool.free_slot_count(), 0);

        pool.integrity_check();
    }

    #[test]
    fn contains_tracks_allocation_state() {
        let mut pool = pool_of_u64();

        // All in the first chunk, so every slot is tracked individually.
        let items = allocate_n(&mut pool, 6);
        assert_eq!(pool.chunk_count(), 1);
        assert!(items.iter().all(|ptr| pool.contains(*ptr)));

        pool.remove(items[5]).unwrap();
        pool.remove(items[1]).unwrap();

        assert!(!pool.contains(items[5]));
        assert!(!pool.contains(items[1]));
        assert!(pool.contains(items[0]));
        assert!(pool.contains(items[2]));
        assert!(pool.contains(items[3]));
        assert!(pool.contains(items[4]));
    }

    #[test]
    fn contains_reports_retired_slots_as_allocated() {
        let mut pool = pool_of_u64();

        // The ninth item starts a second chunk, retiring the first.
        let items = allocate_n(&mut pool, 9);
        assert_eq!(pool.retired_chunk_count(), 1);

        pool.remove(items[1]).unwrap();

        // A retired chunk only counts its items, so the vacated slot is indistinguishable.
        assert!(pool.contains(items[1]));
        assert!(pool.contains(items[0]));
        assert!(pool.contains(items[8]));
        assert_eq!(pool.len(), 8);
    }

    #[test]
    fn clear_keeps_active_capacity() {
        let mut pool = pool_of_u64();

        let items = allocate_n(&mut pool, 30);
        pool.remove(items[25]).unwrap();

        let active_capacity = pool.active_capacity();
        pool.clear();

        assert!(pool.is_empty());
        assert_eq!(pool.retired_chunk_count(), 0);
        assert_eq!(pool.chunk_count(), 1);
        assert_eq!(pool.active_capacity(), active_capacity);
        assert_eq!(pool.active_high_water(), 0);
        assert_eq!(pool.free_slot_count(), 0);

        // Refilling within the kept capacity does not grow.
        _ = allocate_n(&mut pool, active_capacity);
        assert_eq!(pool.chunk_count(), 1);

        pool.integrity_check();
    }

    #[test]
    fn destroy_returns_to_idle() {
        let mut pool = pool_of_u64();

        _ = allocate_n(&mut pool, 30);
        pool.destroy();

        assert_eq!(pool.chunk_count(), 0);
        assert_eq!(pool.capacity(), 0);
        assert!(pool.is_empty());
        assert_eq!(pool.next_capacity_hint(), 8);

        // Destroying again is a no-op and the pool is reusable.
        pool.destroy();
        _ = allocate_n(&mut pool, 3);
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.active_capacity(), 8);
    }

    #[test]
    fn active_slots_skip_vacancies() {
        let mut pool = pool_of_u64();

        let items = allocate_n(&mut pool, 6);
        pool.remove(items[1]).unwrap();
        pool.remove(items[4]).unwrap();

        let visited = pool.active_slots().collect::<Vec<_>>();
        assert_eq!(visited, vec![items[0], items[2], items[3], items[5]]);

        let mut via_visitor = Vec::new();
        pool.for_each_in_active_chunk(|ptr| via_visitor.push(ptr));
        assert_eq!(via_visitor, visited);

        // Restartable: a fresh iteration sees the same slots.
        assert_eq!(pool.active_slots().count(), 4);
    }

    #[test]
    fn with_capacity_allocates_eagerly() {
        let pool = RawChunkedPool::with_capacity(Layout::new::<u16>(), 3).unwrap();

        // The minimum capacity still applies.
        assert_eq!(pool.capacity(), 8);
        assert_eq!(pool.chunk_count(), 1);
        assert!(pool.is_empty());
    }

    #[test]
    fn drop_non_empty_with_default_policy_is_fine() {
        let mut pool = pool_of_u64();
        _ = allocate_n(&mut pool, 20);

        drop(pool);
    }

    #[test]
    #[should_panic]
    fn drop_non_empty_with_forbidding_policy_panics() {
        let mut pool = RawChunkedPool::builder()
            .layout_of::<u64>()
            .drop_policy(DropPolicy::MustNotDropItems)
            .build();

        _ = pool.allocate().unwrap();
    }

    #[test]
    fn drop_empty_with_forbidding_policy_is_fine() {
        let mut pool = RawChunkedPool::builder()
            .layout_of::<u64>()
            .drop_policy(DropPolicy::MustNotDropItems)
            .build();

        let ptr = pool.allocate().unwrap();
        pool.remove(ptr).unwrap();
    }

    #[test]
    fn moves_between_threads() {
        let mut pool = pool_of_u64();
        let ptr = pool.allocate().unwrap().addr();

        let pool = thread::spawn(move || {
            let mut pool = pool;
            _ = pool.allocate().unwrap();
            pool
        })
        .join()
        .unwrap();

        assert_eq!(pool.len(), 2);
        assert!(pool.active_slots().any(|slot| slot.addr() == ptr));
    }
}
