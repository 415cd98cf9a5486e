use std::marker::PhantomData;
use std::mem::{self, MaybeUninit};
use std::ptr::NonNull;

use crate::{ChunkedPoolBuilder, RawChunkedPool, Result};

/// A pool of `T` values whose addresses never change while they are in the pool.
///
/// This is a typed layer over [`RawChunkedPool`]: [`insert()`][Self::insert] moves a value into a
/// fresh slot and returns a pointer to it, [`remove()`][Self::remove] moves it back out and returns
/// the slot to the pool. See [`RawChunkedPool`] for how memory is organized.
///
/// # Examples
///
/// ```
/// use chunked_pool::ChunkedPool;
///
/// let mut pool = ChunkedPool::<String>::new();
///
/// let hello = pool.insert("Hello".to_string()).unwrap();
/// let mut world = pool.insert("world".to_string()).unwrap();
///
/// // SAFETY: Both values are still in the pool and we hold no other references to them.
/// unsafe {
///     assert_eq!(hello.as_ref(), "Hello");
///     world.as_mut().push('!');
///
///     assert_eq!(pool.remove(world).unwrap(), "world!");
///     assert_eq!(pool.remove(hello).unwrap(), "Hello");
/// }
///
/// assert!(pool.is_empty());
/// ```
///
/// # Values left in the pool
///
/// Values still in the pool when it is cleared, destroyed or dropped are released without their
/// destructors running. Remove every value first if its destructor matters, or use
/// [`DropPolicy::MustNotDropItems`][crate::DropPolicy::MustNotDropItems] to catch this mistake.
///
/// # Thread safety
///
/// The pool is thread-mobile ([`Send`]) if `T` is, but never thread-safe ([`Sync`]).
pub struct ChunkedPool<T> {
    inner: RawChunkedPool,

    _item: PhantomData<T>,
}

impl<T> std::fmt::Debug for ChunkedPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedPool")
            .field(
                "item_type",
                &std::format_args!("{}", std::any::type_name::<T>()),
            )
            .field("inner", &self.inner)
            .finish()
    }
}

impl<T> ChunkedPool<T> {
    pub(crate) fn from_raw(inner: RawChunkedPool) -> Self {
        Self {
            inner,
            _item: PhantomData,
        }
    }

    /// Creates an idle pool with the default configuration.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts building a new [`ChunkedPool`].
    pub fn builder() -> ChunkedPoolBuilder<T> {
        ChunkedPoolBuilder::new()
    }

    /// Moves `value` into the pool and returns a pointer to it.
    ///
    /// The pointer stays valid until it is passed to [`remove()`][Self::remove] or the pool is
    /// cleared, destroyed or dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool needed to grow and could not. The value is dropped in that
    /// case and the pool is unchanged.
    pub fn insert(&mut self, value: T) -> Result<NonNull<T>> {
        let ptr = self.inner.allocate()?.cast::<T>();

        // SAFETY: The slot is sized and aligned for T, as the pool was built with T's layout, and
        // nobody else has a pointer to it because it was just allocated.
        unsafe {
            ptr.write(value);
        }

        Ok(ptr)
    }

    /// Allocates a slot and lets `init` initialize the value in place.
    ///
    /// This avoids moving large values through the stack. If `init` panics, the slot is returned
    /// to the pool and the panic continues.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool needed to grow and could not, in which case `init` is not
    /// called.
    ///
    /// # Safety
    ///
    /// `init` must fully initialize the value before returning.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::mem::MaybeUninit;
    ///
    /// use chunked_pool::ChunkedPool;
    ///
    /// let mut pool = ChunkedPool::<[u64; 128]>::new();
    ///
    /// // SAFETY: We initialize every element of the array.
    /// let ptr = unsafe {
    ///     pool.insert_with(|slot: &mut MaybeUninit<[u64; 128]>| {
    ///         slot.write([7; 128]);
    ///     })
    /// }
    /// .unwrap();
    ///
    /// // SAFETY: The value is in the pool and initialized.
    /// assert_eq!(unsafe { ptr.as_ref() }[127], 7);
    /// # // SAFETY: Still in the pool.
    /// # _ = unsafe { pool.remove(ptr) }.unwrap();
    /// ```
    pub unsafe fn insert_with(
        &mut self,
        init: impl FnOnce(&mut MaybeUninit<T>),
    ) -> Result<NonNull<T>> {
        let ptr = self.inner.allocate()?;

        let guard = ReturnSlotOnUnwind {
            pool: &mut self.inner,
            ptr,
        };

        // SAFETY: The slot is sized and aligned for T and exclusively ours. MaybeUninit makes no
        // claim about the contents, so the reference is valid even though nothing is written yet.
        let slot = unsafe { ptr.cast::<MaybeUninit<T>>().as_mut() };
        init(slot);

        mem::forget(guard);

        Ok(ptr.cast())
    }

    /// Moves the value out of the pool and returns its slot for reuse.
    ///
    /// # Errors
    ///
    /// Returns an error if the pointer does not belong to this pool, if its slot is known to be
    /// vacant already, or if the vacancy could not be recorded. The value is not touched in any
    /// of those cases.
    ///
    /// # Safety
    ///
    /// If `ptr` belongs to this pool, it must point to a value that is still in the pool: it must
    /// not have been removed already and the pool must not have been cleared or destroyed since
    /// it was inserted. No references to the value may be alive.
    pub unsafe fn remove(&mut self, ptr: NonNull<T>) -> Result<T> {
        let mut value = None;

        self.inner.remove_with(ptr.cast(), |slot| {
            // SAFETY: The caller guarantees the slot holds a live T, and the pool has verified the
            // slot is ours. The slot is considered vacant after this, so the value is not read
            // twice.
            value = Some(unsafe { slot.cast::<T>().read() });
        })?;

        Ok(value.expect("the pool calls the release callback exactly once when removal succeeds"))
    }

    /// Ensures that the next `additional` insertions will not need to allocate memory.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool needed to grow and could not. The pool is unchanged in that
    /// case.
    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        self.inner.reserve(additional)
    }

    /// Releases every value without running destructors, invalidating all pointers. The active
    /// chunk keeps its memory.
    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// Releases every value without running destructors, and all memory, invalidating all
    /// pointers. The pool can be used again afterwards.
    pub fn destroy(&mut self) {
        self.inner.destroy();
    }

    /// The number of values in the pool.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the pool holds no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Total slots across all chunks, occupied or not.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    /// Number of chunks currently holding memory.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.inner.chunk_count()
    }

    /// The smallest capacity any chunk of this pool will have.
    #[must_use]
    pub fn minimum_capacity(&self) -> usize {
        self.inner.minimum_capacity()
    }

    /// Whether `ptr` points to a value currently in this pool.
    ///
    /// Has the same limits as [`RawChunkedPool::contains()`].
    #[must_use]
    pub fn contains(&self, ptr: NonNull<T>) -> bool {
        self.inner.contains(ptr.cast())
    }

    /// Iterates over pointers to the values in the active chunk, in ascending address order.
    ///
    /// Values in retired chunks are not visited. See [`RawChunkedPool::active_slots()`].
    pub fn active_items(&self) -> impl Iterator<Item = NonNull<T>> + Clone + '_ {
        self.inner.active_slots().map(NonNull::cast)
    }

    /// Calls `visitor` with a pointer to every value in the active chunk.
    pub fn for_each_in_active_chunk(&self, mut visitor: impl FnMut(NonNull<T>)) {
        self.inner
            .for_each_in_active_chunk(|slot| visitor(slot.cast()));
    }

    /// The untyped pool this pool is built on.
    #[must_use]
    pub fn as_raw(&self) -> &RawChunkedPool {
        &self.inner
    }
}

impl<T> Default for ChunkedPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Returns a slot to the pool if in-place initialization unwinds.
struct ReturnSlotOnUnwind<'a> {
    pool: &'a mut RawChunkedPool,
    ptr: NonNull<u8>,
}

impl Drop for ReturnSlotOnUnwind<'_> {
    #[cfg_attr(test, mutants::skip)] // Only reachable during unwinding.
    fn drop(&mut self) {
        // The slot was allocated a moment ago and is the newest item, so this cannot fail in a
        // way worth reporting while already unwinding.
        _ = self.pool.remove(self.ptr);
    }
}
