use std::alloc::Layout;
use std::cell::Cell;
use std::marker::PhantomData;
use std::num::NonZero;

use crate::{ChunkedPool, DEFAULT_MINIMUM_CAPACITY, DropPolicy, RawChunkedPool};

/// Builder for creating an instance of [`RawChunkedPool`].
///
/// [`RawChunkedPool`] requires the item memory layout to be specified at construction time.
/// Use either `.layout()` to provide a specific layout or `.layout_of::<T>()` to generate
/// a layout based on the provided type.
///
/// The layout is mandatory, whereas other settings are optional.
///
/// # Examples
///
/// ```
/// use std::alloc::Layout;
/// use std::num::NonZero;
///
/// use chunked_pool::RawChunkedPool;
///
/// let pool = RawChunkedPool::builder()
///     .layout(Layout::new::<u32>())
///     .minimum_capacity(NonZero::new(64).unwrap())
///     .build();
///
/// assert_eq!(pool.minimum_capacity(), 64);
/// ```
///
/// # Thread safety
///
/// The builder is thread-mobile ([`Send`]) but not thread-safe ([`Sync`]).
#[derive(Debug)]
#[must_use]
pub struct RawChunkedPoolBuilder {
    item_layout: Option<Layout>,
    minimum_capacity: NonZero<usize>,
    drop_policy: DropPolicy,

    _not_sync: PhantomData<Cell<()>>,
}

impl RawChunkedPoolBuilder {
    pub(crate) fn new() -> Self {
        Self {
            item_layout: None,
            minimum_capacity: DEFAULT_MINIMUM_CAPACITY,
            drop_policy: DropPolicy::default(),
            _not_sync: PhantomData,
        }
    }

    /// Sets the memory layout for items stored in the pool.
    ///
    /// # Panics
    ///
    /// Panics if the layout has zero size.
    pub fn layout(mut self, layout: Layout) -> Self {
        assert!(
            layout.size() > 0,
            "RawChunkedPool must have non-zero item size"
        );
        self.item_layout = Some(layout);
        self
    }

    /// Sets the memory layout for items stored in the pool based on a type.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized.
    pub fn layout_of<T>(self) -> Self {
        self.layout(Layout::new::<T>())
    }

    /// Sets the smallest capacity any chunk of the pool will have. Defaults to 8.
    ///
    /// Larger values mean fewer chunks for pools that are expected to hold many items, at the
    /// price of more unused memory for pools that stay small.
    pub fn minimum_capacity(mut self, capacity: NonZero<usize>) -> Self {
        self.minimum_capacity = capacity;
        self
    }

    /// Sets the [drop policy][DropPolicy] for the pool. This governs whether it is acceptable to
    /// drop the pool while items are still allocated from it.
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Builds the pool with the specified configuration.
    ///
    /// The pool starts idle: no memory is allocated until the first allocation or reservation.
    ///
    /// # Panics
    ///
    /// Panics if no layout has been set using either [`layout`](Self::layout) or
    /// [`layout_of`](Self::layout_of).
    #[must_use]
    pub fn build(self) -> RawChunkedPool {
        let layout = self.item_layout.expect(
            "Layout must be set using .layout() or .layout_of::<T>() before calling .build()",
        );

        RawChunkedPool::new_inner(layout, self.minimum_capacity, self.drop_policy)
    }
}

/// Builder for creating an instance of [`ChunkedPool`].
///
/// You only need to use this builder if you want to customize the pool configuration.
/// The default configuration used by [`ChunkedPool::new()`][1] is sufficient for most use cases.
///
/// # Examples
///
/// ```
/// use chunked_pool::{ChunkedPool, DropPolicy};
///
/// let pool = ChunkedPool::<String>::builder()
///     .drop_policy(DropPolicy::MustNotDropItems)
///     .build();
/// ```
///
/// [1]: ChunkedPool::new
#[must_use]
pub struct ChunkedPoolBuilder<T> {
    minimum_capacity: NonZero<usize>,
    drop_policy: DropPolicy,

    _item: PhantomData<T>,
}

impl<T> std::fmt::Debug for ChunkedPoolBuilder<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedPoolBuilder")
            .field(
                "item_type",
                &std::format_args!("{}", std::any::type_name::<T>()),
            )
            .field("minimum_capacity", &self.minimum_capacity)
            .field("drop_policy", &self.drop_policy)
            .finish()
    }
}

impl<T> ChunkedPoolBuilder<T> {
    pub(crate) fn new() -> Self {
        Self {
            minimum_capacity: DEFAULT_MINIMUM_CAPACITY,
            drop_policy: DropPolicy::default(),
            _item: PhantomData,
        }
    }

    /// Sets the smallest capacity any chunk of the pool will have. Defaults to 8.
    pub fn minimum_capacity(mut self, capacity: NonZero<usize>) -> Self {
        self.minimum_capacity = capacity;
        self
    }

    /// Sets the [drop policy][DropPolicy] for the pool.
    pub fn drop_policy(mut self, policy: DropPolicy) -> Self {
        self.drop_policy = policy;
        self
    }

    /// Builds the pool with the specified configuration.
    ///
    /// # Panics
    ///
    /// Panics if `T` is zero-sized.
    #[must_use]
    pub fn build(self) -> ChunkedPool<T> {
        let inner = RawChunkedPool::builder()
            .layout_of::<T>()
            .minimum_capacity(self.minimum_capacity)
            .drop_policy(self.drop_policy)
            .build();

        ChunkedPool::from_raw(inner)
    }
}
