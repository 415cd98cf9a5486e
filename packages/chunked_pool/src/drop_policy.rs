/// Determines whether a pool may be dropped while callers still hold items allocated from it.
///
/// Dropping a pool always releases every chunk. Items that are still live at that point lose their
/// memory without any destructor being run, because retired chunks only remember how many items
/// they hold, not where those items are.
///
/// # Examples
///
/// ```
/// use chunked_pool::{DropPolicy, RawChunkedPool};
///
/// let pool = RawChunkedPool::builder()
///     .layout_of::<u64>()
///     .drop_policy(DropPolicy::MustNotDropItems)
///     .build();
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum DropPolicy {
    /// The pool silently releases the memory of any remaining items when dropped. This is the
    /// default.
    #[default]
    MayDropItems,

    /// The pool panics if it still contains items when it is dropped.
    ///
    /// This may be valuable if unsafe code holds pointers into the pool and every item is expected
    /// to be removed before the pool goes away, so a leftover item indicates a bookkeeping bug.
    MustNotDropItems,
}
