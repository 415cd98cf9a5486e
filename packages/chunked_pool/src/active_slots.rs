use std::iter::FusedIterator;
use std::ptr::NonNull;

use crate::Chunk;

/// Iterator over the occupied slots of a pool's active chunk.
///
/// Created by [`RawChunkedPool::active_slots()`][crate::RawChunkedPool::active_slots]. Yields a
/// pointer to every slot below the active chunk's high-water mark that is not vacant, in ascending
/// address order. Items in retired chunks are never visited because a retired chunk only knows how
/// many items it holds, not which slots they are in.
///
/// The iterator borrows the pool, so the pool cannot be mutated while an iteration is in progress.
/// Clone the iterator to restart from the same position.
#[derive(Clone, Debug)]
pub struct ActiveSlots<'a> {
    chunk: Option<&'a Chunk>,

    /// Vacant indices below the high-water mark, ascending.
    vacant: Vec<usize>,

    /// Position in `vacant` of the next vacancy not yet passed.
    next_vacant: usize,

    /// Next slot index to consider.
    next_index: usize,

    /// One past the last slot index to consider (the high-water mark).
    end_index: usize,
}

impl<'a> ActiveSlots<'a> {
    pub(crate) fn new(chunk: Option<&'a Chunk>, vacant: Vec<usize>) -> Self {
        Self {
            end_index: chunk.map_or(0, Chunk::live_count),
            chunk,
            vacant,
            next_vacant: 0,
            next_index: 0,
        }
    }

    fn remaining(&self) -> usize {
        let vacancies_ahead = self
            .vacant
            .len()
            .saturating_sub(self.next_vacant);

        self.end_index
            .saturating_sub(self.next_index)
            .saturating_sub(vacancies_ahead)
    }
}

impl Iterator for ActiveSlots<'_> {
    type Item = NonNull<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk = self.chunk?;

        while self.next_index < self.end_index {
            let index = self.next_index;

            // Cannot wrap because index < end_index <= capacity.
            self.next_index = index.wrapping_add(1);

            if self.vacant.get(self.next_vacant) == Some(&index) {
                // Cannot wrap because the cursor is within the vector.
                self.next_vacant = self.next_vacant.wrapping_add(1);
                continue;
            }

            return Some(chunk.slot_ptr(index));
        }

        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ActiveSlots<'_> {}

impl FusedIterator for ActiveSlots<'_> {}
