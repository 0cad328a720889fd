//! The shared chunk cursor.
//!
//! One cursor exists per loop invocation. Workers call [`ChunkCursor::claim`]
//! to take ownership of the next chunk of indices; the read-and-advance
//! happens as a single step under the cursor's mutex, which is what makes the
//! partitioning duplicate-free and gap-free regardless of how claims
//! interleave across workers.
//!
//! The critical section is O(1): one comparison and one add. Larger chunk
//! sizes amortize the lock over more indices at the cost of any ordering
//! between chunks; `chunk_size = 1` degenerates to globally increasing order
//! with one lock round-trip per index.

use parking_lot::Mutex;

/// A claimed sub-range of indices, already clipped to the loop bound.
///
/// `start` is always `< end` for chunks returned by [`ChunkCursor::claim`];
/// the clipping means the final chunk of a loop may be shorter than the
/// configured chunk size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Chunk {
    pub start: i64,
    pub end: i64,
}

impl Chunk {
    /// Iterate the indices covered by this chunk.
    pub fn indices(self) -> impl Iterator<Item = i64> {
        self.start..self.end
    }

    /// Number of indices in this chunk.
    #[cfg(test)]
    pub fn len(self) -> i64 {
        self.end - self.start
    }
}

/// Monotonically advancing cursor over `[from_inclusive, to_exclusive)`.
///
/// Holds the start of the next unclaimed chunk. Strictly increases by
/// `chunk_size` on every claim; once it reaches `to_exclusive` every
/// subsequent claim observes exhaustion, so each worker's claim loop
/// terminates in finitely many iterations.
pub(crate) struct ChunkCursor {
    next_start: Mutex<i64>,
    chunk_size: i64,
    to_exclusive: i64,
}

impl ChunkCursor {
    /// Create a cursor positioned at the start of the range.
    ///
    /// Caller has already validated `from_inclusive <= to_exclusive` and
    /// `chunk_size >= 1`.
    pub fn new(from_inclusive: i64, to_exclusive: i64, chunk_size: i64) -> Self {
        debug_assert!(from_inclusive <= to_exclusive);
        debug_assert!(chunk_size >= 1);
        Self {
            next_start: Mutex::new(from_inclusive),
            chunk_size,
            to_exclusive,
        }
    }

    /// Claim the next chunk, or `None` once the range is exhausted.
    ///
    /// The returned chunk is clipped to `to_exclusive`, so indices past the
    /// end of the range are discarded rather than handed to a worker.
    pub fn claim(&self) -> Option<Chunk> {
        let start = {
            let mut next = self.next_start.lock();
            let start = *next;
            if start >= self.to_exclusive {
                return None;
            }
            *next = start.saturating_add(self.chunk_size);
            start
        };

        Some(Chunk {
            start,
            end: start.saturating_add(self.chunk_size).min(self.to_exclusive),
        })
    }

    /// Whether every chunk has been claimed.
    ///
    /// Claimed is not completed: the last chunks may still be in flight on
    /// worker threads when this first returns true.
    pub fn is_exhausted(&self) -> bool {
        *self.next_start.lock() >= self.to_exclusive
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_claims_cover_range_without_overlap() {
        let cursor = ChunkCursor::new(0, 10, 4);

        assert_eq!(cursor.claim(), Some(Chunk { start: 0, end: 4 }));
        assert_eq!(cursor.claim(), Some(Chunk { start: 4, end: 8 }));
        // Final chunk is clipped to the bound, not [8, 12).
        assert_eq!(cursor.claim(), Some(Chunk { start: 8, end: 10 }));
        assert_eq!(cursor.claim(), None);
        assert!(cursor.is_exhausted());
    }

    #[test]
    fn test_empty_range_is_exhausted_immediately() {
        let cursor = ChunkCursor::new(5, 5, 4);
        assert!(cursor.is_exhausted());
        assert_eq!(cursor.claim(), None);
    }

    #[test]
    fn test_single_index_range() {
        let cursor = ChunkCursor::new(5, 6, 4);
        let chunk = cursor.claim().expect("one chunk");
        assert_eq!(chunk.indices().collect::<Vec<_>>(), vec![5]);
        assert_eq!(cursor.claim(), None);
    }

    #[test]
    fn test_negative_range() {
        let cursor = ChunkCursor::new(-7, -1, 3);
        assert_eq!(cursor.claim(), Some(Chunk { start: -7, end: -4 }));
        assert_eq!(cursor.claim(), Some(Chunk { start: -4, end: -1 }));
        assert_eq!(cursor.claim(), None);
    }

    #[test]
    fn test_chunk_size_one_claims_in_order() {
        let cursor = ChunkCursor::new(0, 3, 1);
        let starts: Vec<i64> = std::iter::from_fn(|| cursor.claim().map(|c| c.start)).collect();
        assert_eq!(starts, vec![0, 1, 2]);
    }

    #[test]
    fn test_claim_count_is_bounded() {
        // ceil(10 / 3) = 4 claims, then exhaustion forever.
        let cursor = ChunkCursor::new(0, 10, 3);
        let mut lens = Vec::new();
        while let Some(chunk) = cursor.claim() {
            lens.push(chunk.len());
        }
        assert_eq!(lens, vec![3, 3, 3, 1]);
        assert_eq!(cursor.claim(), None);
        assert_eq!(cursor.claim(), None);
    }

    #[test]
    fn test_concurrent_claims_are_disjoint() {
        let cursor = Arc::new(ChunkCursor::new(0, 1000, 7));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let cursor = cursor.clone();
            handles.push(std::thread::spawn(move || {
                let mut seen = Vec::new();
                while let Some(chunk) = cursor.claim() {
                    seen.extend(chunk.indices());
                }
                seen
            }));
        }

        let mut all: Vec<i64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..1000).collect::<Vec<_>>());
    }
}
