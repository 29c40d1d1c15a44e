//! Static partitioning of a table batch across scan workers.
//!
//! Worker count scales with the batch: small batches run inline with no
//! spawned tasks, large ones are capped at `max_workers`. Every worker gets a
//! contiguous slice of equal size; the few tables left over run on the caller.

use std::ops::Range;

/// How a batch of `total` tables is split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionPlan {
    pub total: usize,
    /// Spawned workers; zero means the caller processes everything
    pub workers: usize,
    /// Tables handed to each worker
    pub chunk_size: usize,
}

/// Choose the partitioning for `table_count` tables.
///
/// - `table_count / min_tables_per_worker >= max_workers`: `max_workers` workers
/// - `table_count > min_tables_per_worker`: one worker per `min_tables_per_worker` tables
/// - otherwise: inline
pub fn plan(table_count: usize, min_tables_per_worker: usize, max_workers: usize) -> PartitionPlan {
    let min = min_tables_per_worker.max(1);
    let max = max_workers.max(1);

    let workers = if table_count / min >= max {
        max
    } else if table_count > min {
        table_count / min
    } else {
        0
    };

    let chunk_size = if workers == 0 { 0 } else { table_count / workers };

    PartitionPlan {
        total: table_count,
        workers,
        chunk_size,
    }
}

impl PartitionPlan {
    pub fn is_inline(&self) -> bool {
        self.workers == 0
    }

    /// Tables run by the caller after the workers have been dispatched
    pub fn remainder(&self) -> usize {
        self.total - self.workers * self.chunk_size
    }

    /// Slice of the batch owned by each worker.
    pub fn worker_ranges(&self) -> Vec<Range<usize>> {
        (0..self.workers)
            .map(|i| i * self.chunk_size..(i + 1) * self.chunk_size)
            .collect()
    }

    /// Slice of the batch processed by the caller.
    pub fn remainder_range(&self) -> Range<usize> {
        self.workers * self.chunk_size..self.total
    }

    /// Move `items` into per-worker chunks plus the remainder.
    pub fn split<T>(&self, mut items: Vec<T>) -> (Vec<Vec<T>>, Vec<T>) {
        debug_assert_eq!(items.len(), self.total);
        let remainder = items.split_off(self.workers * self.chunk_size);
        let mut chunks = Vec::with_capacity(self.workers);
        let mut rest = items.into_iter();
        for _ in 0..self.workers {
            chunks.push(rest.by_ref().take(self.chunk_size).collect());
        }
        (chunks, remainder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_small_batch_runs_inline() {
        let p = plan(3, 10, 4);
        assert!(p.is_inline());
        assert_eq!(p.remainder(), 3);
        assert!(p.worker_ranges().is_empty());

        // Exactly the threshold is still inline
        assert!(plan(10, 10, 4).is_inline());
        assert!(plan(0, 10, 4).is_inline());
    }

    #[test]
    fn test_large_batch_caps_workers() {
        let p = plan(50, 10, 4);
        assert_eq!(p.workers, 4);
        assert_eq!(p.chunk_size, 12);
        assert_eq!(p.remainder(), 2);
        assert_eq!(p.remainder_range(), 48..50);
    }

    #[test]
    fn test_medium_batch_scales_workers() {
        let p = plan(25, 10, 4);
        assert_eq!(p.workers, 2);
        assert_eq!(p.chunk_size, 12);
        assert_eq!(p.remainder(), 1);

        let p = plan(11, 10, 4);
        assert_eq!(p.workers, 1);
        assert_eq!(p.chunk_size, 11);
        assert_eq!(p.remainder(), 0);
    }

    #[test]
    fn test_partitions_cover_batch_exactly_once() {
        for min in [1, 3, 10] {
            for max in [1, 4, 7] {
                for n in 0..200 {
                    let p = plan(n, min, max);
                    assert!(p.workers <= max);

                    let mut seen = HashSet::new();
                    for range in p.worker_ranges() {
                        assert_eq!(range.len(), p.chunk_size);
                        for i in range {
                            assert!(seen.insert(i), "duplicate {} for n={}", i, n);
                        }
                    }
                    for i in p.remainder_range() {
                        assert!(seen.insert(i), "duplicate {} for n={}", i, n);
                    }
                    assert_eq!(seen.len(), n, "omission for n={} min={} max={}", n, min, max);
                }
            }
        }
    }

    #[test]
    fn test_split_moves_items() {
        let items: Vec<usize> = (0..50).collect();
        let (chunks, remainder) = plan(50, 10, 4).split(items);
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks[0], (0..12).collect::<Vec<_>>());
        assert_eq!(chunks[3], (36..48).collect::<Vec<_>>());
        assert_eq!(remainder, vec![48, 49]);
    }
}
