// Mon Feb 2 2026 - Alex

use crate::error::HarnessError;
use crate::store::RecordStore;

/// Contiguous slice of a sequentially-iterated collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    pub start: u64,
    pub count: u64,
}

impl Partition {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Ceiling division chunk size shared by every worker.
pub fn chunk_size(total_count: u64, worker_count: u32) -> u64 {
    let workers = worker_count.max(1) as u64;
    (total_count + workers - 1) / workers
}

/// Plan contiguous, non-overlapping partitions covering `[0, total_count)`.
///
/// Worker w covers `[w*chunk, min((w+1)*chunk, total))` with
/// `chunk = ceil(total/workers)`. When there are more workers than records,
/// the tail partitions are valid zero-work results, not errors.
pub fn plan_partitions(total_count: u64, worker_count: u32) -> Vec<Partition> {
    let chunk = chunk_size(total_count, worker_count);
    (0..worker_count.max(1) as u64)
        .map(|w| {
            let start = (w * chunk).min(total_count);
            let end = ((w + 1) * chunk).min(total_count);
            Partition {
                start,
                count: end - start,
            }
        })
        .collect()
}

/// Realize a start offset on a forward-only store by sequencing and
/// discarding `n` records. O(total) by design; the stores only iterate
/// forward. Running off the end is tolerated (too few records for this
/// many workers leaves the cursor wrapped and the caller's loop idle).
pub fn advance(store: &mut dyn RecordStore, n: u64) -> Result<(), HarnessError> {
    for _ in 0..n {
        if store.sequence_key()?.is_none() {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FileRecordStore;
    use tempfile::TempDir;

    #[test]
    fn test_partitions_cover_range_exactly() {
        for total in [0u64, 1, 2, 7, 10, 100, 101] {
            for workers in [1u32, 2, 3, 7, 16] {
                let partitions = plan_partitions(total, workers);
                assert_eq!(partitions.len(), workers as usize);

                let mut expected = 0;
                for partition in &partitions {
                    assert_eq!(partition.start, expected);
                    expected += partition.count;
                }
                assert_eq!(expected, total, "total {} workers {}", total, workers);
            }
        }
    }

    #[test]
    fn test_more_workers_than_records_yields_empty_partitions() {
        let partitions = plan_partitions(3, 5);
        assert_eq!(partitions.iter().filter(|p| !p.is_empty()).count(), 3);
        assert_eq!(partitions.iter().filter(|p| p.is_empty()).count(), 2);
    }

    #[test]
    fn test_chunk_size_is_ceiling() {
        assert_eq!(chunk_size(10, 3), 4);
        assert_eq!(chunk_size(9, 3), 3);
        assert_eq!(chunk_size(0, 4), 0);
    }

    #[test]
    fn test_advance_discards_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rs");
        let mut store = FileRecordStore::create(&path).unwrap();
        for key in ["a", "b", "c", "d"] {
            store.insert(key, key.as_bytes()).unwrap();
        }

        let mut store = FileRecordStore::open(&path).unwrap();
        advance(&mut store, 2).unwrap();
        assert_eq!(store.sequence_key().unwrap().unwrap(), "c");

        // Advancing past the end is not an error
        let mut store = FileRecordStore::open(&path).unwrap();
        advance(&mut store, 10).unwrap();
    }
}
