// ============================================================
// Layer 3 — Shard Assignment
// ============================================================
// The deterministic mapping from record index to shard id.
//
// Partition rule (balanced contiguous ranges):
//   n records, N shards, q = n / N, r = n % N
//   shard k holds [k*q + min(k, r), (k+1)*q + min(k+1, r))
//
//   → the first r shards hold one extra record
//   → 100 records / 4 shards = 0..25, 25..50, 50..75, 75..100
//
// The assignment is a pure function of (n, N), so it never
// needs to be stored row-by-row: two numbers rebuild it.
// Every index in 0..n lands in exactly one shard. With fewer
// records than shards the trailing shards are empty.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::domain::error::{EngineError, EngineResult};

/// Shard identifier — shards are numbered `0..num_shards`
pub type ShardId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardAssignment {
    num_records: usize,
    num_shards:  usize,
}

impl ShardAssignment {
    /// Partition `num_records` rows into `num_shards` disjoint shards.
    pub fn partition(num_records: usize, num_shards: usize) -> EngineResult<Self> {
        if num_shards == 0 {
            return Err(EngineError::Validation(
                "num_shards must be >= 1".to_string(),
            ));
        }
        Ok(Self { num_records, num_shards })
    }

    pub fn num_records(&self) -> usize {
        self.num_records
    }

    pub fn num_shards(&self) -> usize {
        self.num_shards
    }

    fn boundary(&self, k: usize) -> usize {
        let q = self.num_records / self.num_shards;
        let r = self.num_records % self.num_shards;
        k * q + k.min(r)
    }

    /// Index range owned by `shard`
    pub fn range(&self, shard: ShardId) -> EngineResult<Range<usize>> {
        if shard >= self.num_shards {
            return Err(EngineError::UnknownShard { shard, num_shards: self.num_shards });
        }
        Ok(self.boundary(shard)..self.boundary(shard + 1))
    }

    /// All record indices of `shard`, ascending
    pub fn indices(&self, shard: ShardId) -> EngineResult<Vec<usize>> {
        Ok(self.range(shard)?.collect())
    }

    /// Which shard owns record `index`
    pub fn shard_of(&self, index: usize) -> Option<ShardId> {
        if index >= self.num_records {
            return None;
        }
        // First shard whose upper boundary is past the index.
        (0..self.num_shards).find(|&k| index < self.boundary(k + 1))
    }

    pub fn shard_sizes(&self) -> Vec<usize> {
        (0..self.num_shards)
            .map(|k| self.boundary(k + 1) - self.boundary(k))
            .collect()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_hundred_records_four_shards() {
        let a = ShardAssignment::partition(100, 4).unwrap();
        assert_eq!(a.range(0).unwrap(), 0..25);
        assert_eq!(a.range(2).unwrap(), 50..75);
        assert_eq!(a.shard_of(50), Some(2));
        assert_eq!(a.shard_of(24), Some(0));
        assert_eq!(a.shard_of(100), None);
    }

    #[test]
    fn test_uneven_split_front_loads_remainder() {
        let a = ShardAssignment::partition(10, 3).unwrap();
        assert_eq!(a.shard_sizes(), vec![4, 3, 3]);
    }

    #[test]
    fn test_fewer_records_than_shards_leaves_trailing_shards_empty() {
        let a = ShardAssignment::partition(3, 4).unwrap();
        assert_eq!(a.shard_sizes(), vec![1, 1, 1, 0]);
        assert_eq!(a.range(3).unwrap(), 3..3);
        assert!(a.indices(3).unwrap().is_empty());
        assert_eq!(a.shard_of(2), Some(2));
    }

    #[test]
    fn test_invalid_shard_counts() {
        assert!(ShardAssignment::partition(10, 0).is_err());
        let a = ShardAssignment::partition(10, 2).unwrap();
        assert!(matches!(a.range(2), Err(EngineError::UnknownShard { .. })));
    }

    proptest! {
        /// Property: every record lands in exactly one shard and the
        /// union of all shards is the full index space
        #[test]
        fn prop_partition_is_disjoint_and_covering(n in 0usize..500, shards in 1usize..32) {
            let a = ShardAssignment::partition(n, shards).unwrap();
            let mut seen = vec![0u32; n];
            for k in 0..shards {
                for i in a.indices(k).unwrap() {
                    seen[i] += 1;
                    prop_assert_eq!(a.shard_of(i), Some(k));
                }
            }
            prop_assert!(seen.iter().all(|&c| c == 1));
            prop_assert_eq!(a.shard_sizes().iter().sum::<usize>(), n);
        }

        /// Property: partition is deterministic in (n, shards)
        #[test]
        fn prop_partition_deterministic(n in 0usize..500, shards in 1usize..32) {
            let a = ShardAssignment::partition(n, shards).unwrap();
            let b = ShardAssignment::partition(n, shards).unwrap();
            prop_assert_eq!(a.shard_sizes(), b.shard_sizes());
        }
    }
}
