// ============================================================
// Layer 4 — Retain Sampler
// ============================================================
// Draws the per-step retain sample used by the unlearning
// engine: a random subset (without replacement) of the shard's
// non-forgotten records.
//
// Why sample instead of using the whole retain set?
//   The retain term only has to anchor the model on data it
//   should keep; a bounded sample keeps each optimisation step
//   the same cost no matter how large the shard is.
//
// The RNG is passed in so the engine can seed it per pass and
// make runs reproducible.
//
// Reference: rand crate documentation (SliceRandom)

use rand::{seq::SliceRandom, Rng};

/// Pick up to `sample_size` items from `pool` without replacement.
/// Returns the whole pool (in random order) when it is smaller.
pub fn sample_without_replacement<T: Copy, R: Rng + ?Sized>(
    pool:        &[T],
    sample_size: usize,
    rng:         &mut R,
) -> Vec<T> {
    pool.choose_multiple(rng, sample_size.min(pool.len()))
        .copied()
        .collect()
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use std::collections::HashSet;

    #[test]
    fn test_sample_size_capped_by_pool() {
        let mut rng = StdRng::seed_from_u64(1);
        let pool: Vec<usize> = (0..5).collect();
        assert_eq!(sample_without_replacement(&pool, 32, &mut rng).len(), 5);
    }

    #[test]
    fn test_no_duplicates() {
        let mut rng = StdRng::seed_from_u64(2);
        let pool: Vec<usize> = (0..100).collect();
        let s = sample_without_replacement(&pool, 40, &mut rng);
        let unique: HashSet<_> = s.iter().collect();
        assert_eq!(s.len(), 40);
        assert_eq!(unique.len(), 40);
    }

    #[test]
    fn test_empty_pool() {
        let mut rng = StdRng::seed_from_u64(3);
        let pool: Vec<usize> = Vec::new();
        assert!(sample_without_replacement(&pool, 8, &mut rng).is_empty());
    }
}
