// ============================================================
// Layer 4 — Synthetic Dataset Generator
// ============================================================
// Produces a labelled dataset of Gaussian blobs for demos and
// tests: each class has a random centre in feature space and
// records are drawn around it with a fixed spread.
//
// The generator is seeded, so the same (n, dim, classes, seed)
// always yields the same dataset. That is what lets the CLI
// store "synthetic:<params>" as a dataset reference and reload
// identical records for unlearning and verification later.

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::domain::error::{EngineError, EngineResult};
use crate::domain::record::{Dataset, Record};
use crate::domain::traits::DatasetSource;

#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticDataset {
    pub num_records:  usize,
    pub feature_dim:  usize,
    pub num_classes:  usize,
    pub seed:         u64,

    /// Standard deviation of each blob around its centre
    pub spread:       f32,
}

impl SyntheticDataset {
    pub fn new(num_records: usize, feature_dim: usize, num_classes: usize, seed: u64) -> Self {
        Self { num_records, feature_dim, num_classes, seed, spread: 1.0 }
    }

    /// Parse a reference of the form `synthetic:<n>:<dim>:<classes>:<seed>`
    pub fn from_reference(reference: &str) -> Option<Self> {
        let rest = reference.strip_prefix("synthetic:")?;
        let parts: Vec<&str> = rest.split(':').collect();
        if parts.len() != 4 {
            return None;
        }
        Some(Self::new(
            parts[0].parse().ok()?,
            parts[1].parse().ok()?,
            parts[2].parse().ok()?,
            parts[3].parse().ok()?,
        ))
    }

    /// Box–Muller standard normal sample
    fn gaussian(rng: &mut StdRng) -> f32 {
        let u1: f32 = rng.gen_range(f32::EPSILON..1.0);
        let u2: f32 = rng.gen_range(0.0..1.0);
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f32::consts::PI * u2).cos()
    }
}

impl DatasetSource for SyntheticDataset {
    fn load(&self) -> EngineResult<Dataset> {
        if self.feature_dim == 0 || self.num_classes < 2 {
            return Err(EngineError::Validation(
                "synthetic dataset needs >= 1 feature and >= 2 classes".to_string(),
            ));
        }
        let mut rng = StdRng::seed_from_u64(self.seed);

        // Class centres spread well apart relative to the blob spread
        let centres: Vec<Vec<f32>> = (0..self.num_classes)
            .map(|_| (0..self.feature_dim).map(|_| rng.gen_range(-3.0..3.0)).collect())
            .collect();

        // Labels cycle so every contiguous shard sees every class
        let records = (0..self.num_records)
            .map(|i| {
                let label = i % self.num_classes;
                let features = centres[label]
                    .iter()
                    .map(|c| c + self.spread * Self::gaussian(&mut rng))
                    .collect();
                Record::new(features, label)
            })
            .collect();

        tracing::debug!(
            "Generated synthetic dataset: {} records, dim={}, classes={}, seed={}",
            self.num_records, self.feature_dim, self.num_classes, self.seed
        );
        Dataset::new(records)
    }

    fn reference(&self) -> String {
        format!(
            "synthetic:{}:{}:{}:{}",
            self.num_records, self.feature_dim, self.num_classes, self.seed
        )
    }
}
