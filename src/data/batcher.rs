// ============================================================
// Layer 4 — Record Batcher
// ============================================================
// Converts a slice of borrowed Records into tensors.
//
// How batching works here:
//   Input:  N records, each with D features and one label
//   Output: RecordBatch with features [N, D] and labels [N]
//
//   We flatten all feature vectors into one long Vec, then
//   reshape: [r1_f1, ..., r1_fD, r2_f1, ..., rN_fD] → [N, D]
//
// Records are already width-checked by Dataset::new, so the
// reshape can never fail on ragged input.
//
// Reference: Burn Book §4 (Batcher)

use burn::prelude::*;

use crate::domain::record::Record;

// ─── RecordBatch ──────────────────────────────────────────────────────────────
/// A batch of records ready for a forward pass.
#[derive(Debug, Clone)]
pub struct RecordBatch<B: Backend> {
    /// Shape: [batch_size, feature_dim]
    pub features: Tensor<B, 2>,

    /// Shape: [batch_size], the true class index per record
    pub labels: Tensor<B, 1, Int>,

    /// Host copy of the labels, kept for probe statistics
    pub label_ids: Vec<usize>,
}

impl<B: Backend> RecordBatch<B> {
    pub fn len(&self) -> usize {
        self.label_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.label_ids.is_empty()
    }
}

// ─── RecordBatcher ────────────────────────────────────────────────────────────
/// Holds the target device so tensors are created in the right place.
#[derive(Clone, Debug)]
pub struct RecordBatcher<B: Backend> {
    pub device: B::Device,
}

impl<B: Backend> RecordBatcher<B> {
    pub fn new(device: B::Device) -> Self {
        Self { device }
    }

    /// Stack records into one batch. Returns None for an empty slice,
    /// since a zero-row tensor has no meaningful loss.
    pub fn batch(&self, records: &[&Record]) -> Option<RecordBatch<B>> {
        let first = records.first()?;
        let batch_size  = records.len();
        let feature_dim = first.features.len();

        let features_flat: Vec<f32> = records
            .iter()
            .flat_map(|r| r.features.iter().copied())
            .collect();

        let label_ids: Vec<usize> = records.iter().map(|r| r.label).collect();
        let labels_flat: Vec<i32> = label_ids.iter().map(|&l| l as i32).collect();

        let features = Tensor::<B, 1>::from_floats(features_flat.as_slice(), &self.device)
            .reshape([batch_size, feature_dim]);

        let labels = Tensor::<B, 1, Int>::from_ints(labels_flat.as_slice(), &self.device);

        Some(RecordBatch { features, labels, label_ids })
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn test_batch_shapes() {
        let records = vec![
            Record::new(vec![1.0, 2.0, 3.0], 0),
            Record::new(vec![4.0, 5.0, 6.0], 2),
        ];
        let refs: Vec<&Record> = records.iter().collect();
        let batcher = RecordBatcher::<NdArray>::new(Default::default());

        let batch = batcher.batch(&refs).unwrap();
        assert_eq!(batch.features.dims(), [2, 3]);
        assert_eq!(batch.labels.dims(), [2]);
        assert_eq!(batch.label_ids, vec![0, 2]);
    }

    #[test]
    fn test_empty_batch_is_none() {
        let batcher = RecordBatcher::<NdArray>::new(Default::default());
        assert!(batcher.batch(&[]).is_none());
    }
}
