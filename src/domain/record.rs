// ============================================================
// Layer 3 — Record and Dataset Domain Types
// ============================================================
// A Record is one training example: a dense feature vector
// and an integer class label. A Dataset is an ordered,
// immutable sequence of records — the position of a record
// in the dataset is its global index, and every other part of
// the engine (shard assignment, forget requests, probes)
// addresses records by that index.

use serde::{Deserialize, Serialize};

use crate::domain::error::{EngineError, EngineResult};

/// One labelled example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Dense input features
    pub features: Vec<f32>,

    /// Class index in `0..num_classes`
    pub label: usize,
}

impl Record {
    pub fn new(features: Vec<f32>, label: usize) -> Self {
        Self { features, label }
    }
}

/// Ordered, immutable collection of records.
///
/// Construction validates that every record has the same feature
/// width, so batching never has to re-check shapes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    records: Vec<Record>,
}

impl Dataset {
    /// Build a dataset, rejecting ragged feature vectors.
    pub fn new(records: Vec<Record>) -> EngineResult<Self> {
        if let Some(first) = records.first() {
            let width = first.features.len();
            if width == 0 {
                return Err(EngineError::Validation(
                    "records must have at least one feature".to_string(),
                ));
            }
            if let Some((i, r)) = records
                .iter()
                .enumerate()
                .find(|(_, r)| r.features.len() != width)
            {
                return Err(EngineError::Validation(format!(
                    "record {i} has {} features, expected {width}",
                    r.features.len()
                )));
            }
        }
        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Record> {
        self.records.get(index)
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Feature width shared by all records (0 for an empty dataset)
    pub fn feature_dim(&self) -> usize {
        self.records.first().map(|r| r.features.len()).unwrap_or(0)
    }

    /// Number of classes implied by the largest label
    pub fn num_classes(&self) -> usize {
        self.records.iter().map(|r| r.label + 1).max().unwrap_or(0)
    }

    /// Borrow the records at `indices`, failing on the first index
    /// that is past the end of the dataset.
    pub fn select(&self, indices: &[usize]) -> EngineResult<Vec<&Record>> {
        let out_of_range: Vec<usize> = indices
            .iter()
            .copied()
            .filter(|&i| i >= self.records.len())
            .collect();
        if !out_of_range.is_empty() {
            return Err(EngineError::Validation(format!(
                "indices {out_of_range:?} are outside the dataset (len {})",
                self.records.len()
            )));
        }
        Ok(indices.iter().map(|&i| &self.records[i]).collect())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ragged_records_rejected() {
        let records = vec![
            Record::new(vec![0.0, 1.0], 0),
            Record::new(vec![0.0], 1),
        ];
        assert!(matches!(Dataset::new(records), Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_num_classes_from_labels() {
        let ds = Dataset::new(vec![
            Record::new(vec![0.0], 0),
            Record::new(vec![1.0], 2),
        ])
        .unwrap();
        assert_eq!(ds.num_classes(), 3);
        assert_eq!(ds.feature_dim(), 1);
    }

    #[test]
    fn test_select_out_of_range() {
        let ds = Dataset::new(vec![Record::new(vec![0.0], 0)]).unwrap();
        assert!(ds.select(&[0]).is_ok());
        assert!(ds.select(&[0, 3]).is_err());
    }
}
