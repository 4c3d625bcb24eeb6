// ============================================================
// Layer 4 — Dataset Loader
// ============================================================
// Loads an already-ingested dataset from a JSON file.
//
// Upload, storage and CSV parsing belong to the ingestion
// service; by the time a dataset reaches the engine it is a
// plain JSON document:
//
//   {
//     "records": [
//       { "features": [0.1, 0.4, ...], "label": 2 },
//       ...
//     ]
//   }
//
// The file path doubles as the dataset reference stored in the
// registry manifest, so `unlearn` and `verify` reload exactly
// the data that `train` saw.

use std::{fs, path::PathBuf};

use crate::domain::error::{EngineError, EngineResult};
use crate::domain::record::Dataset;
use crate::domain::traits::DatasetSource;

/// Loads a `Dataset` from a JSON file.
/// Implements the DatasetSource trait from Layer 3.
pub struct JsonDatasetLoader {
    path: PathBuf,
}

impl JsonDatasetLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DatasetSource for JsonDatasetLoader {
    fn load(&self) -> EngineResult<Dataset> {
        let json = fs::read_to_string(&self.path).map_err(|e| {
            EngineError::Storage(format!("cannot read dataset '{}': {e}", self.path.display()))
        })?;

        // Deserialising through Dataset's serde impl skips the width
        // check, so rebuild through the validating constructor.
        let raw: Dataset = serde_json::from_str(&json).map_err(|e| {
            EngineError::Validation(format!("dataset '{}' is malformed: {e}", self.path.display()))
        })?;
        let dataset = Dataset::new(raw.records().to_vec())?;

        tracing::info!(
            "Loaded {} records ({} features, {} classes) from '{}'",
            dataset.len(),
            dataset.feature_dim(),
            dataset.num_classes(),
            self.path.display()
        );
        Ok(dataset)
    }

    fn reference(&self) -> String {
        self.path.display().to_string()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_load_json_dataset() {
        let dir  = tempdir().unwrap();
        let path = dir.path().join("data.json");
        fs::write(
            &path,
            r#"{"records":[{"features":[0.0,1.0],"label":0},{"features":[1.0,0.0],"label":1}]}"#,
        )
        .unwrap();

        let ds = JsonDatasetLoader::new(&path).load().unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.num_classes(), 2);
    }

    #[test]
    fn test_ragged_json_rejected() {
        let dir  = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(
            &path,
            r#"{"records":[{"features":[0.0,1.0],"label":0},{"features":[1.0],"label":1}]}"#,
        )
        .unwrap();
        assert!(JsonDatasetLoader::new(&path).load().is_err());
    }

    #[test]
    fn test_missing_file_is_storage_error() {
        let err = JsonDatasetLoader::new("/nonexistent/data.json").load().unwrap_err();
        assert!(matches!(err, EngineError::Storage(_)));
    }
}
