// ============================================================
// Layer 6 — Metrics Logger
// ============================================================
// Appends per-epoch numbers of every training and unlearning
// pass to <storage_dir>/metrics.csv.
//
// One file for both kinds of pass; the `phase` column tells
// them apart and the columns that do not apply stay empty:
//
//   phase,shard_id,version,epoch,loss,accuracy,forget,retain,drift,total
//   train,0,1,1,0.693100,0.520000,,,,
//   unlearn,0,2,1,,,2.310000,0.410000,0.000012,-23.059000
//
// Reading the unlearning rows:
//   - `forget` should rise (ascent) or fall toward 0 (uniform KL)
//   - `retain` should stay near the trained loss
//   - `total` is the signed objective and always falls
//
// Reference: Rust Book §12 (I/O and File Handling)

use std::{
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use crate::domain::checkpoint::Version;
use crate::domain::error::EngineResult;
use crate::domain::request::{EpochLosses, TrainEpoch};
use crate::domain::shard::ShardId;

const HEADER: &str = "phase,shard_id,version,epoch,loss,accuracy,forget,retain,drift,total";

/// Appends epoch rows to a CSV file, creating it with a header.
pub struct MetricsLogger {
    csv_path: PathBuf,
}

impl MetricsLogger {
    pub fn new(dir: impl AsRef<Path>) -> EngineResult<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let csv_path = dir.join("metrics.csv");
        if !csv_path.exists() {
            let mut f = fs::File::create(&csv_path)?;
            writeln!(f, "{HEADER}")?;
            tracing::debug!("Created metrics CSV: '{}'", csv_path.display());
        }

        Ok(Self { csv_path })
    }

    pub fn log_training(&self, shard: ShardId, version: Version, epochs: &[TrainEpoch]) -> EngineResult<()> {
        let rows = epochs.iter().map(|e| {
            format!("train,{shard},{version},{},{:.6},{:.6},,,,", e.epoch, e.loss, e.accuracy)
        });
        self.append(rows)
    }

    pub fn log_unlearning(&self, shard: ShardId, version: Version, epochs: &[EpochLosses]) -> EngineResult<()> {
        let rows = epochs.iter().map(|e| {
            format!(
                "unlearn,{shard},{version},{},,,{:.6},{:.6},{:.6},{:.6}",
                e.epoch, e.forget, e.retain, e.drift, e.total
            )
        });
        self.append(rows)
    }

    fn append(&self, rows: impl Iterator<Item = String>) -> EngineResult<()> {
        let mut f = OpenOptions::new().append(true).open(&self.csv_path)?;
        let mut count = 0usize;
        for row in rows {
            writeln!(f, "{row}")?;
            count += 1;
        }
        tracing::debug!("Appended {} rows to '{}'", count, self.csv_path.display());
        Ok(())
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_rows_appended_under_single_header() {
        let dir = tempdir().unwrap();
        let logger = MetricsLogger::new(dir.path()).unwrap();
        logger
            .log_training(0, 1, &[TrainEpoch { epoch: 1, loss: 0.5, accuracy: 0.75 }])
            .unwrap();

        // Reopening must not write a second header
        let logger = MetricsLogger::new(dir.path()).unwrap();
        logger
            .log_unlearning(
                0,
                2,
                &[EpochLosses { epoch: 1, forget: 2.0, retain: 0.4, drift: 0.0, total: -19.96 }],
            )
            .unwrap();

        let text = fs::read_to_string(logger.csv_path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], HEADER);
        assert_eq!(lines[1], "train,0,1,1,0.500000,0.750000,,,,");
        assert!(lines[2].starts_with("unlearn,0,2,1,,,2.000000,"));
        assert_eq!(lines[2].split(',').count(), lines[0].split(',').count());
    }
}
