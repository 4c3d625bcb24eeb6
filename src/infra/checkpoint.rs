// ============================================================
// Layer 6 — Checkpoint Stores
// ============================================================
// Two implementations of the CheckpointStore trait:
//
//   FileCheckpointStore   — durable, used by the CLI
//   MemoryCheckpointStore — in-process, used by tests
//
// File layout of the durable store:
//   <root>/
//     manifest.json                  ← shard count, model spec, dataset ref
//     shard_0/
//       v1.bin   v1.json             ← parameter blob + metadata
//       v2.bin   v2.json
//       current.json                 ← current-version pointer
//     verifications/
//       shard_0.jsonl                ← one VerificationResult per line
//
// Every file is written to a temporary name and renamed into
// place, so a crash mid-write never leaves a truncated
// checkpoint or pointer behind. A version's metadata file is
// written after its blob: a version "exists" once its .json
// does.
//
// Reference: Burn Book §5 (Records and Checkpointing)
//            Rust Book §12 (I/O and File Handling)

use std::{
    collections::{BTreeMap, HashMap},
    fs::{self, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use parking_lot::Mutex;

use crate::domain::checkpoint::{CheckpointMeta, Version};
use crate::domain::error::{EngineError, EngineResult};
use crate::domain::request::VerificationResult;
use crate::domain::shard::ShardId;
use crate::domain::traits::CheckpointStore;

// ─── FileCheckpointStore ──────────────────────────────────────────────────────

/// Durable checkpoint store rooted at a directory.
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> EngineResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            EngineError::Storage(format!("cannot create store '{}': {e}", root.display()))
        })?;
        Ok(Self { root })
    }

    fn shard_dir(&self, shard: ShardId) -> PathBuf {
        self.root.join(format!("shard_{shard}"))
    }

    fn meta_path(&self, shard: ShardId, version: Version) -> PathBuf {
        self.shard_dir(shard).join(format!("v{version}.json"))
    }

    fn params_path(&self, shard: ShardId, version: Version) -> PathBuf {
        self.shard_dir(shard).join(format!("v{version}.bin"))
    }

    fn verification_path(&self, shard: ShardId) -> PathBuf {
        self.root.join("verifications").join(format!("shard_{shard}.jsonl"))
    }

    /// Write `bytes` to `path` via a temp file + rename.
    fn write_atomic(path: &Path, bytes: &[u8]) -> EngineResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes).map_err(|e| {
            EngineError::Storage(format!("cannot write '{}': {e}", tmp.display()))
        })?;
        fs::rename(&tmp, path).map_err(|e| {
            EngineError::Storage(format!("cannot move '{}' into place: {e}", path.display()))
        })?;
        Ok(())
    }

    fn read_optional(path: &Path) -> EngineResult<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngineError::Storage(format!(
                "cannot read '{}': {e}",
                path.display()
            ))),
        }
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn write_manifest(&self, manifest: &[u8]) -> EngineResult<()> {
        Self::write_atomic(&self.root.join("manifest.json"), manifest)
    }

    fn read_manifest(&self) -> EngineResult<Option<Vec<u8>>> {
        Self::read_optional(&self.root.join("manifest.json"))
    }

    fn write_checkpoint(&self, meta: &CheckpointMeta, params: &[u8]) -> EngineResult<()> {
        let meta_path = self.meta_path(meta.shard_id, meta.version);
        if meta_path.exists() {
            return Err(EngineError::Storage(format!(
                "checkpoint v{} of shard {} already exists",
                meta.version, meta.shard_id
            )));
        }
        Self::write_atomic(&self.params_path(meta.shard_id, meta.version), params)?;
        Self::write_atomic(&meta_path, &serde_json::to_vec_pretty(meta)?)?;
        tracing::debug!(
            "Wrote checkpoint shard={} v{} ({} bytes)",
            meta.shard_id, meta.version, params.len()
        );
        Ok(())
    }

    fn read_meta(&self, shard: ShardId, version: Version) -> EngineResult<Option<CheckpointMeta>> {
        Self::read_optional(&self.meta_path(shard, version))?
            .map(|bytes| serde_json::from_slice(&bytes).map_err(EngineError::from))
            .transpose()
    }

    fn read_params(&self, shard: ShardId, version: Version) -> EngineResult<Option<Vec<u8>>> {
        // A blob without its metadata is an interrupted write, not a version.
        if !self.meta_path(shard, version).exists() {
            return Ok(None);
        }
        Self::read_optional(&self.params_path(shard, version))
    }

    fn versions(&self, shard: ShardId) -> EngineResult<Vec<Version>> {
        let dir = self.shard_dir(shard);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut versions: Vec<Version> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().into_string().ok()?;
                name.strip_prefix('v')?.strip_suffix(".json")?.parse().ok()
            })
            .collect();
        versions.sort_unstable();
        Ok(versions)
    }

    fn current_version(&self, shard: ShardId) -> EngineResult<Option<Version>> {
        Self::read_optional(&self.shard_dir(shard).join("current.json"))?
            .map(|bytes| serde_json::from_slice(&bytes).map_err(EngineError::from))
            .transpose()
    }

    fn set_current_version(&self, shard: ShardId, version: Version) -> EngineResult<()> {
        if !self.meta_path(shard, version).exists() {
            return Err(EngineError::NotFound { shard, version });
        }
        Self::write_atomic(
            &self.shard_dir(shard).join("current.json"),
            serde_json::to_string(&version)?.as_bytes(),
        )
    }

    fn append_verification(&self, result: &VerificationResult) -> EngineResult<()> {
        let path = self.verification_path(result.shard_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Open in append mode — one JSON document per line
        let mut f = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(f, "{}", serde_json::to_string(result)?)?;
        Ok(())
    }

    fn verifications(&self, shard: ShardId) -> EngineResult<Vec<VerificationResult>> {
        let Some(bytes) = Self::read_optional(&self.verification_path(shard))? else {
            return Ok(Vec::new());
        };
        String::from_utf8_lossy(&bytes)
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(EngineError::from))
            .collect()
    }
}

// ─── MemoryCheckpointStore ────────────────────────────────────────────────────

#[derive(Default)]
struct MemoryState {
    manifest:      Option<Vec<u8>>,
    checkpoints:   HashMap<ShardId, BTreeMap<Version, (CheckpointMeta, Vec<u8>)>>,
    current:       HashMap<ShardId, Version>,
    verifications: HashMap<ShardId, Vec<VerificationResult>>,
    fail_writes:   bool,
}

/// In-process store. `fail_writes(true)` makes every checkpoint write
/// fail, which lets tests exercise the storage-error path.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    state: Mutex<MemoryState>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn write_manifest(&self, manifest: &[u8]) -> EngineResult<()> {
        self.state.lock().manifest = Some(manifest.to_vec());
        Ok(())
    }

    fn read_manifest(&self) -> EngineResult<Option<Vec<u8>>> {
        Ok(self.state.lock().manifest.clone())
    }

    fn write_checkpoint(&self, meta: &CheckpointMeta, params: &[u8]) -> EngineResult<()> {
        let mut state = self.state.lock();
        if state.fail_writes {
            return Err(EngineError::Storage("injected write failure".to_string()));
        }
        let versions = state.checkpoints.entry(meta.shard_id).or_default();
        if versions.contains_key(&meta.version) {
            return Err(EngineError::Storage(format!(
                "checkpoint v{} of shard {} already exists",
                meta.version, meta.shard_id
            )));
        }
        versions.insert(meta.version, (meta.clone(), params.to_vec()));
        Ok(())
    }

    fn read_meta(&self, shard: ShardId, version: Version) -> EngineResult<Option<CheckpointMeta>> {
        Ok(self
            .state
            .lock()
            .checkpoints
            .get(&shard)
            .and_then(|v| v.get(&version))
            .map(|(meta, _)| meta.clone()))
    }

    fn read_params(&self, shard: ShardId, version: Version) -> EngineResult<Option<Vec<u8>>> {
        Ok(self
            .state
            .lock()
            .checkpoints
            .get(&shard)
            .and_then(|v| v.get(&version))
            .map(|(_, params)| params.clone()))
    }

    fn versions(&self, shard: ShardId) -> EngineResult<Vec<Version>> {
        Ok(self
            .state
            .lock()
            .checkpoints
            .get(&shard)
            .map(|v| v.keys().copied().collect())
            .unwrap_or_default())
    }

    fn current_version(&self, shard: ShardId) -> EngineResult<Option<Version>> {
        Ok(self.state.lock().current.get(&shard).copied())
    }

    fn set_current_version(&self, shard: ShardId, version: Version) -> EngineResult<()> {
        let mut state = self.state.lock();
        let exists = state
            .checkpoints
            .get(&shard)
            .is_some_and(|v| v.contains_key(&version));
        if !exists {
            return Err(EngineError::NotFound { shard, version });
        }
        state.current.insert(shard, version);
        Ok(())
    }

    fn append_verification(&self, result: &VerificationResult) -> EngineResult<()> {
        self.state
            .lock()
            .verifications
            .entry(result.shard_id)
            .or_default()
            .push(result.clone());
        Ok(())
    }

    fn verifications(&self, shard: ShardId) -> EngineResult<Vec<VerificationResult>> {
        Ok(self.state.lock().verifications.get(&shard).cloned().unwrap_or_default())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::checkpoint::CheckpointDraft;
    use tempfile::tempdir;

    fn meta(shard: ShardId, version: Version) -> CheckpointMeta {
        CheckpointDraft::trained(5).into_meta(shard, version)
    }

    fn exercise_store(store: &dyn CheckpointStore) {
        assert_eq!(store.current_version(0).unwrap(), None);
        store.write_checkpoint(&meta(0, 1), b"one").unwrap();
        store.write_checkpoint(&meta(0, 2), b"two").unwrap();

        // Never overwrite an existing version
        assert!(store.write_checkpoint(&meta(0, 1), b"again").is_err());
        assert_eq!(store.read_params(0, 1).unwrap().unwrap(), b"one");

        assert_eq!(store.versions(0).unwrap(), vec![1, 2]);
        assert!(store.versions(1).unwrap().is_empty());

        store.set_current_version(0, 2).unwrap();
        assert_eq!(store.current_version(0).unwrap(), Some(2));
        assert!(matches!(
            store.set_current_version(0, 9),
            Err(EngineError::NotFound { shard: 0, version: 9 })
        ));
        assert_eq!(store.current_version(0).unwrap(), Some(2));
        assert_eq!(store.read_meta(0, 1).unwrap().unwrap().training_epochs, 5);
    }

    #[test]
    fn test_memory_store_contract() {
        exercise_store(&MemoryCheckpointStore::new());
    }

    #[test]
    fn test_file_store_contract() {
        let dir = tempdir().unwrap();
        exercise_store(&FileCheckpointStore::open(dir.path()).unwrap());
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = FileCheckpointStore::open(dir.path()).unwrap();
            store.write_manifest(b"{}").unwrap();
            store.write_checkpoint(&meta(3, 1), b"blob").unwrap();
            store.set_current_version(3, 1).unwrap();
        }
        let store = FileCheckpointStore::open(dir.path()).unwrap();
        assert_eq!(store.read_manifest().unwrap().unwrap(), b"{}");
        assert_eq!(store.current_version(3).unwrap(), Some(1));
        assert_eq!(store.read_params(3, 1).unwrap().unwrap(), b"blob");
    }

    #[test]
    fn test_injected_write_failure() {
        let store = MemoryCheckpointStore::new();
        store.fail_writes(true);
        assert!(matches!(
            store.write_checkpoint(&meta(0, 1), b"x"),
            Err(EngineError::Storage(_))
        ));
        assert!(store.versions(0).unwrap().is_empty());
    }
}
