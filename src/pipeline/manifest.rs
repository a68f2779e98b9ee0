//! Run manifests: the persisted record of per-block completion.
//!
//! A manifest is keyed by the run fingerprint (domain + block shape + halo +
//! operator pipeline), appended to on every block success, and read back at
//! startup so an interrupted run resumes where it left off. A manifest whose
//! fingerprint does not match the current configuration is ignored rather
//! than resumed, since mixing block layouts would silently corrupt the output.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::core::{RunFingerprint, SegResult};

/// Per-run record of which blocks completed and which ultimately failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    fingerprint: RunFingerprint,
    completed: BTreeSet<usize>,
    failed: BTreeMap<usize, String>,
}

impl RunManifest {
    /// Creates an empty manifest for a run configuration.
    pub fn new(fingerprint: RunFingerprint) -> Self {
        Self {
            fingerprint,
            completed: BTreeSet::new(),
            failed: BTreeMap::new(),
        }
    }

    /// The fingerprint of the configuration this manifest belongs to.
    pub fn fingerprint(&self) -> &RunFingerprint {
        &self.fingerprint
    }

    /// Whether this manifest was produced by the given configuration.
    pub fn matches(&self, fingerprint: &RunFingerprint) -> bool {
        &self.fingerprint == fingerprint
    }

    /// Whether a block already completed successfully.
    pub fn is_completed(&self, block: usize) -> bool {
        self.completed.contains(&block)
    }

    /// Records a successful block; clears any earlier failure record.
    pub fn record_completed(&mut self, block: usize) {
        self.completed.insert(block);
        self.failed.remove(&block);
    }

    /// Records a block that failed after exhausting retries.
    pub fn record_failed(&mut self, block: usize, reason: impl Into<String>) {
        self.failed.insert(block, reason.into());
    }

    /// Number of completed blocks.
    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    /// Failed blocks with their final error messages.
    pub fn failed(&self) -> &BTreeMap<usize, String> {
        &self.failed
    }
}

/// Persistence for run manifests, keyed by fingerprint.
pub trait ManifestStore: Send + Sync {
    /// Loads the manifest for a fingerprint, or None when no run was
    /// recorded.
    fn load(&self, fingerprint: &RunFingerprint) -> SegResult<Option<RunManifest>>;

    /// Persists the manifest under its own fingerprint.
    fn save(&self, manifest: &RunManifest) -> SegResult<()>;
}

/// Manifest store backed by a directory of JSON files.
#[derive(Debug)]
pub struct FileManifestStore {
    dir: PathBuf,
}

impl FileManifestStore {
    /// Creates the store, creating the directory if needed.
    pub fn new(dir: impl AsRef<Path>) -> SegResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, fingerprint: &RunFingerprint) -> PathBuf {
        self.dir.join(format!("{fingerprint}.manifest.json"))
    }
}

impl ManifestStore for FileManifestStore {
    fn load(&self, fingerprint: &RunFingerprint) -> SegResult<Option<RunManifest>> {
        let path = self.path_for(fingerprint);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let manifest = serde_json::from_slice(&bytes)?;
        Ok(Some(manifest))
    }

    fn save(&self, manifest: &RunManifest) -> SegResult<()> {
        let path = self.path_for(manifest.fingerprint());
        let bytes = serde_json::to_vec(manifest)?;
        // write-then-rename so a crash mid-save never truncates the record
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// In-memory manifest store for tests and single-process runs.
#[derive(Debug, Default)]
pub struct MemoryManifestStore {
    data: Mutex<HashMap<String, RunManifest>>,
}

impl MemoryManifestStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ManifestStore for MemoryManifestStore {
    fn load(&self, fingerprint: &RunFingerprint) -> SegResult<Option<RunManifest>> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .get(fingerprint.as_str())
            .cloned())
    }

    fn save(&self, manifest: &RunManifest) -> SegResult<()> {
        self.data
            .lock()
            .unwrap()
            .insert(manifest.fingerprint().as_str().to_string(), manifest.clone());
        Ok(())
    }
}
