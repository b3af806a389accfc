//! Snapshot manifests: ordered path → fingerprint mappings
//!
//! A manifest is the durable record of one run's snapshot. It lists every
//! captured file with its fingerprint, size, and mode, and is the only
//! source garbage collection consults when computing blob liveness. The
//! wire format is stable JSON at `manifests/<run_id>.json`:
//!
//! ```json
//! {
//!   "files": [ { "path": "src/train.py", "fingerprint": "…64 hex…",
//!                "size": 1824, "mode": 420 } ],
//!   "created_at": 1756150461.25,
//!   "run_id": "exp-0042"
//! }
//! ```
//!
//! Entries are kept sorted by path so identical file sets serialize to an
//! identical `files` array. Manifests are written atomically (temp file,
//! fsync, rename) and are read-only once persisted: every fingerprint they
//! list must already be committed to the blob store at persist time, so a
//! manifest is never the sole witness of a blob mid-write.

use crate::blob_store::BlobStore;
use crate::error::{Result, StoreError};
use crate::hasher::is_valid_fingerprint;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::NamedTempFile;
use tracing::debug;

/// One captured file within a manifest
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Path relative to the snapshot root, forward slashes on all platforms
    pub path: String,
    /// SHA-256 fingerprint of the file content
    pub fingerprint: String,
    /// File size in bytes
    pub size: u64,
    /// Unix permission bits at snapshot time
    pub mode: u32,
}

/// Durable record mapping logical paths to blob fingerprints for one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Captured files, sorted by path
    pub files: Vec<ManifestEntry>,
    /// Creation time as fractional epoch seconds
    pub created_at: f64,
    /// Identifier of the run that authored this snapshot
    pub run_id: String,
}

impl Manifest {
    /// Build an in-memory manifest, sorting entries into canonical order
    pub fn new(run_id: impl Into<String>, mut files: Vec<ManifestEntry>) -> Self {
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Self {
            files,
            created_at: epoch_now(),
            run_id: run_id.into(),
        }
    }

    /// Number of files recorded
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Sum of recorded file sizes in bytes
    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|e| e.size).sum()
    }

    /// Distinct fingerprints referenced by this manifest
    pub fn fingerprints(&self) -> HashSet<&str> {
        self.files.iter().map(|e| e.fingerprint.as_str()).collect()
    }

    /// Path of the manifest file for a run inside a manifest directory
    pub fn path_for_run(manifest_dir: &Path, run_id: &str) -> PathBuf {
        manifest_dir.join(format!("{}.json", run_id))
    }

    /// Durably write this manifest into `manifest_dir`
    ///
    /// Serializes to a temp file in the same directory, fsyncs it, and
    /// renames into place, so a manifest is never observable half-written.
    pub fn persist(&self, manifest_dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(manifest_dir)?;
        let dest = Self::path_for_run(manifest_dir, &self.run_id);

        let mut tmp = NamedTempFile::new_in(manifest_dir)?;
        serde_json::to_writer(tmp.as_file_mut(), self)?;
        tmp.as_file_mut().write_all(b"\n")?;
        tmp.as_file().sync_all()?;
        tmp.persist(&dest).map_err(|e| e.error)?;

        debug!(
            "persisted manifest for run {} ({} files, {} bytes)",
            self.run_id,
            self.file_count(),
            self.total_bytes()
        );
        Ok(dest)
    }

    /// Load and structurally validate a manifest file
    ///
    /// Catches disk corruption early rather than deep in a restore:
    /// unparsable JSON, malformed fingerprints, and unsafe entry paths
    /// (absolute, empty, or containing `..`) all fail with
    /// [`StoreError::ManifestCorrupt`].
    pub fn load(path: &Path) -> Result<Manifest> {
        let text = fs::read_to_string(path)?;
        let manifest: Manifest = serde_json::from_str(&text)
            .map_err(|e| StoreError::manifest_corrupt(path, format!("unparsable JSON: {}", e)))?;

        for entry in &manifest.files {
            if !is_valid_fingerprint(&entry.fingerprint) {
                return Err(StoreError::manifest_corrupt(
                    path,
                    format!("malformed fingerprint for {:?}", entry.path),
                ));
            }
            if !is_safe_relative_path(&entry.path) {
                return Err(StoreError::manifest_corrupt(
                    path,
                    format!("unsafe entry path {:?}", entry.path),
                ));
            }
        }

        Ok(manifest)
    }

    /// Verify recorded sizes against the blob store
    ///
    /// For every entry whose blob is present, a fresh stat of the blob
    /// must report exactly the recorded size; a mismatch means either the
    /// manifest or the blob is corrupt. Missing blobs are not an error
    /// here, restore reports those as data.
    pub fn verify(&self, blobs: &BlobStore) -> Result<()> {
        for entry in &self.files {
            if !blobs.exists(&entry.fingerprint) {
                continue;
            }
            let actual = blobs.blob_size(&entry.fingerprint)?;
            if actual != entry.size {
                return Err(StoreError::manifest_corrupt(
                    format!("{}.json", self.run_id),
                    format!(
                        "size mismatch for {:?}: manifest says {}, blob is {}",
                        entry.path, entry.size, actual
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// Current time as fractional seconds since the Unix epoch
pub(crate) fn epoch_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Reject entry paths that could escape the restore target
fn is_safe_relative_path(path: &str) -> bool {
    if path.is_empty() {
        return false;
    }
    let p = Path::new(path);
    !p.is_absolute()
        && p.components()
            .all(|c| matches!(c, Component::Normal(_)))
}
