//! Top-level store handle tying the engines together
//!
//! [`AssetStore`] owns a storage root with the canonical layout:
//!
//! ```text
//! <root>/
//! ├── blobs/          # content-addressed payload, sharded by prefix
//! ├── manifests/      # <run_id>.json snapshot records
//! ├── runs/           # <run_id>/assets.json lineage records
//! └── gc.lock         # cross-process collection lock
//! ```
//!
//! Construction goes through [`AssetStoreBuilder`] for anything beyond
//! the defaults (snapshot caps, ignore file name, orphan-sweep age).

use crate::blob_store::{BlobStore, BlobStoreStats};
use crate::error::{Result, StoreError};
use crate::gc::{GarbageCollector, OrphanSweep, RunDeletion, DEFAULT_MIN_ORPHAN_AGE};
use crate::ignore::{IgnoreMatcher, DEFAULT_IGNORE_FILE};
use crate::manifest::Manifest;
use crate::restore::{RestoreEngine, RestoreReport};
use crate::run_assets::{run_assets_path, RunAssets};
use crate::snapshot::{SnapshotEngine, SnapshotLimits, ZipExport};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Aggregate view of a store for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    /// Number of blobs on disk
    pub blob_count: usize,
    /// Sum of blob sizes in bytes
    pub total_bytes: u64,
    /// Number of run manifests
    pub manifest_count: usize,
}

/// Configures and opens an [`AssetStore`]
#[derive(Debug, Clone)]
pub struct AssetStoreBuilder {
    root: PathBuf,
    limits: SnapshotLimits,
    ignore_file: String,
    min_orphan_age: Duration,
}

impl AssetStoreBuilder {
    /// Start building a store rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            limits: SnapshotLimits::default(),
            ignore_file: DEFAULT_IGNORE_FILE.to_string(),
            min_orphan_age: DEFAULT_MIN_ORPHAN_AGE,
        }
    }

    /// Snapshot size caps
    pub fn limits(mut self, limits: SnapshotLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Name of the per-workspace ignore file
    pub fn ignore_file(mut self, name: impl Into<String>) -> Self {
        self.ignore_file = name.into();
        self
    }

    /// Minimum age before the orphan sweep may delete an unreferenced blob
    pub fn min_orphan_age(mut self, age: Duration) -> Self {
        self.min_orphan_age = age;
        self
    }

    /// Create the directory layout and open the store
    pub fn build(self) -> Result<AssetStore> {
        let blobs = BlobStore::open(self.root.join("blobs"))?;
        fs::create_dir_all(self.root.join("manifests"))?;
        fs::create_dir_all(self.root.join("runs"))?;
        info!("opened asset store at {:?}", self.root);
        Ok(AssetStore {
            root: self.root,
            blobs,
            limits: self.limits,
            ignore_file: self.ignore_file,
            min_orphan_age: self.min_orphan_age,
        })
    }
}

/// Handle to one storage root; the main entry point of the crate
#[derive(Debug)]
pub struct AssetStore {
    root: PathBuf,
    blobs: BlobStore,
    limits: SnapshotLimits,
    ignore_file: String,
    min_orphan_age: Duration,
}

impl AssetStore {
    /// Open (creating if needed) a store with default configuration
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        AssetStoreBuilder::new(root).build()
    }

    /// Start a builder for non-default configuration
    pub fn builder(root: impl Into<PathBuf>) -> AssetStoreBuilder {
        AssetStoreBuilder::new(root)
    }

    /// Storage root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Direct access to the underlying blob store
    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    fn manifest_dir(&self) -> PathBuf {
        self.root.join("manifests")
    }

    /// Snapshot a workspace under a run id
    ///
    /// Loads the workspace's ignore file (falling back to built-in
    /// defaults), snapshots through the configured limits, and records
    /// the authored manifest in the run's lineage record.
    pub fn snapshot_run(&self, workspace: &Path, run_id: &str) -> Result<Manifest> {
        let matcher = IgnoreMatcher::load(workspace, &self.ignore_file);
        let engine = SnapshotEngine::new(&self.blobs, self.manifest_dir()).with_limits(self.limits);
        let manifest = engine.snapshot(workspace, run_id, &matcher)?;

        let assets_path = run_assets_path(&self.root, run_id);
        let mut assets = RunAssets::load(&assets_path)?;
        assets.record_created(&manifest.run_id);
        assets.persist(&assets_path)?;

        Ok(manifest)
    }

    /// Export a workspace directly to a zip, bypassing blob storage
    pub fn snapshot_to_zip(&self, workspace: &Path, zip_path: &Path) -> Result<ZipExport> {
        let matcher = IgnoreMatcher::load(workspace, &self.ignore_file);
        let engine = SnapshotEngine::new(&self.blobs, self.manifest_dir()).with_limits(self.limits);
        engine.snapshot_to_zip(workspace, &matcher, zip_path)
    }

    /// Load a run's manifest
    ///
    /// # Errors
    ///
    /// - [`StoreError::RunNotFound`] if no manifest exists for the id
    /// - [`StoreError::ManifestCorrupt`] if it exists but cannot be read
    pub fn load_manifest(&self, run_id: &str) -> Result<Manifest> {
        let path = Manifest::path_for_run(&self.manifest_dir(), run_id);
        if !path.is_file() {
            return Err(StoreError::RunNotFound(run_id.to_string()));
        }
        Manifest::load(&path)
    }

    /// Restore a run's snapshot into a target directory
    pub fn restore_run(
        &self,
        run_id: &str,
        target_dir: &Path,
        overwrite: bool,
    ) -> Result<RestoreReport> {
        let manifest = self.load_manifest(run_id)?;
        RestoreEngine::new(&self.blobs).restore(&manifest, target_dir, overwrite)
    }

    /// Export a run's snapshot as a zip archive
    pub fn export_run_to_zip(&self, run_id: &str, zip_path: &Path) -> Result<RestoreReport> {
        let manifest = self.load_manifest(run_id)?;
        RestoreEngine::new(&self.blobs).export_to_zip(&manifest, zip_path)
    }

    /// Record that a run consumed another run's assets
    ///
    /// `source_run` identifies the run whose snapshot was restored or
    /// exported; the lineage record can then answer which run produced
    /// the assets this run built on.
    pub fn record_asset_use(&self, run_id: &str, source_run: &str) -> Result<()> {
        let path = run_assets_path(&self.root, run_id);
        let mut assets = RunAssets::load(&path)?;
        assets.record_used(source_run);
        assets.persist(&path)
    }

    /// Load a run's lineage record (empty if none was written)
    pub fn run_assets(&self, run_id: &str) -> Result<RunAssets> {
        RunAssets::load(&run_assets_path(&self.root, run_id))
    }

    /// Structurally validate a run's manifest and check recorded sizes
    /// against the blobs actually on disk
    pub fn verify_run(&self, run_id: &str) -> Result<Manifest> {
        let manifest = self.load_manifest(run_id)?;
        manifest.verify(&self.blobs)?;
        Ok(manifest)
    }

    /// Delete a run and reclaim its exclusively-owned blobs
    pub fn delete_run(&self, run_id: &str, dry_run: bool) -> Result<RunDeletion> {
        GarbageCollector::new(&self.root, &self.blobs)
            .with_min_orphan_age(self.min_orphan_age)
            .delete_run(run_id, dry_run)
    }

    /// Sweep unreferenced blobs older than the configured age threshold
    pub fn cleanup_orphaned_blobs(&self, dry_run: bool) -> Result<OrphanSweep> {
        GarbageCollector::new(&self.root, &self.blobs)
            .with_min_orphan_age(self.min_orphan_age)
            .cleanup_orphaned_blobs(dry_run)
    }

    /// Run ids with a persisted manifest, sorted
    pub fn list_runs(&self) -> Result<Vec<String>> {
        let mut runs = Vec::new();
        let dir = self.manifest_dir();
        if dir.is_dir() {
            for entry in fs::read_dir(dir)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    runs.push(stem.to_string());
                }
            }
        }
        runs.sort();
        Ok(runs)
    }

    /// Aggregate statistics over blobs and manifests
    pub fn stats(&self) -> Result<StoreStats> {
        let BlobStoreStats {
            blob_count,
            total_bytes,
        } = self.blobs.stats()?;
        Ok(StoreStats {
            blob_count,
            total_bytes,
            manifest_count: self.list_runs()?.len(),
        })
    }
}
