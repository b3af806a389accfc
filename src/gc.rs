//! Reference-counting garbage collection over manifests and blobs
//!
//! Blobs carry no reference counts on disk. Liveness is recomputed from
//! first principles on every collection: a blob is live iff at least one
//! loadable manifest references its fingerprint. Corrupt manifests are
//! skipped and reported, which errs toward keeping blobs alive: a
//! manifest that cannot be read might still reference anything.
//!
//! All mutating operations take a cross-process exclusive lock on
//! `<root>/gc.lock` first, so a collection never races a concurrent
//! deletion. Snapshots are not locked out; a manifest persisted after the
//! live set was computed can only *add* references, and new blobs are
//! protected from the orphan sweep by a minimum-age threshold.
//!
//! Deletion order is fail-safe toward leaked space: the manifest goes
//! first, then the run directory, and blobs last. A crash mid-way leaves
//! unreferenced blobs (reclaimable by a later sweep), never a manifest
//! pointing at deleted blobs.

use crate::blob_store::BlobStore;
use crate::error::{Result, StoreError};
use crate::manifest::Manifest;
use fs4::FileExt;
use serde::Serialize;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Name of the lock file guarding mutating collections
pub const GC_LOCK_FILE: &str = "gc.lock";

/// Minimum age before an unreferenced blob may be swept (24 hours)
///
/// Long enough to cover any realistic gap between a blob landing on disk
/// and its manifest being persisted.
pub const DEFAULT_MIN_ORPHAN_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Fingerprints referenced by at least one loadable manifest
#[derive(Debug, Default)]
pub struct LiveSet {
    /// Every fingerprint some manifest references
    pub fingerprints: HashSet<String>,
    /// Manifests successfully loaded
    pub manifests_scanned: usize,
    /// Manifests that could not be loaded, with reasons
    pub errors: Vec<String>,
}

impl LiveSet {
    pub fn contains(&self, fingerprint: &str) -> bool {
        self.fingerprints.contains(fingerprint)
    }
}

/// Outcome of deleting one run and reclaiming its exclusive blobs
#[derive(Debug, Clone, Serialize)]
pub struct RunDeletion {
    pub run_id: String,
    /// True when nothing was actually deleted
    pub dry_run: bool,
    pub run_dir_deleted: bool,
    pub manifests_deleted: usize,
    /// Fingerprints referenced only by this run (deleted, or would be)
    pub orphaned_assets: Vec<String>,
    /// Fingerprints shared with other runs and therefore kept
    pub kept_assets: Vec<String>,
    pub blobs_deleted: usize,
    pub bytes_freed: u64,
    pub errors: Vec<String>,
}

/// Outcome of a store-wide orphaned-blob sweep
#[derive(Debug, Clone, Serialize)]
pub struct OrphanSweep {
    pub dry_run: bool,
    pub blobs_scanned: usize,
    /// Unreferenced blobs old enough to sweep
    pub orphaned_blobs: Vec<String>,
    pub blobs_deleted: usize,
    pub bytes_freed: u64,
    pub errors: Vec<String>,
}

/// Held for the duration of a mutating collection
struct GcLock {
    file: File,
}

impl GcLock {
    /// Try to take the exclusive lock, failing fast if another process
    /// holds it
    fn acquire(root: &Path) -> Result<Self> {
        let path = root.join(GC_LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                debug!("acquired gc lock at {:?}", path);
                Ok(Self { file })
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(StoreError::GcLockHeld),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for GcLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

/// Computes liveness and reclaims dead manifests, run state, and blobs
pub struct GarbageCollector<'a> {
    root: PathBuf,
    blobs: &'a BlobStore,
    min_orphan_age: Duration,
}

impl<'a> GarbageCollector<'a> {
    /// Create a collector for a store rooted at `root`
    pub fn new(root: impl Into<PathBuf>, blobs: &'a BlobStore) -> Self {
        Self {
            root: root.into(),
            blobs,
            min_orphan_age: DEFAULT_MIN_ORPHAN_AGE,
        }
    }

    /// Override the minimum age gate for the orphan sweep
    pub fn with_min_orphan_age(mut self, age: Duration) -> Self {
        self.min_orphan_age = age;
        self
    }

    fn manifest_dir(&self) -> PathBuf {
        self.root.join("manifests")
    }

    fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join("runs").join(run_id)
    }

    /// Compute the set of live fingerprints across all manifests
    ///
    /// `exclude_run` leaves one run's manifest out of the computation, so
    /// a run deletion can ask "what does everyone *else* still need".
    /// Manifests that fail to load are skipped and reported; their blobs
    /// stay untouched.
    pub fn live_set(&self, exclude_run: Option<&str>) -> Result<LiveSet> {
        let mut live = LiveSet::default();
        let manifest_dir = self.manifest_dir();
        if !manifest_dir.is_dir() {
            return Ok(live);
        }

        for entry in fs::read_dir(&manifest_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let stem = match path.file_stem().and_then(|s| s.to_str()) {
                Some(s) => s.to_string(),
                None => continue,
            };
            if exclude_run == Some(stem.as_str()) {
                continue;
            }

            match Manifest::load(&path) {
                Ok(manifest) => {
                    live.manifests_scanned += 1;
                    for fp in manifest.fingerprints() {
                        live.fingerprints.insert(fp.to_string());
                    }
                }
                Err(e) => {
                    warn!("skipping unloadable manifest {:?}: {}", path, e);
                    live.errors.push(format!("{}: {}", stem, e));
                }
            }
        }

        debug!(
            "live set: {} fingerprints across {} manifests ({} unloadable)",
            live.fingerprints.len(),
            live.manifests_scanned,
            live.errors.len()
        );
        Ok(live)
    }

    /// Delete one run, reclaiming blobs no other run references
    ///
    /// Classifies the run's fingerprints into orphaned (referenced by no
    /// other manifest) and kept (shared). With `dry_run` the full
    /// classification is returned and the disk is untouched.
    ///
    /// # Errors
    ///
    /// - [`StoreError::RunNotFound`] if neither a manifest nor a run
    ///   directory exists for the id
    /// - [`StoreError::GcLockHeld`] if another collection is in progress
    pub fn delete_run(&self, run_id: &str, dry_run: bool) -> Result<RunDeletion> {
        let _lock = GcLock::acquire(&self.root)?;

        let manifest_path = Manifest::path_for_run(&self.manifest_dir(), run_id);
        let run_dir = self.run_dir(run_id);
        if !manifest_path.is_file() && !run_dir.is_dir() {
            return Err(StoreError::RunNotFound(run_id.to_string()));
        }

        let mut result = RunDeletion {
            run_id: run_id.to_string(),
            dry_run,
            run_dir_deleted: false,
            manifests_deleted: 0,
            orphaned_assets: Vec::new(),
            kept_assets: Vec::new(),
            blobs_deleted: 0,
            bytes_freed: 0,
            errors: Vec::new(),
        };

        // Fingerprints this run references. An unloadable manifest still
        // gets deleted, but with no fingerprint list no blob is touched.
        let own_fingerprints: Vec<String> = if manifest_path.is_file() {
            match Manifest::load(&manifest_path) {
                Ok(manifest) => {
                    let mut fps: Vec<String> =
                        manifest.fingerprints().into_iter().map(String::from).collect();
                    fps.sort();
                    fps
                }
                Err(e) => {
                    result
                        .errors
                        .push(format!("manifest unreadable, blobs left in place: {}", e));
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let live = self.live_set(Some(run_id))?;
        result.errors.extend(live.errors.iter().cloned());
        for fp in own_fingerprints {
            if live.contains(&fp) {
                result.kept_assets.push(fp);
            } else {
                result.orphaned_assets.push(fp);
            }
        }

        if dry_run {
            if manifest_path.is_file() {
                result.manifests_deleted = 1;
            }
            result.run_dir_deleted = run_dir.is_dir();
            result.blobs_deleted = result.orphaned_assets.len();
            for fp in &result.orphaned_assets {
                match self.blobs.blob_size(fp) {
                    Ok(size) => result.bytes_freed += size,
                    Err(_) => {}
                }
            }
            return Ok(result);
        }

        // Manifest first: once it is gone no reader can resolve this run
        // to blobs that are about to disappear.
        if manifest_path.is_file() {
            match fs::remove_file(&manifest_path) {
                Ok(()) => result.manifests_deleted = 1,
                Err(e) => result.errors.push(format!("manifest: {}", e)),
            }
        }

        if run_dir.is_dir() {
            match fs::remove_dir_all(&run_dir) {
                Ok(()) => result.run_dir_deleted = true,
                Err(e) => result.errors.push(format!("run dir: {}", e)),
            }
        }

        // Blobs last. A crash before this point leaks space, never breaks
        // a surviving run.
        for fp in &result.orphaned_assets {
            match self.blobs.delete(fp) {
                Ok(freed) => {
                    result.blobs_deleted += 1;
                    result.bytes_freed += freed;
                }
                Err(StoreError::BlobNotFound(_)) => {}
                Err(e) => result.errors.push(format!("blob {}: {}", &fp[..8], e)),
            }
        }

        info!(
            "deleted run {}: {} blobs freed ({} bytes), {} kept as shared",
            run_id,
            result.blobs_deleted,
            result.bytes_freed,
            result.kept_assets.len()
        );
        Ok(result)
    }

    /// Sweep blobs no manifest references
    ///
    /// Only blobs older than the minimum-age threshold are eligible, so a
    /// snapshot in flight (blobs committed, manifest not yet persisted)
    /// never loses data. With `dry_run` the eligible set is reported and
    /// nothing is deleted.
    pub fn cleanup_orphaned_blobs(&self, dry_run: bool) -> Result<OrphanSweep> {
        let _lock = GcLock::acquire(&self.root)?;

        let live = self.live_set(None)?;
        let mut sweep = OrphanSweep {
            dry_run,
            blobs_scanned: 0,
            orphaned_blobs: Vec::new(),
            blobs_deleted: 0,
            bytes_freed: 0,
            errors: live.errors.clone(),
        };

        let mut all_blobs = self.blobs.list_blobs()?;
        all_blobs.sort();
        sweep.blobs_scanned = all_blobs.len();

        for fp in all_blobs {
            if live.contains(&fp) {
                continue;
            }
            match self.blob_age(&fp) {
                Ok(age) if age < self.min_orphan_age => {
                    debug!(
                        "orphan {} too young to sweep ({}s old)",
                        &fp[..8],
                        age.as_secs()
                    );
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    sweep.errors.push(format!("blob {}: {}", &fp[..8], e));
                    continue;
                }
            }

            if dry_run {
                match self.blobs.blob_size(&fp) {
                    Ok(size) => sweep.bytes_freed += size,
                    Err(_) => {}
                }
                sweep.orphaned_blobs.push(fp);
                continue;
            }

            match self.blobs.delete(&fp) {
                Ok(freed) => {
                    sweep.blobs_deleted += 1;
                    sweep.bytes_freed += freed;
                    sweep.orphaned_blobs.push(fp);
                }
                Err(e) => sweep.errors.push(format!("blob {}: {}", &fp[..8], e)),
            }
        }

        info!(
            "orphan sweep{}: {} of {} blobs orphaned, {} bytes{}",
            if dry_run { " (dry run)" } else { "" },
            sweep.orphaned_blobs.len(),
            sweep.blobs_scanned,
            sweep.bytes_freed,
            if dry_run { " reclaimable" } else { " freed" }
        );
        Ok(sweep)
    }

    fn blob_age(&self, fingerprint: &str) -> Result<Duration> {
        let meta = fs::metadata(self.blobs.path_for(fingerprint))?;
        let modified = meta.modified()?;
        Ok(modified.elapsed().unwrap_or(Duration::ZERO))
    }
}
