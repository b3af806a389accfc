//! Snapshot engine: directory tree → manifest + blobs
//!
//! A snapshot walks a workspace, filters it through the ignore rules,
//! streams every included file into the blob store, and persists a
//! manifest describing the result. Two caps guard against accidentally
//! snapshotting a dataset directory: a total-byte limit and a file-count
//! limit, both enforced *during* the walk so an oversized workspace fails
//! fast instead of after hashing everything.
//!
//! Entries are emitted in lexicographic path order, so two snapshots of
//! identical content produce an identical `files` array, a prerequisite
//! for manifest-level dedup and for reproducible tests.
//!
//! The manifest is persisted only after every blob is committed. A
//! snapshot interrupted mid-way therefore leaves committed blobs (harmless
//! and deduplicated) and no manifest: the partial work is invisible and
//! becomes garbage-collection-eligible later.

use crate::blob_store::BlobStore;
use crate::error::{Result, StoreError};
use crate::ignore::{IgnoreMatcher, MatchDecision};
use crate::manifest::{Manifest, ManifestEntry};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Default cap on total snapshot bytes (500 MiB)
pub const DEFAULT_MAX_TOTAL_BYTES: u64 = 500 * 1024 * 1024;

/// Default cap on snapshot file count
pub const DEFAULT_MAX_FILES: usize = 200_000;

/// Caller-configurable snapshot caps
#[derive(Debug, Clone, Copy)]
pub struct SnapshotLimits {
    /// Maximum total bytes across all included files
    pub max_total_bytes: u64,
    /// Maximum number of included files
    pub max_files: usize,
    /// Bypass both caps for an intentionally large snapshot
    pub unlimited: bool,
}

impl Default for SnapshotLimits {
    fn default() -> Self {
        Self {
            max_total_bytes: DEFAULT_MAX_TOTAL_BYTES,
            max_files: DEFAULT_MAX_FILES,
            unlimited: false,
        }
    }
}

/// Result of a one-shot zip export of a workspace
#[derive(Debug, Clone)]
pub struct ZipExport {
    /// Path of the written archive
    pub zip_path: PathBuf,
    /// Number of files included
    pub file_count: usize,
    /// Sum of uncompressed file sizes
    pub total_bytes: u64,
}

/// A file selected by the walk, before hashing
#[derive(Debug)]
struct WalkedFile {
    abs_path: PathBuf,
    rel_path: String,
    mode: u32,
}

/// Walks directory trees into manifests backed by the blob store
pub struct SnapshotEngine<'a> {
    blobs: &'a BlobStore,
    manifest_dir: PathBuf,
    limits: SnapshotLimits,
}

impl<'a> SnapshotEngine<'a> {
    /// Create an engine writing manifests into `manifest_dir`
    pub fn new(blobs: &'a BlobStore, manifest_dir: impl Into<PathBuf>) -> Self {
        Self {
            blobs,
            manifest_dir: manifest_dir.into(),
            limits: SnapshotLimits::default(),
        }
    }

    /// Override the default snapshot caps
    pub fn with_limits(mut self, limits: SnapshotLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Snapshot a workspace into the store under the given run id
    ///
    /// Walks `root`, applying `matcher` (ignored directories are pruned
    /// without recursing), stores each included file as a blob, and
    /// persists the manifest once all blobs are committed.
    ///
    /// # Errors
    ///
    /// - [`StoreError::LimitExceeded`] as soon as a cap is crossed
    /// - [`StoreError::Io`] / [`StoreError::WalkDir`] on filesystem failure
    pub fn snapshot(&self, root: &Path, run_id: &str, matcher: &IgnoreMatcher) -> Result<Manifest> {
        let files = self.collect_files(root, matcher)?;

        let mut entries = Vec::with_capacity(files.len());
        for file in &files {
            let stored = self.blobs.store_file(&file.abs_path)?;
            entries.push(ManifestEntry {
                path: file.rel_path.clone(),
                fingerprint: stored.fingerprint,
                size: stored.size,
                mode: file.mode,
            });
        }

        let manifest = Manifest::new(run_id, entries);
        manifest.persist(&self.manifest_dir)?;

        info!(
            "snapshot of {:?} for run {}: {} files, {} bytes",
            root,
            run_id,
            manifest.file_count(),
            manifest.total_bytes()
        );
        Ok(manifest)
    }

    /// Export a workspace straight to a zip archive, bypassing the store
    ///
    /// Same walk, ignore rules, and limits as [`snapshot`](Self::snapshot),
    /// but the files go into a single portable archive instead of blobs.
    /// This is a convenience projection, not the canonical storage form.
    pub fn snapshot_to_zip(
        &self,
        root: &Path,
        matcher: &IgnoreMatcher,
        zip_path: &Path,
    ) -> Result<ZipExport> {
        let files = self.collect_files(root, matcher)?;

        if let Some(parent) = zip_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut zip = ZipWriter::new(File::create(zip_path)?);
        let mut total_bytes = 0u64;

        for file in &files {
            let options = FileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .unix_permissions(file.mode);
            zip.start_file(file.rel_path.as_str(), options)?;
            let mut reader = File::open(&file.abs_path)?;
            total_bytes += io::copy(&mut reader, &mut zip)?;
        }
        zip.finish()?;

        info!(
            "exported {:?} to {:?}: {} files, {} bytes",
            root,
            zip_path,
            files.len(),
            total_bytes
        );
        Ok(ZipExport {
            zip_path: zip_path.to_path_buf(),
            file_count: files.len(),
            total_bytes,
        })
    }

    /// Walk `root`, prune ignored subtrees, enforce limits, sort by path
    fn collect_files(&self, root: &Path, matcher: &IgnoreMatcher) -> Result<Vec<WalkedFile>> {
        let limits = self.limits;
        let mut files: Vec<WalkedFile> = Vec::new();
        let mut total_bytes = 0u64;

        let walker = WalkDir::new(root).follow_links(false).into_iter();
        let walker = walker.filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            let rel = match relative_posix(entry.path(), root) {
                Some(rel) => rel,
                None => return false,
            };
            matcher.decide(&rel, entry.file_type().is_dir()) == MatchDecision::Include
        });

        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = match relative_posix(entry.path(), root) {
                Some(rel) => rel,
                None => continue,
            };
            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    warn!("skipping unreadable file {:?}: {}", entry.path(), e);
                    continue;
                }
            };

            total_bytes += metadata.len();
            files.push(WalkedFile {
                abs_path: entry.path().to_path_buf(),
                rel_path: rel,
                mode: file_mode(&metadata),
            });

            if !limits.unlimited {
                if files.len() > limits.max_files {
                    return Err(StoreError::LimitExceeded {
                        what: "file count",
                        actual: files.len() as u64,
                        limit: limits.max_files as u64,
                    });
                }
                if total_bytes > limits.max_total_bytes {
                    return Err(StoreError::LimitExceeded {
                        what: "total bytes",
                        actual: total_bytes,
                        limit: limits.max_total_bytes,
                    });
                }
            }
        }

        // Canonical ordering is by path string, not walk order: a DFS with
        // sorted names interleaves "a.txt" and "a/b" differently.
        files.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
        debug!("walk of {:?} selected {} files ({} bytes)", root, files.len(), total_bytes);
        Ok(files)
    }
}

/// Relative path with forward slashes, or `None` for non-UTF-8 names
fn relative_posix(path: &Path, root: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut out = String::new();
    for component in rel.components() {
        if !out.is_empty() {
            out.push('/');
        }
        match component.as_os_str().to_str() {
            Some(s) => out.push_str(s),
            None => {
                warn!("skipping non-UTF-8 path {:?}", path);
                return None;
            }
        }
    }
    Some(out)
}

#[cfg(unix)]
fn file_mode(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn file_mode(metadata: &fs::Metadata) -> u32 {
    if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn workspace(files: &[(&str, &[u8])]) -> TempDir {
        let dir = TempDir::new().unwrap();
        for (path, content) in files {
            let full = dir.path().join(path);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(full, content).unwrap();
        }
        dir
    }

    fn store_in(dir: &TempDir) -> BlobStore {
        BlobStore::open(dir.path().join("blobs")).unwrap()
    }

    #[test]
    fn test_snapshot_basic_tree() {
        let ws = workspace(&[("a.txt", b"alpha"), ("sub/b.txt", b"beta")]);
        let storage = TempDir::new().unwrap();
        let blobs = store_in(&storage);
        let engine = SnapshotEngine::new(&blobs, storage.path().join("manifests"));

        let manifest = engine
            .snapshot(ws.path(), "run-1", &IgnoreMatcher::from_patterns::<_, &str>([]))
            .unwrap();

        assert_eq!(manifest.file_count(), 2);
        assert_eq!(manifest.total_bytes(), 9);
        let paths: Vec<_> = manifest.files.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, ["a.txt", "sub/b.txt"]);
        for entry in &manifest.files {
            assert!(blobs.exists(&entry.fingerprint));
        }
        assert!(storage.path().join("manifests/run-1.json").is_file());
    }

    #[test]
    fn test_snapshot_dedups_identical_content() {
        let ws = workspace(&[("a.bin", b"same"), ("b.bin", b"same"), ("c.bin", b"other")]);
        let storage = TempDir::new().unwrap();
        let blobs = store_in(&storage);
        let engine = SnapshotEngine::new(&blobs, storage.path().join("manifests"));

        let manifest = engine
            .snapshot(ws.path(), "run-1", &IgnoreMatcher::from_patterns::<_, &str>([]))
            .unwrap();

        assert_eq!(manifest.file_count(), 3);
        assert_eq!(blobs.stats().unwrap().blob_count, 2);
        assert_eq!(
            manifest.files[0].fingerprint, manifest.files[1].fingerprint,
            "a.bin and b.bin share a blob"
        );
    }

    #[test]
    fn test_ignored_directory_is_pruned() {
        let ws = workspace(&[
            ("keep.txt", b"keep"),
            ("node_modules/dep/index.js", b"dep"),
            ("node_modules/kept.txt", b"never seen"),
        ]);
        let storage = TempDir::new().unwrap();
        let blobs = store_in(&storage);
        let engine = SnapshotEngine::new(&blobs, storage.path().join("manifests"));

        // Even a negation inside the pruned subtree is not honored.
        let matcher = IgnoreMatcher::from_patterns(["node_modules/", "!node_modules/kept.txt"]);
        let manifest = engine.snapshot(ws.path(), "run-1", &matcher).unwrap();

        let paths: Vec<_> = manifest.files.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, ["keep.txt"]);
    }

    #[test]
    fn test_file_count_limit_fails_fast() {
        let ws = workspace(&[("a", b"1"), ("b", b"2"), ("c", b"3")]);
        let storage = TempDir::new().unwrap();
        let blobs = store_in(&storage);
        let engine = SnapshotEngine::new(&blobs, storage.path().join("manifests")).with_limits(
            SnapshotLimits {
                max_files: 2,
                ..Default::default()
            },
        );

        let err = engine
            .snapshot(ws.path(), "run-1", &IgnoreMatcher::from_patterns::<_, &str>([]))
            .unwrap_err();
        assert!(matches!(err, StoreError::LimitExceeded { what: "file count", .. }));
        // Fail-fast: no manifest was persisted.
        assert!(!storage.path().join("manifests/run-1.json").exists());
    }

    #[test]
    fn test_byte_limit_respects_unlimited_flag() {
        let ws = workspace(&[("big.bin", &[0u8; 1024][..])]);
        let storage = TempDir::new().unwrap();
        let blobs = store_in(&storage);

        let limits = SnapshotLimits {
            max_total_bytes: 100,
            ..Default::default()
        };
        let engine = SnapshotEngine::new(&blobs, storage.path().join("manifests")).with_limits(limits);
        assert!(matches!(
            engine.snapshot(ws.path(), "r", &IgnoreMatcher::from_patterns::<_, &str>([])),
            Err(StoreError::LimitExceeded { what: "total bytes", .. })
        ));

        let engine = SnapshotEngine::new(&blobs, storage.path().join("manifests")).with_limits(
            SnapshotLimits {
                unlimited: true,
                ..limits
            },
        );
        assert!(engine
            .snapshot(ws.path(), "r", &IgnoreMatcher::from_patterns::<_, &str>([]))
            .is_ok());
    }

    #[test]
    fn test_snapshot_to_zip_contents() {
        let ws = workspace(&[("a.txt", b"alpha"), ("skip.log", b"nope")]);
        let storage = TempDir::new().unwrap();
        let blobs = store_in(&storage);
        let engine = SnapshotEngine::new(&blobs, storage.path().join("manifests"));

        let zip_path = storage.path().join("export.zip");
        let export = engine
            .snapshot_to_zip(ws.path(), &IgnoreMatcher::from_patterns(["*.log"]), &zip_path)
            .unwrap();
        assert_eq!(export.file_count, 1);
        assert_eq!(export.total_bytes, 5);

        let mut archive = zip::ZipArchive::new(File::open(&zip_path).unwrap()).unwrap();
        assert_eq!(archive.len(), 1);
        let mut f = archive.by_name("a.txt").unwrap();
        let mut content = String::new();
        io::Read::read_to_string(&mut f, &mut content).unwrap();
        assert_eq!(content, "alpha");
        // No blobs were stored for a plain export.
        assert_eq!(blobs.stats().unwrap().blob_count, 0);
    }
}
