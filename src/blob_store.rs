//! Content-addressed physical storage
//!
//! Blobs are immutable byte objects named by the SHA-256 fingerprint of
//! their content and stored once regardless of how many manifests
//! reference them:
//!
//! ```text
//! blobs/
//! ├── a4/
//! │   └── a47eb79188cdc67a…   # full 64-hex fingerprint
//! └── 3f/
//!     └── 3f8c2a1b9e4d7f…
//! ```
//!
//! The two-character shard prefix keeps any single directory from
//! accumulating an unbounded number of entries.
//!
//! ## Write discipline
//!
//! New content is written to a temporary file in the destination shard
//! directory and then atomically renamed into place. A blob is therefore
//! never observable half-written under its final name, and concurrent
//! stores of identical content from independent processes resolve
//! benignly: whichever rename lands last replaces identical bytes. The
//! store never rewrites a blob in place; writers that want different
//! content go through [`BlobStore::store_bytes`] and get a different
//! fingerprint.
//!
//! ## Materialization
//!
//! Placing a blob at a consumer-visible path prefers a hard link when the
//! capability probe at open time succeeded, falling back to a full copy
//! per call (cross-device restores). Hard-linked files must never be
//! opened for writing in place; the restore engine only adjusts
//! permissions on copies for this reason.

use crate::error::{Result, StoreError};
use crate::hasher::{self, is_valid_fingerprint};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, trace, warn};

/// Result of storing content: its fingerprint and size in bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    /// SHA-256 hex fingerprint of the stored content
    pub fingerprint: String,
    /// Uncompressed size in bytes
    pub size: u64,
}

/// Aggregate statistics over the physical store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlobStoreStats {
    /// Number of blobs on disk
    pub blob_count: usize,
    /// Sum of blob sizes in bytes
    pub total_bytes: u64,
}

/// Strategy for placing blob bytes at a consumer-visible path
///
/// Selected once per store by a filesystem-capability probe at open time,
/// not re-detected per file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Materializer {
    /// Hard link into place; zero extra space on the same filesystem
    HardLink,
    /// Full byte copy
    Copy,
}

/// Content-addressed blob storage rooted at a `blobs/` directory
#[derive(Debug)]
pub struct BlobStore {
    root: PathBuf,
    materializer: Materializer,
}

impl BlobStore {
    /// Open (creating if needed) a blob store at the given directory
    ///
    /// Probes whether the filesystem supports hard links so that
    /// materialization can use them when possible.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        let materializer = probe_hard_link(&root);
        debug!("opened blob store at {:?} ({:?})", root, materializer);
        Ok(Self { root, materializer })
    }

    /// Root directory of this store
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Physical path a fingerprint maps to (whether or not it exists)
    pub fn path_for(&self, fingerprint: &str) -> PathBuf {
        let (shard, _) = fingerprint.split_at(2.min(fingerprint.len()));
        self.root.join(shard).join(fingerprint)
    }

    /// Check whether a blob exists
    pub fn exists(&self, fingerprint: &str) -> bool {
        self.path_for(fingerprint).is_file()
    }

    /// Store a file's content, returning its fingerprint
    ///
    /// The dedup fast path: if a blob with this content already exists the
    /// call returns immediately without writing. Safe to call concurrently
    /// from multiple processes storing the same content.
    pub fn store_file(&self, src: &Path) -> Result<StoredBlob> {
        let fingerprint = hasher::hash_file(src)?;
        let size = fs::metadata(src)?.len();
        let blob_path = self.path_for(&fingerprint);

        if blob_path.is_file() {
            trace!("blob {} already stored, skipping write", &fingerprint[..8]);
            return Ok(StoredBlob { fingerprint, size });
        }

        let shard_dir = blob_path.parent().expect("sharded path has a parent");
        fs::create_dir_all(shard_dir)?;

        let mut tmp = NamedTempFile::new_in(shard_dir)?;
        let mut reader = File::open(src)?;
        io::copy(&mut reader, tmp.as_file_mut())?;
        commit_temp(tmp, &blob_path)?;

        trace!("stored blob {} ({} bytes)", &fingerprint[..8], size);
        Ok(StoredBlob { fingerprint, size })
    }

    /// Store in-memory bytes, returning their fingerprint
    pub fn store_bytes(&self, content: &[u8]) -> Result<StoredBlob> {
        let fingerprint = hasher::hash_bytes(content);
        let size = content.len() as u64;
        let blob_path = self.path_for(&fingerprint);

        if blob_path.is_file() {
            trace!("blob {} already stored, skipping write", &fingerprint[..8]);
            return Ok(StoredBlob { fingerprint, size });
        }

        let shard_dir = blob_path.parent().expect("sharded path has a parent");
        fs::create_dir_all(shard_dir)?;

        let mut tmp = NamedTempFile::new_in(shard_dir)?;
        io::Write::write_all(tmp.as_file_mut(), content)?;
        commit_temp(tmp, &blob_path)?;

        trace!("stored blob {} ({} bytes)", &fingerprint[..8], size);
        Ok(StoredBlob { fingerprint, size })
    }

    /// Read a blob's content into memory
    ///
    /// # Errors
    ///
    /// - [`StoreError::InvalidFingerprint`] for malformed fingerprints
    /// - [`StoreError::BlobNotFound`] if the blob is absent
    pub fn read(&self, fingerprint: &str) -> Result<Vec<u8>> {
        let path = self.checked_path(fingerprint)?;
        Ok(fs::read(path)?)
    }

    /// Open a blob for streaming reads
    pub fn open_reader(&self, fingerprint: &str) -> Result<File> {
        let path = self.checked_path(fingerprint)?;
        Ok(File::open(path)?)
    }

    /// Size of a stored blob as reported by a fresh stat
    pub fn blob_size(&self, fingerprint: &str) -> Result<u64> {
        let path = self.checked_path(fingerprint)?;
        Ok(fs::metadata(path)?.len())
    }

    /// Place a blob's bytes at `dst`, preferring a hard link
    ///
    /// Returns `true` when the destination is a hard link to the blob and
    /// `false` when it is an independent copy. The destination must not
    /// already exist; callers handle overwrite semantics.
    pub fn materialize(&self, fingerprint: &str, dst: &Path) -> Result<bool> {
        let src = self.checked_path(fingerprint)?;

        if self.materializer == Materializer::HardLink {
            match fs::hard_link(&src, dst) {
                Ok(()) => return Ok(true),
                Err(e) => {
                    // Cross-device destination or filesystem refusal; fall
                    // through to a copy for this file only.
                    debug!(
                        "hard link to {:?} failed ({}), copying instead",
                        dst, e
                    );
                }
            }
        }

        fs::copy(&src, dst)?;
        Ok(false)
    }

    /// Delete a blob from disk
    ///
    /// Only the garbage collector calls this; blobs are otherwise
    /// immutable for their whole lifetime.
    pub(crate) fn delete(&self, fingerprint: &str) -> Result<u64> {
        let path = self.checked_path(fingerprint)?;
        let size = fs::metadata(&path)?.len();
        fs::remove_file(&path)?;

        // Drop the shard directory once its last blob is gone.
        if let Some(shard) = path.parent() {
            if fs::read_dir(shard)?.next().is_none() {
                let _ = fs::remove_dir(shard);
            }
        }

        debug!("deleted blob {} ({} bytes)", &fingerprint[..8], size);
        Ok(size)
    }

    /// Enumerate every blob physically present, as fingerprints
    pub fn list_blobs(&self) -> Result<Vec<String>> {
        let mut blobs = Vec::new();
        for shard in fs::read_dir(&self.root)? {
            let shard = shard?;
            if !shard.path().is_dir() {
                continue;
            }
            for entry in fs::read_dir(shard.path())? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().to_string();
                // Dot-prefixed names are in-flight temp files.
                if name.starts_with('.') || !entry.path().is_file() {
                    continue;
                }
                if is_valid_fingerprint(&name) {
                    blobs.push(name);
                } else {
                    warn!("ignoring foreign file in blob store: {:?}", entry.path());
                }
            }
        }
        Ok(blobs)
    }

    /// Full-store aggregate computed by directory scan
    ///
    /// The scan cost is acceptable for the infrequent calls this serves
    /// (CLI `stats`, cleanup reporting).
    pub fn stats(&self) -> Result<BlobStoreStats> {
        let mut stats = BlobStoreStats::default();
        for fingerprint in self.list_blobs()? {
            stats.blob_count += 1;
            match fs::metadata(self.path_for(&fingerprint)) {
                Ok(meta) => stats.total_bytes += meta.len(),
                Err(e) => warn!("failed to stat blob {}: {}", &fingerprint[..8], e),
            }
        }
        Ok(stats)
    }

    fn checked_path(&self, fingerprint: &str) -> Result<PathBuf> {
        if !is_valid_fingerprint(fingerprint) {
            return Err(StoreError::InvalidFingerprint(fingerprint.to_string()));
        }
        let path = self.path_for(fingerprint);
        if !path.is_file() {
            return Err(StoreError::BlobNotFound(fingerprint.to_string()));
        }
        Ok(path)
    }
}

/// Atomically rename a completed temp file into its final blob path
fn commit_temp(tmp: NamedTempFile, blob_path: &Path) -> Result<()> {
    match tmp.persist(blob_path) {
        Ok(_) => Ok(()),
        Err(e) => {
            // A concurrent writer may have landed the identical blob first;
            // losing that race is success.
            if blob_path.is_file() {
                return Ok(());
            }
            Err(e.error.into())
        }
    }
}

/// Probe whether hard links work inside the given directory
fn probe_hard_link(root: &Path) -> Materializer {
    let probe = match NamedTempFile::new_in(root) {
        Ok(f) => f,
        Err(_) => return Materializer::Copy,
    };
    let link_path = root.join(".link_probe");
    let _ = fs::remove_file(&link_path);
    let outcome = match fs::hard_link(probe.path(), &link_path) {
        Ok(()) => {
            let _ = fs::remove_file(&link_path);
            Materializer::HardLink
        }
        Err(_) => Materializer::Copy,
    };
    outcome
}
