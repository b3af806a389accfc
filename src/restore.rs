//! Restore engine: manifest + blobs → directory tree
//!
//! Restoration is best-effort by design. A manifest whose blobs have been
//! partially lost still restores everything it can; the per-file problems
//! come back as data in the [`RestoreReport`] rather than aborting the
//! whole operation. Callers decide whether missing blobs are fatal.
//!
//! Files are placed by the blob store's materializer, which prefers hard
//! links. A hard link shares its inode with the blob, so the recorded
//! permission bits are applied only when the file was physically copied;
//! chmod on a link would silently mutate the immutable blob.

use crate::blob_store::BlobStore;
use crate::error::Result;
use crate::manifest::Manifest;
use serde::Serialize;
use std::fs::{self, File};
use std::io;
use std::path::Path;
use tracing::{debug, info, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Outcome of a restore, including per-file problems as data
#[derive(Debug, Clone, Default, Serialize)]
pub struct RestoreReport {
    /// Files successfully placed in the target directory
    pub restored_count: usize,
    /// Files skipped because the destination existed and overwrite was off
    pub skipped_count: usize,
    /// Bytes written (or linked) into the target
    pub bytes_written: u64,
    /// Fingerprints the manifest references but the store no longer holds
    pub missing_blobs: Vec<String>,
    /// Per-file failures that did not stop the restore
    pub errors: Vec<String>,
}

impl RestoreReport {
    /// True when every manifest entry was restored without incident
    pub fn is_complete(&self) -> bool {
        self.skipped_count == 0 && self.missing_blobs.is_empty() && self.errors.is_empty()
    }
}

/// Materializes manifests back into directory trees or archives
pub struct RestoreEngine<'a> {
    blobs: &'a BlobStore,
}

impl<'a> RestoreEngine<'a> {
    pub fn new(blobs: &'a BlobStore) -> Self {
        Self { blobs }
    }

    /// Restore a manifest into `target_dir`
    ///
    /// Each entry is handled independently: a missing blob, a blob whose
    /// on-disk size disagrees with the manifest, or a failed placement is
    /// recorded in the report and the restore continues with the next
    /// entry. Corrupt blobs are never placed; a reported gap beats a
    /// silently truncated file. With `overwrite` off, existing destination files
    /// are left untouched and counted as skipped; with it on they are
    /// removed first, never written through (the destination may be a
    /// hard link into the store).
    ///
    /// # Errors
    ///
    /// Only setup failures (creating `target_dir`) abort the call.
    pub fn restore(
        &self,
        manifest: &Manifest,
        target_dir: &Path,
        overwrite: bool,
    ) -> Result<RestoreReport> {
        fs::create_dir_all(target_dir)?;
        let mut report = RestoreReport::default();

        for entry in &manifest.files {
            if !self.blobs.exists(&entry.fingerprint) {
                warn!(
                    "blob {} for {:?} is missing from the store",
                    &entry.fingerprint[..8],
                    entry.path
                );
                report.missing_blobs.push(entry.fingerprint.clone());
                continue;
            }

            // Catch a truncated or overwritten blob before placing it;
            // silently restoring corrupt bytes is worse than a gap.
            match self.blobs.blob_size(&entry.fingerprint) {
                Ok(actual) if actual != entry.size => {
                    warn!(
                        "blob {} for {:?} is corrupt: {} bytes on disk, manifest says {}",
                        &entry.fingerprint[..8],
                        entry.path,
                        actual,
                        entry.size
                    );
                    report.errors.push(format!(
                        "{}: blob is {} bytes, manifest records {}",
                        entry.path, actual, entry.size
                    ));
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    report.errors.push(format!("{}: {}", entry.path, e));
                    continue;
                }
            }

            let dst = target_dir.join(&entry.path);
            if dst.exists() {
                if !overwrite {
                    debug!("skipping existing {:?}", entry.path);
                    report.skipped_count += 1;
                    continue;
                }
                if let Err(e) = fs::remove_file(&dst) {
                    report
                        .errors
                        .push(format!("{}: failed to replace: {}", entry.path, e));
                    continue;
                }
            }

            if let Err(e) = self.place_entry(&entry.fingerprint, &dst, entry.mode) {
                report
                    .errors
                    .push(format!("{}: {}", entry.path, e));
                continue;
            }

            report.restored_count += 1;
            report.bytes_written += entry.size;
        }

        info!(
            "restored run {} into {:?}: {} files, {} skipped, {} missing blobs, {} errors",
            manifest.run_id,
            target_dir,
            report.restored_count,
            report.skipped_count,
            report.missing_blobs.len(),
            report.errors.len()
        );
        Ok(report)
    }

    /// Export a manifest's files into a zip archive
    ///
    /// Same tolerance as [`restore`](Self::restore): entries whose blobs
    /// are gone are reported, not fatal. Recorded permission bits are
    /// carried in the archive entries.
    pub fn export_to_zip(&self, manifest: &Manifest, zip_path: &Path) -> Result<RestoreReport> {
        if let Some(parent) = zip_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut zip = ZipWriter::new(File::create(zip_path)?);
        let mut report = RestoreReport::default();

        for entry in &manifest.files {
            if !self.blobs.exists(&entry.fingerprint) {
                report.missing_blobs.push(entry.fingerprint.clone());
                continue;
            }
            match self.blobs.blob_size(&entry.fingerprint) {
                Ok(actual) if actual != entry.size => {
                    report.errors.push(format!(
                        "{}: blob is {} bytes, manifest records {}",
                        entry.path, actual, entry.size
                    ));
                    continue;
                }
                Ok(_) => {}
                Err(e) => {
                    report.errors.push(format!("{}: {}", entry.path, e));
                    continue;
                }
            }
            let options = FileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .unix_permissions(entry.mode);
            zip.start_file(entry.path.as_str(), options)?;
            let mut reader = self.blobs.open_reader(&entry.fingerprint)?;
            report.bytes_written += io::copy(&mut reader, &mut zip)?;
            report.restored_count += 1;
        }
        zip.finish()?;

        info!(
            "exported run {} to {:?}: {} files, {} missing blobs",
            manifest.run_id,
            zip_path,
            report.restored_count,
            report.missing_blobs.len()
        );
        Ok(report)
    }

    /// Create parents, materialize the blob, fix permissions on copies
    fn place_entry(&self, fingerprint: &str, dst: &Path, mode: u32) -> Result<()> {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        let linked = self.blobs.materialize(fingerprint, dst)?;
        if !linked {
            apply_mode(dst, mode)?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
