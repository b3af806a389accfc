//! Per-run asset bookkeeping
//!
//! Each run keeps a small JSON record at `runs/<run_id>/assets.json`
//! listing the manifests it authored (via snapshot) and the runs whose
//! assets it consumed. Both lists hold run identifiers, since a manifest
//! is named by the run that authored it; this is what lets lineage
//! reporting answer "which run's asset did this run use". The record is
//! informational, not an input to garbage collection; liveness comes
//! from manifests alone.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Manifests a run authored and runs it consumed, in first-seen order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunAssets {
    /// Identifiers of manifests this run authored via snapshot
    #[serde(default)]
    pub assets_created: Vec<String>,
    /// Identifiers of runs whose assets this run consumed
    #[serde(default)]
    pub assets_used: Vec<String>,
}

impl RunAssets {
    /// Load the record for a run, treating an absent file as empty
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Record a manifest this run authored, ignoring duplicates
    pub fn record_created(&mut self, manifest_id: &str) {
        if !self.assets_created.iter().any(|id| id == manifest_id) {
            self.assets_created.push(manifest_id.to_string());
        }
    }

    /// Record a run whose assets this run consumed, ignoring duplicates
    pub fn record_used(&mut self, source_run: &str) {
        if !self.assets_used.iter().any(|id| id == source_run) {
            self.assets_used.push(source_run.to_string());
        }
    }

    /// Atomically write the record to `path`
    pub fn persist(&self, path: &Path) -> Result<()> {
        let parent = match path.parent() {
            Some(p) => p,
            None => Path::new("."),
        };
        fs::create_dir_all(parent)?;

        let mut tmp = NamedTempFile::new_in(parent)?;
        serde_json::to_writer_pretty(tmp.as_file_mut(), self)?;
        tmp.as_file_mut().write_all(b"\n")?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

/// Path of a run's asset record under the store root
pub fn run_assets_path(root: &Path, run_id: &str) -> PathBuf {
    root.join("runs").join(run_id).join("assets.json")
}
