//! # Snapvault - Content-addressed asset storage for experiment runs
//!
//! A storage engine that snapshots workspace directories into a
//! deduplicated blob store, restores them byte-for-byte later, and
//! reclaims space when runs are deleted.
//!
//! ## Overview
//!
//! Snapvault gives each experiment run an immutable record of the files it
//! started from:
//! - Snapshot a workspace into content-addressed blobs, honoring
//!   `.rnignore` rules
//! - Restore any run's snapshot into a fresh directory, or export it as a
//!   zip archive
//! - Deduplicate automatically: identical content is stored once no matter
//!   how many runs reference it
//! - Delete runs safely, reclaiming only blobs no surviving run references
//! - Sweep orphaned blobs left behind by interrupted snapshots
//!
//! ## Architecture
//!
//! - **Content-Addressed Storage**: every file is stored under the SHA-256
//!   fingerprint of its bytes, sharded two hex characters deep
//! - **Manifests**: one JSON record per run mapping logical paths to
//!   fingerprints; the sole input to liveness computation
//! - **Ignore Rules**: conventional glob semantics with negation,
//!   anchoring, and last-match-wins ordering; excluded directories prune
//!   the walk entirely
//! - **Garbage Collection**: liveness is recomputed from manifests on
//!   every collection under a cross-process lock; deletion order leaks
//!   space on a crash rather than breaking surviving runs
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use snapvault::AssetStore;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = AssetStore::open("./.snapvault")?;
//!
//! // Snapshot a workspace under a run id
//! let manifest = store.snapshot_run(Path::new("./my_experiment"), "exp-0042")?;
//! println!("captured {} files", manifest.file_count());
//!
//! // Later, restore it somewhere else
//! let report = store.restore_run("exp-0042", Path::new("./replay"), false)?;
//! println!("restored {} files", report.restored_count);
//!
//! // Delete the run, keeping blobs other runs still need
//! let deletion = store.delete_run("exp-0042", false)?;
//! println!("freed {} bytes", deletion.bytes_freed);
//! # Ok(())
//! # }
//! ```
//!
//! ## Custom Configuration
//!
//! ```rust,no_run
//! use snapvault::{AssetStore, SnapshotLimits};
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = AssetStore::builder("./.snapvault")
//!     .limits(SnapshotLimits {
//!         max_total_bytes: 2 * 1024 * 1024 * 1024,
//!         max_files: 500_000,
//!         unlimited: false,
//!     })
//!     .min_orphan_age(Duration::from_secs(3600))
//!     .build()?;
//! # let _ = store;
//! # Ok(())
//! # }
//! ```

pub mod blob_store;
pub mod error;
pub mod gc;
pub mod hasher;
pub mod ignore;
pub mod manifest;
pub mod restore;
pub mod run_assets;
pub mod snapshot;
pub mod store;

pub use blob_store::{BlobStore, BlobStoreStats, Materializer, StoredBlob};
pub use error::{Result, StoreError};
pub use gc::{GarbageCollector, LiveSet, OrphanSweep, RunDeletion};
pub use hasher::{hash_bytes, hash_file, is_valid_fingerprint};
pub use ignore::{IgnoreMatcher, MatchDecision, DEFAULT_IGNORE_FILE};
pub use manifest::{Manifest, ManifestEntry};
pub use restore::{RestoreEngine, RestoreReport};
pub use run_assets::RunAssets;
pub use snapshot::{SnapshotEngine, SnapshotLimits, ZipExport};
pub use store::{AssetStore, AssetStoreBuilder, StoreStats};
