//! Error types for the snapvault storage engine
//!
//! This module defines all error types that can occur during storage
//! operations. Batch operations (restore, garbage collection) report
//! per-entry failures as data in their result objects and reserve these
//! errors for conditions that invalidate the whole operation.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the snapvault library
pub type Result<T> = std::result::Result<T, StoreError>;

/// Main error type for all storage engine operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Requested blob is absent from the content-addressed store
    #[error("blob not found: {0}")]
    BlobNotFound(String),

    /// Manifest file is unparsable or fails its integrity checks
    #[error("manifest corrupt at {path:?}: {reason}")]
    ManifestCorrupt {
        /// Path to the offending manifest file
        path: PathBuf,
        /// What failed: parse error, malformed fingerprint, size mismatch
        reason: String,
    },

    /// No manifest or run directory exists for the given run identifier
    #[error("run not found: {0}")]
    RunNotFound(String),

    /// Snapshot exceeded a configured cap before any manifest was persisted
    #[error("snapshot exceeds {what} limit: {actual} > {limit}")]
    LimitExceeded {
        /// Which limit was crossed ("total bytes" or "file count")
        what: &'static str,
        /// Observed value at the point the walk was aborted
        actual: u64,
        /// Configured cap
        limit: u64,
    },

    /// Fingerprint string is not 64 lowercase hex characters
    #[error("invalid fingerprint: {0}")]
    InvalidFingerprint(String),

    /// Ignore pattern could not be compiled
    #[error("invalid ignore pattern: {0}")]
    InvalidPattern(String),

    /// Another process holds the garbage collection lock for this root
    #[error("garbage collection already in progress for this storage root")]
    GcLockHeld,

    /// Walk directory error from the walkdir crate
    #[error("walk error: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// Zip archive error during export
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Generic error for unexpected conditions
    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Create a manifest corruption error with a custom reason
    pub fn manifest_corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        StoreError::ManifestCorrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        StoreError::Internal(msg.into())
    }

    /// Check if this error indicates on-disk corruption
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            StoreError::ManifestCorrupt { .. } | StoreError::InvalidFingerprint(_)
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            StoreError::BlobNotFound(fp) => {
                format!(
                    "Blob {} is missing from the store. Run 'snapvault verify' to check which runs are affected.",
                    &fp[..fp.len().min(12)]
                )
            }
            StoreError::RunNotFound(id) => {
                format!("Run '{}' not found. Use 'snapvault list' to see known runs.", id)
            }
            StoreError::LimitExceeded { what, actual, limit } => {
                format!(
                    "Snapshot aborted: {} {} exceeds the configured limit of {}. \
                     Tighten the ignore rules or pass --unlimited for an intentionally large snapshot.",
                    actual, what, limit
                )
            }
            StoreError::GcLockHeld => {
                "Another cleanup is running against this storage root. Try again once it finishes."
                    .to_string()
            }
            _ => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::BlobNotFound("abc123".to_string());
        assert_eq!(err.to_string(), "blob not found: abc123");
    }

    #[test]
    fn test_error_corruption() {
        assert!(StoreError::manifest_corrupt("/tmp/m.json", "bad hex").is_corruption());
        assert!(!StoreError::RunNotFound("r1".to_string()).is_corruption());
    }

    #[test]
    fn test_limit_message_names_the_cap() {
        let err = StoreError::LimitExceeded {
            what: "file count",
            actual: 300_000,
            limit: 200_000,
        };
        assert!(err.user_message().contains("200000"));
    }
}
