//! Streaming content fingerprinting
//!
//! Every blob in the store is named by the SHA-256 digest of its exact
//! bytes. Files are hashed in fixed-size chunks so arbitrarily large
//! assets (model weights, datasets) never need to fit in memory, and the
//! result is identical to hashing the whole content at once.

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Chunk size for streaming file hashes (1 MiB)
pub const HASH_CHUNK_SIZE: usize = 1024 * 1024;

/// Length of a hex-encoded SHA-256 fingerprint
pub const FINGERPRINT_LEN: usize = 64;

/// Hash a file's content using SHA-256
///
/// Reads the file in [`HASH_CHUNK_SIZE`] chunks and updates a running
/// digest, so memory usage is constant regardless of file size.
///
/// # Errors
///
/// - [`crate::StoreError::Io`] if the file cannot be opened or read
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_CHUNK_SIZE];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Hash in-memory bytes using SHA-256
pub fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Check whether a string is a well-formed fingerprint
///
/// Fingerprints are exactly 64 lowercase hexadecimal characters. Upper
/// case is rejected so that a given content has one canonical spelling
/// and one physical path in the store.
pub fn is_valid_fingerprint(s: &str) -> bool {
    s.len() == FINGERPRINT_LEN
        && s.bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
