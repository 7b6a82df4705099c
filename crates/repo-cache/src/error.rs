//! Error types for repo-cache

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while populating the repository cache
#[derive(Error, Debug)]
pub enum CacheError {
    /// File name is not a valid SHA-256 hex digest
    #[error("invalid sha256 digest: {0}")]
    InvalidDigest(String),

    /// Source artifact does not exist
    #[error("source artifact not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    /// Source content does not hash to the digest in its file name
    #[error("digest mismatch for {}: expected {expected}, got {actual}", path.display())]
    DigestMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
