//! Errors raised while preparing workspaces and tool binaries.

use std::path::PathBuf;

use buildrig_core::{ErrorKind, RigError};
use repo_cache::CacheError;

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("{0} is not set; runfiles cannot be located")]
    RunfilesUnset(&'static str),

    #[error("tool version {version} not found at {}", .path.display())]
    VersionNotFound { version: String, path: PathBuf },

    #[error("no tool version was selected; call select_version before command")]
    NoVersionSelected,

    #[error("{} is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("strip prefix '{prefix}' is not a prefix of '{directory}'")]
    StripPrefix { directory: String, prefix: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("repository cache error: {0}")]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Rig(#[from] RigError),
}

impl DriverError {
    /// Classify this error with the same kinds as [`RigError`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            DriverError::RunfilesUnset(_)
            | DriverError::VersionNotFound { .. }
            | DriverError::NoVersionSelected
            | DriverError::NotADirectory(_)
            | DriverError::StripPrefix { .. } => ErrorKind::Configuration,
            DriverError::Io(_) | DriverError::Cache(_) => ErrorKind::Io,
            DriverError::Rig(e) => e.kind(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(DriverError::NoVersionSelected.kind(), ErrorKind::Configuration);
        assert_eq!(
            DriverError::from(RigError::AlreadyExecuted).kind(),
            ErrorKind::InternalState
        );
        let msg = DriverError::VersionNotFound {
            version: "7.1.0".to_string(),
            path: PathBuf::from("/runfiles/build_bazel_bazel_7_1_0/bazel"),
        }
        .to_string();
        assert!(msg.contains("7.1.0") && msg.contains("build_bazel_bazel_7_1_0"));
    }
}
