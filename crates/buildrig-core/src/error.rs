//! Error taxonomy for buildrig invocations.

use std::path::{Path, PathBuf};

/// Coarse classification of a [`RigError`], for callers that branch on the
/// kind of failure rather than the exact variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A required binary or setting was missing before execution.
    Configuration,
    /// The subprocess could not be started.
    Launch,
    /// Reading or writing a stream or file failed.
    Io,
    /// The build event stream was missing, truncated or malformed.
    Decode,
    /// A single-result query found several candidates, or none.
    Ambiguity,
    /// A single-use object was used twice.
    InternalState,
    /// The subprocess exited with a code the caller did not expect.
    UnexpectedExit,
}

/// Errors produced while reading a build event stream.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("event stream not found: {}", .0.display())]
    Missing(PathBuf),

    #[error("truncated record at byte {offset}: {detail}")]
    Truncated { offset: u64, detail: String },

    #[error("length prefix at byte {offset} exceeds 10 bytes")]
    InvalidLength { offset: u64 },

    #[error("malformed record at byte {offset}: {source}")]
    Malformed {
        offset: u64,
        #[source]
        source: prost::DecodeError,
    },

    #[error("file uri is not a local path: {uri}")]
    UnsupportedUri { uri: String },

    #[error("reading event stream: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced by buildrig.
#[derive(Debug, thiserror::Error)]
pub enum RigError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("event stream error: {0}")]
    Decode(#[from] DecodeError),

    #[error("no test result was found")]
    NoTestResult,

    #[error("multiple test results were found: targets: {}", .labels.join(", "))]
    MultipleTestResults { labels: Vec<String> },

    #[error(
        "expected one output file with basename '{basename}', got: {}",
        join_paths(.matches)
    )]
    AmbiguousFile {
        basename: String,
        matches: Vec<PathBuf>,
    },

    #[error("command was already executed")]
    AlreadyExecuted,

    #[error("{report}==> exit code {actual} != {expected}")]
    UnexpectedExitCode {
        expected: i32,
        actual: i32,
        report: String,
    },
}

impl RigError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RigError::Configuration(_) => ErrorKind::Configuration,
            RigError::Launch { .. } => ErrorKind::Launch,
            RigError::Io(_) => ErrorKind::Io,
            RigError::Decode(_) => ErrorKind::Decode,
            RigError::NoTestResult
            | RigError::MultipleTestResults { .. }
            | RigError::AmbiguousFile { .. } => ErrorKind::Ambiguity,
            RigError::AlreadyExecuted => ErrorKind::InternalState,
            RigError::UnexpectedExitCode { .. } => ErrorKind::UnexpectedExit,
        }
    }
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn display_path(path: &Path) -> String {
    std::path::absolute(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}

/// Result type for buildrig operations.
pub type Result<T> = std::result::Result<T, RigError>;
