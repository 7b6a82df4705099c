//! Harness configuration.
//!
//! Values normally come from the test runner's environment (`TEST_SRCDIR`,
//! `TEST_TMPDIR`) plus a couple of buildrig-specific overrides.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

/// Root directory under which runfiles (test inputs, tool binaries) live.
pub const ENV_RUNFILES_DIR: &str = "TEST_SRCDIR";

/// Scratch directory for workspaces, output roots and the repository cache.
pub const ENV_SCRATCH_DIR: &str = "TEST_TMPDIR";

/// Tool version selected for every new workspace driver.
pub const ENV_TOOL_VERSION: &str = "BUILDRIG_TOOL_VERSION";

/// Server idle timeout passed to every invocation.
pub const ENV_MAX_IDLE_SECS: &str = "BUILDRIG_MAX_IDLE_SECS";

/// Default server idle timeout, in seconds.
pub const DEFAULT_MAX_IDLE_SECS: u32 = 10;

/// Harness configuration shared by every invocation in a test run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RigConfig {
    /// Runfiles root; required to provision tool binaries.
    pub runfiles_dir: Option<PathBuf>,
    /// Scratch root; a process-lifetime temp dir is used when unset.
    pub scratch_dir: Option<PathBuf>,
    /// Version selected by default in new workspace drivers.
    pub tool_version: Option<String>,
    /// `--max_idle_secs` for the build tool server.
    pub max_idle_secs: u32,
}

impl Default for RigConfig {
    fn default() -> Self {
        RigConfig {
            runfiles_dir: None,
            scratch_dir: None,
            tool_version: None,
            max_idle_secs: DEFAULT_MAX_IDLE_SECS,
        }
    }
}

impl RigConfig {
    /// Create a config from environment variables
    pub fn from_env() -> Self {
        RigConfig {
            runfiles_dir: non_empty_var(ENV_RUNFILES_DIR).map(PathBuf::from),
            scratch_dir: non_empty_var(ENV_SCRATCH_DIR).map(PathBuf::from),
            tool_version: non_empty_var(ENV_TOOL_VERSION),
            max_idle_secs: parse_max_idle_secs(non_empty_var(ENV_MAX_IDLE_SECS)),
        }
    }

    /// Set the runfiles root
    pub fn with_runfiles_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.runfiles_dir = Some(dir.into());
        self
    }

    /// Set the scratch root
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = Some(dir.into());
        self
    }

    /// Set the default tool version
    pub fn with_tool_version(mut self, version: &str) -> Self {
        self.tool_version = Some(version.to_string());
        self
    }

    /// Set the server idle timeout
    pub fn with_max_idle_secs(mut self, secs: u32) -> Self {
        self.max_idle_secs = secs;
        self
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_max_idle_secs(raw: Option<String>) -> u32 {
    let Some(raw) = raw else {
        return DEFAULT_MAX_IDLE_SECS;
    };
    match raw.trim().parse() {
        Ok(secs) => secs,
        Err(e) => {
            warn!(
                "Ignoring {}={:?} ({}); using {}",
                ENV_MAX_IDLE_SECS, raw, e, DEFAULT_MAX_IDLE_SECS
            );
            DEFAULT_MAX_IDLE_SECS
        }
    }
}
