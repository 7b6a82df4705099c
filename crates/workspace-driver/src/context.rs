//! State shared by every workspace driver in one test run.
//!
//! A [`RigContext`] is built once at the start of a run and handed to each
//! [`WorkspaceDriver`](crate::WorkspaceDriver) behind an `Arc`. It owns the
//! scratch root, the repository cache and the registry of provisioned tool
//! binaries, so each tool version is unpacked at most once per run.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use buildrig_core::config::ENV_RUNFILES_DIR;
use buildrig_core::{obs, FreezeOutcome, InvocationBuilder, RepositoryCache, RigConfig};
use tempfile::TempDir;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{DriverError, Result};

/// Scratch subdirectory holding the repository cache.
pub const CACHE_DIR: &str = "repository_cache";

/// Scratch subdirectory passed as `--output_user_root`.
pub const OUTPUT_USER_ROOT_DIR: &str = "output_user_root";

/// Idle timeout for the server started while unpacking a tool.
const UNPACK_MAX_IDLE_SECS: u32 = 30;

#[derive(Debug)]
pub struct RigContext {
    config: RigConfig,
    scratch_root: PathBuf,
    // Removes the fallback scratch root when the context is dropped.
    scratch_guard: Option<TempDir>,
    cache: RepositoryCache,
    versions: Mutex<HashMap<String, PathBuf>>,
}

impl RigContext {
    /// Create the context, falling back to a fresh temp dir when no scratch
    /// root is configured.
    pub fn new(config: RigConfig) -> Result<Self> {
        let (scratch_root, guard) = match &config.scratch_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                (std::path::absolute(dir)?, None)
            }
            None => {
                let dir = tempfile::Builder::new().prefix("buildrig-tests").tempdir()?;
                (dir.path().to_path_buf(), Some(dir))
            }
        };
        let cache = RepositoryCache::new(scratch_root.join(CACHE_DIR));
        info!("Scratch root {:?}", scratch_root);
        Ok(RigContext {
            config,
            scratch_root,
            scratch_guard: guard,
            cache,
            versions: Mutex::new(HashMap::new()),
        })
    }

    /// Build a context from the test runner's environment.
    pub fn from_env() -> Result<Self> {
        Self::new(RigConfig::from_env())
    }

    pub fn config(&self) -> &RigConfig {
        &self.config
    }

    pub fn scratch_root(&self) -> &Path {
        &self.scratch_root
    }

    pub fn output_user_root(&self) -> PathBuf {
        self.scratch_root.join(OUTPUT_USER_ROOT_DIR)
    }

    /// Repository cache shared by every invocation of the run.
    pub fn cache(&self) -> &RepositoryCache {
        &self.cache
    }

    /// Freeze the shared cache; call after populating it.
    pub fn freeze_cache(&self) -> FreezeOutcome {
        let outcome = self.cache.freeze();
        obs::emit_cache_frozen(self.cache.root(), &outcome);
        outcome
    }

    /// Path of a runfile, from `/`-separated segments.
    pub fn runfile(&self, relative: &str) -> Result<PathBuf> {
        let root = self
            .config
            .runfiles_dir
            .as_ref()
            .ok_or(DriverError::RunfilesUnset(ENV_RUNFILES_DIR))?;
        Ok(relative.split('/').fold(root.clone(), |p, seg| p.join(seg)))
    }

    pub fn runfiles_dir(&self) -> Option<&Path> {
        self.config.runfiles_dir.as_deref()
    }

    /// Runfile holding the binary for `version`.
    pub fn tool_runfile(&self, version: &str) -> Result<PathBuf> {
        self.runfile(&format!(
            "build_bazel_bazel_{}/bazel",
            version.replace('.', "_")
        ))
    }

    /// Use `binary` for `version` without looking in the runfiles or
    /// unpacking it.
    pub async fn register_binary(&self, version: &str, binary: impl Into<PathBuf>) {
        self.versions
            .lock()
            .await
            .insert(version.to_string(), binary.into());
    }

    /// Binary for `version`, unpacking it on first use.
    ///
    /// Unpacking runs the tool's `help` command once; the lock is held across
    /// it so concurrent callers wait instead of unpacking twice.
    pub async fn provision(&self, version: &str) -> Result<PathBuf> {
        let mut versions = self.versions.lock().await;
        if let Some(binary) = versions.get(version) {
            return Ok(binary.clone());
        }

        let runfile = self.tool_runfile(version)?;
        if !runfile.exists() {
            return Err(DriverError::VersionNotFound {
                version: version.to_string(),
                path: runfile,
            });
        }
        let binary = runfile.canonicalize()?;

        info!("Unpacking tool version {} from {:?}", version, binary);
        let result = InvocationBuilder::new(
            &binary,
            &self.scratch_root,
            self.output_user_root(),
            vec!["help".to_string()],
        )
        .with_max_idle_secs(UNPACK_MAX_IDLE_SECS)
        .without_event_stream()
        .run()
        .await?;
        if result.exit_code() != 0 {
            warn!(
                "Unpacking {} exited with {}; later invocations may fail",
                version,
                result.exit_code()
            );
        }

        versions.insert(version.to_string(), binary.clone());
        Ok(binary)
    }

    /// Versions provisioned or registered so far.
    pub async fn versions(&self) -> Vec<String> {
        let mut versions: Vec<String> = self.versions.lock().await.keys().cloned().collect();
        versions.sort();
        versions
    }
}

impl Drop for RigContext {
    // A frozen cache would keep the fallback scratch root from being removed.
    fn drop(&mut self) {
        if self.scratch_guard.is_none() {
            return;
        }
        if let Err(e) = self.cache.thaw() {
            warn!("Leaving scratch root {:?} behind: {}", self.scratch_root, e);
        }
    }
}
