//! Build tool command lines.
//!
//! [`InvocationBuilder`] assembles the startup flags every hermetic
//! invocation needs, injects the repository cache and build event flags
//! ahead of any `--` passthrough arguments, and runs the result through a
//! [`Command`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use repo_cache::RepositoryCache;
use tracing::debug;

use crate::config::DEFAULT_MAX_IDLE_SECS;
use crate::error::Result;
use crate::invocation::InvocationResult;
use crate::process::Command;

/// Separator after which arguments are passed through to the target.
pub const PASSTHROUGH_SEPARATOR: &str = "--";

#[cfg(unix)]
const NULL_RC: &str = "/dev/null";
#[cfg(not(unix))]
const NULL_RC: &str = "NUL";

/// Builder for one build tool invocation.
#[derive(Debug, Clone)]
pub struct InvocationBuilder {
    tool: PathBuf,
    workspace: PathBuf,
    output_user_root: PathBuf,
    args: Vec<String>,
    working_directory: Option<PathBuf>,
    rc_file: Option<PathBuf>,
    env: BTreeMap<String, String>,
    cache_options: Vec<String>,
    max_idle_secs: u32,
    event_stream: bool,
}

impl InvocationBuilder {
    pub fn new(
        tool: impl Into<PathBuf>,
        workspace: impl Into<PathBuf>,
        output_user_root: impl Into<PathBuf>,
        args: Vec<String>,
    ) -> Self {
        InvocationBuilder {
            tool: tool.into(),
            workspace: workspace.into(),
            output_user_root: output_user_root.into(),
            args,
            working_directory: None,
            rc_file: None,
            env: BTreeMap::new(),
            cache_options: Vec::new(),
            max_idle_secs: DEFAULT_MAX_IDLE_SECS,
            event_stream: true,
        }
    }

    /// Point the tool at a pre-populated repository cache.
    pub fn with_cache(mut self, cache: &RepositoryCache) -> Self {
        self.cache_options = cache.cache_options();
        self
    }

    /// Server idle timeout.
    pub fn with_max_idle_secs(mut self, secs: u32) -> Self {
        self.max_idle_secs = secs;
        self
    }

    /// Run from a directory relative to the workspace root.
    pub fn in_working_directory(mut self, relative: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(relative.into());
        self
    }

    /// Use an rc file relative to the workspace root instead of none.
    pub fn with_rc_file(mut self, relative: impl Into<PathBuf>) -> Self {
        self.rc_file = Some(relative.into());
        self
    }

    /// Set one environment override. Later values replace earlier ones.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Do not ask the tool for a build event file. Event queries on the
    /// result then fail with a configuration error.
    pub fn without_event_stream(mut self) -> Self {
        self.event_stream = false;
        self
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Full argument vector, with `event_file` as the build event target.
    pub fn command_line(&self, event_file: Option<&Path>) -> Vec<String> {
        let rc = match &self.rc_file {
            Some(rc) => self.workspace.join(rc).display().to_string(),
            None => NULL_RC.to_string(),
        };
        let mut line = vec![
            self.tool.display().to_string(),
            format!("--output_user_root={}", self.output_user_root.display()),
            "--nomaster_bazelrc".to_string(),
            format!("--max_idle_secs={}", self.max_idle_secs),
            format!("--bazelrc={rc}"),
        ];

        let split = self
            .args
            .iter()
            .position(|a| a == PASSTHROUGH_SEPARATOR)
            .unwrap_or(self.args.len());
        let (own, passthrough) = self.args.split_at(split);
        line.extend(own.iter().cloned());
        line.extend(self.cache_options.iter().cloned());
        if let Some(path) = event_file {
            line.push(format!("--build_event_binary_file={}", path.display()));
        }
        line.extend(passthrough.iter().cloned());
        line
    }

    /// Create the event file and the command. The event file lives under the
    /// output user root and is kept after the command runs.
    pub fn build(&self) -> Result<(Command, Option<PathBuf>)> {
        let event_file = if self.event_stream {
            std::fs::create_dir_all(&self.output_user_root)?;
            let path = tempfile::Builder::new()
                .prefix("bep")
                .suffix(".bp")
                .tempfile_in(&self.output_user_root)?
                .into_temp_path()
                .keep()
                .map_err(|e| e.error)?;
            Some(std::path::absolute(path)?)
        } else {
            None
        };

        let directory = match &self.working_directory {
            Some(relative) => self.workspace.join(relative),
            None => self.workspace.clone(),
        };
        let command = Command::builder()
            .directory(directory)
            .args(self.command_line(event_file.as_deref()))
            .envs(self.env.clone())
            .build()?;
        Ok((command, event_file))
    }

    /// Run the tool and wrap its outcome.
    pub async fn run(self) -> Result<InvocationResult> {
        let (mut command, event_file) = self.build()?;
        debug!("Running {:?}", command.args());
        let outcome = command.run().await?;
        Ok(
            InvocationResult::new(command.args().to_vec(), outcome, event_file)
                .with_workspace(self.workspace)
                .with_invocation_id(command.id()),
        )
    }

    /// Run the tool and print its report to stdout.
    pub async fn run_verbose(self) -> Result<InvocationResult> {
        let result = self.run().await?;
        println!("{result}");
        Ok(result)
    }

    /// Run the tool, failing with its report unless it exits with `expected`.
    pub async fn run_expecting(self, expected: i32) -> Result<InvocationResult> {
        self.run().await?.expect_exit_code(expected)
    }

    /// Run the tool, failing with its report unless it exits with 0.
    pub async fn run_successfully(self) -> Result<InvocationResult> {
        self.run_expecting(0).await
    }
}
