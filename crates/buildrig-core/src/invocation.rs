//! Results of one build tool invocation.
//!
//! [`InvocationResult`] pairs a [`ProcessOutcome`] with the build event file
//! the tool wrote. The file is decoded on the first query, and the decoded
//! stream and both derived maps are computed at most once per result, under
//! a per-result lock. Later queries return references into the same cached
//! values.
//!
//! Failed decodes are not cached: a query after a failure reads the file
//! again.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock, PoisonError};

use tracing::debug;
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::{Result, RigError};
use crate::event_stream::{BuildEvent, EventStream};
use crate::obs;
use crate::process::ProcessOutcome;
use crate::proto;
use crate::test_result::{TestResultView, TEST_LOG};

/// Output lines kept per stream in a report.
const REPORT_TAIL_LINES: usize = 200;

/// Process outcome plus lazily decoded build events.
#[derive(Debug)]
pub struct InvocationResult {
    invocation_id: Uuid,
    args: Vec<String>,
    outcome: ProcessOutcome,
    event_file: Option<PathBuf>,
    workspace: Option<PathBuf>,
    init: Mutex<()>,
    stream: OnceLock<EventStream>,
    artifacts: OnceLock<BTreeMap<String, PathBuf>>,
    test_results: OnceLock<BTreeMap<String, TestResultView>>,
}

impl InvocationResult {
    /// Wrap an outcome. `event_file` is where the tool was told to write its
    /// build event stream; `None` if it was not asked to write one.
    pub fn new(args: Vec<String>, outcome: ProcessOutcome, event_file: Option<PathBuf>) -> Self {
        InvocationResult {
            invocation_id: Uuid::new_v4(),
            args,
            outcome,
            event_file,
            workspace: None,
            init: Mutex::new(()),
            stream: OnceLock::new(),
            artifacts: OnceLock::new(),
            test_results: OnceLock::new(),
        }
    }

    /// Attach the workspace directory listed in the report.
    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }

    /// Reuse the id of the command that produced this result.
    pub fn with_invocation_id(mut self, id: Uuid) -> Self {
        self.invocation_id = id;
        self
    }

    pub fn invocation_id(&self) -> Uuid {
        self.invocation_id
    }

    /// Argument vector the tool was started with.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn outcome(&self) -> &ProcessOutcome {
        &self.outcome
    }

    pub fn exit_code(&self) -> i32 {
        self.outcome.exit_code
    }

    pub fn stdout_lines(&self) -> &[String] {
        &self.outcome.stdout
    }

    pub fn stderr_lines(&self) -> &[String] {
        &self.outcome.stderr
    }

    pub fn event_file(&self) -> Option<&Path> {
        self.event_file.as_deref()
    }

    pub fn workspace(&self) -> Option<&Path> {
        self.workspace.as_deref()
    }

    /// Typed build events, in file order.
    pub fn events(&self) -> Result<&[BuildEvent]> {
        Ok(self.stream()?.events())
    }

    /// Decoded protobuf events, for inspecting fields the typed view drops.
    pub fn raw_events(&self) -> Result<&[proto::BuildEvent]> {
        Ok(self.stream()?.raw())
    }

    /// Artifact name to local path.
    pub fn artifacts(&self) -> Result<&BTreeMap<String, PathBuf>> {
        let stream = self.stream()?;
        self.memoize(&self.artifacts, || Ok(stream.artifacts()?))
    }

    /// Local path of one artifact, if it was produced.
    pub fn artifact(&self, name: &str) -> Result<Option<&Path>> {
        Ok(self.artifacts()?.get(name).map(PathBuf::as_path))
    }

    /// Test label to its outputs.
    pub fn test_results(&self) -> Result<&BTreeMap<String, TestResultView>> {
        let stream = self.stream()?;
        self.memoize(&self.test_results, || Ok(stream.test_results()?))
    }

    /// The only test result of this invocation.
    pub fn test_result(&self) -> Result<&TestResultView> {
        let results = self.test_results()?;
        let mut values = results.values();
        match (values.next(), values.next()) {
            (None, _) => Err(RigError::NoTestResult),
            (Some(only), None) => Ok(only),
            (Some(_), Some(_)) => Err(RigError::MultipleTestResults {
                labels: results.keys().cloned().collect(),
            }),
        }
    }

    /// Fail with the full report unless the tool exited with `expected`.
    pub fn expect_exit_code(self, expected: i32) -> Result<Self> {
        if self.exit_code() == expected {
            return Ok(self);
        }
        Err(RigError::UnexpectedExitCode {
            expected,
            actual: self.exit_code(),
            report: self.report(),
        })
    }

    /// Troubleshooting summary: command, exit code, output, workspace
    /// contents, artifacts and test logs.
    pub fn report(&self) -> String {
        self.to_string()
    }

    fn stream(&self) -> Result<&EventStream> {
        let path = self.event_file.as_deref().ok_or_else(|| {
            RigError::Configuration("invocation did not write a build event file".to_string())
        })?;
        self.memoize(&self.stream, || {
            let _span = obs::InvocationSpan::enter(&self.invocation_id);
            let stream = EventStream::read(path)?;
            obs::emit_stream_decoded(path, stream.len());
            Ok(stream)
        })
    }

    // Not re-entrant: `compute` must not call back into another memoized
    // accessor of the same result.
    fn memoize<'a, T>(
        &self,
        cell: &'a OnceLock<T>,
        compute: impl FnOnce() -> Result<T>,
    ) -> Result<&'a T> {
        if let Some(value) = cell.get() {
            return Ok(value);
        }
        let _guard = self.init.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(value) = cell.get() {
            return Ok(value);
        }
        let value = compute()?;
        Ok(cell.get_or_init(|| value))
    }
}

impl fmt::Display for InvocationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "COMMAND: {:?}", self.args)?;
        writeln!(f, "EXIT CODE: {}", self.exit_code())?;
        write_section(f, "STDOUT", &tail(self.stdout_lines()))?;
        write_section(f, "STDERR", &tail(self.stderr_lines()))?;

        if let Some(workspace) = &self.workspace {
            let contents = match list_files(workspace) {
                Ok(files) => files.iter().map(|p| p.display().to_string()).collect(),
                Err(e) => vec![format!("<unavailable: {e}>")],
            };
            write_section(f, "WORKSPACE CONTENTS", &contents)?;
        }

        if self.event_file.is_none() {
            return Ok(());
        }
        let artifacts = match self.artifacts() {
            Ok(map) => map
                .iter()
                .map(|(name, path)| format!("{name}({})", path.display()))
                .collect(),
            Err(e) => vec![format!("<unavailable: {e}>")],
        };
        write_section(f, "ARTIFACTS", &artifacts)?;

        match self.test_results() {
            Ok(results) if results.is_empty() => {}
            Ok(results) => {
                writeln!(f, "TESTS:")?;
                for result in results.values() {
                    writeln!(f, "  {} ({})", result.label(), result.status())?;
                    match result.content(TEST_LOG) {
                        Ok(log) if !log.is_empty() => {
                            for line in log.lines() {
                                writeln!(f, "    {line}")?;
                            }
                        }
                        Ok(_) => writeln!(f, "    <logs: unavailable>")?,
                        Err(e) => writeln!(f, "    <logs: {e}>")?,
                    }
                }
            }
            Err(e) => debug!("Test results unavailable for report: {}", e),
        }
        Ok(())
    }
}

/// Files under `root`, relative to it, sorted. Symlinks are listed but not
/// followed.
pub fn list_files(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_dir() {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(root) {
            files.push(relative.to_path_buf());
        }
    }
    Ok(files)
}

fn tail(lines: &[String]) -> Vec<String> {
    if lines.len() <= REPORT_TAIL_LINES {
        return lines.to_vec();
    }
    let skipped = lines.len() - REPORT_TAIL_LINES;
    std::iter::once(format!("... ({skipped} earlier lines omitted)"))
        .chain(lines[skipped..].iter().cloned())
        .collect()
}

fn write_section(f: &mut fmt::Formatter<'_>, title: &str, lines: &[String]) -> fmt::Result {
    writeln!(f, "{title}:")?;
    for line in lines {
        writeln!(f, "    {line}")?;
    }
    Ok(())
}
