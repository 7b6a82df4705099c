//! Subprocess execution with concurrent stream draining.
//!
//! A [`Command`] runs exactly once. Standard output and standard error are
//! drained by two tasks started right after spawn, so a child that fills one
//! pipe while the other is idle never blocks. Both tasks are joined after the
//! child exits; the returned [`ProcessOutcome`] is complete and never changes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, Instrument};
use uuid::Uuid;

use crate::error::{Result, RigError};
use crate::obs;

/// Append-only line sequence shared between a drain task and readers.
type LineBuffer = Arc<Mutex<Vec<String>>>;

/// Result of one subprocess execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOutcome {
    /// Exit code reported by the OS (`128 + signal` for signal deaths on Unix).
    pub exit_code: i32,

    /// Standard output, split on `\n`.
    pub stdout: Vec<String>,

    /// Standard error, split on `\n`.
    pub stderr: Vec<String>,

    /// Wall-clock spawn time.
    pub started_at: DateTime<Utc>,

    /// Duration in milliseconds, including stream draining.
    pub duration_ms: u64,
}

impl ProcessOutcome {
    /// Whether the process exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A single-use subprocess invocation.
#[derive(Debug)]
pub struct Command {
    id: Uuid,
    directory: PathBuf,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    stdout: LineBuffer,
    stderr: LineBuffer,
    executed: bool,
}

impl Command {
    /// Start building a command.
    pub fn builder() -> CommandBuilder {
        CommandBuilder::default()
    }

    /// Identifier attached to this command's tracing span.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Full argument vector; the first element is the program.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Working directory of the child.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Environment overrides applied on top of the inherited environment.
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Snapshot of the stdout lines read so far.
    pub fn stdout_lines(&self) -> Vec<String> {
        snapshot(&self.stdout)
    }

    /// Snapshot of the stderr lines read so far.
    pub fn stderr_lines(&self) -> Vec<String> {
        snapshot(&self.stderr)
    }

    /// Whether [`run`](Self::run) has been called.
    pub fn executed(&self) -> bool {
        self.executed
    }

    /// Execute the command and wait for it and both drain tasks to finish.
    ///
    /// A non-zero exit code is returned in the outcome, not as an error.
    /// Calling `run` a second time fails with [`RigError::AlreadyExecuted`].
    pub async fn run(&mut self) -> Result<ProcessOutcome> {
        if self.executed {
            return Err(RigError::AlreadyExecuted);
        }
        self.executed = true;

        let span = obs::invocation_span(&self.id);
        self.execute().instrument(span).await
    }

    async fn execute(&self) -> Result<ProcessOutcome> {
        let (program, rest) = self
            .args
            .split_first()
            .ok_or_else(|| RigError::Configuration("command has no program".to_string()))?;

        debug!("Spawning {:?} in {:?}", self.args, self.directory);
        let started_at = Utc::now();
        let start = Instant::now();

        let mut child = tokio::process::Command::new(program)
            .args(rest)
            .current_dir(&self.directory)
            .envs(&self.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| RigError::Launch {
                program: program.clone(),
                source,
            })?;
        obs::emit_invocation_started(program, self.args.len());

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("child stdout was not piped"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("child stderr was not piped"))?;

        let stdout_task = tokio::spawn(drain_lines(stdout, Arc::clone(&self.stdout)));
        let stderr_task = tokio::spawn(drain_lines(stderr, Arc::clone(&self.stderr)));

        let status = child.wait().await?;

        // Both drains must reach EOF before the line buffers are final.
        stdout_task.await.map_err(std::io::Error::other)??;
        stderr_task.await.map_err(std::io::Error::other)??;

        let outcome = ProcessOutcome {
            exit_code: exit_code(status),
            stdout: snapshot(&self.stdout),
            stderr: snapshot(&self.stderr),
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        obs::emit_invocation_finished(
            outcome.exit_code,
            outcome.duration_ms,
            outcome.stdout.len(),
            outcome.stderr.len(),
        );
        Ok(outcome)
    }
}

/// Builder for [`Command`].
#[derive(Debug, Default)]
pub struct CommandBuilder {
    directory: Option<PathBuf>,
    args: Vec<String>,
    env: BTreeMap<String, String>,
}

impl CommandBuilder {
    /// Working directory; defaults to the current directory.
    pub fn directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = Some(directory.into());
        self
    }

    /// Append one argument. The first argument added is the program.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set one environment override. Later values replace earlier ones.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set several environment overrides.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Build the command.
    pub fn build(self) -> Result<Command> {
        if self.args.is_empty() {
            return Err(RigError::Configuration(
                "command has no program".to_string(),
            ));
        }
        let directory = match self.directory {
            Some(dir) => dir,
            None => std::env::current_dir()?,
        };
        Ok(Command {
            id: Uuid::new_v4(),
            directory,
            args: self.args,
            env: self.env,
            stdout: LineBuffer::default(),
            stderr: LineBuffer::default(),
            executed: false,
        })
    }
}

/// Read `reader` to EOF, appending each `\n`-terminated line to `sink`.
///
/// A final line without a trailing newline is kept.
async fn drain_lines<R>(reader: R, sink: LineBuffer) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(());
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
        }
        let line = String::from_utf8_lossy(&buf).into_owned();
        sink.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line);
    }
}

fn snapshot(lines: &LineBuffer) -> Vec<String> {
    lines.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    -1
}
