//! buildrig - hermetic build tool invocation CLI
//!
//! The `buildrig` command runs a Bazel-compatible build tool against a
//! workspace and inspects what it produced.
//!
//! ## Commands
//!
//! - `run`: Invoke the tool with hermetic startup flags and print a report
//! - `events`: Decode a build event file into artifacts and test results
//! - `cache put`: Add prefetched archives to a repository cache
//! - `cache freeze`: Make a repository cache read-only

use anyhow::{bail, Context, Result};
use buildrig_core::config::{DEFAULT_MAX_IDLE_SECS, ENV_SCRATCH_DIR};
use buildrig_core::{EventStream, FreezeOutcome, InvocationBuilder, TestResultView};
use clap::{Parser, Subcommand};
use repo_cache::{Digest, RepositoryCache};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "buildrig")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Hermetic build tool invocation harness", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the build tool against a workspace and print the invocation report
    Run {
        /// Build tool binary
        #[arg(long, env = "BUILDRIG_TOOL")]
        tool: PathBuf,

        /// Workspace root (default: current directory)
        #[arg(long, default_value = ".")]
        workspace: PathBuf,

        /// Output user root (default: <scratch>/output_user_root)
        #[arg(long)]
        output_user_root: Option<PathBuf>,

        /// Repository cache root to pass to the tool
        #[arg(long)]
        cache: Option<PathBuf>,

        /// Files to add to the cache before running; each name is its SHA-256
        #[arg(long, requires = "cache")]
        prefetch: Vec<PathBuf>,

        /// Leave the cache writable
        #[arg(long)]
        no_freeze: bool,

        /// rc file, relative to the workspace (default: none)
        #[arg(long)]
        rc_file: Option<PathBuf>,

        /// Working directory, relative to the workspace
        #[arg(long)]
        working_directory: Option<PathBuf>,

        /// Environment override as KEY=VALUE
        #[arg(long = "env", value_parser = parse_env_pair)]
        env: Vec<(String, String)>,

        /// Server idle timeout in seconds
        #[arg(long, env = "BUILDRIG_MAX_IDLE_SECS", default_value_t = DEFAULT_MAX_IDLE_SECS)]
        max_idle_secs: u32,

        /// Exit code the tool must return
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        expect_exit: i32,

        /// Tool arguments; put `--` before them
        #[arg(last = true, required = true)]
        args: Vec<String>,
    },

    /// Decode a build event file and print its artifacts and test results as JSON
    Events {
        /// Build event file (length-delimited BuildEvent records)
        file: PathBuf,
    },

    /// Manage a repository cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Add files to the cache; each file name must be its SHA-256 digest
    Put {
        /// Cache root
        #[arg(long)]
        root: PathBuf,

        /// Recompute each digest and reject mismatches
        #[arg(long)]
        verify: bool,

        /// Files to add
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Drop write permission on the cache entries
    Freeze {
        /// Cache root
        #[arg(long)]
        root: PathBuf,
    },
}

#[derive(Debug, Serialize)]
struct EventsSummary {
    events: usize,
    artifacts: BTreeMap<String, PathBuf>,
    test_results: BTreeMap<String, TestResultView>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    buildrig_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            tool,
            workspace,
            output_user_root,
            cache,
            prefetch,
            no_freeze,
            rc_file,
            working_directory,
            env,
            max_idle_secs,
            expect_exit,
            args,
        } => {
            let mut builder = InvocationBuilder::new(
                &tool,
                std::path::absolute(&workspace)?,
                output_user_root.unwrap_or_else(default_output_user_root),
                args,
            )
            .with_max_idle_secs(max_idle_secs);
            if let Some(root) = cache {
                let cache = prepare_cache(&root, &prefetch, !no_freeze)?;
                builder = builder.with_cache(&cache);
            }
            if let Some(rc) = rc_file {
                builder = builder.with_rc_file(rc);
            }
            if let Some(dir) = working_directory {
                builder = builder.in_working_directory(dir);
            }
            for (key, value) in env {
                builder = builder.with_env(key, value);
            }
            cmd_run(builder, expect_exit).await
        }
        Commands::Events { file } => {
            let summary = cmd_events(&file)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Commands::Cache { action } => match action {
            CacheAction::Put {
                root,
                verify,
                files,
            } => {
                for (digest, file) in cmd_cache_put(&root, &files, verify)? {
                    println!("{}  {}", digest, file.display());
                }
                Ok(())
            }
            CacheAction::Freeze { root } => cmd_cache_freeze(&root),
        },
    }
}

/// Run the tool, print its report, and fail unless it exited as expected.
async fn cmd_run(builder: InvocationBuilder, expect_exit: i32) -> Result<()> {
    let result = builder.run().await.context("Failed to run build tool")?;
    println!("{result}");

    if result.exit_code() != expect_exit {
        bail!(
            "build tool exited with {} (expected {})",
            result.exit_code(),
            expect_exit
        );
    }
    Ok(())
}

/// Decode an event file into its derived maps.
fn cmd_events(file: &Path) -> Result<EventsSummary> {
    let stream =
        EventStream::read(file).context(format!("Failed to decode event file {:?}", file))?;
    Ok(EventsSummary {
        events: stream.len(),
        artifacts: stream.artifacts()?,
        test_results: stream.test_results()?,
    })
}

/// Add `files` to the cache at `root`.
fn cmd_cache_put(root: &Path, files: &[PathBuf], verify: bool) -> Result<Vec<(Digest, PathBuf)>> {
    let cache = RepositoryCache::new(root);
    files
        .iter()
        .map(|file| {
            let digest = if verify {
                cache.put_verified(file)
            } else {
                cache.put(file)
            }
            .context(format!("Failed to add {:?} to the cache", file))?;
            Ok((digest, file.clone()))
        })
        .collect()
}

/// Freeze the cache at `root` and print the outcome.
fn cmd_cache_freeze(root: &Path) -> Result<()> {
    let cache = RepositoryCache::new(root);
    let outcome = cache.freeze();
    buildrig_core::emit_cache_frozen(root, &outcome);
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if let FreezeOutcome::Failed { path, reason } = outcome {
        bail!("Failed to freeze {:?}: {}", path, reason);
    }
    Ok(())
}

fn prepare_cache(root: &Path, prefetch: &[PathBuf], freeze: bool) -> Result<RepositoryCache> {
    let cache = RepositoryCache::new(root);
    for (digest, file) in cmd_cache_put(root, prefetch, true)? {
        info!("Prefetched {} from {:?}", digest, file);
    }
    if freeze {
        let outcome = cache.freeze();
        buildrig_core::emit_cache_frozen(root, &outcome);
    }
    Ok(cache)
}

fn default_output_user_root() -> PathBuf {
    std::env::var_os(ENV_SCRATCH_DIR)
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("buildrig"))
        .join("output_user_root")
}

fn parse_env_pair(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{s}'")),
    }
}
