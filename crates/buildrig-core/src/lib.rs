//! buildrig core library
//!
//! Runs a Bazel-compatible build tool as a subprocess and inspects what it
//! did: exit code, output lines, produced artifacts and per-test outputs
//! read from the binary build event stream.
//!
//! ```ignore
//! let result = InvocationBuilder::new(tool, &workspace, &output_root, args)
//!     .with_cache(&cache)
//!     .run_successfully()
//!     .await?;
//! let log = result.test_result()?.content(TEST_LOG)?;
//! ```

pub mod command;
pub mod config;
pub mod error;
pub mod event_stream;
pub mod invocation;
pub mod obs;
pub mod process;
pub mod proto;
pub mod telemetry;
pub mod test_result;

pub use command::{InvocationBuilder, PASSTHROUGH_SEPARATOR};
pub use config::{RigConfig, DEFAULT_MAX_IDLE_SECS};
pub use error::{DecodeError, ErrorKind, Result, RigError};
pub use event_stream::{BuildEvent, EventStream, EventStreamDecoder, FileLocation, OutputFile};
pub use invocation::{list_files, InvocationResult};
pub use process::{Command, CommandBuilder, ProcessOutcome};
pub use proto::TestStatus;
pub use test_result::{
    TestResultView, BASELINE_COVERAGE_DAT, COVERAGE_DAT, TEST_LOG, TEST_XML,
};

pub use repo_cache::{FreezeOutcome, RepositoryCache};

pub use obs::{
    emit_cache_frozen, emit_invocation_finished, emit_invocation_started, emit_stream_decoded,
    InvocationSpan,
};
pub use telemetry::init_tracing;

/// buildrig version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
