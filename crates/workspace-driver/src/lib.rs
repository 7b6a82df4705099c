//! buildrig workspace driver
//!
//! Provides the per-test scaffolding around a build tool invocation:
//! - Creates scratch workspaces under the run's scratch root
//! - Copies inputs out of the runfiles tree
//! - Provisions tool binaries once per run and builds invocations wired to
//!   the shared repository cache

pub mod context;
pub mod driver;
pub mod error;

// Re-export key types
pub use context::{RigContext, CACHE_DIR, OUTPUT_USER_ROOT_DIR};
pub use driver::{WorkspaceDriver, WORKSPACE_FILE};
pub use error::{DriverError, Result};
