//! Repo-Cache: pre-populated repository cache for hermetic builds
//!
//! A test run rebuilds the build tool's repository cache from artifacts it
//! already has on disk, keyed by their sha256 digest, then freezes the tree
//! so that a sandboxed invocation cannot fetch anything that was not
//! inserted up front.
//!
//! The cache is populated during single-threaded setup. After
//! [`RepositoryCache::freeze`] it is treated as immutable and may be shared
//! by any number of concurrent invocations.

pub mod cache;
pub mod digest;
pub mod error;

pub use cache::{FreezeOutcome, RepositoryCache, CACHE_FILENAME, CAS_DIR, KEY_TYPE};
pub use digest::Digest;
pub use error::CacheError;

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
