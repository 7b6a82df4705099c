//! Structured observability hooks for the invocation lifecycle.
//!
//! This module provides:
//! - An invocation-scoped span via [`invocation_span`], attached to the async
//!   execution with `tracing::Instrument`
//! - An [`InvocationSpan`] RAII guard for synchronous inspection code
//! - Emission functions for key lifecycle events: start, finish, stream
//!   decoded, cache frozen

use tracing::info;
use uuid::Uuid;

/// Span tagged with the invocation id.
pub fn invocation_span(invocation_id: &Uuid) -> tracing::Span {
    tracing::info_span!("buildrig.invocation", invocation_id = %invocation_id)
}

/// RAII guard that enters an invocation-scoped span.
///
/// # Example
///
/// ```ignore
/// let _span = InvocationSpan::enter(&result.invocation_id());
/// let artifacts = result.artifacts()?;
/// ```
pub struct InvocationSpan {
    _span: tracing::span::EnteredSpan,
}

impl InvocationSpan {
    /// Create and enter a span tagged with the invocation id.
    pub fn enter(invocation_id: &Uuid) -> Self {
        Self {
            _span: invocation_span(invocation_id).entered(),
        }
    }
}

/// Emit event: subprocess spawned.
pub fn emit_invocation_started(program: &str, argc: usize) {
    info!(event = "invocation.started", program = %program, argc = argc);
}

/// Emit event: subprocess exited and both streams were drained.
pub fn emit_invocation_finished(exit_code: i32, duration_ms: u64, stdout_lines: usize, stderr_lines: usize) {
    info!(
        event = "invocation.finished",
        exit_code = exit_code,
        duration_ms = duration_ms,
        stdout_lines = stdout_lines,
        stderr_lines = stderr_lines,
    );
}

/// Emit event: build event stream decoded.
pub fn emit_stream_decoded(path: &std::path::Path, events: usize) {
    info!(event = "stream.decoded", path = %path.display(), events = events);
}

/// Emit event: repository cache freeze attempted.
pub fn emit_cache_frozen(root: &std::path::Path, outcome: &repo_cache::FreezeOutcome) {
    if outcome.is_frozen() {
        info!(event = "cache.frozen", root = %root.display(), outcome = ?outcome);
    } else {
        tracing::warn!(event = "cache.frozen", root = %root.display(), outcome = ?outcome);
    }
}
