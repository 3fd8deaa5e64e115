//! Typed failures of the coordinator core.
//!
//! Plumbing inside modules uses `anyhow::Result`; the types below are the ones
//! that cross a component boundary (handle outcome, pool admission, config).

use std::fmt;
use thiserror::Error;

/// Which step of a Try invocation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionStage {
    /// The remote call itself returned an error.
    Invoke,
    /// The reply could not be decoded into a transaction context.
    Decode,
    /// The task body panicked.
    Panic,
}

impl fmt::Display for ActionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionStage::Invoke => "invoke",
            ActionStage::Decode => "decode",
            ActionStage::Panic => "panic",
        };
        f.write_str(s)
    }
}

/// A Try invocation failed. Carried by the handle's `Failed` state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("try action `{operation}` failed at {stage}: {cause}")]
pub struct ActionFailure {
    pub operation: String,
    pub stage: ActionStage,
    /// Rendered error chain of the underlying cause.
    pub cause: String,
}

impl ActionFailure {
    pub fn new(operation: impl Into<String>, stage: ActionStage, cause: &anyhow::Error) -> Self {
        Self {
            operation: operation.into(),
            stage,
            cause: format!("{cause:#}"),
        }
    }
}

/// Terminal non-success outcome of a `TryHandle`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TryError {
    #[error(transparent)]
    Action(#[from] ActionFailure),

    #[error("try action `{operation}` was cancelled")]
    Cancelled { operation: String },
}

impl TryError {
    pub fn operation(&self) -> &str {
        match self {
            TryError::Action(a) => &a.operation,
            TryError::Cancelled { operation } => operation,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TryError::Cancelled { .. })
    }
}

/// Raised by `CancelToken::checkpoint` once cancellation was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("interrupted by cancellation request")]
pub struct Interrupted;

/// Pool admission failures. Returned from `submit`, never stored in a handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("try action `{operation}` rejected: no idle worker and pool at max ({workers}/{max})")]
    Rejected {
        operation: String,
        workers: usize,
        max: usize,
    },

    #[error("try action `{operation}` rejected: dispatcher is shut down")]
    ShutDown { operation: String },

    #[error("try action `{operation}` rejected: cannot spawn worker: {cause}")]
    Spawn { operation: String, cause: String },
}

/// Failure inside `ActivityLogger::persist`. Logged and recorded on the
/// context, never propagated to the caller.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("invalid snapshot header for activity `{activity}`: {reason}")]
    Header { activity: String, reason: String },

    #[error("serialize context `{activity}` with {codec}: {cause:#}")]
    Serialize {
        activity: String,
        codec: &'static str,
        cause: anyhow::Error,
    },

    #[error("write snapshot of `{activity}`: {cause:#}")]
    Io {
        activity: String,
        cause: anyhow::Error,
    },
}

/// Per-handle teardown failure. Logged; remaining teardown continues.
#[derive(Debug, Error)]
#[error("shutdown of `{operation}` failed: {cause}")]
pub struct ShutdownFailure {
    pub operation: String,
    pub cause: String,
}

/// Construction-time misconfiguration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("try_max_thread_pool_size must be >= 1 (got {0})")]
    ZeroMaxPool(usize),

    #[error("try_thread_pool_size ({core}) exceeds try_max_thread_pool_size ({max})")]
    CoreAboveMax { core: usize, max: usize },

    #[error("buffer_size_quota must be > 0")]
    ZeroQuota,

    #[error("idle_timeout_secs must be > 0")]
    ZeroIdleTimeout,

    #[error("invalid log_file_prefix `{0}`: must be non-empty and contain no path separators")]
    BadPrefix(String),
}
