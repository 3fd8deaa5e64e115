//! Shutdown contract shared by everything that owns Try work.
//!
//! All three calls are idempotent and tolerate an empty registry and
//! already-terminal handles.

use std::fmt;

pub trait Lifecycle {
    /// Cooperative cancel of every handle, clear the registry, stop the
    /// pool and wait for in-flight work (bounded).
    fn shutdown_graceful(&self);

    /// Force-cancel every handle, clear the registry, stop the pool
    /// without waiting.
    fn shutdown_immediate(&self);

    /// Force-cancel every handle and clear the registry; the pool keeps running.
    fn detach_all(&self);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownMode {
    Graceful,
    Immediate,
    DetachOnly,
}

impl fmt::Display for ShutdownMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ShutdownMode::Graceful => "graceful",
            ShutdownMode::Immediate => "immediate",
            ShutdownMode::DetachOnly => "detach-only",
        };
        f.write_str(s)
    }
}
