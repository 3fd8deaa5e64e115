//! FutureRegistry: outstanding Try handles, so teardown can reach all of them.
//!
//! Append-only until drained. `drain_and_apply` takes the current contents
//! under the lock and applies the function outside it: a handle added
//! concurrently after the take stays registered and is not touched.

use std::sync::Mutex;

use log::warn;

use super::handle::TryHandle;
use crate::error::ShutdownFailure;
use crate::util::lock;

#[derive(Default)]
pub struct FutureRegistry {
    handles: Mutex<Vec<TryHandle>>,
}

/// Result of one drain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Handles taken out of the registry.
    pub drained: usize,
    /// Handles the function reported as changed.
    pub applied: usize,
    /// Handles whose teardown failed (logged).
    pub failed: usize,
}

impl FutureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, handle: TryHandle) {
        lock(&self.handles).push(handle);
    }

    pub fn len(&self) -> usize {
        lock(&self.handles).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.handles).is_empty()
    }

    /// Read-only copy of the current handles.
    pub fn snapshot(&self) -> Vec<TryHandle> {
        lock(&self.handles).clone()
    }

    /// Take everything, apply `f` to each handle, report. A failure (error or
    /// panic) on one handle is logged and the rest are still processed.
    pub fn drain_and_apply<F>(&self, mut f: F) -> DrainReport
    where
        F: FnMut(&TryHandle) -> anyhow::Result<bool>,
    {
        let taken = std::mem::take(&mut *lock(&self.handles));
        let mut report = DrainReport {
            drained: taken.len(),
            ..DrainReport::default()
        };
        for h in &taken {
            let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| f(h)));
            let failure = match res {
                Ok(Ok(true)) => {
                    report.applied += 1;
                    None
                }
                Ok(Ok(false)) => None,
                Ok(Err(e)) => Some(format!("{e:#}")),
                Err(_) => Some("panicked".to_string()),
            };
            if let Some(cause) = failure {
                report.failed += 1;
                let err = ShutdownFailure {
                    operation: h.operation().to_string(),
                    cause,
                };
                warn!("handle #{}: {}", h.id(), err);
            }
        }
        report
    }
}
