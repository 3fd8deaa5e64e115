//! TryHandle: promise-style outcome slot of one Try invocation.
//!
//! States: Pending -> Running -> {Completed | Failed | Cancelled}, plus
//! Pending -> Cancelled. The slot is written at most once after leaving
//! Running; every later attempt (a late result after a forced cancel, a
//! second cancel) is ignored.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar};
use std::time::{Duration, Instant};

use crate::context::TransactionContext;
use crate::error::{Interrupted, TryError};
use crate::metrics::{record_try_cancelled, record_try_completed, record_try_failed};
use crate::util::lock;

/// Cooperative cancellation flag shared between a handle and its task body.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

#[derive(Default)]
struct TokenInner {
    requested: AtomicBool,
    interrupted: AtomicBool,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Graceful: ask the task to stop at its next checkpoint.
    pub fn request(&self) {
        self.inner.requested.store(true, Ordering::Release);
    }

    /// Forced: the handle is already Cancelled, any result will be dropped.
    pub fn interrupt(&self) {
        self.inner.interrupted.store(true, Ordering::Release);
        self.inner.requested.store(true, Ordering::Release);
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.inner.requested.load(Ordering::Acquire)
    }

    pub fn is_interrupted(&self) -> bool {
        self.inner.interrupted.load(Ordering::Acquire)
    }

    /// Check for cancellation at a yield point inside a task body.
    pub fn checkpoint(&self) -> Result<(), Interrupted> {
        if self.is_cancel_requested() {
            Err(Interrupted)
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("requested", &self.is_cancel_requested())
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TryStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TryStatus::Completed | TryStatus::Failed | TryStatus::Cancelled
        )
    }
}

enum Slot {
    Pending,
    Running,
    Done(Result<TransactionContext, TryError>),
}

impl Slot {
    fn status(&self) -> TryStatus {
        match self {
            Slot::Pending => TryStatus::Pending,
            Slot::Running => TryStatus::Running,
            Slot::Done(Ok(_)) => TryStatus::Completed,
            Slot::Done(Err(TryError::Cancelled { .. })) => TryStatus::Cancelled,
            Slot::Done(Err(_)) => TryStatus::Failed,
        }
    }
}

struct HandleInner {
    id: u64,
    operation: String,
    slot: std::sync::Mutex<Slot>,
    cv: Condvar,
    token: CancelToken,
}

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Shared handle; clones observe the same slot.
#[derive(Clone)]
pub struct TryHandle {
    inner: Arc<HandleInner>,
}

impl TryHandle {
    pub(crate) fn new(operation: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
                operation: operation.into(),
                slot: std::sync::Mutex::new(Slot::Pending),
                cv: Condvar::new(),
                token: CancelToken::new(),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn operation(&self) -> &str {
        &self.inner.operation
    }

    pub fn token(&self) -> &CancelToken {
        &self.inner.token
    }

    pub fn status(&self) -> TryStatus {
        lock(&self.inner.slot).status()
    }

    pub fn is_done(&self) -> bool {
        self.status().is_terminal()
    }

    /// Pending -> Running. False if the handle was cancelled before a worker
    /// picked it up; the task must then not run.
    pub(crate) fn start(&self) -> bool {
        let mut slot = lock(&self.inner.slot);
        match *slot {
            Slot::Pending => {
                *slot = Slot::Running;
                true
            }
            _ => false,
        }
    }

    /// Store the task's outcome. Ignored once terminal.
    pub(crate) fn finish(&self, outcome: Result<TransactionContext, TryError>) -> bool {
        let mut slot = lock(&self.inner.slot);
        if matches!(*slot, Slot::Done(_)) {
            return false;
        }
        match &outcome {
            Ok(_) => record_try_completed(),
            Err(TryError::Cancelled { .. }) => record_try_cancelled(),
            Err(_) => record_try_failed(),
        }
        *slot = Slot::Done(outcome);
        self.inner.cv.notify_all();
        true
    }

    fn cancelled(&self) -> Result<TransactionContext, TryError> {
        Err(TryError::Cancelled {
            operation: self.inner.operation.clone(),
        })
    }

    /// Cooperative cancel. A pending handle becomes Cancelled at once; a
    /// running one gets its token flagged and settles when the task returns.
    /// Returns false if the handle was already terminal.
    pub fn cancel_graceful(&self) -> bool {
        let mut slot = lock(&self.inner.slot);
        match *slot {
            Slot::Pending => {
                self.inner.token.request();
                *slot = Slot::Done(self.cancelled());
                record_try_cancelled();
                self.inner.cv.notify_all();
                true
            }
            Slot::Running => {
                self.inner.token.request();
                true
            }
            Slot::Done(_) => false,
        }
    }

    /// Forced cancel: raise the interrupt flag and settle as Cancelled now.
    /// Returns false if the handle was already terminal.
    pub fn cancel_now(&self) -> bool {
        let mut slot = lock(&self.inner.slot);
        if matches!(*slot, Slot::Done(_)) {
            return false;
        }
        self.inner.token.interrupt();
        *slot = Slot::Done(self.cancelled());
        record_try_cancelled();
        self.inner.cv.notify_all();
        true
    }

    /// Outcome if terminal, without blocking.
    pub fn try_result(&self) -> Option<Result<TransactionContext, TryError>> {
        match &*lock(&self.inner.slot) {
            Slot::Done(r) => Some(r.clone()),
            _ => None,
        }
    }

    /// Block until terminal.
    pub fn wait(&self) -> Result<TransactionContext, TryError> {
        let mut slot = lock(&self.inner.slot);
        loop {
            if let Slot::Done(r) = &*slot {
                return r.clone();
            }
            slot = self
                .inner
                .cv
                .wait(slot)
                .unwrap_or_else(|p| p.into_inner());
        }
    }

    /// Block until terminal or `timeout` elapses (None).
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<TransactionContext, TryError>> {
        let deadline = Instant::now() + timeout;
        let mut slot = lock(&self.inner.slot);
        loop {
            if let Slot::Done(r) = &*slot {
                return Some(r.clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            slot = self
                .inner
                .cv
                .wait_timeout(slot, deadline - now)
                .unwrap_or_else(|p| p.into_inner())
                .0;
        }
    }
}

impl fmt::Debug for TryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TryHandle")
            .field("id", &self.inner.id)
            .field("operation", &self.inner.operation)
            .field("status", &self.status())
            .finish()
    }
}
