//! Async Try dispatch.
//!
//! Разделение:
//! - handle.rs   : TryHandle (слот результата) и CancelToken.
//! - task.rs     : Invocation / TryTask: удалённый вызов + декодирование ответа.
//! - pool.rs     : WorkerPool: core/max, передача без очереди, idle-timeout.
//! - registry.rs : FutureRegistry: все незавершённые хэндлы для остановки.
//! - lifecycle.rs: Lifecycle: graceful / immediate / detach-only.
//!
//! TryDispatcher (здесь) связывает всё вместе: submit -> пул -> хэндл в реестре.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use log::{debug, info, warn};

use crate::config::HulkConfig;
use crate::error::{ActionFailure, ActionStage, ConfigError, DispatchError};
use crate::metrics::{record_try_rejected, record_try_submitted};
use crate::util::{read, write};

pub mod handle;
pub mod lifecycle;
pub mod pool;
pub mod registry;
pub mod task;

pub use handle::{CancelToken, TryHandle, TryStatus};
pub use lifecycle::{Lifecycle, ShutdownMode};
pub use pool::{PoolState, PoolStatus, Rejection, WorkerPool};
pub use registry::{DrainReport, FutureRegistry};
pub use task::{Invocation, RemoteCall, TryTask};

/// Thread-name prefix of Try workers.
pub const TRY_THREAD_NAME: &str = "Try-Thread";

/// A task bound to its handle. Dropped without running (pool stopped with
/// the job still handed off) it cancels the handle, so no handle is left
/// pending forever.
struct BoundTask {
    handle: TryHandle,
    task: Option<TryTask>,
}

impl BoundTask {
    fn run(mut self) {
        let task = match self.task.take() {
            Some(t) => t,
            None => return,
        };
        if !self.handle.start() {
            debug!(
                "try #{} `{}` cancelled before start",
                self.handle.id(),
                self.handle.operation()
            );
            return;
        }
        let token = self.handle.token().clone();
        let outcome = match catch_unwind(AssertUnwindSafe(|| task.run(&token))) {
            Ok(r) => r,
            Err(_) => Err(ActionFailure::new(
                self.handle.operation(),
                ActionStage::Panic,
                &anyhow::anyhow!("try task panicked"),
            )
            .into()),
        };
        if let Err(e) = &outcome {
            warn!("try #{}: {}", self.handle.id(), e);
        }
        if !self.handle.finish(outcome) {
            debug!(
                "try #{} `{}` finished after it was cancelled; result dropped",
                self.handle.id(),
                self.handle.operation()
            );
        }
    }
}

impl Drop for BoundTask {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.handle.cancel_now();
        }
    }
}

/// Submits Try tasks to a bounded pool and tracks their handles.
///
/// `gate` orders admission against teardown: `submit` holds it shared across
/// pool admission and registration, lifecycle calls hold it exclusively while
/// they drain the registry and close admissions. A handle is therefore either
/// registered before the drain or rejected.
pub struct TryDispatcher {
    pool: WorkerPool,
    registry: Arc<FutureRegistry>,
    owns_registry: bool,
    gate: RwLock<()>,
    shutdown_timeout: Duration,
}

impl TryDispatcher {
    pub fn new(cfg: &HulkConfig) -> Result<Self, ConfigError> {
        Self::build(cfg, Arc::new(FutureRegistry::new()), true)
    }

    /// Use an externally owned registry (e.g. shared with a monitor).
    ///
    /// Explicit `Lifecycle` calls still drain the whole registry. Dropping
    /// such a dispatcher only stops its pool: registered handles are left to
    /// the registry's owner.
    pub fn with_registry(
        cfg: &HulkConfig,
        registry: Arc<FutureRegistry>,
    ) -> Result<Self, ConfigError> {
        Self::build(cfg, registry, false)
    }

    fn build(
        cfg: &HulkConfig,
        registry: Arc<FutureRegistry>,
        owns_registry: bool,
    ) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let pool = WorkerPool::new(
            TRY_THREAD_NAME,
            cfg.try_thread_pool_size,
            cfg.try_max_thread_pool_size,
            cfg.idle_timeout(),
        )?;
        Ok(Self {
            pool,
            registry,
            owns_registry,
            gate: RwLock::new(()),
            shutdown_timeout: cfg.shutdown_timeout(),
        })
    }

    /// Hand `task` to a worker and return its handle. Fails fast when no
    /// worker can take it; the handle is registered before returning.
    pub fn submit(&self, task: TryTask) -> Result<TryHandle, DispatchError> {
        let operation = task.operation().to_string();
        let handle = TryHandle::new(operation.clone());
        let bound = BoundTask {
            handle: handle.clone(),
            task: Some(task),
        };

        let admitted = {
            let _gate = read(&self.gate);
            let res = self.pool.execute(Box::new(move || bound.run()));
            if res.is_ok() {
                self.registry.add(handle.clone());
            }
            res
        };

        match admitted {
            Ok(()) => {
                record_try_submitted();
                debug!("try #{} `{}` submitted", handle.id(), operation);
                Ok(handle)
            }
            Err(rej) => {
                record_try_rejected();
                let err = match rej {
                    Rejection::Saturated { workers, max, .. } => DispatchError::Rejected {
                        operation,
                        workers,
                        max,
                    },
                    Rejection::ShutDown { .. } => DispatchError::ShutDown { operation },
                    Rejection::Spawn { cause, .. } => DispatchError::Spawn {
                        operation,
                        cause: cause.to_string(),
                    },
                };
                // the returned job dropped here cancels the unregistered handle
                warn!("{}", err);
                Err(err)
            }
        }
    }

    /// Read-only snapshot of the registered handles.
    pub fn all_handles(&self) -> Vec<TryHandle> {
        self.registry.snapshot()
    }

    pub fn registry(&self) -> &Arc<FutureRegistry> {
        &self.registry
    }

    pub fn pool_status(&self) -> PoolStatus {
        self.pool.status()
    }

    fn cancel_all(&self, mode: ShutdownMode) -> DrainReport {
        let report = self.registry.drain_and_apply(|h| {
            Ok(match mode {
                ShutdownMode::Graceful => h.cancel_graceful(),
                ShutdownMode::Immediate | ShutdownMode::DetachOnly => h.cancel_now(),
            })
        });
        if report.drained > 0 {
            info!(
                "try dispatcher {}: {} handle(s) drained, {} cancelled, {} failed",
                mode, report.drained, report.applied, report.failed
            );
        }
        report
    }
}

impl Lifecycle for TryDispatcher {
    fn shutdown_graceful(&self) {
        let inflight = {
            let _gate = write(&self.gate);
            let inflight = self.registry.snapshot();
            self.cancel_all(ShutdownMode::Graceful);
            if !self.pool.begin_shutdown() {
                return;
            }
            inflight
        };
        // waiting happens outside the gate: late submitters are rejected at once
        if !self.pool.await_termination(self.shutdown_timeout) {
            warn!(
                "try dispatcher: in-flight work outlived {:?}, stopping pool",
                self.shutdown_timeout
            );
            for h in &inflight {
                h.cancel_now();
            }
            self.pool.shutdown_now();
        }
    }

    fn shutdown_immediate(&self) {
        let _gate = write(&self.gate);
        self.cancel_all(ShutdownMode::Immediate);
        self.pool.shutdown_now();
    }

    fn detach_all(&self) {
        let _gate = write(&self.gate);
        self.cancel_all(ShutdownMode::DetachOnly);
    }
}

impl Drop for TryDispatcher {
    fn drop(&mut self) {
        // workers hold no reference to the dispatcher; release them
        if self.owns_registry {
            self.shutdown_immediate();
        } else {
            self.pool.shutdown_now();
        }
    }
}
