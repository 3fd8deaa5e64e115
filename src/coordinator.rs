//! Coordinator: one owner for config, log dir lock, Try dispatcher and the
//! activity log.
//!
//! Открытие:
//! 1) validate конфиг (fail fast);
//! 2) create_dir_all(log_dir) + exclusive LOCK;
//! 3) пул Try и QuotaRule над каталогом.
//!
//! Drop выполняет graceful shutdown.

use std::sync::Arc;

use anyhow::{Context, Result};
use log::{debug, info};

use crate::config::{CoordinatorBuilder, HulkConfig};
use crate::context::{ActivityId, TransactionContext};
use crate::dispatch::{Lifecycle, PoolStatus, TryDispatcher, TryHandle, TryTask};
use crate::error::DispatchError;
use crate::intercept::{Pipeline, SnapshotLayer, TryDispatchLayer};
use crate::lock::{try_lock_dir, DirLock};
use crate::logger::ActivityLogger;
use crate::metrics;
use crate::serializer::{JsonSerializer, Serializer};
use crate::snapshot::{Quota, QuotaRule};

pub struct Coordinator {
    cfg: HulkConfig,
    dispatcher: Arc<TryDispatcher>,
    logger: Arc<ActivityLogger>,
    serializer: Arc<dyn Serializer>,
    _lock: DirLock,
}

impl Coordinator {
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }

    /// Open with the JSON codec for both snapshots and Try replies.
    pub fn open(cfg: HulkConfig) -> Result<Self> {
        Self::open_with_serializer(cfg, Arc::new(JsonSerializer))
    }

    pub fn open_with_serializer(cfg: HulkConfig, serializer: Arc<dyn Serializer>) -> Result<Self> {
        cfg.validate()?;
        std::fs::create_dir_all(&cfg.log_dir)
            .with_context(|| format!("create log dir {}", cfg.log_dir.display()))?;
        let lock = try_lock_dir(&cfg.log_dir)?;

        let dispatcher = Arc::new(TryDispatcher::new(&cfg)?);
        let rule = Arc::new(QuotaRule::new(
            cfg.log_dir.clone(),
            Quota::new(cfg.buffer_size_quota),
        ));
        let logger = Arc::new(ActivityLogger::from_config(
            &cfg,
            rule,
            serializer.clone(),
        ));

        info!("coordinator open: {} (codec {})", cfg, serializer.name());
        Ok(Self {
            cfg,
            dispatcher,
            logger,
            serializer,
            _lock: lock,
        })
    }

    pub fn config(&self) -> &HulkConfig {
        &self.cfg
    }

    pub fn serializer(&self) -> &Arc<dyn Serializer> {
        &self.serializer
    }

    pub fn dispatcher(&self) -> &Arc<TryDispatcher> {
        &self.dispatcher
    }

    pub fn submit(&self, task: TryTask) -> Result<TryHandle, DispatchError> {
        self.dispatcher.submit(task)
    }

    pub fn all_handles(&self) -> Vec<TryHandle> {
        self.dispatcher.all_handles()
    }

    pub fn pool_status(&self) -> PoolStatus {
        self.dispatcher.pool_status()
    }

    /// Activity logger over `log_dir`. Shared, so persists of one shard
    /// through this coordinator are serialized by one shard lock.
    pub fn logger(&self) -> Arc<ActivityLogger> {
        self.logger.clone()
    }

    /// Fresh context for a new branch of `group`: random branch id, status
    /// Trying.
    pub fn begin_activity(
        &self,
        group: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<TransactionContext> {
        let id = ActivityId::generate(group)?;
        debug!("activity {} started", id);
        Ok(TransactionContext::new(id, payload))
    }

    /// Snapshot, then dispatch Try.
    pub fn pipeline(&self) -> Pipeline {
        Pipeline::new()
            .layer(SnapshotLayer::new(self.logger()))
            .layer(TryDispatchLayer::new(
                self.dispatcher.clone(),
                self.serializer.clone(),
            ))
    }
}

impl Lifecycle for Coordinator {
    fn shutdown_graceful(&self) {
        self.dispatcher.shutdown_graceful();
    }

    fn shutdown_immediate(&self) {
        self.dispatcher.shutdown_immediate();
    }

    fn detach_all(&self) {
        self.dispatcher.detach_all();
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.shutdown_graceful();
        let m = metrics::snapshot();
        info!(
            "coordinator closed: {} (try submitted={} rejected={:.1}%, snapshots={} avg={:.0} B, failures={})",
            self.cfg.log_dir.display(),
            m.try_submitted,
            m.reject_ratio() * 100.0,
            m.snapshot_writes,
            m.avg_snapshot_bytes(),
            m.snapshot_failures
        );
    }
}

impl CoordinatorBuilder {
    /// Build the config and open a coordinator with it.
    pub fn open(self) -> Result<Coordinator> {
        Coordinator::open(self.build())
    }
}
