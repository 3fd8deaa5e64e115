//! ActivityLogger: appends point-in-time snapshots of one activity's context.
//!
//! persist(ctx):
//! 1. header from the activity id (`<prefix>.<group>_<branch>`);
//! 2. under the shard lock: resolve the active file, open a handle;
//! 3. outside the lock: serialize (failure is recorded on the context);
//! 4. under the shard lock: re-resolve for the real block size (rotation),
//!    take the current length as offset and write there;
//! 5. close every handle that was opened, on every path.
//!
//! Step 4 keeps offset acquisition and the write in one critical section, so
//! two persists of the same shard never get the same offset. Locks are per
//! shard file name: different activities never wait on each other. An entry
//! lives in the lock map only while some persist holds it.
//!
//! Failures are logged, counted and recorded in `ctx.runtime.last_error`;
//! they never reach the caller.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, error, info, warn};

use crate::config::HulkConfig;
use crate::context::TransactionContext;
use crate::error::SnapshotError;
use crate::metrics::{record_snapshot_failure, record_snapshot_write};
use crate::serializer::Serializer;
use crate::snapshot::{SnapshotFileHandle, SnapshotHeader, SnapshotLocation, SnapshotRule};
use crate::util::lock;

#[derive(Default)]
struct Counters {
    attempts: AtomicU64,
    written: AtomicU64,
    failed: AtomicU64,
    bytes: AtomicU64,
    handles_opened: AtomicU64,
    handles_closed: AtomicU64,
}

/// Per-logger counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoggerStats {
    pub attempts: u64,
    pub written: u64,
    pub failed: u64,
    pub bytes: u64,
    pub handles_opened: u64,
    pub handles_closed: u64,
}

impl LoggerStats {
    /// Handles opened but not yet released. Zero whenever no persist runs.
    pub fn open_handles(&self) -> u64 {
        self.handles_opened.saturating_sub(self.handles_closed)
    }
}

pub struct ActivityLogger {
    file_prefix: String,
    rule: Arc<dyn SnapshotRule>,
    serializer: Arc<dyn Serializer>,
    sync_data: bool,
    // shard file name -> lock shared by the persists currently on that shard
    shard_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    counters: Counters,
}

impl ActivityLogger {
    pub fn new(
        file_prefix: impl Into<String>,
        rule: Arc<dyn SnapshotRule>,
        serializer: Arc<dyn Serializer>,
    ) -> Self {
        Self {
            file_prefix: file_prefix.into(),
            rule,
            serializer,
            sync_data: false,
            shard_locks: Mutex::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    pub fn from_config(
        cfg: &HulkConfig,
        rule: Arc<dyn SnapshotRule>,
        serializer: Arc<dyn Serializer>,
    ) -> Self {
        Self::new(cfg.log_file_prefix.clone(), rule, serializer).with_sync(cfg.snapshot_fsync)
    }

    pub fn with_sync(mut self, on: bool) -> Self {
        self.sync_data = on;
        self
    }

    pub fn stats(&self) -> LoggerStats {
        let c = &self.counters;
        LoggerStats {
            attempts: c.attempts.load(Ordering::Relaxed),
            written: c.written.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            bytes: c.bytes.load(Ordering::Relaxed),
            handles_opened: c.handles_opened.load(Ordering::Relaxed),
            handles_closed: c.handles_closed.load(Ordering::Relaxed),
        }
    }

    /// Shards with a persist in progress.
    pub fn active_shards(&self) -> usize {
        lock(&self.shard_locks).len()
    }

    fn shard_lock(&self, key: &str) -> Arc<Mutex<()>> {
        lock(&self.shard_locks)
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    fn drop_shard_lock(&self, key: &str, held: Arc<Mutex<()>>) {
        let mut map = lock(&self.shard_locks);
        // map + held: no other persist references it
        if Arc::strong_count(&held) == 2 {
            map.remove(key);
        }
    }

    /// Snapshot `ctx` into its shard log. Returns where the block landed, or
    /// None if the snapshot was skipped (the reason is in `ctx.last_error()`).
    pub fn persist(&self, ctx: &mut TransactionContext) -> Option<SnapshotLocation> {
        info!("Writing transaction snapshot: {}", ctx.activity_id());
        self.counters.attempts.fetch_add(1, Ordering::Relaxed);

        let mut slot: Option<SnapshotFileHandle> = None;
        let res = self.append(ctx, &mut slot);
        if let Some(mut h) = slot.take() {
            self.release(&mut h);
        }

        match res {
            Ok(loc) => {
                self.counters.written.fetch_add(1, Ordering::Relaxed);
                self.counters.bytes.fetch_add(loc.len, Ordering::Relaxed);
                record_snapshot_write(loc.len as usize);
                info!(
                    "Writing transaction snapshot end: {} -> {} @{} (+{})",
                    ctx.activity_id(),
                    loc.path.display(),
                    loc.offset,
                    loc.len
                );
                Some(loc)
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                record_snapshot_failure();
                error!("activity log write failed: {}", e);
                ctx.record_error(&e);
                None
            }
        }
    }

    fn open(&self, path: &Path) -> anyhow::Result<SnapshotFileHandle> {
        let h = SnapshotFileHandle::open(path)?.with_sync(self.sync_data);
        self.counters.handles_opened.fetch_add(1, Ordering::Relaxed);
        Ok(h)
    }

    fn release(&self, h: &mut SnapshotFileHandle) {
        if h.close() {
            self.counters.handles_closed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn append(
        &self,
        ctx: &TransactionContext,
        slot: &mut Option<SnapshotFileHandle>,
    ) -> Result<SnapshotLocation, SnapshotError> {
        let activity = ctx.activity_id().format_string();
        let io = |cause: anyhow::Error| SnapshotError::Io {
            activity: activity.clone(),
            cause,
        };

        let header = SnapshotHeader::for_activity(&self.file_prefix, ctx.activity_id())
            .map_err(|e| SnapshotError::Header {
                activity: activity.clone(),
                reason: format!("{e:#}"),
            })?;

        let key = header.file_name();
        let shard = self.shard_lock(&key);
        let res = self.append_locked(ctx, &header, &shard, slot, &io);
        self.drop_shard_lock(&key, shard);
        res
    }

    fn append_locked(
        &self,
        ctx: &TransactionContext,
        header: &SnapshotHeader,
        shard: &Mutex<()>,
        slot: &mut Option<SnapshotFileHandle>,
        io: &dyn Fn(anyhow::Error) -> SnapshotError,
    ) -> Result<SnapshotLocation, SnapshotError> {
        let activity = ctx.activity_id().format_string();
        {
            let _g = lock(shard);
            let path = self.rule.resolve(header, 0).map_err(io)?;
            *slot = Some(self.open(&path).map_err(io)?);
        }

        let bytes = self
            .serializer
            .serialize(ctx)
            .map_err(|cause| SnapshotError::Serialize {
                activity: activity.clone(),
                codec: self.serializer.name(),
                cause,
            })?;
        if bytes.len() as u64 > self.rule.quota().buffer_size {
            warn!(
                "activity log: {} snapshot of {} B exceeds quota {} B, written to its own file",
                activity,
                bytes.len(),
                self.rule.quota().buffer_size
            );
        }

        let _g = lock(shard);
        let path = self.rule.resolve(header, bytes.len() as u64).map_err(io)?;
        let reopen = match slot.as_ref() {
            Some(h) => h.path() != path,
            None => true,
        };
        if reopen {
            debug!("activity log: {} continues in {}", activity, path.display());
            if let Some(mut old) = slot.take() {
                self.release(&mut old);
            }
            *slot = Some(self.open(&path).map_err(io)?);
        }
        let h = match slot.as_mut() {
            Some(h) => h,
            None => return Err(io(anyhow::anyhow!("no snapshot file for {}", path.display()))),
        };
        let offset = h.len().map_err(io)?;
        h.write(&bytes, offset).map_err(io)?;

        Ok(SnapshotLocation {
            path,
            offset,
            len: bytes.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ActivityId;
    use crate::serializer::JsonSerializer;
    use crate::snapshot::{Quota, QuotaRule};
    use std::path::PathBuf;
    use std::sync::mpsc;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    static NEXT_ID: AtomicU64 = AtomicU64::new(1);

    fn unique_root(prefix: &str) -> PathBuf {
        let pid = std::process::id();
        let t = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let p = std::env::temp_dir().join(format!("hulk-logger-{prefix}-{pid}-{t}-{id}"));
        std::fs::create_dir_all(&p).unwrap();
        p
    }

    #[test]
    fn appends_blocks_back_to_back() {
        let root = unique_root("append");
        let rule = Arc::new(QuotaRule::new(&root, Quota::new(1 << 20)));
        let logger = ActivityLogger::new("tx", rule, Arc::new(JsonSerializer));
        let mut ctx = TransactionContext::new(
            ActivityId::new("g", "1").unwrap(),
            serde_json::json!({"n": 1}),
        );
        let a = logger.persist(&mut ctx).unwrap();
        let b = logger.persist(&mut ctx).unwrap();
        assert_eq!(a.path, root.join("tx.g_1"));
        assert_eq!(a.offset, 0);
        assert_eq!(b.offset, a.len);
        assert!(ctx.last_error().is_none());
        let st = logger.stats();
        assert_eq!(st.written, 2);
        assert_eq!(st.open_handles(), 0);
        assert_eq!(std::fs::metadata(&a.path).unwrap().len(), a.len + b.len);
    }

    #[test]
    fn unwritable_dir_is_swallowed_and_recorded() {
        let root = unique_root("missing").join("no-such-dir");
        let rule = Arc::new(QuotaRule::new(&root, Quota::new(1024)));
        let logger = ActivityLogger::new("tx", rule, Arc::new(JsonSerializer));
        let mut ctx =
            TransactionContext::new(ActivityId::new("g", "2").unwrap(), serde_json::Value::Null);
        assert!(logger.persist(&mut ctx).is_none());
        assert!(ctx.last_error().unwrap().contains("g_2"));
        let st = logger.stats();
        assert_eq!(st.failed, 1);
        assert_eq!(st.handles_opened, 0);
        assert_eq!(st.open_handles(), 0);
    }

    /// Holds the first resolve of shard `slow_1` until released.
    struct GatedRule {
        inner: QuotaRule,
        entered: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl SnapshotRule for GatedRule {
        fn resolve(&self, header: &SnapshotHeader, incoming: u64) -> anyhow::Result<PathBuf> {
            if incoming == 0 && header.file_name().ends_with("slow_1") {
                lock(&self.entered).send(()).unwrap();
                lock(&self.release).recv().unwrap();
            }
            self.inner.resolve(header, incoming)
        }

        fn quota(&self) -> Quota {
            self.inner.quota()
        }
    }

    #[test]
    fn busy_shard_does_not_block_other_shards() {
        let root = unique_root("shards");
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let rule = Arc::new(GatedRule {
            inner: QuotaRule::new(&root, Quota::new(1 << 20)),
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        });
        let logger = Arc::new(ActivityLogger::new("tx", rule, Arc::new(JsonSerializer)));

        let slow = {
            let logger = logger.clone();
            std::thread::spawn(move || {
                let mut ctx = TransactionContext::new(
                    ActivityId::new("slow", "1").unwrap(),
                    serde_json::Value::Null,
                );
                logger.persist(&mut ctx)
            })
        };
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        // slow_1 is parked inside its critical section
        let mut fast = TransactionContext::new(
            ActivityId::new("fast", "1").unwrap(),
            serde_json::json!({"n": 1}),
        );
        let loc = logger.persist(&mut fast).unwrap();
        assert_eq!(loc.path, root.join("tx.fast_1"));
        assert_eq!(logger.active_shards(), 1);

        release_tx.send(()).unwrap();
        let slow_loc = slow.join().unwrap().unwrap();
        assert_eq!(slow_loc.path, root.join("tx.slow_1"));
        assert_eq!(logger.active_shards(), 0);
        assert_eq!(logger.stats().open_handles(), 0);
    }
}
