use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};

use hulk_core::context::{ActivityId, TransactionContext};
use hulk_core::logger::ActivityLogger;
use hulk_core::serializer::{JsonSerializer, Serializer};
use hulk_core::snapshot::{read_blocks, Quota, QuotaRule};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    let base = std::env::temp_dir();
    base.join(format!("hulktest-close-{prefix}-{pid}-{t}-{id}"))
}

/// JSON codec that fails on the listed (1-based) serialize calls.
struct Faulty {
    calls: AtomicUsize,
    fail_on: Vec<usize>,
}

impl Faulty {
    fn new(fail_on: &[usize]) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_on: fail_on.to_vec(),
        }
    }
}

impl Serializer for Faulty {
    fn name(&self) -> &'static str {
        "faulty-json"
    }

    fn serialize(&self, ctx: &TransactionContext) -> Result<Vec<u8>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on.contains(&n) {
            return Err(anyhow!("injected failure on call {n}"));
        }
        JsonSerializer.serialize(ctx)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<TransactionContext> {
        JsonSerializer.deserialize(bytes)
    }

    fn decode_block(&self, buf: &[u8]) -> Result<Option<(TransactionContext, usize)>> {
        JsonSerializer.decode_block(buf)
    }
}

#[test]
fn every_opened_handle_is_closed_once() -> Result<()> {
    let root = unique_root("faulty");
    fs::create_dir_all(&root)?;
    let rule = Arc::new(QuotaRule::new(&root, Quota::new(1 << 20)));
    let logger = ActivityLogger::new("tx", rule, Arc::new(Faulty::new(&[3, 7])));
    let id = ActivityId::new("ship", "1")?;

    let mut errors = Vec::new();
    for i in 0..10 {
        let mut ctx = TransactionContext::new(id.clone(), serde_json::json!({ "step": i }));
        let loc = logger.persist(&mut ctx);
        if loc.is_none() {
            errors.push(ctx.last_error().map(str::to_string));
        }
        // after every call, succeeded or not, nothing is left open
        assert_eq!(logger.stats().open_handles(), 0);
    }

    let st = logger.stats();
    assert_eq!(st.attempts, 10);
    assert_eq!(st.written, 8);
    assert_eq!(st.failed, 2);
    assert_eq!(st.handles_opened, st.handles_closed);
    assert!(st.handles_opened >= 10);

    assert_eq!(errors.len(), 2);
    for e in &errors {
        let e = e.as_deref().unwrap_or_default();
        assert!(e.contains("ship_1"), "{e}");
        assert!(e.contains("faulty-json"), "{e}");
    }

    // the failed attempts left no bytes behind
    let blocks = read_blocks(&root.join("tx.ship_1"), &JsonSerializer)?;
    assert_eq!(blocks.len(), 8);
    let steps: Vec<u64> = blocks
        .iter()
        .filter_map(|b| b.context.payload.get("step").and_then(|v| v.as_u64()))
        .collect();
    assert_eq!(steps, vec![0, 1, 3, 4, 5, 7, 8, 9]);
    Ok(())
}

#[test]
fn failed_persist_keeps_caller_context_usable() -> Result<()> {
    let root = unique_root("usable");
    fs::create_dir_all(&root)?;
    let rule = Arc::new(QuotaRule::new(&root, Quota::new(1 << 20)));
    let logger = ActivityLogger::new("tx", rule, Arc::new(Faulty::new(&[1])));

    let mut ctx = TransactionContext::new(ActivityId::new("ship", "2")?, serde_json::json!(1));
    assert!(logger.persist(&mut ctx).is_none());
    assert!(ctx.last_error().is_some());

    // next attempt on the same context succeeds; its snapshot carries the error
    let loc = logger.persist(&mut ctx).ok_or_else(|| anyhow!("second persist failed"))?;
    let blocks = read_blocks(&loc.path, &JsonSerializer)?;
    assert_eq!(blocks.len(), 1);
    assert!(blocks[0].context.last_error().is_some());
    assert_eq!(logger.stats().open_handles(), 0);
    Ok(())
}
