//! SnapshotRule: maps a shard header to the file the next block goes to.
//!
//! QuotaRule:
//! - активное поколение = максимальное существующее для шарда;
//! - если активный файл непуст и (size >= quota или size + incoming > quota): ротация в n+1;
//! - номер последнего поколения кэшируется по имени шарда, диск досматривается вперёд,
//!   так что файлы, созданные другим хэндлом, подхватываются.
//!
//! Concurrent calls for different shards are independent. Calls for the same
//! shard must be serialized by the caller (ActivityLogger's shard lock).

use anyhow::{Context, Result};
use log::debug;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{Quota, SnapshotHeader};
use crate::metrics::record_snapshot_rotation;
use crate::util::lock;

pub trait SnapshotRule: Send + Sync {
    /// Path to append `incoming` bytes to for this shard.
    fn resolve(&self, header: &SnapshotHeader, incoming: u64) -> Result<PathBuf>;

    fn quota(&self) -> Quota;
}

pub struct QuotaRule {
    dir: PathBuf,
    quota: Quota,
    // shard file name -> last known generation
    generations: Mutex<HashMap<String, u32>>,
}

impl QuotaRule {
    pub fn new(dir: impl Into<PathBuf>, quota: Quota) -> Self {
        Self {
            dir: dir.into(),
            quota,
            generations: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_len(path: &Path) -> Result<u64> {
        match fs::metadata(path) {
            Ok(m) => Ok(m.len()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e).with_context(|| format!("stat {}", path.display())),
        }
    }
}

impl SnapshotRule for QuotaRule {
    fn resolve(&self, header: &SnapshotHeader, incoming: u64) -> Result<PathBuf> {
        let key = header.file_name();
        let mut gen = lock(&self.generations).get(&key).copied().unwrap_or(0);

        // Догоняем поколения, появившиеся на диске после кэширования.
        while self.dir.join(header.generation_file_name(gen + 1)).exists() {
            gen += 1;
        }

        let active = self.dir.join(header.generation_file_name(gen));
        let size = Self::file_len(&active)?;
        if !self.quota.admits(size, incoming) {
            gen += 1;
            debug!(
                "snapshot rule: rotate {} (size={}, incoming={}, quota={}) -> generation {}",
                key, size, incoming, self.quota.buffer_size, gen
            );
            record_snapshot_rotation();
        }

        lock(&self.generations).insert(key, gen);
        Ok(self.dir.join(header.generation_file_name(gen)))
    }

    fn quota(&self) -> Quota {
        self.quota
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ActivityId;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    static NEXT_ID: AtomicU64 = AtomicU64::new(1);

    fn unique_root(prefix: &str) -> PathBuf {
        let pid = std::process::id();
        let t = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        let p = std::env::temp_dir().join(format!("hulk-rule-{prefix}-{pid}-{t}-{id}"));
        fs::create_dir_all(&p).unwrap();
        p
    }

    fn header(branch: &str) -> SnapshotHeader {
        SnapshotHeader::for_activity("tx", &ActivityId::new("g", branch).unwrap()).unwrap()
    }

    #[test]
    fn empty_shard_resolves_generation_zero() {
        let root = unique_root("empty");
        let rule = QuotaRule::new(&root, Quota::new(100));
        let p = rule.resolve(&header("1"), 10).unwrap();
        assert_eq!(p, root.join("tx.g_1"));
    }

    #[test]
    fn rotates_when_incoming_overflows() {
        let root = unique_root("rotate");
        let rule = QuotaRule::new(&root, Quota::new(100));
        let h = header("1");
        fs::write(root.join("tx.g_1"), vec![0u8; 80]).unwrap();
        assert_eq!(rule.resolve(&h, 20).unwrap(), root.join("tx.g_1"));
        assert_eq!(rule.resolve(&h, 30).unwrap(), root.join("tx.g_1.1"));
    }

    #[test]
    fn full_file_rotates_even_for_zero_incoming() {
        let root = unique_root("full");
        let rule = QuotaRule::new(&root, Quota::new(50));
        fs::write(root.join("tx.g_1"), vec![0u8; 50]).unwrap();
        assert_eq!(rule.resolve(&header("1"), 0).unwrap(), root.join("tx.g_1.1"));
    }

    #[test]
    fn picks_up_existing_generations_and_isolates_shards() {
        let root = unique_root("scan");
        let rule = QuotaRule::new(&root, Quota::new(100));
        fs::write(root.join("tx.g_1"), vec![0u8; 100]).unwrap();
        fs::write(root.join("tx.g_1.1"), vec![0u8; 100]).unwrap();
        fs::write(root.join("tx.g_1.2"), vec![0u8; 10]).unwrap();
        assert_eq!(rule.resolve(&header("1"), 10).unwrap(), root.join("tx.g_1.2"));
        // другой шард не затронут
        assert_eq!(rule.resolve(&header("2"), 10).unwrap(), root.join("tx.g_2"));
    }
}
