//! Activity log: write side of the crash-recoverable snapshot files.
//!
//! Разделение:
//! - file.rs  : SnapshotFileHandle: один открытый файл, позиционная запись, close/Drop.
//! - rule.rs  : SnapshotRule/QuotaRule: выбор активного файла шарда и ротация по квоте.
//! - reader.rs: перечисление поколений шарда и разбор блоков (инспекция, не recovery).
//!
//! Раскладка на диске:
//!   <log_dir>/<prefix>.<group>_<branch>       : поколение 0
//!   <log_dir>/<prefix>.<group>_<branch>.<n>   : поколение n (n >= 1), после ротации
//! Файл: конкатенация блоков сериализатора, без собственного заголовка.

use anyhow::{anyhow, Result};

use crate::context::ActivityId;

pub mod file;
pub mod reader;
pub mod rule;

pub use file::SnapshotFileHandle;
pub use reader::{list_generations, read_blocks, SnapshotBlock};
pub use rule::{QuotaRule, SnapshotRule};

/// Identifies the physical log shard of one activity.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SnapshotHeader {
    pub file_prefix: String,
    /// `<group_id>_<branch_id>`
    pub shard_key: String,
}

impl SnapshotHeader {
    /// Derive the header from the activity id's formatted string.
    pub fn for_activity(file_prefix: &str, id: &ActivityId) -> Result<Self> {
        let formatted = id.format_string();
        let parts: Vec<&str> = formatted.split('_').collect();
        if parts.len() != 2 || parts.iter().any(|p| p.is_empty()) {
            return Err(anyhow!("activity id `{formatted}` has no <group>_<branch> shape"));
        }
        Ok(Self {
            file_prefix: file_prefix.to_string(),
            shard_key: format!("{}_{}", parts[0], parts[1]),
        })
    }

    /// Base file name (generation 0).
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.file_prefix, self.shard_key)
    }

    /// File name of rotation generation `gen`.
    pub fn generation_file_name(&self, gen: u32) -> String {
        if gen == 0 {
            self.file_name()
        } else {
            format!("{}.{}", self.file_name(), gen)
        }
    }
}

/// Byte budget of a single log file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Quota {
    pub buffer_size: u64,
}

impl Quota {
    pub fn new(buffer_size: u64) -> Self {
        Self { buffer_size }
    }

    /// Can `incoming` more bytes go into a file currently `current` bytes long?
    /// An empty file accepts any block, so an oversized block never rotates forever.
    #[inline]
    pub fn admits(&self, current: u64, incoming: u64) -> bool {
        current == 0 || (current < self.buffer_size && current + incoming <= self.buffer_size)
    }
}

/// Where one snapshot block landed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SnapshotLocation {
    pub path: std::path::PathBuf,
    pub offset: u64,
    pub len: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_naming() {
        let id = ActivityId::new("grp", "7").unwrap();
        let h = SnapshotHeader::for_activity("hulk_tx", &id).unwrap();
        assert_eq!(h.shard_key, "grp_7");
        assert_eq!(h.file_name(), "hulk_tx.grp_7");
        assert_eq!(h.generation_file_name(0), "hulk_tx.grp_7");
        assert_eq!(h.generation_file_name(3), "hulk_tx.grp_7.3");
    }

    #[test]
    fn quota_admits() {
        let q = Quota::new(100);
        assert!(q.admits(0, 40));
        assert!(q.admits(40, 40));
        assert!(q.admits(80, 20));
        assert!(!q.admits(80, 30));
        assert!(!q.admits(100, 0));
        // oversized block into an empty file
        assert!(q.admits(0, 500));
    }
}
