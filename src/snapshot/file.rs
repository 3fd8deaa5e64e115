//! SnapshotFileHandle: exclusively owned append target for one persist call.
//!
//! The handle does not lock anything itself: exactly one handle per write
//! attempt, serialized by the logger's shard lock, keeps the cursor safe.
//!
//! A failed write is cut back to its start offset, so a torn block never
//! sits in front of the next append.

use anyhow::{anyhow, Context, Result};
use log::warn;
use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub struct SnapshotFileHandle {
    path: PathBuf,
    file: Option<File>,
    sync_data: bool,
}

impl SnapshotFileHandle {
    /// Open (create if missing) without truncation.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("open snapshot file {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Some(file),
            sync_data: false,
        })
    }

    /// sync_data after every write.
    pub fn with_sync(mut self, on: bool) -> Self {
        self.sync_data = on;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    fn file(&self) -> Result<&File> {
        self.file
            .as_ref()
            .ok_or_else(|| anyhow!("snapshot file {} already closed", self.path.display()))
    }

    /// Current length on disk; appends go here.
    pub fn len(&self) -> Result<u64> {
        Ok(self.file()?.metadata()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Positioned write of the whole buffer at `at`. On failure the file is
    /// truncated back to `at`.
    pub fn write(&mut self, bytes: &[u8], at: u64) -> Result<()> {
        let path = self.path.clone();
        let sync = self.sync_data;
        let f = self
            .file
            .as_mut()
            .ok_or_else(|| anyhow!("snapshot file {} already closed", path.display()))?;
        append_at(f, bytes, at, sync).with_context(|| {
            format!("write {} bytes to {} @{}", bytes.len(), path.display(), at)
        })
    }

    /// Release the file. Returns true only on the call that actually closed it.
    pub fn close(&mut self) -> bool {
        match self.file.take() {
            Some(f) => {
                // flush через drop; ошибки закрытия std не отдаёт
                drop(f);
                true
            }
            None => false,
        }
    }
}

impl Drop for SnapshotFileHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Append target that can be cut back after a partial write.
trait Rollback: Write + Seek {
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;

    fn sync(&mut self) -> io::Result<()> {
        self.flush()
    }
}

impl Rollback for File {
    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

fn append_at<T: Rollback>(t: &mut T, bytes: &[u8], at: u64, sync: bool) -> io::Result<()> {
    t.seek(SeekFrom::Start(at))?;
    let res = t
        .write_all(bytes)
        .and_then(|()| if sync { t.sync() } else { Ok(()) });
    if let Err(e) = res {
        // best effort: если и это не вышло, ошибку записи всё равно вернём
        if let Err(cut) = t.truncate_to(at) {
            warn!("rollback to {} failed: {}", at, cut);
        }
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    static NEXT_ID: AtomicU64 = AtomicU64::new(1);

    fn unique_file(prefix: &str) -> PathBuf {
        let pid = std::process::id();
        let t = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        std::env::temp_dir().join(format!("hulk-file-{prefix}-{pid}-{t}-{id}"))
    }

    #[test]
    fn append_at_len_and_reopen_keeps_data() {
        let p = unique_file("append");
        {
            let mut h = SnapshotFileHandle::open(&p).unwrap();
            assert!(h.is_empty().unwrap());
            h.write(b"abc", 0).unwrap();
            let off = h.len().unwrap();
            h.write(b"de", off).unwrap();
            assert!(h.close());
        }
        let mut h = SnapshotFileHandle::open(&p).unwrap();
        assert_eq!(h.len().unwrap(), 5);
        h.close();
        assert_eq!(std::fs::read(&p).unwrap(), b"abcde");
        let _ = std::fs::remove_file(&p);
    }

    #[test]
    fn close_is_idempotent_and_blocks_writes() {
        let p = unique_file("close");
        let mut h = SnapshotFileHandle::open(&p).unwrap();
        assert!(h.close());
        assert!(!h.close());
        assert!(h.is_closed());
        assert!(h.write(b"x", 0).is_err());
        assert!(h.len().is_err());
        let _ = std::fs::remove_file(&p);
    }

    /// In-memory target that accepts `budget` bytes, then fails.
    struct Flaky {
        buf: io::Cursor<Vec<u8>>,
        budget: usize,
    }

    impl Write for Flaky {
        fn write(&mut self, b: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            let n = b.len().min(self.budget);
            self.budget -= n;
            self.buf.write(&b[..n])
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for Flaky {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.buf.seek(pos)
        }
    }

    impl Rollback for Flaky {
        fn truncate_to(&mut self, len: u64) -> io::Result<()> {
            self.buf.get_mut().truncate(len as usize);
            Ok(())
        }
    }

    #[test]
    fn torn_write_is_cut_back_to_its_offset() {
        let mut t = Flaky {
            buf: io::Cursor::new(Vec::new()),
            budget: 7,
        };
        append_at(&mut t, b"abcd", 0, false).unwrap();
        // only 3 of 6 bytes get through
        assert!(append_at(&mut t, b"efghij", 4, false).is_err());
        assert_eq!(t.buf.get_ref().as_slice(), b"abcd");

        t.budget = 16;
        append_at(&mut t, b"xy", 4, true).unwrap();
        assert_eq!(t.buf.get_ref().as_slice(), b"abcdxy");
    }
}
