//! Log directory lock.
//!
//! Один процесс пишет в каталог журнала: exclusive fs2 advisory lock на
//! `<log_dir>/LOCK`. Снимается в Drop.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

pub const LOCK_FILE_NAME: &str = "LOCK";

pub struct DirLock {
    file: File,
    path: PathBuf,
}

impl DirLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        // unlock errors on drop are ignored; closing the file releases it anyway
        let _ = self.file.unlock();
    }
}

fn lock_file_path(dir: &Path) -> PathBuf {
    dir.join(LOCK_FILE_NAME)
}

fn open_lock_file(dir: &Path) -> Result<File> {
    let path = lock_file_path(dir);
    OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(&path)
        .with_context(|| format!("open lock file {}", path.display()))
}

/// Take the exclusive lock without blocking. Errors if another owner holds it.
pub fn try_lock_dir(dir: &Path) -> Result<DirLock> {
    let file = open_lock_file(dir)?;
    let path = lock_file_path(dir);
    file.try_lock_exclusive()
        .with_context(|| format!("log dir {} is locked by another owner", dir.display()))?;
    Ok(DirLock { file, path })
}

/// True if some owner currently holds the lock. A directory without a LOCK
/// file is reported unlocked and is left untouched.
pub fn is_dir_locked(dir: &Path) -> Result<bool> {
    let path = lock_file_path(dir);
    if !path.exists() {
        return Ok(false);
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&path)
        .with_context(|| format!("open lock file {}", path.display()))?;
    match file.try_lock_shared() {
        Ok(()) => {
            let _ = file.unlock();
            Ok(false)
        }
        Err(_) => Ok(true),
    }
}
