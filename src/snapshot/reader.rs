//! snapshot/reader: read-only inspection of a shard's log files.
//!
//! Used by the `hulk dump` command and by tests. It decodes blocks, it does
//! not interpret them: no transaction is resolved or replayed here.

use anyhow::{Context, Result};
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

use super::SnapshotHeader;
use crate::context::TransactionContext;
use crate::serializer::Serializer;

/// One decoded block of a log file.
#[derive(Debug, Clone)]
pub struct SnapshotBlock {
    pub offset: u64,
    pub len: u64,
    pub context: TransactionContext,
}

/// All generation files of a shard, ordered by generation.
pub fn list_generations(dir: &Path, header: &SnapshotHeader) -> Result<Vec<(u32, PathBuf)>> {
    let base = header.file_name();
    let mut out = Vec::new();
    let rd = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(e).with_context(|| format!("read_dir {}", dir.display())),
    };
    for entry in rd {
        let entry = entry?;
        let name = entry.file_name();
        let name = match name.to_str() {
            Some(n) => n,
            None => continue,
        };
        if name == base {
            out.push((0, entry.path()));
        } else if let Some(rest) = name.strip_prefix(&base).and_then(|r| r.strip_prefix('.')) {
            if let Ok(gen) = rest.parse::<u32>() {
                if gen > 0 {
                    out.push((gen, entry.path()));
                }
            }
        }
    }
    out.sort_by_key(|(g, _)| *g);
    Ok(out)
}

/// Decode every complete block of `path`. A torn tail ends the scan quietly;
/// a corrupt block is an error naming its offset.
pub fn read_blocks(path: &Path, serializer: &dyn Serializer) -> Result<Vec<SnapshotBlock>> {
    let buf = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let mut pos = 0usize;
    let mut out = Vec::new();
    while pos < buf.len() {
        let decoded = serializer
            .decode_block(&buf[pos..])
            .with_context(|| format!("{} block at offset {} of {}", serializer.name(), pos, path.display()))?;
        match decoded {
            Some((context, used)) => {
                out.push(SnapshotBlock {
                    offset: pos as u64,
                    len: used as u64,
                    context,
                });
                pos += used;
            }
            None => {
                debug!(
                    "snapshot reader: partial tail at off={} of {} ({} bytes), stop",
                    pos,
                    path.display(),
                    buf.len() - pos
                );
                break;
            }
        }
    }
    Ok(out)
}
