use anyhow::{Context, Result};
use std::path::PathBuf;

use hulk_core::config::HulkConfig;
use hulk_core::context::ActivityId;
use hulk_core::lock::is_dir_locked;
use hulk_core::snapshot::{list_generations, SnapshotHeader};

pub fn exec(dir: Option<PathBuf>, activity: String, prefix: Option<String>) -> Result<()> {
    let cfg = HulkConfig::from_env();
    let dir = dir.unwrap_or(cfg.log_dir);
    let prefix = prefix.unwrap_or(cfg.log_file_prefix);

    let id = ActivityId::parse(&activity)?;
    let header = SnapshotHeader::for_activity(&prefix, &id)?;
    let gens = list_generations(&dir, &header)?;

    println!(
        "dir: {} ({})",
        dir.display(),
        if is_dir_locked(&dir)? { "locked" } else { "free" }
    );
    if gens.is_empty() {
        println!("no log files for {}", header.file_name());
        return Ok(());
    }
    let mut total = 0u64;
    for (gen, path) in gens {
        let len = std::fs::metadata(&path)
            .with_context(|| format!("stat {}", path.display()))?
            .len();
        total += len;
        println!("  gen {:>4}  {:>12} B  {}", gen, len, path.display());
    }
    println!("total: {} B", total);
    Ok(())
}
