use anyhow::Result;

use hulk_core::config::HulkConfig;

pub fn exec(json: bool) -> Result<()> {
    let cfg = HulkConfig::from_env();
    cfg.validate()?;

    if json {
        let v = serde_json::json!({
            "try_thread_pool_size": cfg.try_thread_pool_size,
            "try_max_thread_pool_size": cfg.try_max_thread_pool_size,
            "idle_timeout_secs": cfg.idle_timeout_secs,
            "log_dir": cfg.log_dir.display().to_string(),
            "log_file_prefix": cfg.log_file_prefix,
            "buffer_size_quota": cfg.buffer_size_quota,
            "shutdown_timeout_ms": cfg.shutdown_timeout_ms,
            "snapshot_fsync": cfg.snapshot_fsync,
        });
        println!("{}", serde_json::to_string_pretty(&v)?);
        return Ok(());
    }

    println!("{}", cfg);
    Ok(())
}
