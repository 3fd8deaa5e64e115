//! Centralized configuration and builder for the coordinator core.
//!
//! Goals:
//! - Single place to collect tunables instead of scattering env lookups.
//! - HulkConfig::from_env() reads HULK_* variables on top of the defaults.
//! - CoordinatorBuilder returns a HulkConfig, which Coordinator consumes.
//!
//! Defaults:
//! - try_thread_pool_size = 4, try_max_thread_pool_size = 64
//! - idle_timeout_secs = 10 (workers above the core size retire after this)
//! - buffer_size_quota = 8 MiB per log file before rotation
//! - snapshot_fsync = false (page cache only; set true for sync_data per write)

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Prefix of every activity log file: `<prefix>.<group>_<branch>`.
pub const DEFAULT_LOG_FILE_PREFIX: &str = "hulk_tx";
/// Default rotation quota (bytes).
pub const DEFAULT_BUFFER_SIZE_QUOTA: u64 = 8 * 1024 * 1024;

/// Top-level configuration of the Try dispatcher and the activity log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HulkConfig {
    /// Workers kept alive even when idle.
    /// Env: HULK_TRY_POOL_SIZE (default 4)
    pub try_thread_pool_size: usize,

    /// Upper bound on concurrently running Try calls; beyond it submit rejects.
    /// Env: HULK_TRY_MAX_POOL_SIZE (default 64)
    pub try_max_thread_pool_size: usize,

    /// Idle timeout for workers above the core size, seconds.
    /// Env: HULK_TRY_IDLE_TIMEOUT_SECS (default 10)
    pub idle_timeout_secs: u64,

    /// Directory holding activity log files and the LOCK file.
    /// Env: HULK_LOG_DIR (default "./hulk-log")
    pub log_dir: PathBuf,

    /// Log file name prefix.
    /// Env: HULK_LOG_PREFIX (default "hulk_tx")
    pub log_file_prefix: String,

    /// Max bytes per log file before rotation.
    /// Env: HULK_LOG_QUOTA_BYTES (default 8 MiB)
    pub buffer_size_quota: u64,

    /// How long a graceful shutdown waits for in-flight Try calls.
    /// Env: HULK_SHUTDOWN_TIMEOUT_MS (default 30000)
    pub shutdown_timeout_ms: u64,

    /// sync_data after every snapshot append.
    /// Env: HULK_SNAPSHOT_FSYNC (default false; "1|true|on|yes" => true)
    pub snapshot_fsync: bool,
}

impl Default for HulkConfig {
    fn default() -> Self {
        Self {
            try_thread_pool_size: 4,
            try_max_thread_pool_size: 64,
            idle_timeout_secs: 10,
            log_dir: PathBuf::from("./hulk-log"),
            log_file_prefix: DEFAULT_LOG_FILE_PREFIX.to_string(),
            buffer_size_quota: DEFAULT_BUFFER_SIZE_QUOTA,
            shutdown_timeout_ms: 30_000,
            snapshot_fsync: false,
        }
    }
}

fn env_flag(s: &str) -> bool {
    let s = s.trim().to_ascii_lowercase();
    s == "1" || s == "true" || s == "on" || s == "yes"
}

impl HulkConfig {
    /// Load configuration from HULK_* environment variables over the defaults.
    /// Unparsable values are ignored (the default stays).
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("HULK_TRY_POOL_SIZE") {
            if let Ok(n) = v.trim().parse::<usize>() {
                cfg.try_thread_pool_size = n;
            }
        }
        if let Ok(v) = std::env::var("HULK_TRY_MAX_POOL_SIZE") {
            if let Ok(n) = v.trim().parse::<usize>() {
                cfg.try_max_thread_pool_size = n;
            }
        }
        if let Ok(v) = std::env::var("HULK_TRY_IDLE_TIMEOUT_SECS") {
            if let Ok(n) = v.trim().parse::<u64>() {
                cfg.idle_timeout_secs = n;
            }
        }
        if let Ok(v) = std::env::var("HULK_LOG_DIR") {
            let s = v.trim();
            if !s.is_empty() {
                cfg.log_dir = PathBuf::from(s);
            }
        }
        if let Ok(v) = std::env::var("HULK_LOG_PREFIX") {
            let s = v.trim();
            if !s.is_empty() {
                cfg.log_file_prefix = s.to_string();
            }
        }
        if let Ok(v) = std::env::var("HULK_LOG_QUOTA_BYTES") {
            if let Ok(n) = v.trim().parse::<u64>() {
                cfg.buffer_size_quota = n;
            }
        }
        if let Ok(v) = std::env::var("HULK_SHUTDOWN_TIMEOUT_MS") {
            if let Ok(n) = v.trim().parse::<u64>() {
                cfg.shutdown_timeout_ms = n;
            }
        }
        if let Ok(v) = std::env::var("HULK_SNAPSHOT_FSYNC") {
            cfg.snapshot_fsync = env_flag(&v);
        }

        cfg
    }

    /// Reject configurations that can never work. Called at construction
    /// time so misconfiguration fails at startup, not on the first submit.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.try_max_thread_pool_size == 0 {
            return Err(ConfigError::ZeroMaxPool(self.try_max_thread_pool_size));
        }
        if self.try_thread_pool_size > self.try_max_thread_pool_size {
            return Err(ConfigError::CoreAboveMax {
                core: self.try_thread_pool_size,
                max: self.try_max_thread_pool_size,
            });
        }
        if self.idle_timeout_secs == 0 {
            return Err(ConfigError::ZeroIdleTimeout);
        }
        if self.buffer_size_quota == 0 {
            return Err(ConfigError::ZeroQuota);
        }
        let p = &self.log_file_prefix;
        if p.is_empty() || p.contains('/') || p.contains('\\') {
            return Err(ConfigError::BadPrefix(p.clone()));
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    // Fluent setters (builder-style) to override specific fields.

    pub fn with_pool_sizes(mut self, core: usize, max: usize) -> Self {
        self.try_thread_pool_size = core;
        self.try_max_thread_pool_size = max;
        self
    }

    pub fn with_idle_timeout_secs(mut self, secs: u64) -> Self {
        self.idle_timeout_secs = secs;
        self
    }

    pub fn with_log_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.log_dir = dir.into();
        self
    }

    pub fn with_log_file_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.log_file_prefix = prefix.into();
        self
    }

    pub fn with_buffer_size_quota(mut self, bytes: u64) -> Self {
        self.buffer_size_quota = bytes;
        self
    }

    pub fn with_shutdown_timeout_ms(mut self, ms: u64) -> Self {
        self.shutdown_timeout_ms = ms;
        self
    }

    pub fn with_snapshot_fsync(mut self, on: bool) -> Self {
        self.snapshot_fsync = on;
        self
    }
}

impl fmt::Display for HulkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HulkConfig {{ \
             try_thread_pool_size: {}, \
             try_max_thread_pool_size: {}, \
             idle_timeout_secs: {}, \
             log_dir: {}, \
             log_file_prefix: {}, \
             buffer_size_quota: {}, \
             shutdown_timeout_ms: {}, \
             snapshot_fsync: {} \
             }}",
            self.try_thread_pool_size,
            self.try_max_thread_pool_size,
            self.idle_timeout_secs,
            self.log_dir.display(),
            self.log_file_prefix,
            self.buffer_size_quota,
            self.shutdown_timeout_ms,
            self.snapshot_fsync,
        )
    }
}

/// Lightweight builder that produces a HulkConfig.
/// `Coordinator::builder()` returns this builder.
#[derive(Clone, Debug)]
pub struct CoordinatorBuilder {
    cfg: HulkConfig,
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        // Start from env, then allow overrides.
        Self {
            cfg: HulkConfig::from_env(),
        }
    }
}

impl CoordinatorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a clean default (without reading env).
    pub fn from_default() -> Self {
        Self {
            cfg: HulkConfig::default(),
        }
    }

    pub fn pool_sizes(mut self, core: usize, max: usize) -> Self {
        self.cfg.try_thread_pool_size = core;
        self.cfg.try_max_thread_pool_size = max;
        self
    }

    pub fn idle_timeout_secs(mut self, secs: u64) -> Self {
        self.cfg.idle_timeout_secs = secs;
        self
    }

    pub fn log_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.cfg.log_dir = dir.into();
        self
    }

    pub fn log_file_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.cfg.log_file_prefix = prefix.into();
        self
    }

    pub fn buffer_size_quota(mut self, bytes: u64) -> Self {
        self.cfg.buffer_size_quota = bytes;
        self
    }

    pub fn shutdown_timeout_ms(mut self, ms: u64) -> Self {
        self.cfg.shutdown_timeout_ms = ms;
        self
    }

    pub fn snapshot_fsync(mut self, on: bool) -> Self {
        self.cfg.snapshot_fsync = on;
        self
    }

    /// Finish the builder and obtain the configuration.
    pub fn build(self) -> HulkConfig {
        self.cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = HulkConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.idle_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.log_file_prefix, DEFAULT_LOG_FILE_PREFIX);
    }

    #[test]
    fn invalid_pool_sizing_fails_fast() {
        let cfg = HulkConfig::default().with_pool_sizes(8, 2);
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::CoreAboveMax { core: 8, max: 2 })
        );
        let cfg = HulkConfig::default().with_pool_sizes(0, 0);
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroMaxPool(0)));
        // core = 0 is allowed: every worker is then reclaimable
        assert!(HulkConfig::default().with_pool_sizes(0, 1).validate().is_ok());
    }

    #[test]
    fn quota_and_prefix_checked() {
        let cfg = HulkConfig::default().with_buffer_size_quota(0);
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroQuota));
        let cfg = HulkConfig::default().with_log_file_prefix("a/b");
        assert!(matches!(cfg.validate(), Err(ConfigError::BadPrefix(_))));
        let cfg = HulkConfig::default().with_idle_timeout_secs(0);
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroIdleTimeout));
    }

    #[test]
    fn builder_overrides_defaults() {
        let cfg = CoordinatorBuilder::from_default()
            .pool_sizes(1, 3)
            .buffer_size_quota(100)
            .log_file_prefix("tx")
            .snapshot_fsync(true)
            .build();
        assert_eq!(cfg.try_thread_pool_size, 1);
        assert_eq!(cfg.try_max_thread_pool_size, 3);
        assert_eq!(cfg.buffer_size_quota, 100);
        assert_eq!(cfg.log_file_prefix, "tx");
        assert!(cfg.snapshot_fsync);
        assert!(cfg.to_string().contains("buffer_size_quota: 100"));
    }
}
