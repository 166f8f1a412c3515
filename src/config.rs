//! Engine tuning configuration
//!
//! Every knob has a default so the engine runs with no config file at all.
//! When `engine.toml` exists in the data directory it is loaded on top of
//! the defaults; a file that fails to parse logs a warning and the engine
//! falls back to defaults rather than refusing to start.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Top-level engine configuration
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding the database and log files. `None` means the
    /// caller provides paths explicitly (tests use temp directories).
    pub data_dir: Option<PathBuf>,
    pub scheduler: SchedulerTuning,
    pub history: HistoryTuning,
    pub cache: CacheTuning,
    pub events: EventBusTuning,
    pub http: HttpTuning,
    pub ssl: SslTuning,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SchedulerTuning {
    /// Floor for any computed delay between checks
    pub min_check_interval_ms: u64,
    /// Cap applied to exponential backoff growth
    pub max_backoff_ms: u64,
    /// Slack added on top of a monitor's timeout before the scheduler
    /// cancels a check
    pub timeout_buffer_ms: u64,
    /// Bounded wait for in-flight checks to settle during shutdown
    pub shutdown_grace_ms: u64,
}

impl Default for SchedulerTuning {
    fn default() -> Self {
        Self {
            min_check_interval_ms: 5_000,
            max_backoff_ms: 3_600_000,
            timeout_buffer_ms: 5_000,
            shutdown_grace_ms: 10_000,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct HistoryTuning {
    /// Per-monitor status history cap when the `historyLimit` setting is
    /// absent from the database
    pub default_limit: u32,
}

impl Default for HistoryTuning {
    fn default() -> Self {
        Self { default_limit: 500 }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CacheTuning {
    pub sites_ttl_s: u64,
    pub monitors_ttl_s: u64,
    pub settings_ttl_s: u64,
    pub max_entries: usize,
}

impl Default for CacheTuning {
    fn default() -> Self {
        Self {
            sites_ttl_s: 600,
            monitors_ttl_s: 300,
            settings_ttl_s: 1_800,
            max_entries: 1_024,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct EventBusTuning {
    pub max_listeners_per_event: usize,
    pub max_middleware: usize,
}

impl Default for EventBusTuning {
    fn default() -> Self {
        Self {
            max_listeners_per_event: 50,
            max_middleware: 20,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct HttpTuning {
    /// How much of a response body the keyword check will scan
    pub keyword_scan_cap_bytes: usize,
    pub max_redirects: usize,
    /// Token-bucket burst per target host
    pub per_host_burst: u32,
    /// Token-bucket refill rate per target host
    pub per_host_refill_per_s: f64,
}

impl Default for HttpTuning {
    fn default() -> Self {
        Self {
            keyword_scan_cap_bytes: 1024 * 1024,
            max_redirects: 10,
            per_host_burst: 5,
            per_host_refill_per_s: 1.0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SslTuning {
    /// Certificates expiring within this many days report `down`
    pub expiry_warning_days: u32,
}

impl Default for SslTuning {
    fn default() -> Self {
        Self {
            expiry_warning_days: 30,
        }
    }
}

/// Name of the optional tuning file inside the data directory
pub const CONFIG_FILE_NAME: &str = "engine.toml";

fn try_load_config(path: &Path) -> Result<EngineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file from {}", path.display()))?;
    toml::from_str::<EngineConfig>(&content)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))
}

/// Load the engine config from `<data_dir>/engine.toml`, falling back to
/// defaults when the file is missing or unparseable
#[must_use]
pub fn load_config(data_dir: &Path) -> EngineConfig {
    let path = data_dir.join(CONFIG_FILE_NAME);
    if !path.exists() {
        tracing::debug!("No config file at {}; using defaults", path.display());
        let mut config = EngineConfig::default();
        config.data_dir = Some(data_dir.to_path_buf());
        return config;
    }

    match try_load_config(&path) {
        Ok(mut config) => {
            tracing::info!("Config loaded from {}", path.display());
            config.data_dir.get_or_insert_with(|| data_dir.to_path_buf());
            config
        }
        Err(e) => {
            tracing::warn!("Failed to load config ({e:#}); using defaults");
            let mut config = EngineConfig::default();
            config.data_dir = Some(data_dir.to_path_buf());
            config
        }
    }
}
