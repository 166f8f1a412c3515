use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};
use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Log level configuration
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing Level
    #[must_use]
    pub fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    /// Get default log level based on build configuration
    #[must_use]
    pub fn default_for_build() -> Self {
        #[cfg(debug_assertions)]
        {
            LogLevel::Debug
        }
        #[cfg(not(debug_assertions))]
        {
            LogLevel::Info
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::default_for_build()
    }
}

/// Initialize the logging system
///
/// Sets up tracing with both console and file output.
/// Log files are rotated daily and stored in the given directory.
///
/// # Arguments
/// * `log_dir` - Directory to store log files
/// * `log_level` - Log level configuration
pub fn init_logging(log_dir: &PathBuf, log_level: LogLevel) -> Result<(), String> {
    // Create log directory if it doesn't exist
    std::fs::create_dir_all(log_dir).map_err(|e| format!("Failed to create log directory: {e}"))?;

    // Create a file appender that rotates daily
    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_suffix("uptime-watcher.log") // 2025-10-28.uptime-watcher.log
        .max_log_files(7)
        .build(log_dir)
        .map_err(|e| format!("Failed to create log file appender: {e}"))?;

    // Create a layer that writes to the file
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false) // Disable ANSI colors in file output
        .with_target(true)
        .with_line_number(true);

    // Create a layer that writes to stdout (for dev mode)
    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(true)
        .with_line_number(true);

    // Convert LogLevel to tracing Level
    let level = log_level.to_tracing_level();

    // Create an environment filter; dependency transports stay quiet unless
    // asked for explicitly via RUST_LOG
    let mut env_filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper_util=warn".parse().unwrap())
        .add_directive("reqwest=warn".parse().unwrap())
        .add_directive("trust_dns_resolver=warn".parse().unwrap())
        .add_directive("rustls=warn".parse().unwrap());

    // Default log level for our own crate based on configured level
    let engine_level = format!("uptime_watcher={}", log_level.to_string().to_lowercase());
    env_filter = env_filter.add_directive(engine_level.parse().unwrap());

    // Initialize the subscriber
    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    tracing::info!("Logging initialized at level: {log_level}");
    tracing::info!("Log directory: {}", log_dir.display());

    Ok(())
}
