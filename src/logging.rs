//! Console + rolling file logging for the collector.
//!
//! Files are written as `<log_dir>/collector.YYYY-MM-DD.log` (or with an hour
//! suffix for hourly rotation). `RUST_LOG` overrides the configured filter.

use serde::Deserialize;
use tracing_appender::non_blocking;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{self, RollingFileAppender};
use tracing_subscriber::{
    fmt::{self, time::ChronoUtc},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

pub const LOG_FILE_PREFIX: &str = "collector";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Daily,
    Hourly,
    Never,
}

/// `[logging]` section of config.toml
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_dir: String,
    /// EnvFilter directives, e.g. "info,apm_collector=debug"
    pub level_filter: String,
    pub rotation: LogRotation,
    pub console_timestamps: bool,
    pub file_json_format: bool,
    /// Log files older than this many days are removed at startup
    pub cleanup_days: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: "logs".to_string(),
            level_filter: "info,apm_collector=info".to_string(),
            rotation: LogRotation::Daily,
            console_timestamps: true,
            file_json_format: true,
            cleanup_days: 7,
        }
    }
}

fn file_appender(config: &LoggingConfig) -> RollingFileAppender {
    let file_name = format!("{}.log", LOG_FILE_PREFIX);
    match config.rotation {
        LogRotation::Daily => rolling::daily(&config.log_dir, file_name),
        LogRotation::Hourly => rolling::hourly(&config.log_dir, file_name),
        LogRotation::Never => rolling::never(&config.log_dir, file_name),
    }
}

fn env_filter(level_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_filter))
}

/// Install console and file layers; keep the returned guard alive so the
/// background writer keeps flushing
pub fn init_dual_logging(
    config: LoggingConfig,
) -> Result<WorkerGuard, Box<dyn std::error::Error + Send + Sync>> {
    std::fs::create_dir_all(&config.log_dir)?;

    let (file_writer, guard) = non_blocking(file_appender(&config));

    let console_timer = if config.console_timestamps {
        ChronoUtc::new("%Y-%m-%d %H:%M:%S%.3f UTC".to_string())
    } else {
        ChronoUtc::new(String::new())
    };
    let console_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true)
        .with_target(true)
        .with_timer(console_timer)
        .with_filter(env_filter(&config.level_filter));

    let file_layer = if config.file_json_format {
        fmt::layer()
            .json()
            .with_writer(file_writer)
            .with_ansi(false)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_timer(ChronoUtc::new("%Y-%m-%dT%H:%M:%S%.3fZ".to_string()))
            .with_filter(env_filter(&config.level_filter))
            .boxed()
    } else {
        fmt::layer()
            .with_writer(file_writer)
            .with_ansi(false)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_timer(ChronoUtc::new("%Y-%m-%d %H:%M:%S%.3f UTC".to_string()))
            .with_filter(env_filter(&config.level_filter))
            .boxed()
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::info!(
        log_dir = %config.log_dir,
        rotation = ?config.rotation,
        json_format = config.file_json_format,
        "📁 Dual logging initialized - console + rotating files"
    );

    Ok(guard)
}

/// Console-only logging for tests and tools
pub fn init_simple_logging() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter("info,apm_collector=info"))
        .try_init()?;
    tracing::info!("🖥️ Simple console logging initialized");
    Ok(())
}

fn is_collector_log(path: &std::path::Path) -> bool {
    path.is_file()
        && path.extension().map(|ext| ext == "log").unwrap_or(false)
        && path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.starts_with(LOG_FILE_PREFIX))
            .unwrap_or(false)
}

/// Collector log files in `log_dir`, oldest name first
pub fn get_current_log_files(log_dir: &str) -> Vec<std::path::PathBuf> {
    let mut files: Vec<_> = std::fs::read_dir(log_dir)
        .map(|entries| {
            entries
                .flatten()
                .map(|entry| entry.path())
                .filter(|path| is_collector_log(path))
                .collect()
        })
        .unwrap_or_default();
    files.sort();
    files
}

/// Remove collector log files not modified in the last `keep_days` days
pub fn cleanup_old_logs(log_dir: &str, keep_days: u32) -> Result<usize, std::io::Error> {
    let cutoff_time =
        std::time::SystemTime::now() - std::time::Duration::from_secs(u64::from(keep_days) * 24 * 3600);

    let mut removed_count = 0;
    for path in get_current_log_files(log_dir) {
        let modified = path.metadata().and_then(|metadata| metadata.modified());
        if let Ok(modified) = modified {
            if modified < cutoff_time && std::fs::remove_file(&path).is_ok() {
                removed_count += 1;
                tracing::debug!("🗑️ Removed old log file: {:?}", path);
            }
        }
    }

    if removed_count > 0 {
        tracing::info!(
            "🧹 Cleaned up {} old log files (older than {} days)",
            removed_count,
            keep_days
        );
    }
    Ok(removed_count)
}

pub fn log_system_info() {
    tracing::info!(
        package_version = env!("CARGO_PKG_VERSION"),
        target_arch = std::env::consts::ARCH,
        target_os = std::env::consts::OS,
        cpu_count = num_cpus::get(),
        "📊 Collector environment"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_logging_config_default() {
        let config = LoggingConfig::default();
        assert_eq!(config.log_dir, "logs");
        assert_eq!(config.level_filter, "info,apm_collector=info");
        assert_eq!(config.rotation, LogRotation::Daily);
        assert!(config.file_json_format);
    }

    #[test]
    fn test_logging_config_from_toml() {
        let config: LoggingConfig = toml::from_str("rotation = \"hourly\"\ncleanup_days = 2").unwrap();
        assert_eq!(config.rotation, LogRotation::Hourly);
        assert_eq!(config.cleanup_days, 2);
        assert_eq!(config.log_dir, "logs");
    }

    #[test]
    fn test_get_current_log_files() {
        let temp_dir = TempDir::new().unwrap();
        let log_dir = temp_dir.path();

        std::fs::write(log_dir.join("collector.2026-01-01.log"), "test").unwrap();
        std::fs::write(log_dir.join("collector.2026-01-02.log"), "test").unwrap();
        std::fs::write(log_dir.join("other.log"), "test").unwrap();
        std::fs::write(log_dir.join("collector.txt"), "test").unwrap();

        let log_files = get_current_log_files(log_dir.to_str().unwrap());
        assert_eq!(log_files.len(), 2);
        assert!(log_files[0].to_string_lossy().contains("2026-01-01"));
    }

    #[test]
    fn test_cleanup_keeps_recent_logs() {
        let temp_dir = TempDir::new().unwrap();
        let log_dir = temp_dir.path();
        std::fs::write(log_dir.join("collector.recent.log"), "recent").unwrap();

        let removed = cleanup_old_logs(log_dir.to_str().unwrap(), 7).unwrap();
        assert_eq!(removed, 0);
        assert_eq!(get_current_log_files(log_dir.to_str().unwrap()).len(), 1);
    }
}
