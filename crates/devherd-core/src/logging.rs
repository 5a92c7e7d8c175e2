//! Logging configuration using tracing

use std::path::{Path, PathBuf};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::Result;

/// Initialize the logging subsystem
///
/// Logs are written to `~/.local/share/devherd/logs/`.
/// Log level is controlled by the `DEVHERD_LOG` environment variable.
///
/// # Examples
/// ```bash
/// DEVHERD_LOG=debug devherd
/// DEVHERD_LOG=trace devherd
/// ```
pub fn init() -> Result<()> {
    let log_dir = default_log_directory();
    init_with_dir(&log_dir)
}

/// Initialize logging with an explicit log directory
pub fn init_with_dir(log_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, "devherd.log");

    // Default to info, allow override via DEVHERD_LOG
    let env_filter = EnvFilter::try_from_env("DEVHERD_LOG")
        .unwrap_or_else(|_| EnvFilter::new("devherd=info,warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(true)
                .with_line_number(true)
                .with_timer(fmt::time::ChronoLocal::new(
                    "%Y-%m-%d %H:%M:%S%.3f".to_string(),
                )),
        )
        .init();

    tracing::info!("═══════════════════════════════════════════════════════");
    tracing::info!("Device Herd agent starting");
    tracing::info!("Log directory: {}", log_dir.display());
    tracing::info!("═══════════════════════════════════════════════════════");

    Ok(())
}

/// Get the default log directory path
pub fn default_log_directory() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("devherd").join("logs")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_log_directory_ends_with_logs() {
        let dir = default_log_directory();
        assert!(dir.ends_with("devherd/logs") || dir.ends_with("logs"));
    }

    // The global subscriber can only be installed once per process, so this
    // is the single test that calls init.
    #[test]
    fn test_init_creates_log_directory() {
        let tmp = TempDir::new().unwrap();
        let log_dir = tmp.path().join("agent").join("logs");

        init_with_dir(&log_dir).unwrap();

        assert!(log_dir.is_dir());
    }
}
