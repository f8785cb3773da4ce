//! Structured logging for the presence engine
//!
//! Console output on stderr plus daily-rotated JSON log files.
//! Logs are written to: `<config dir>/presence-core/logs/`

pub mod macros;

use std::path::PathBuf;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the logging system
///
/// Creates the log directory and sets up daily rotating log files. Both the
/// orchestrator and the scanner worker process call this; the worker's stdout
/// carries protocol data, so the console layer always writes to stderr.
///
/// Set `RUST_LOG` to control the level (default `info`).
pub fn init_logging() -> Result<PathBuf, Box<dyn std::error::Error>> {
    let log_dir = get_log_directory()?;
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, "presence.log");

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .compact();

    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .json();

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    let init_result = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();

    if let Err(e) = init_result {
        // Tests and embedding hosts may already have installed a subscriber.
        if e.to_string().contains("already been set") {
            return Ok(log_dir);
        }
        return Err(Box::new(e));
    }

    tracing::info!(
        pid = std::process::id(),
        "Logging initialized. Log directory: {}",
        log_dir.display()
    );

    Ok(log_dir)
}

/// Get log directory path
///
/// Returns: `%LOCALAPPDATA%/presence-core/logs` on Windows,
///          `~/.config/presence-core/logs` on Linux/macOS
fn get_log_directory() -> Result<PathBuf, Box<dyn std::error::Error>> {
    let base_dir = if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .ok_or("Could not find APPDATA directory")?
            .join("presence-core")
    } else {
        dirs::config_dir()
            .ok_or("Could not find config directory")?
            .join("presence-core")
    };

    Ok(base_dir.join("logs"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_directory_layout() {
        let log_dir = get_log_directory().expect("Should get log directory");
        assert!(log_dir.to_string_lossy().contains("presence-core"));
        assert!(log_dir.ends_with("logs"));
    }
}
