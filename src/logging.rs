use std::path::Path;
use tracing::{info, Level};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::error::{Result, UpmuxError};

pub const LOG_FILE: &str = "upmux.log";

/// Append-only run log writer
///
/// Lines are written on a worker thread; they reach the file once the
/// returned guard is dropped.
pub fn file_writer(log_dir: &Path) -> Result<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(log_dir)?;
    Ok(non_blocking(rolling::never(log_dir, LOG_FILE)))
}

/// Setup logging to both console and file
///
/// Keep the guard alive until the process is about to exit.
pub fn init(config: &Config, verbose: bool) -> Result<WorkerGuard> {
    let log_dir = config.state_path(&config.output.log_dir);
    let (file, guard) = file_writer(&log_dir)?;

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let file_layer = fmt::layer()
        .with_writer(file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false); // No ANSI colors in file

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| UpmuxError::Config(format!("Failed to initialize logging: {}", e)))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join(LOG_FILE).display()
    );

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::error;

    #[test]
    fn dropping_the_guard_flushes_queued_lines() {
        let dir = tempfile::tempdir().unwrap();
        let (file, guard) = file_writer(&dir.path().join("log")).unwrap();
        let subscriber = tracing_subscriber::registry()
            .with(fmt::layer().with_writer(file).with_ansi(false));

        tracing::subscriber::with_default(subscriber, || {
            for n in 0..200 {
                error!("rclone failed: attempt {}", n);
            }
        });
        drop(guard);

        let log = std::fs::read_to_string(dir.path().join("log").join(LOG_FILE)).unwrap();
        assert!(log.contains("rclone failed: attempt 0"));
        assert!(log.contains("rclone failed: attempt 199"));
    }
}
