//! Logging setup.
//!
//! Console output plus a daily rolling file, both with local-time
//! timestamps. Rotated files older than the retention period are removed at
//! startup and once a day afterwards.

mod panic_hook;

pub use panic_hook::install_panic_hook;

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

use crate::{Error, Result};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "pilapse=info,reqwest=warn,tungstenite=warn";

/// Base name of the rolling log file; rotated files get a `.YYYY-MM-DD` suffix.
pub const LOG_FILE_NAME: &str = "pilapse.log";

const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Local-time timestamps.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub dir: PathBuf,
    /// Filter directive; `RUST_LOG` takes precedence when set.
    pub filter: String,
    pub retention_days: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("logs"),
            filter: DEFAULT_LOG_FILTER.to_string(),
            retention_days: 7,
        }
    }
}

fn build_filter(configured: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::try_new(configured).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    })
}

/// Install the global subscriber. Keep the returned guard alive for the
/// lifetime of the process or buffered file output is lost.
pub fn init_logging(config: &LoggingConfig) -> Result<WorkerGuard> {
    std::fs::create_dir_all(&config.dir)
        .map_err(|e| Error::io_path("creating log directory", &config.dir, e))?;

    let file_appender = tracing_appender::rolling::daily(&config.dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(build_filter(&config.filter))
        .with(fmt::layer().with_ansi(true).with_timer(LocalTimer))
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer),
        )
        .try_init()
        .map_err(|e| Error::Other(format!("Failed to set global default subscriber: {e}")))?;

    Ok(guard)
}

/// Date encoded in a rotated log file name, if `name` is one.
fn rotated_log_date(name: &str) -> Option<NaiveDate> {
    let date = name.strip_prefix(LOG_FILE_NAME)?.strip_prefix('.')?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// Delete rotated log files dated before `today - retention_days`.
pub async fn cleanup_old_logs(log_dir: &Path, retention_days: u32, today: NaiveDate) -> Result<usize> {
    let cutoff = today - chrono::Duration::days(i64::from(retention_days));

    let mut entries = tokio::fs::read_dir(log_dir)
        .await
        .map_err(|e| Error::io_path("reading log directory", log_dir, e))?;
    let mut deleted = 0;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| Error::io_path("reading log directory", log_dir, e))?
    {
        let path = entry.path();
        let Some(date) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(rotated_log_date)
        else {
            continue;
        };

        if date < cutoff {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    deleted += 1;
                    debug!(path = %path.display(), "Deleted old log file");
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete old log file"),
            }
        }
    }

    if deleted > 0 {
        info!(count = deleted, "Cleaned up old log files");
    }
    Ok(deleted)
}

/// Run log cleanup now and then daily until `token` is cancelled.
pub fn start_retention_cleanup(config: &LoggingConfig, token: CancellationToken) {
    let log_dir = config.dir.clone();
    let retention_days = config.retention_days;

    tokio::spawn(async move {
        loop {
            if let Err(e) = cleanup_old_logs(&log_dir, retention_days, Local::now().date_naive()).await {
                warn!(error = %e, "Failed to cleanup old logs");
            }

            tokio::select! {
                _ = token.cancelled() => {
                    debug!("Log retention cleanup task shutting down");
                    break;
                }
                _ = tokio::time::sleep(CLEANUP_INTERVAL) => {}
            }
        }
    });
}
