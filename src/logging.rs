//! Structured logging: console plus a daily rolling file under the data dir.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::data_dir;
use crate::error::{PosError, Result};

const LOG_FILE_PREFIX: &str = "pos";
const MAX_LOG_FILES: usize = 14;
const DEFAULT_FILTER: &str = "info,retail_pos_core=debug";
/// Set to `1` to write the file log as JSON lines.
const JSON_ENV: &str = "RETAIL_POS_LOG_JSON";

pub fn log_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Install the global subscriber. Keep the returned guard alive for the
/// process lifetime; dropping it flushes and stops the file writer.
pub fn init_logging() -> Result<WorkerGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let dir = log_dir();
    fs::create_dir_all(&dir)
        .map_err(|e| PosError::Config(format!("Cannot create log dir {}: {e}", dir.display())))?;
    prune_old_logs(&dir, MAX_LOG_FILES);

    let file_appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let json = std::env::var(JSON_ENV).is_ok_and(|v| v.trim() == "1");
    let text_file_layer = (!json).then(|| {
        fmt::layer()
            .with_writer(non_blocking.clone())
            .with_ansi(false)
            .with_target(true)
    });
    let json_file_layer = json.then(|| fmt::layer().json().with_writer(non_blocking));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .with(text_file_layer)
        .with(json_file_layer)
        .try_init()
        .map_err(|e| PosError::Config(format!("Logging already initialised: {e}")))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_dir = %dir.display(),
        "retail POS core starting"
    );
    Ok(guard)
}

/// Delete rolled log files beyond the newest `keep`.
pub fn prune_old_logs(dir: &Path, keep: usize) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };

    let mut log_files: Vec<(PathBuf, SystemTime)> = entries
        .flatten()
        .filter(|entry| {
            entry.path().is_file()
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| name.starts_with("pos."))
        })
        .map(|entry| {
            let modified = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(UNIX_EPOCH);
            (entry.path(), modified)
        })
        .collect();

    // newest first
    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in log_files.iter().skip(keep) {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to prune log file {}: {e}", path.display());
        }
    }
}
