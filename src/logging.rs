use std::path::PathBuf;
use std::sync::{Once, OnceLock};

use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Structured logging backed by `tracing`.
///
/// Installs a global subscriber once: stderr always, plus a daily-rotated
/// file when a log directory can be created. Filter precedence is
/// `RUST_LOG`, then `ASKDATA_LOG_LEVEL`, then the configured level.

static INIT_LOGGING: Once = Once::new();
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

pub fn resolve_log_dir(cfg: &LoggingConfig) -> PathBuf {
    match &cfg.directory {
        Some(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
        _ => dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("askdata")
            .join("logs"),
    }
}

fn build_file_appender(cfg: &LoggingConfig) -> Option<(RollingFileAppender, PathBuf)> {
    let log_dir = resolve_log_dir(cfg);
    if let Err(err) = std::fs::create_dir_all(&log_dir) {
        eprintln!(
            "[askdata][WARN] Failed to create log directory {}: {}",
            log_dir.display(),
            err
        );
        return None;
    }

    Some((RollingFileAppender::new(Rotation::DAILY, &log_dir, "askdata.log"), log_dir))
}

fn build_filter(cfg: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| {
            EnvFilter::try_new(std::env::var("ASKDATA_LOG_LEVEL").unwrap_or_else(|_| cfg.level.clone()))
        })
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn init_logging(cfg: &LoggingConfig) {
    INIT_LOGGING.call_once(|| {
        let file = if cfg.file { build_file_appender(cfg) } else { None };
        let (file_layer, log_dir) = match file {
            Some((appender, dir)) => {
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                let layer = fmt::layer()
                    .with_ansi(false)
                    .with_target(true)
                    .with_timer(UtcTime::rfc_3339())
                    .with_writer(non_blocking);
                LOG_GUARD.set(guard).ok();
                (Some(layer), Some(dir))
            }
            None => (None, None),
        };

        // stderr keeps stdout clean for the CLI's JSON output
        let console_layer = fmt::layer()
            .with_target(true)
            .with_ansi(true)
            .with_timer(UtcTime::rfc_3339())
            .with_writer(std::io::stderr);

        let registry = tracing_subscriber::registry()
            .with(build_filter(cfg))
            .with(console_layer);
        let installed = match file_layer {
            Some(file_layer) => registry.with(file_layer).try_init(),
            None => registry.try_init(),
        };
        if installed.is_err() {
            // another subscriber (e.g. a test harness) got there first
            return;
        }

        match log_dir {
            Some(dir) => info!(
                "Structured logging initialized. Logs rotate daily under {}",
                dir.display()
            ),
            None => warn!("Structured logging initialized without file sink (console only)"),
        }
    });
}
