//! Structured logging backed by `tracing`.
//!
//! Initializes a global subscriber once: stdout layer plus a daily-rolling
//! file sink under the platform data directory. Log level comes from
//! `RUST_LOG`, falling back to `VELOTRACK_LOG_LEVEL`, then "info".

use std::path::PathBuf;
use std::sync::{Once, OnceLock};

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT_LOGGING: Once = Once::new();
static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

fn resolve_log_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("velotrack")
        .join("logs")
}

fn build_file_appender() -> Option<RollingFileAppender> {
    let log_dir = resolve_log_dir();
    if let Err(err) = std::fs::create_dir_all(&log_dir) {
        eprintln!(
            "[velotrack][WARN] Failed to create log directory {}: {}",
            log_dir.display(),
            err
        );
        return None;
    }
    Some(RollingFileAppender::new(Rotation::DAILY, &log_dir, "velotrack.log"))
}

pub fn init_logging() {
    INIT_LOGGING.call_once(|| {
        let file_layer = build_file_appender().map(|appender| {
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            LOG_GUARD.set(guard).ok();
            fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_timer(UtcTime::rfc_3339())
                .with_writer(non_blocking)
        });

        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| {
                EnvFilter::try_new(
                    std::env::var("VELOTRACK_LOG_LEVEL").unwrap_or_else(|_| "info".into()),
                )
            })
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let stdout_layer = fmt::layer()
            .with_target(true)
            .with_ansi(true)
            .with_timer(UtcTime::rfc_3339());

        let registry = tracing_subscriber::registry().with(filter).with(stdout_layer);
        if let Some(file_layer) = file_layer {
            registry.with(file_layer).init();
        } else {
            registry.init();
        }
    });
}
