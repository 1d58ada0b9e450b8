//! provides logging helpers

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::{self};
use tracing_subscriber::fmt::layer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry;

/// Environment variable naming a directory for rolling log files.
pub const LOG_PATH_ENV_VAR: &str = "VCORE_LOG_PATH";

const LOG_FILE_PREFIX: &str = "vcore-plugin.log";

fn env_filter() -> filter::EnvFilter {
    filter::EnvFilter::builder()
        .with_default_directive(filter::LevelFilter::INFO.into())
        .from_env_lossy()
}

/// initiate the global tracing subscriber
///
/// Logs always go to stderr. When `log_dir` is given, a daily rotated copy is
/// also written there; keep the returned guard alive until shutdown so that
/// buffered lines get flushed.
pub fn init<P: AsRef<Path>>(log_dir: Option<P>) -> Option<WorkerGuard> {
    let stderr_layer = layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(env_filter());

    let Some(log_dir) = log_dir else {
        registry().with(stderr_layer).init();
        return None;
    };

    match file_appender(log_dir.as_ref()) {
        Ok(appender) => {
            let (file_writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(env_filter());
            registry().with(stderr_layer).with(file_layer).init();
            Some(guard)
        }
        Err(e) => {
            registry().with(stderr_layer).init();
            tracing::warn!(
                "failed to create log appender in {}: {e}, logging to stderr only",
                log_dir.as_ref().display()
            );
            None
        }
    }
}

fn file_appender(
    log_dir: &Path,
) -> Result<RollingFileAppender, tracing_appender::rolling::InitError> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .max_log_files(3)
        .build(log_dir)
}
