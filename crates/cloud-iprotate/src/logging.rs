//! Optional file log for long-running commands.

use anyhow::{Context, Result};
use chrono::Utc;
use std::path::Path;

/// Create a non-blocking writer to `{log_dir}/run-{timestamp}.log`.
///
/// The returned guard flushes the writer on drop and must outlive logging.
pub fn create_log_writer(
    log_dir: &Path,
) -> Result<(
    tracing_appender::non_blocking::NonBlocking,
    tracing_appender::non_blocking::WorkerGuard,
)> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

    let file_name = format!("run-{}.log", Utc::now().format("%Y%m%d-%H%M%S"));
    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    Ok((non_blocking, guard))
}
