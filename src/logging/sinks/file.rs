use std::fs;

use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling::daily};
use tracing_subscriber::{fmt, registry::Registry, Layer};

use crate::logging::{config::LoggingConfig, LoggingError};

/// Файловый layer с ежедневной ротацией и неблокирующей записью.
///
/// `WorkerGuard` нужно держать до завершения процесса, иначе хвост логов
/// потеряется.
pub fn layer_with_config(
    config: &LoggingConfig
) -> Result<(Box<dyn Layer<Registry> + Send + Sync>, WorkerGuard), LoggingError> {
    fs::create_dir_all(&config.log_dir)?;

    let file_appender = daily(&config.log_dir, &config.file_name);
    let (non_blocking_writer, guard) = non_blocking(file_appender);

    let layer = fmt::layer()
        .with_ansi(false)
        .with_target(config.with_target)
        .with_thread_ids(config.with_thread_ids)
        .with_writer(non_blocking_writer)
        .boxed();

    Ok((layer, guard))
}
