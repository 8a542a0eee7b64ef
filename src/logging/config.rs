use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

use super::LoggingError;

/// Формат вывода событий.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

/// Конфигурация логирования.
///
/// Загружается вместе с остальными настройками (секция `logging`).
/// `RUST_LOG`, если задана, имеет приоритет над `level`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Уровень (`info`) или полная директива EnvFilter (`hubcast=debug,info`).
    pub level: String,
    pub format: LogFormat,
    pub with_ansi: bool,
    pub with_target: bool,
    pub with_thread_ids: bool,
    /// Писать ли дополнительно в файл с ежедневной ротацией.
    pub file_enabled: bool,
    pub log_dir: PathBuf,
    pub file_name: String,
}

impl LoggingConfig {
    /// Директива для EnvFilter, построенная из `level`.
    ///
    /// Голый уровень применяется к крейтам проекта, а зависимости
    /// остаются на `warn`.
    pub fn build_filter_directive(&self) -> String {
        let level = self.level.trim();
        if level.contains('=') || level.contains(',') {
            level.to_string()
        } else {
            format!("warn,hubcast={level},hubcast_error={level}")
        }
    }

    /// Проверяет, что директива разбирается.
    pub fn validate(&self) -> Result<(), LoggingError> {
        let directive = self.build_filter_directive();
        EnvFilter::try_new(&directive).map_err(|e| LoggingError::InvalidDirective {
            directive,
            reason: e.to_string(),
        })?;
        if self.file_enabled && self.file_name.trim().is_empty() {
            return Err(LoggingError::InvalidDirective {
                directive: "file_name".to_string(),
                reason: "file logging enabled without a file name".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            with_ansi: true,
            with_target: true,
            with_thread_ids: false,
            file_enabled: false,
            log_dir: PathBuf::from("logs"),
            file_name: "hubcast.log".to_string(),
        }
    }
}
