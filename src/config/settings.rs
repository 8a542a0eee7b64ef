use std::{net::SocketAddr, path::Path};

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    hub::{PoolConfig, SlowClientPolicy, DEFAULT_CLIENT_QUEUE_CAPACITY},
    logging::{LoggingConfig, LoggingError},
};

/// Префикс переменных окружения.
pub const ENV_PREFIX: &str = "HUBCAST";

/// Ошибки загрузки настроек.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to load configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid setting '{key}': {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error(transparent)]
    Logging(#[from] LoggingError),
}

/// Настройки пула хабов.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubSettings {
    /// Ёмкость исходящей очереди каждого клиента.
    pub client_queue_capacity: usize,
    /// `drop` или `disconnect`.
    pub slow_client_policy: SlowClientPolicy,
}

/// Настройки сервера.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Адрес прослушивания, `ip:port`.
    pub listen_address: String,
    /// Максимальное кол-во одновременных соединений.
    pub max_connections: usize,
    /// Максимальная длина входящей строки в байтах.
    pub max_line_length: usize,
    pub hub: HubSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Settings {
    /// Загружает настройки.
    ///
    /// Порядок источников (каждый следующий перекрывает предыдущий):
    /// значения по умолчанию, файл `path` (если задан), переменные окружения
    /// вида `HUBCAST_HUB__CLIENT_QUEUE_CAPACITY=64`.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut builder = Config::builder()
            .set_default("listen_address", "127.0.0.1:7070")?
            .set_default("max_connections", 1024)?
            .set_default("max_line_length", 64 * 1024)?
            .set_default("hub.client_queue_capacity", DEFAULT_CLIENT_QUEUE_CAPACITY as i64)?
            .set_default("hub.slow_client_policy", "drop")?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let settings: Settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Проверяет значения, которые не может проверить десериализация.
    pub fn validate(&self) -> Result<(), SettingsError> {
        self.listen_address
            .parse::<SocketAddr>()
            .map_err(|e| SettingsError::Invalid {
                key: "listen_address",
                reason: e.to_string(),
            })?;

        let positive = [
            ("max_connections", self.max_connections),
            ("max_line_length", self.max_line_length),
            ("hub.client_queue_capacity", self.hub.client_queue_capacity),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(SettingsError::Invalid {
                    key,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        self.logging.validate()?;
        Ok(())
    }

    /// Параметры пула хабов из настроек.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            client_queue_capacity: self.hub.client_queue_capacity,
            slow_client_policy: self.hub.slow_client_policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{env, io::Write};

    use serial_test::serial;

    use super::*;

    fn clear_env() {
        for (key, _) in env::vars() {
            if key.starts_with("HUBCAST_") {
                env::remove_var(key);
            }
        }
    }

    /// Тест проверяет значения по умолчанию.
    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let settings = Settings::load(None).unwrap();

        assert_eq!(settings.listen_address, "127.0.0.1:7070");
        assert_eq!(settings.max_connections, 1024);
        assert_eq!(settings.hub.client_queue_capacity, DEFAULT_CLIENT_QUEUE_CAPACITY);
        assert_eq!(settings.hub.slow_client_policy, SlowClientPolicy::Drop);
        assert_eq!(settings.logging, LoggingConfig::default());
        assert_eq!(settings.pool_config(), PoolConfig::default());
    }

    /// Тест проверяет, что переменные окружения перекрывают значения по
    /// умолчанию, включая вложенные секции.
    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        env::set_var("HUBCAST_MAX_CONNECTIONS", "10");
        env::set_var("HUBCAST_HUB__CLIENT_QUEUE_CAPACITY", "8");
        env::set_var("HUBCAST_HUB__SLOW_CLIENT_POLICY", "disconnect");

        let settings = Settings::load(None);
        clear_env();
        let settings = settings.unwrap();

        assert_eq!(settings.max_connections, 10);
        assert_eq!(settings.hub.client_queue_capacity, 8);
        assert_eq!(settings.hub.slow_client_policy, SlowClientPolicy::Disconnect);
    }

    /// Тест проверяет загрузку из TOML-файла.
    #[test]
    #[serial]
    fn test_file_source() {
        clear_env();
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
listen_address = "0.0.0.0:9000"

[hub]
client_queue_capacity = 32

[logging]
level = "debug"
format = "json"
"#
        )
        .unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();

        assert_eq!(settings.listen_address, "0.0.0.0:9000");
        assert_eq!(settings.hub.client_queue_capacity, 32);
        assert_eq!(settings.hub.slow_client_policy, SlowClientPolicy::Drop);
        assert_eq!(settings.logging.level, "debug");
        assert_eq!(settings.logging.format, crate::logging::LogFormat::Json);
    }

    /// Тест проверяет, что нулевая ёмкость очереди отвергается.
    #[test]
    #[serial]
    fn test_zero_capacity_is_invalid() {
        clear_env();
        env::set_var("HUBCAST_HUB__CLIENT_QUEUE_CAPACITY", "0");
        let result = Settings::load(None);
        clear_env();

        assert!(matches!(
            result,
            Err(SettingsError::Invalid {
                key: "hub.client_queue_capacity",
                ..
            })
        ));
    }

    /// Тест проверяет, что адрес без порта отвергается.
    #[test]
    #[serial]
    fn test_bad_listen_address() {
        clear_env();
        env::set_var("HUBCAST_LISTEN_ADDRESS", "localhost");
        let result = Settings::load(None);
        clear_env();

        assert!(matches!(
            result,
            Err(SettingsError::Invalid {
                key: "listen_address",
                ..
            })
        ));
    }
}
