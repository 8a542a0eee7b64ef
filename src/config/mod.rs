//! Настройки сервера: значения по умолчанию, TOML-файл и переменные
//! окружения `HUBCAST_*`.

pub mod settings;

pub use settings::{HubSettings, Settings, SettingsError};
