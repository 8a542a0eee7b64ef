use tracing_subscriber::EnvFilter;

use crate::logging::config::LoggingConfig;

/// Собирает EnvFilter: `RUST_LOG`, если задана, иначе директива из
/// конфигурации.
pub fn build_filter_from_config(config: &LoggingConfig) -> EnvFilter {
    match EnvFilter::try_from_default_env() {
        Ok(env_filter) => env_filter,
        Err(_) => {
            let directive = config.build_filter_directive();
            match EnvFilter::try_new(&directive) {
                Ok(filter) => filter,
                Err(e) => {
                    // Подписчика ещё нет, поэтому только stderr.
                    eprintln!(
                        "Invalid log filter directive from config ('{directive}'): {e}; falling back to 'info'"
                    );
                    EnvFilter::new("info")
                }
            }
        }
    }
}
