use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use hubcast::{init_logging, HubPool, Server, Settings};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "hubcast")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Hubcast - channel broadcast server", long_about = None)]
struct Cli {
    /// Путь к файлу конфигурации (TOML, YAML, JSON)
    #[arg(short, long, env = "HUBCAST_CONFIG", help = "Файл конфигурации")]
    config: Option<PathBuf>,
    /// Адрес прослушивания, перекрывает конфигурацию
    #[arg(short, long, help = "Адрес прослушивания, например 0.0.0.0:7070")]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    if let Some(listen) = cli.listen {
        settings.listen_address = listen;
        settings.validate().context("Invalid --listen address")?;
    }

    let logging = init_logging(&settings.logging).context("Failed to initialize logging")?;

    let pool = HubPool::new(settings.pool_config());
    let server = Server::bind(&settings, pool).await?;

    info!(
        listen = %settings.listen_address,
        queue_capacity = settings.hub.client_queue_capacity,
        slow_client_policy = ?settings.hub.slow_client_policy,
        "hubcast starting"
    );

    let result = server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to listen for Ctrl-C: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await;

    if let Err(e) = &result {
        error!("server stopped with error: {e:#}");
    }
    logging.shutdown();
    result
}
