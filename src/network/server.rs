use std::{
    future::Future,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{Context, Result};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    select,
    sync::{watch, Semaphore},
    task::JoinSet,
    time::timeout,
};
use tracing::{debug, error, info, warn};

use super::connection::{ConnectionConfig, ConnectionHandler};
use crate::{config::Settings, hub::HubPool};

/// Сколько ждать завершения соединений после сигнала остановки.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// TCP-сервер рассылки по каналам.
pub struct Server {
    listener: TcpListener,
    pool: HubPool,
    config: ConnectionConfig,
    max_connections: usize,
    /// Семафор для ограничения одновременных соединений
    connection_semaphore: Arc<Semaphore>,
    shutdown_tx: watch::Sender<bool>,
    connection_counter: AtomicU64,
}

impl Server {
    /// Открывает слушающий сокет на `settings.listen_address`.
    pub async fn bind(
        settings: &Settings,
        pool: HubPool,
    ) -> Result<Self> {
        let listener = TcpListener::bind(&settings.listen_address)
            .await
            .with_context(|| format!("Failed to bind {}", settings.listen_address))?;

        Ok(Self {
            listener,
            pool,
            config: ConnectionConfig::from_settings(settings),
            max_connections: settings.max_connections,
            connection_semaphore: Arc::new(Semaphore::new(settings.max_connections)),
            shutdown_tx: watch::Sender::new(false),
            connection_counter: AtomicU64::new(0),
        })
    }

    /// Фактический адрес (полезно при порте 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read local address")
    }

    pub fn pool(&self) -> &HubPool {
        &self.pool
    }

    /// Текущее кол-во активных соединений
    pub fn active_connections(&self) -> usize {
        self.max_connections - self.connection_semaphore.available_permits()
    }

    /// Обслуживает соединения, пока не упадёт accept.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Обслуживает соединения до завершения `shutdown`.
    ///
    /// После сигнала перестаёт принимать соединения, будит обработчики и
    /// ждёт их не дольше `SHUTDOWN_GRACE`.
    pub async fn run_until<F>(
        self,
        shutdown: F,
    ) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let addr = self.local_addr()?;
        info!(%addr, max_connections = self.max_connections, "listening");

        tokio::pin!(shutdown);
        let mut tasks = JoinSet::new();

        let result = loop {
            select! {
                _ = &mut shutdown => break Ok(()),
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!("connection task failed: {e}");
                    }
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((socket, peer)) => self.spawn_connection(&mut tasks, socket, peer).await,
                        Err(e) => break Err(e).context("Failed to accept connection"),
                    }
                }
            }
        };

        info!("initiating graceful shutdown");
        self.shutdown_tx.send_replace(true);

        let drained = timeout(SHUTDOWN_GRACE, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(remaining = tasks.len(), "shutdown timeout reached, aborting connections");
            // отменённые обработчики покидают хабы при сбросе
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
        }

        info!(pool = ?self.pool.stats(), "server stopped");
        result
    }

    async fn spawn_connection(
        &self,
        tasks: &mut JoinSet<()>,
        mut socket: TcpStream,
        peer: SocketAddr,
    ) {
        let Ok(permit) = self.connection_semaphore.clone().try_acquire_owned() else {
            warn!(%peer, "maximum connections limit reached, rejecting");
            let _ = socket.write_all(b"-ERR too many connections\n").await;
            return;
        };

        let connection_id = self.connection_counter.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(
            connection = connection_id,
            %peer,
            active = self.active_connections(),
            "connection established"
        );

        let handler = ConnectionHandler::new(
            connection_id,
            socket,
            peer,
            self.pool.clone(),
            self.config.clone(),
            self.shutdown_tx.subscribe(),
        );

        tasks.spawn(async move {
            let _permit = permit;
            if let Err(e) = handler.run().await {
                warn!(connection = connection_id, %peer, "connection closed with error: {e:#}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use tokio::{
        io::{AsyncBufReadExt, BufReader},
        sync::oneshot,
    };

    use super::*;
    use crate::hub::PoolConfig;

    fn test_settings(max_connections: usize) -> Settings {
        let mut settings = Settings::load(None).unwrap();
        settings.listen_address = "127.0.0.1:0".to_string();
        settings.max_connections = max_connections;
        settings
    }

    /// Тест проверяет, что соединение сверх лимита отвергается.
    #[tokio::test]
    #[serial_test::serial]
    async fn test_connection_limit() -> Result<()> {
        let server = Server::bind(&test_settings(1), HubPool::new(PoolConfig::default())).await?;
        let addr = server.local_addr()?;
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run_until(async {
            let _ = stop_rx.await;
        }));

        let mut first = TcpStream::connect(addr).await?;
        first.write_all(b"SUBSCRIBE a\n").await?;
        let mut first_lines = BufReader::new(&mut first).lines();
        assert_eq!(first_lines.next_line().await?.as_deref(), Some("+SUBSCRIBED a"));

        let second = TcpStream::connect(addr).await?;
        let mut second_lines = BufReader::new(second).lines();
        let reply = second_lines.next_line().await?.unwrap_or_default();
        assert_eq!(reply, "-ERR too many connections");

        let _ = stop_tx.send(());
        timeout(Duration::from_secs(10), handle).await???;
        Ok(())
    }

    /// Тест проверяет, что остановка завершает подписанные соединения и
    /// пул пустеет.
    #[tokio::test]
    #[serial_test::serial]
    async fn test_shutdown_closes_subscribers() -> Result<()> {
        let pool = HubPool::new(PoolConfig::default());
        let server = Server::bind(&test_settings(16), pool.clone()).await?;
        let addr = server.local_addr()?;
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run_until(async {
            let _ = stop_rx.await;
        }));

        let mut socket = TcpStream::connect(addr).await?;
        socket.write_all(b"SUBSCRIBE room\n").await?;
        let mut lines = BufReader::new(&mut socket).lines();
        assert_eq!(lines.next_line().await?.as_deref(), Some("+SUBSCRIBED room"));
        assert!(pool.contains("room"));

        let _ = stop_tx.send(());
        timeout(Duration::from_secs(10), handle).await???;

        assert!(pool.is_empty());
        Ok(())
    }
}
