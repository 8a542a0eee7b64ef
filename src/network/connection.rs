use std::{
    io::ErrorKind,
    net::SocketAddr,
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use bytes::{BufMut, Bytes, BytesMut};
use tokio::{
    io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    select,
    sync::{watch, Notify},
    time::timeout,
};
use tracing::{debug, info, trace, warn};

use crate::{
    config::Settings,
    hub::{Client, ConnectionHandle, HubPool, Outbox, Subscription},
};

/// Команда, с которой обязано начинаться каждое соединение.
pub const SUBSCRIBE_COMMAND: &str = "SUBSCRIBE";

/// Параметры обработки одного соединения.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Максимальная длина входящей строки без `\n`.
    pub max_line_length: usize,
    /// Таймаут записи одного сообщения клиенту.
    pub write_timeout: Duration,
    /// Сколько ждать задачу-писателя при закрытии.
    pub drain_timeout: Duration,
    /// Размер буфера для чтения
    pub read_buffer_size: usize,
}

/// TCP-сторона клиента, которую видит ядро.
///
/// `close` будит цикл чтения, поэтому принудительное отключение из хаба
/// (политика `disconnect`) завершает соединение.
#[derive(Debug)]
pub struct TcpConnection {
    connection_id: u64,
    addr: SocketAddr,
    closed: Notify,
}

/// Обработчик отдельного соединения
pub struct ConnectionHandler {
    connection_id: u64,
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    addr: SocketAddr,
    pool: HubPool,
    config: ConnectionConfig,
    shutdown: watch::Receiver<bool>,
}

/// Членство соединения в хабе. При сбросе клиент покидает хаб, в том
/// числе когда задача обработчика отменена.
struct Membership(Arc<Client>);

impl Drop for Membership {
    fn drop(&mut self) {
        self.0.leave();
    }
}

/// Результат чтения одной строки с ограничением длины.
#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    Line(Bytes),
    TooLong,
    Eof,
}

/// Почему завершился цикл чтения.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    PeerClosed,
    Disconnected,
    Shutdown,
    LineTooLong,
}

impl ConnectionConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_line_length: settings.max_line_length,
            ..Default::default()
        }
    }
}

impl TcpConnection {
    pub fn new(
        connection_id: u64,
        addr: SocketAddr,
    ) -> Self {
        Self {
            connection_id,
            addr,
            closed: Notify::new(),
        }
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Ждёт вызова `close`. Если `close` уже был, возвращается сразу.
    pub async fn closed(&self) {
        self.closed.notified().await
    }
}

impl ConnectionHandle for TcpConnection {
    fn peer(&self) -> String {
        self.addr.to_string()
    }

    fn close(&self) {
        // notify_one сохраняет разрешение, даже если читатель сейчас не ждёт.
        self.closed.notify_one();
    }
}

impl ConnectionHandler {
    pub fn new(
        connection_id: u64,
        socket: TcpStream,
        addr: SocketAddr,
        pool: HubPool,
        config: ConnectionConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (read_half, write_half) = socket.into_split();
        let reader = BufReader::with_capacity(config.read_buffer_size, read_half);

        Self {
            connection_id,
            reader,
            writer: write_half,
            addr,
            pool,
            config,
            shutdown,
        }
    }

    /// Основной цикл обработки соединения.
    ///
    /// Сначала ждёт `SUBSCRIBE <channel>`, затем рассылает каждую
    /// следующую строку в канал. При любом завершении клиент покидает хаб
    /// ровно один раз.
    pub async fn run(self) -> Result<()> {
        let ConnectionHandler {
            connection_id,
            mut reader,
            mut writer,
            addr,
            pool,
            config,
            mut shutdown,
        } = self;

        let mut buf = Vec::with_capacity(config.read_buffer_size);

        let channel = select! {
            _ = shutdown_requested(&mut shutdown) => {
                Self::send_to_writer(&mut writer, b"-ERR server shutting down\n", config.write_timeout).await?;
                return Ok(());
            }
            first = read_line_limited(&mut reader, &mut buf, config.max_line_length) => {
                match first.context("Failed to read subscribe line")? {
                    LineRead::Line(line) => match parse_subscribe(&line) {
                        Some(channel) => channel,
                        None => {
                            warn!(connection = connection_id, peer = %addr, "expected SUBSCRIBE as first line");
                            Self::send_to_writer(&mut writer, b"-ERR expected SUBSCRIBE <channel>\n", config.write_timeout).await?;
                            return Self::graceful_close_writer(connection_id, writer).await;
                        }
                    },
                    LineRead::TooLong => {
                        warn!(connection = connection_id, peer = %addr, "subscribe line too long");
                        Self::send_to_writer(&mut writer, b"-ERR line too long\n", config.write_timeout).await?;
                        return Self::graceful_close_writer(connection_id, writer).await;
                    }
                    LineRead::Eof => {
                        debug!(connection = connection_id, peer = %addr, "closed before subscribing");
                        return Ok(());
                    }
                }
            }
        };

        let conn = Arc::new(TcpConnection::new(connection_id, addr));
        let Subscription {
            client,
            hub,
            outbox,
        } = pool.join_channel(&channel, conn.clone());
        let _membership = Membership(client.clone());

        info!(
            connection = connection_id,
            peer = %addr,
            channel = %channel,
            client = %client.id(),
            "subscribed"
        );

        // Подтверждение уходит до старта писателя; рассылки ждут в Outbox.
        let ack = format!("+SUBSCRIBED {channel}\n");
        Self::send_to_writer(&mut writer, ack.as_bytes(), config.write_timeout).await?;

        let mut writer_task = tokio::spawn(write_loop(
            connection_id,
            writer,
            outbox,
            config.write_timeout,
        ));

        let exit = loop {
            select! {
                _ = conn.closed() => break Ok(Exit::Disconnected),
                _ = shutdown_requested(&mut shutdown) => break Ok(Exit::Shutdown),
                read = read_line_limited(&mut reader, &mut buf, config.max_line_length) => {
                    match read {
                        Ok(LineRead::Line(line)) => {
                            trace!(connection = connection_id, bytes = line.len(), "received line");
                            let report = hub.broadcast(line);
                            trace!(connection = connection_id, ?report, "broadcast done");
                        }
                        Ok(LineRead::TooLong) => break Ok(Exit::LineTooLong),
                        Ok(LineRead::Eof) => break Ok(Exit::PeerClosed),
                        Err(e) if is_recoverable_error(&e) => {
                            debug!(connection = connection_id, peer = %addr, "recoverable read error: {e}");
                            break Ok(Exit::PeerClosed);
                        }
                        Err(e) => break Err(e),
                    }
                }
            }
        };

        // Закрывает Outbox: писатель допишет очередь и завершится.
        client.leave();

        match timeout(config.drain_timeout, &mut writer_task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => debug!(connection = connection_id, "writer finished with error: {e:#}"),
            Ok(Err(e)) => warn!(connection = connection_id, "writer task failed: {e}"),
            Err(_) => {
                warn!(connection = connection_id, "writer did not drain in time");
                writer_task.abort();
            }
        }

        match exit {
            Ok(exit) => {
                debug!(connection = connection_id, peer = %addr, ?exit, "connection finished");
                Ok(())
            }
            Err(e) => Err(e).context("Fatal read error"),
        }
    }

    /// Отправляет ответ с таймаутом (статический метод)
    async fn send_to_writer(
        writer: &mut OwnedWriteHalf,
        data: &[u8],
        write_timeout: Duration,
    ) -> Result<()> {
        timeout(write_timeout, writer.write_all(data))
            .await
            .context("Write timeout")?
            .context("Failed to write response")?;

        Ok(())
    }

    /// Graceful закрытие соединения
    async fn graceful_close_writer(
        connection_id: u64,
        mut writer: OwnedWriteHalf,
    ) -> Result<()> {
        if let Err(e) = writer.shutdown().await {
            // Игнорируем ошибки при закрытии уже закрытого соединения
            if e.kind() != ErrorKind::NotConnected {
                debug!(connection = connection_id, "error during shutdown: {e}");
            }
        }
        debug!(connection = connection_id, "connection closed gracefully");
        Ok(())
    }
}

/// Задача-писатель: переносит сообщения из `Outbox` в сокет, по одному
/// на строку. Завершается, когда клиент закрыт и очередь пуста.
async fn write_loop(
    connection_id: u64,
    mut writer: OwnedWriteHalf,
    mut outbox: Outbox,
    write_timeout: Duration,
) -> Result<()> {
    let mut frame = BytesMut::new();
    while let Some(message) = outbox.recv().await {
        frame.clear();
        frame.reserve(message.len() + 1);
        frame.put_slice(&message);
        frame.put_u8(b'\n');

        ConnectionHandler::send_to_writer(&mut writer, &frame, write_timeout).await?;
    }
    ConnectionHandler::graceful_close_writer(connection_id, writer).await
}

/// Ждёт сигнала остановки сервера. Закрытый канал тоже считается
/// сигналом.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Читает строку не длиннее `limit` байт (без `\n` и `\r`).
///
/// Строка без завершающего `\n` в конце потока считается последней.
async fn read_line_limited(
    reader: &mut BufReader<OwnedReadHalf>,
    buf: &mut Vec<u8>,
    limit: usize,
) -> std::io::Result<LineRead> {
    buf.clear();
    let n = reader
        .take(limit as u64 + 2)
        .read_until(b'\n', buf)
        .await?;

    if n == 0 {
        return Ok(LineRead::Eof);
    }

    let terminated = buf.last() == Some(&b'\n');
    if terminated {
        buf.pop();
    }
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }

    if buf.len() > limit {
        return Ok(LineRead::TooLong);
    }
    Ok(LineRead::Line(Bytes::copy_from_slice(buf)))
}

/// Разбирает `SUBSCRIBE <channel>`; команда без учёта регистра.
fn parse_subscribe(line: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(line).ok()?;
    let mut parts = text.split_whitespace();
    let command = parts.next()?;
    let channel = parts.next()?;
    if !command.eq_ignore_ascii_case(SUBSCRIBE_COMMAND) || parts.next().is_some() {
        return None;
    }
    Some(channel.to_string())
}

/// Проверяет, является ли ошибка восстанавливаемой
fn is_recoverable_error(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        ErrorKind::UnexpectedEof
            | ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::TimedOut
    )
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_line_length: 64 * 1024,
            write_timeout: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(5),
            read_buffer_size: 8192,
        }
    }
}
