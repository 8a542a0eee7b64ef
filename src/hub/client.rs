use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use bytes::Bytes;
use hubcast_error::{HubError, HubResult};
use parking_lot::RwLock;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::trace;
use uuid::Uuid;

use super::{ChannelId, Hub};

/// Уникальный идентификатор клиента.
///
/// Выдаётся заново при каждой регистрации, даже если переподключается тот
/// же логический пользователь.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(Uuid);

/// Транспорт, стоящий за клиентом.
///
/// Ядро ничего не знает о протоколе: запись идёт через исходящую очередь
/// клиента, а от транспорта нужен только разрыв.
pub trait ConnectionHandle: Send + Sync + 'static {
    /// Описание удалённой стороны для логов.
    fn peer(&self) -> String;

    /// Разрывает транспорт. Вызывается не более одного раза на клиента.
    fn close(&self);
}

/// Счётчики клиента.
#[derive(Debug, Default)]
pub struct ClientStats {
    sent: AtomicU64,
    dropped: AtomicU64,
}

/// Snapshot счётчиков клиента.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientStatsSnapshot {
    pub sent: u64,
    pub dropped: u64,
}

/// Членство одного соединения в хабе вместе с его исходящей очередью.
pub struct Client {
    id: ClientId,
    hub: Arc<Hub>,
    /// `None` после `close()`; все `send` после этого получают `ClientGone`.
    sender: RwLock<Option<mpsc::Sender<Bytes>>>,
    conn: Arc<dyn ConnectionHandle>,
    capacity: usize,
    stats: ClientStats,
}

/// Принимающая сторона исходящей очереди клиента.
///
/// Отдаётся задаче-писателю соединения; после `Client::close` выдаёт
/// оставшиеся сообщения и затем `None`.
#[derive(Debug)]
pub struct Outbox {
    inner: mpsc::Receiver<Bytes>,
    capacity: usize,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Client {
    /// Создаёт клиента, привязанного к `hub`, с очередью ёмкости `capacity`.
    ///
    /// Клиент ещё не является участником хаба: это делает `Hub::join`.
    pub(crate) fn new(
        hub: Arc<Hub>,
        conn: Arc<dyn ConnectionHandle>,
        capacity: usize,
    ) -> (Arc<Self>, Outbox) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let client = Arc::new(Self {
            id: ClientId::new(),
            hub,
            sender: RwLock::new(Some(tx)),
            conn,
            capacity,
            stats: ClientStats::default(),
        });
        let outbox = Outbox {
            inner: rx,
            capacity,
        };
        (client, outbox)
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Канал хаба, к которому привязан клиент.
    pub fn channel(&self) -> &ChannelId {
        self.hub.id()
    }

    /// Хаб, к которому клиент привязан на всё время жизни.
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Описание удалённой стороны из `ConnectionHandle`.
    pub fn peer(&self) -> String {
        self.conn.peer()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Кладёт сообщение в исходящую очередь, никогда не блокируясь.
    ///
    /// # Ошибки
    /// - `HubError::ClientGone`: клиент уже закрыт;
    /// - `HubError::QueueFull`: очередь заполнена, сообщение отброшено.
    pub fn send(
        &self,
        message: Bytes,
    ) -> HubResult<()> {
        let guard = self.sender.read();
        let Some(tx) = guard.as_ref() else {
            return Err(HubError::ClientGone);
        };

        match tx.try_send(message) {
            Ok(()) => {
                self.stats.sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                Err(HubError::QueueFull {
                    capacity: self.capacity,
                })
            }
            // Писатель уже бросил Outbox: для рассылки это то же, что уход.
            Err(TrySendError::Closed(_)) => Err(HubError::ClientGone),
        }
    }

    /// Закрывает исходящую очередь и разрывает транспорт.
    ///
    /// Идемпотентно: повторные вызовы ничего не делают.
    pub fn close(&self) {
        let sender = self.sender.write().take();
        if sender.is_some() {
            drop(sender);
            self.conn.close();
            trace!(client = %self.id, channel = %self.channel(), "client closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.read().is_none()
    }

    /// Покинуть свой хаб. То же самое, что `self.hub().leave(self)`.
    pub fn leave(&self) -> bool {
        self.hub.leave(self)
    }

    pub fn stats(&self) -> ClientStatsSnapshot {
        ClientStatsSnapshot {
            sent: self.stats.sent.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Outbox {
    /// Асинхронно ждёт следующее сообщение.
    ///
    /// Возвращает `None`, когда клиент закрыт и очередь опустела.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.inner.recv().await
    }

    /// Забирает сообщение без ожидания.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.inner.try_recv().ok()
    }

    /// Блокирующее получение для потоков вне tokio runtime.
    pub fn blocking_recv(&mut self) -> Option<Bytes> {
        self.inner.blocking_recv()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Количество сообщений, ожидающих в очереди.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Client {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("channel", self.channel())
            .field("peer", &self.conn.peer())
            .field("closed", &self.is_closed())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
