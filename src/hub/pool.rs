use std::sync::Arc;

use ahash::AHashMap;
use bytes::Bytes;
use hubcast_error::ErrorExt;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{
    stats::{bump, BroadcastReport, PoolStats, PoolStatsSnapshot},
    ChannelId, Client, ConnectionHandle, Hub, Outbox, SlowClientPolicy,
};

/// Ёмкость исходящей очереди клиента по умолчанию.
pub const DEFAULT_CLIENT_QUEUE_CAPACITY: usize = 256;

/// Параметры пула хабов.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Ёмкость исходящей очереди каждого клиента.
    pub client_queue_capacity: usize,
    /// Поведение при переполнении очереди клиента.
    pub slow_client_policy: SlowClientPolicy,
}

/// Результат `join_channel`: клиент, его хаб и очередь для писателя.
#[derive(Debug)]
pub struct Subscription {
    pub client: Arc<Client>,
    pub hub: Arc<Hub>,
    pub outbox: Outbox,
}

/// Общее состояние пула. Хабы держат на него `Weak`, чтобы выполнить
/// вторую фазу вытеснения.
pub(crate) struct PoolShared {
    /// channel id → живой хаб. Структурная блокировка пула.
    hubs: Mutex<AHashMap<ChannelId, Arc<Hub>>>,
    config: PoolConfig,
    stats: PoolStats,
}

/// Реестр хабов: channel id → текущий живой хаб.
///
/// Клонирование дешёвое, все клоны разделяют одно состояние. Один пул на
/// процесс, создаётся явно и передаётся тем, кому он нужен.
#[derive(Clone)]
pub struct HubPool {
    shared: Arc<PoolShared>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl PoolShared {
    fn new_hub(
        self: &Arc<Self>,
        channel_id: &str,
    ) -> Arc<Hub> {
        let hub = Arc::new(Hub::new(
            Arc::from(channel_id),
            Arc::downgrade(self),
            self.config.slow_client_policy,
        ));
        bump(&self.stats.hubs_created);
        debug!(channel = %channel_id, "hub created");
        hub
    }

    /// Удаляет хаб из карты, только если по его id лежит именно он.
    pub(crate) fn remove_if_same(
        &self,
        hub: &Hub,
    ) {
        let mut hubs = self.hubs.lock();
        let same = hubs
            .get(hub.id())
            .is_some_and(|current| std::ptr::eq(current.as_ref(), hub));

        if same {
            hubs.remove(hub.id());
            drop(hubs);
            bump(&self.stats.hubs_evicted);
            debug!(channel = %hub.id(), "hub evicted");
        } else {
            drop(hubs);
            bump(&self.stats.eviction_races);
            trace!(channel = %hub.id(), "hub already replaced, eviction skipped");
        }
    }
}

impl HubPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                hubs: Mutex::new(AHashMap::new()),
                config,
                stats: PoolStats::default(),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Подключает соединение к каналу.
    ///
    /// Поиск хаба и вступление выполняются под одной блокировкой пула
    /// (блокировка хаба берётся внутри неё). Новый хаб попадает в карту
    /// уже с первым участником. Tombstone-хаб, ещё не удалённый своей
    /// второй фазой, заменяется новым; его запоздалое удаление затем
    /// увидит подмену и ничего не сделает.
    pub fn join_channel(
        &self,
        channel_id: &str,
        conn: Arc<dyn ConnectionHandle>,
    ) -> Subscription {
        let capacity = self.shared.config.client_queue_capacity;
        let mut hubs = self.shared.hubs.lock();

        if let Some(hub) = hubs.get(channel_id).cloned() {
            let (client, outbox) = Client::new(hub.clone(), conn.clone(), capacity);
            match hub.admit(client.clone()) {
                Ok(()) => {
                    drop(hubs);
                    bump(&self.shared.stats.joins);
                    return Subscription {
                        client,
                        hub,
                        outbox,
                    };
                }
                Err(err) => {
                    bump(&self.shared.stats.join_retries);
                    trace!(
                        channel = %channel_id,
                        code = %err.status_code(),
                        "mapped hub rejected join, replacing"
                    );
                }
            }
        }

        let hub = self.shared.new_hub(channel_id);
        let (client, outbox) = Client::new(hub.clone(), conn, capacity);
        hub.seed(client.clone());
        hubs.insert(hub.id().clone(), hub.clone());
        drop(hubs);

        bump(&self.shared.stats.joins);
        Subscription {
            client,
            hub,
            outbox,
        }
    }

    /// Рассылает сообщение в канал, если у него есть живой хаб.
    ///
    /// Блокировка пула держится только на время поиска.
    pub fn broadcast(
        &self,
        channel_id: &str,
        message: Bytes,
    ) -> Option<BroadcastReport> {
        let hub = self.get(channel_id)?;
        Some(hub.broadcast(message))
    }

    /// Текущий живой хаб канала.
    ///
    /// Tombstone-хаб, который ждёт удаления из карты, не возвращается.
    pub fn get(
        &self,
        channel_id: &str,
    ) -> Option<Arc<Hub>> {
        self.shared
            .hubs
            .lock()
            .get(channel_id)
            .filter(|hub| !hub.is_tombstoned())
            .cloned()
    }

    pub fn contains(
        &self,
        channel_id: &str,
    ) -> bool {
        self.get(channel_id).is_some()
    }

    /// Количество живых хабов.
    pub fn len(&self) -> usize {
        self.shared
            .hubs
            .lock()
            .values()
            .filter(|hub| !hub.is_tombstoned())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Имена каналов, у которых сейчас есть живой хаб.
    pub fn channels(&self) -> Vec<ChannelId> {
        self.hubs().into_iter().map(|(id, _)| id).collect()
    }

    /// Snapshot живых хабов. На момент взятия ни один из них не пуст.
    pub fn hubs(&self) -> Vec<(ChannelId, Arc<Hub>)> {
        self.shared
            .hubs
            .lock()
            .iter()
            .filter(|(_, hub)| !hub.is_tombstoned())
            .map(|(id, hub)| (id.clone(), hub.clone()))
            .collect()
    }

    pub fn stats(&self) -> PoolStatsSnapshot {
        self.shared.stats.snapshot(self.len())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            client_queue_capacity: DEFAULT_CLIENT_QUEUE_CAPACITY,
            slow_client_policy: SlowClientPolicy::default(),
        }
    }
}

impl Default for HubPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl std::fmt::Debug for HubPool {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("HubPool")
            .field("config", &self.shared.config)
            .field("hubs", &self.len())
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
