use std::{
    fmt,
    sync::{Arc, Weak},
};

use ahash::AHashMap;
use bytes::Bytes;
use hubcast_error::{ErrorExt, HubError, HubResult, LogLevel};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace, warn};

use super::{
    pool::PoolShared,
    stats::{bump, BroadcastReport, HubStats, HubStatsSnapshot},
    ChannelId, Client, ClientId,
};

/// Что делать с клиентом, чья исходящая очередь переполнена.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlowClientPolicy {
    /// Отбросить сообщение только для этого получателя.
    #[default]
    Drop,
    /// Отключить клиента после прохода рассылки.
    Disconnect,
}

/// Состояние хаба под его собственной блокировкой.
#[derive(Default)]
struct HubState {
    members: AHashMap<ClientId, Arc<Client>>,
    /// Выставляется один раз, когда хаб опустел; после этого `join`
    /// всегда отказывает.
    tombstoned: bool,
}

/// Хаб одного канала: участники и рассылка.
///
/// Все структурные операции (join/leave/проверка пустоты/tombstone)
/// сериализуются одной блокировкой хаба. Блокировка пула никогда не
/// берётся, пока удерживается блокировка хаба.
pub struct Hub {
    id: ChannelId,
    state: Mutex<HubState>,
    pool: Weak<PoolShared>,
    policy: SlowClientPolicy,
    stats: HubStats,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Hub {
    pub(crate) fn new(
        id: ChannelId,
        pool: Weak<PoolShared>,
        policy: SlowClientPolicy,
    ) -> Self {
        Self {
            id,
            state: Mutex::new(HubState::default()),
            pool,
            policy,
            stats: HubStats::default(),
        }
    }

    /// Канал, который обслуживает хаб.
    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    /// Добавляет клиента в участники.
    ///
    /// # Ошибки
    /// - `ChannelTombstoned`: хаб проиграл гонку с вытеснением; вызывающий
    ///   должен снова пройти create-or-get пула;
    /// - `ClientGone`: клиент уже закрыт, повторно его не принимают;
    /// - `ForeignClient`: клиент создан для другого хаба.
    pub fn join(
        &self,
        client: Arc<Client>,
    ) -> HubResult<()> {
        if !std::ptr::eq(client.hub().as_ref(), self) {
            return Err(HubError::ForeignClient {
                channel: self.id.to_string(),
            });
        }
        if client.is_closed() {
            return Err(HubError::ClientGone);
        }
        self.admit(client)
    }

    /// Вставка свежего клиента этого хаба. Отказывает только tombstone-хаб.
    ///
    /// Пул вызывает её под своей блокировкой.
    pub(crate) fn admit(
        &self,
        client: Arc<Client>,
    ) -> HubResult<()> {
        let mut state = self.state.lock();
        if state.tombstoned {
            return Err(HubError::ChannelTombstoned {
                channel: self.id.to_string(),
            });
        }

        let id = client.id();
        state.members.insert(id, client);
        let members = state.members.len();
        drop(state);

        bump(&self.stats.joins);
        trace!(channel = %self.id, client = %id, members, "client joined");
        Ok(())
    }

    /// Первый участник только что созданного хаба.
    ///
    /// Хаб ещё не опубликован в карте пула, tombstone не проверяется.
    pub(crate) fn seed(
        &self,
        client: Arc<Client>,
    ) {
        let id = client.id();
        self.state.lock().members.insert(id, client);
        bump(&self.stats.joins);
        trace!(channel = %self.id, client = %id, "hub seeded");
    }

    /// Удаляет клиента из участников и закрывает его.
    ///
    /// Повторный вызов безопасен. Если хаб опустел, он помечается
    /// tombstone под своей блокировкой и затем удаляется из пула.
    ///
    /// # Возвращает
    /// - `true`, если клиент был участником.
    pub fn leave(
        &self,
        client: &Client,
    ) -> bool {
        if !std::ptr::eq(client.hub().as_ref(), self) {
            return false;
        }

        let (removed, emptied) = {
            let mut state = self.state.lock();
            let removed = state.members.remove(&client.id()).is_some();
            let emptied = removed && state.members.is_empty();
            if emptied {
                state.tombstoned = true;
            }
            (removed, emptied)
        };

        client.close();

        if removed {
            bump(&self.stats.leaves);
            trace!(channel = %self.id, client = %client.id(), emptied, "client left");
        }
        if emptied {
            self.evict();
        }

        removed
    }

    /// Вторая фаза вытеснения: удалить себя из карты пула, если карта
    /// всё ещё указывает именно на этот экземпляр.
    fn evict(&self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.remove_if_same(self);
        }
    }

    /// Рассылает сообщение всем текущим участникам.
    ///
    /// Snapshot участников берётся под блокировкой, отправка идёт вне её.
    /// Ошибки отдельных получателей не прерывают рассылку.
    pub fn broadcast(
        &self,
        message: Bytes,
    ) -> BroadcastReport {
        let members: Vec<Arc<Client>> = self.state.lock().members.values().cloned().collect();

        let mut report = BroadcastReport {
            recipients: members.len(),
            ..Default::default()
        };
        let mut slow = Vec::new();

        for client in members {
            match client.send(message.clone()) {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    self.log_dropped(&client, &err);
                    if let HubError::QueueFull { .. } = err {
                        report.dropped_full += 1;
                        if self.policy == SlowClientPolicy::Disconnect {
                            slow.push(client);
                        }
                    } else {
                        report.dropped_gone += 1;
                    }
                }
            }
        }

        for client in slow {
            if self.leave(&client) {
                report.disconnected += 1;
                warn!(
                    channel = %self.id,
                    client = %client.id(),
                    peer = %client.peer(),
                    "slow client disconnected"
                );
            }
        }

        self.stats.record_broadcast(&report);
        report
    }

    /// Пишет в лог отброшенное сообщение на уровне, который задаёт его
    /// статус-код.
    fn log_dropped(
        &self,
        client: &Client,
        err: &HubError,
    ) {
        let code = err.status_code();
        match code.log_level() {
            LogLevel::Trace => {
                trace!(channel = %self.id, client = %client.id(), %code, "message dropped")
            }
            LogLevel::Debug => {
                debug!(channel = %self.id, client = %client.id(), %code, "message dropped")
            }
            LogLevel::Warn => {
                warn!(channel = %self.id, client = %client.id(), %code, "message dropped")
            }
            LogLevel::Error => {
                error!(channel = %self.id, client = %client.id(), %code, "message dropped")
            }
        }
    }

    /// Пуст ли хаб. Только для диагностики: вытеснение использует
    /// собственную атомарную проверку.
    pub fn is_empty(&self) -> bool {
        self.state.lock().members.is_empty()
    }

    /// Количество участников.
    pub fn len(&self) -> usize {
        self.state.lock().members.len()
    }

    pub fn is_tombstoned(&self) -> bool {
        self.state.lock().tombstoned
    }

    /// Является ли клиент участником.
    pub fn contains(
        &self,
        client_id: &ClientId,
    ) -> bool {
        self.state.lock().members.contains_key(client_id)
    }

    /// Идентификаторы текущих участников.
    pub fn client_ids(&self) -> Vec<ClientId> {
        self.state.lock().members.keys().copied().collect()
    }

    pub fn policy(&self) -> SlowClientPolicy {
        self.policy
    }

    pub fn stats(&self) -> HubStatsSnapshot {
        self.stats.snapshot()
    }

    /// Первая фаза вытеснения без второй: воспроизводит окно гонки.
    #[cfg(test)]
    pub(crate) fn mark_tombstoned_for_test(&self) {
        self.state.lock().tombstoned = true;
    }
}

impl fmt::Debug for Hub {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Hub")
            .field("id", &self.id)
            .field("members", &state.members.len())
            .field("tombstoned", &state.tombstoned)
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////
