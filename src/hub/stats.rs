use std::sync::atomic::{AtomicU64, Ordering};

/// Счётчики одного хаба.
#[derive(Debug, Default)]
pub struct HubStats {
    pub(crate) broadcasts: AtomicU64,
    pub(crate) deliveries: AtomicU64,
    pub(crate) dropped_full: AtomicU64,
    pub(crate) dropped_gone: AtomicU64,
    pub(crate) joins: AtomicU64,
    pub(crate) leaves: AtomicU64,
}

/// Snapshot счётчиков хаба.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStatsSnapshot {
    pub broadcasts: u64,
    pub deliveries: u64,
    pub dropped_full: u64,
    pub dropped_gone: u64,
    pub joins: u64,
    pub leaves: u64,
}

/// Счётчики пула хабов.
///
/// # Поля
/// * `hubs_created` - сколько хабов было создано за всё время.
/// * `hubs_evicted` - сколько хабов было удалено из карты после опустения.
/// * `joins` - успешные вызовы `join_channel`.
/// * `join_retries` - вступления, заставшие в карте tombstone-хаб и
///   заменившие его новым.
/// * `eviction_races` - вытеснения, отменённые проверкой идентичности хаба.
#[derive(Debug, Default)]
pub struct PoolStats {
    pub(crate) hubs_created: AtomicU64,
    pub(crate) hubs_evicted: AtomicU64,
    pub(crate) joins: AtomicU64,
    pub(crate) join_retries: AtomicU64,
    pub(crate) eviction_races: AtomicU64,
}

/// Snapshot счётчиков пула.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStatsSnapshot {
    pub active_hubs: usize,
    pub hubs_created: u64,
    pub hubs_evicted: u64,
    pub joins: u64,
    pub join_retries: u64,
    pub eviction_races: u64,
}

/// Итог одной рассылки.
///
/// `recipients`: размер snapshot участников; остальные поля разбивают его
/// по исходам.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub recipients: usize,
    pub delivered: usize,
    pub dropped_full: usize,
    pub dropped_gone: usize,
    /// Медленные клиенты, отключённые политикой `SlowClientPolicy::Disconnect`.
    pub disconnected: usize,
}

#[inline]
pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl HubStats {
    pub(crate) fn record_broadcast(
        &self,
        report: &BroadcastReport,
    ) {
        bump(&self.broadcasts);
        self.deliveries
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.dropped_full
            .fetch_add(report.dropped_full as u64, Ordering::Relaxed);
        self.dropped_gone
            .fetch_add(report.dropped_gone as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HubStatsSnapshot {
        HubStatsSnapshot {
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            dropped_full: self.dropped_full.load(Ordering::Relaxed),
            dropped_gone: self.dropped_gone.load(Ordering::Relaxed),
            joins: self.joins.load(Ordering::Relaxed),
            leaves: self.leaves.load(Ordering::Relaxed),
        }
    }
}

impl PoolStats {
    pub fn snapshot(
        &self,
        active_hubs: usize,
    ) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            active_hubs,
            hubs_created: self.hubs_created.load(Ordering::Relaxed),
            hubs_evicted: self.hubs_evicted.load(Ordering::Relaxed),
            joins: self.joins.load(Ordering::Relaxed),
            join_retries: self.join_retries.load(Ordering::Relaxed),
            eviction_races: self.eviction_races.load(Ordering::Relaxed),
        }
    }
}
