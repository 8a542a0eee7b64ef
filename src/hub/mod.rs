//! Пул хабов: ядро широковещательной рассылки по каналам.
//!
//! - `client`: членство одного соединения в хабе и его
//!   ограниченная исходящая очередь.
//! - `hub`: участники одного канала, рассылка, tombstone.
//! - `pool`: реестр channel id → хаб, create-or-get и вытеснение опустевших
//!   хабов.
//! - `stats`: счётчики и их snapshot-ы.
//!
//! # Вытеснение
//!
//! Хаб, который опустел в `leave`, удаляется в две фазы:
//! 1. под блокировкой хаба выставляется tombstone (дальнейшие `join`
//!    отказывают);
//! 2. под блокировкой пула запись удаляется, только если карта всё ещё
//!    указывает на этот же экземпляр.
//!
//! Блокировка пула никогда не берётся под блокировкой хаба. Обратный
//! порядок допустим: `join_channel` вступает в хаб и публикует новый хаб
//! под блокировкой пула, поиск пропускает tombstone-хабы.

pub mod client;
#[allow(clippy::module_inception)]
pub mod hub;
pub mod pool;
mod stats;

use std::sync::Arc;

pub use client::{Client, ClientId, ClientStatsSnapshot, ConnectionHandle, Outbox};
pub use hub::{Hub, SlowClientPolicy};
pub use pool::{HubPool, PoolConfig, Subscription, DEFAULT_CLIENT_QUEUE_CAPACITY};
pub use stats::{BroadcastReport, HubStatsSnapshot, PoolStatsSnapshot};

/// Идентификатор канала.
pub type ChannelId = Arc<str>;
