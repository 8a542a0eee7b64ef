//! Сетевой модуль: тонкий TCP-транспорт поверх пула хабов.
//!
//! Протокол строковый. Первая строка соединения `SUBSCRIBE <channel>`,
//! сервер отвечает `+SUBSCRIBED <channel>`. Каждая следующая строка
//! рассылается всем участникам канала, включая отправителя.
//!
//! ## Подмодули
//!
//! - `connection`: обработчик одного соединения и `TcpConnection`,
//!   реализация `ConnectionHandle` для TCP.
//! - `server`: приём соединений, лимит и graceful shutdown.

pub mod connection;
pub mod server;

pub use connection::{ConnectionConfig, ConnectionHandler, TcpConnection};
pub use server::Server;
