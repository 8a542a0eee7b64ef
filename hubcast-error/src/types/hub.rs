use crate::{ErrorExt, StatusCode};

/// Ошибки хаба и клиента.
///
/// Ни одна из них не фатальна: рассылка глотает ошибки отдельных
/// получателей, пул заменяет tombstone-хаб новым.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    /// Клиент уже покинул хаб, его очередь закрыта.
    ClientGone,
    /// Исходящая очередь клиента заполнена.
    QueueFull { capacity: usize },
    /// Хаб помечен как удалённый и больше не принимает участников.
    ChannelTombstoned { channel: String },
    /// Клиент привязан к другому хабу.
    ForeignClient { channel: String },
}

impl std::fmt::Display for HubError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::ClientGone => write!(f, "Client has already left its hub"),
            Self::QueueFull { capacity } => {
                write!(f, "Outbound queue is full (capacity {capacity})")
            }
            Self::ChannelTombstoned { channel } => {
                write!(f, "Hub for channel '{channel}' is tombstoned")
            }
            Self::ForeignClient { channel } => {
                write!(f, "Client is not bound to the hub of channel '{channel}'")
            }
        }
    }
}

impl std::error::Error for HubError {}

impl ErrorExt for HubError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::ClientGone => StatusCode::ClientGone,
            Self::QueueFull { .. } => StatusCode::QueueFull,
            Self::ChannelTombstoned { .. } => StatusCode::ChannelTombstoned,
            Self::ForeignClient { .. } => StatusCode::ForeignClient,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LogLevel;

    #[test]
    fn test_client_gone() {
        let err = HubError::ClientGone;
        assert_eq!(err.status_code(), StatusCode::ClientGone);
        assert_eq!(err.status_code().log_level(), LogLevel::Trace);
    }

    #[test]
    fn test_queue_full_carries_capacity() {
        let err = HubError::QueueFull { capacity: 256 };
        assert_eq!(err.status_code(), StatusCode::QueueFull);
        assert!(err.to_string().contains("256"));
    }

    #[test]
    fn test_tombstoned_carries_channel() {
        let err = HubError::ChannelTombstoned {
            channel: "news".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::ChannelTombstoned);
        assert!(err.to_string().contains("news"));
    }
}
