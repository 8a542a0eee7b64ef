/// Configuration loading: defaults, file, environment.
pub mod config;
/// Hub pool: channels, membership, broadcast and eviction.
pub mod hub;
/// Flexible logging (formatting, filters, sinks).
pub mod logging;
/// Network stack: line protocol over a Tokio TCP server.
pub mod network;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Settings.
pub use config::{HubSettings, Settings, SettingsError};
/// Errors and status codes.
pub use hubcast_error::{ErrorExt, HubError, HubResult, StatusCode};
/// Hub pool API.
pub use hub::{
    BroadcastReport, ChannelId, Client, ClientId, ConnectionHandle, Hub, HubPool, Outbox,
    PoolConfig, SlowClientPolicy, Subscription,
};
/// Logging setup.
pub use logging::{init_logging, LoggingConfig, LoggingHandle};
/// Network server.
pub use network::Server;
