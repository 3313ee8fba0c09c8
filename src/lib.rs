//! SignalR hub client for a realtime market data feed
//!
//! Negotiates and maintains a hub connection, replays subscriptions on every
//! connect, and decodes compressed feed payloads into [`FeedEvent`]s.

pub mod feed;
pub mod infrastructure;
pub mod ws;

#[cfg(test)]
pub mod test_utils;

pub use feed::{ClientEvent, Credentials, FeedClient, FeedEvent, FeedKind};
pub use infrastructure::config::Config;
pub use ws::HubConnection;

use infrastructure::config::ConfigError;
use thiserror::Error;

/// Main error type
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("HTTP client error: {0}")]
    Http(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("connection already started")]
    AlreadyActive,
}

/// Result type alias
pub type Result<T> = std::result::Result<T, FeedError>;
