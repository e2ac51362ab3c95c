//! Error type shared by the hub, the dispatcher and the relay.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HubError {
    /// The hub's control loop has stopped, usually after `shutdown`.
    #[error("hub control loop is no longer running")]
    Closed,

    /// An envelope could not be serialized.
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] serde_json::Error),

    #[cfg(feature = "redis-relay")]
    #[error("redis relay error: {0}")]
    Relay(#[from] redis::RedisError),
}
