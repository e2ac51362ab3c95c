//! # Axum Chat Hub
//!
//! The real-time half of a direct-messaging chat backend. Your HTTP handlers
//! keep doing the CRUD (accounts, friends, stored messages); this crate keeps
//! track of who is connected and pushes events to them over WebSockets.
//!
//! ## Core Features
//!
//! - **Connection hub**: at most one live connection per user, owned by a
//!   single control loop so the connection map never races.
//! - **Evict, don't block**: each connection has a bounded outbound queue
//!   (256 frames by default). A client that falls that far behind is
//!   disconnected instead of stalling everyone else.
//! - **Typed envelopes**: `message`, `friend_request`, `read`, `typing` and
//!   `online_status` events as a closed enum, `{"type", "payload"}` on the
//!   wire.
//! - **Presence**: every connect and disconnect is announced to all other
//!   online users.
//! - **Session Authentication (Optional)**: a `WsIdentity` extractor that
//!   reads a bearer header, a `session` cookie, or a query parameter.
//! - **Redis Relay (Optional)**: deliver notifications across processes.
//!
//! ## Getting Started
//!
//! Start a [`ChatService`](ws::service::ChatService) once, share the `Arc`
//! with your router, mount [`upgrade_handler`](ws::upgrade::upgrade_handler)
//! on your WebSocket route, and call the
//! [`Dispatcher`](ws::dispatcher::Dispatcher) from your HTTP handlers after
//! they persist something.
//!
//! ---

pub mod config;
pub mod error;
pub mod models;

// The `ws` module contains the hub, its connections and the wire format.
pub mod ws;

// It will only be part of the crate if the "auth" feature is enabled.
#[cfg(feature = "auth")]
pub mod auth;

// It will only be part of the crate if the "redis-relay" feature is enabled.
#[cfg(feature = "redis-relay")]
pub mod relay;

/// Public prelude for convenience.
///
/// This allows users to import the most common types with a single `use` statement:
/// `use axum_chat_hub::prelude::*;`
pub mod prelude {
    pub use crate::config::HubConfig;
    pub use crate::error::HubError;
    pub use crate::models::{ChatMessage, MessageKind, MessageWithSender, UserSummary};
    pub use crate::ws::{
        dispatcher::Dispatcher,
        envelope::{ClientEvent, Envelope},
        registry::Hub,
        service::ChatService,
        types::{ConnectionHandle, Frame, UserId},
        upgrade::upgrade_handler,
    };

    // Re-export the WsIdentity extractor if the feature is enabled.
    #[cfg(feature = "auth")]
    pub use crate::auth::{SessionResolver, WsIdentity};
}
