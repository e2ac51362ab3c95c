//! The `ChatService`: the handle HTTP and WebSocket handlers share.

use crate::config::HubConfig;
use crate::error::HubError;
use crate::ws::{
    connection::Connection,
    dispatcher::Dispatcher,
    envelope::Envelope,
    registry::Hub,
    types::{ConnectionHandle, UserId},
};
use axum::extract::ws::WebSocket;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Owns the hub and exposes the three things the rest of the application
/// needs: connect a socket, notify a user, and ask who is online.
///
/// Construct one at startup with [`ChatService::start`] and pass the `Arc`
/// to every handler that needs it.
#[derive(Debug)]
pub struct ChatService {
    hub: Hub,
    dispatcher: Dispatcher,
    config: HubConfig,
    control: Mutex<Option<JoinHandle<()>>>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl ChatService {
    /// Spawns the hub's control loop and, when configured, the relay
    /// listener.
    pub fn start(config: HubConfig) -> Result<Arc<Self>, HubError> {
        let (hub, control_task) = Hub::start(&config);
        #[allow(unused_mut)]
        let mut listeners = Vec::new();

        #[cfg(feature = "redis-relay")]
        let dispatcher = match config.redis_url.as_deref() {
            Some(url) => {
                let relay = Arc::new(crate::relay::Relay::open(url, &config.relay_channel)?);
                info!(channel = %config.relay_channel, "Spawning Redis relay listener task...");
                listeners.push(relay.clone().spawn_listener(hub.clone()));
                Dispatcher::with_relay(hub.clone(), relay)
            }
            None => Dispatcher::new(hub.clone()),
        };

        #[cfg(not(feature = "redis-relay"))]
        let dispatcher = {
            if config.redis_url.is_some() {
                warn!("REDIS_URL is set but the `redis-relay` feature is disabled; delivery stays local.");
            }
            Dispatcher::new(hub.clone())
        };

        Ok(Arc::new(Self {
            hub,
            dispatcher,
            config,
            control: Mutex::new(Some(control_task)),
            listeners: Mutex::new(listeners),
        }))
    }

    /// Takes over an upgraded socket for `user_id`: registers it and runs
    /// both pumps until the connection ends.
    #[instrument(skip(self, socket))]
    pub async fn connect(self: Arc<Self>, user_id: UserId, socket: WebSocket) {
        let (handle, outbound) = ConnectionHandle::new(user_id, self.config.queue_capacity);
        let key = handle.key();

        if let Err(e) = self.hub.register(handle).await {
            warn!("Rejecting connection: {}", e);
            return;
        }

        let state = Connection::new(key, self.hub.clone(), self.dispatcher.clone(), &self.config)
            .run(socket, outbound)
            .await;
        debug!(?state, "Connection task finished.");
    }

    /// Queues `envelope` for `user_id` if they are connected. Offline users
    /// are a silent no-op.
    pub async fn notify(&self, user_id: UserId, envelope: &Envelope) -> Result<(), HubError> {
        self.dispatcher.notify(user_id, envelope).await
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.hub.is_online(user_id)
    }

    pub async fn online_users(&self) -> Result<Vec<UserId>, HubError> {
        self.hub.online_users().await
    }

    /// Typed notification helpers for the CRUD layer.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Closes every connection and stops the background tasks.
    pub async fn shutdown(&self) {
        info!("Shutting down chat service...");
        if let Err(e) = self.hub.shutdown().await {
            warn!("Hub was already stopped: {}", e);
        }

        if let Some(control) = self.control.lock().await.take() {
            if let Err(e) = control.await {
                warn!("Hub control loop ended abnormally: {}", e);
            }
        }

        // Listeners have no stop condition of their own.
        for listener in self.listeners.lock().await.drain(..) {
            listener.abort();
        }
        info!("Chat service stopped.");
    }
}
