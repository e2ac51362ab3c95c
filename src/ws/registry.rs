// axum-chat-hub/src/ws/registry.rs

//! The hub: process-wide registry of live connections.
//!
//! All mutation of the user -> connection map happens on one task, the
//! control loop, which consumes [`HubCommand`]s in order. Callers anywhere
//! in the process talk to it through a cheap, cloneable [`Hub`] handle.
//! Reads that only need membership (`is_online`) go straight to the shared
//! `DashMap` without a round trip.
//!
//! The loop never blocks on a client: deliveries use `try_send`, and a
//! connection whose outbound queue is full (or already closed) is evicted
//! on the spot.

use crate::config::HubConfig;
use crate::error::HubError;
use crate::ws::envelope::Envelope;
use crate::ws::types::{ConnectionHandle, ConnectionId, ConnectionKey, Frame, UserId};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

/// Requests consumed by the control loop.
pub(crate) enum HubCommand {
    Register(ConnectionHandle),
    Unregister(ConnectionKey),
    Enqueue { user_id: UserId, frame: Frame },
    Snapshot(oneshot::Sender<Vec<UserId>>),
    Shutdown,
}

/// Handle to the hub's control loop.
#[derive(Clone)]
pub struct Hub {
    commands: mpsc::Sender<HubCommand>,
    members: Arc<DashMap<UserId, ConnectionHandle>>,
}

impl fmt::Debug for Hub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("online", &self.members.len())
            .field("closed", &self.commands.is_closed())
            .finish()
    }
}

impl Hub {
    /// Spawns the control loop and returns a handle to it, along with the
    /// loop's task so the caller can await it after [`Hub::shutdown`].
    pub fn start(config: &HubConfig) -> (Self, JoinHandle<()>) {
        let (commands, rx) = mpsc::channel(config.command_capacity.max(1));
        let members = Arc::new(DashMap::new());

        let control = ControlLoop {
            members: Arc::clone(&members),
        };
        info!("Spawning hub control loop...");
        let task = tokio::spawn(control.run(rx));

        (Self { commands, members }, task)
    }

    /// Makes `handle` the connection for its user, replacing (and closing)
    /// any previous one, then tells every other online user.
    pub async fn register(&self, handle: ConnectionHandle) -> Result<(), HubError> {
        self.send(HubCommand::Register(handle)).await
    }

    /// Removes the connection identified by `key`, if it is still the
    /// current one for its user. Safe to call any number of times.
    pub async fn unregister(&self, key: ConnectionKey) -> Result<(), HubError> {
        self.send(HubCommand::Unregister(key)).await
    }

    /// Queues `frame` for `user_id`. Offline users are a silent no-op.
    pub async fn enqueue(&self, user_id: UserId, frame: Frame) -> Result<(), HubError> {
        self.send(HubCommand::Enqueue { user_id, frame }).await
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.members.contains_key(&user_id)
    }

    /// Users online once every command sent before this call has been
    /// processed.
    pub async fn online_users(&self) -> Result<Vec<UserId>, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCommand::Snapshot(reply)).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Stops the control loop. Every registered connection is dropped, which
    /// closes its outbound queue and, in turn, its transport.
    pub async fn shutdown(&self) -> Result<(), HubError> {
        self.send(HubCommand::Shutdown).await
    }

    async fn send(&self, command: HubCommand) -> Result<(), HubError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| HubError::Closed)
    }
}

/// The single owner of all writes to `members`.
struct ControlLoop {
    members: Arc<DashMap<UserId, ConnectionHandle>>,
}

impl ControlLoop {
    async fn run(self, mut commands: mpsc::Receiver<HubCommand>) {
        info!("Hub control loop started.");
        while let Some(command) = commands.recv().await {
            match command {
                HubCommand::Register(handle) => self.register(handle),
                HubCommand::Unregister(key) => self.unregister(key),
                HubCommand::Enqueue { user_id, frame } => self.enqueue(user_id, frame),
                HubCommand::Snapshot(reply) => {
                    let _ = reply.send(self.members.iter().map(|e| *e.key()).collect());
                }
                HubCommand::Shutdown => {
                    info!("Shutdown requested.");
                    break;
                }
            }
        }

        let count = self.members.len();
        self.members.clear();
        info!(count, "Hub control loop stopped; all outbound queues closed.");
    }

    #[instrument(skip_all, fields(user_id = handle.user_id, conn_id = %handle.id))]
    fn register(&self, handle: ConnectionHandle) {
        let user_id = handle.user_id;
        match self.members.insert(user_id, handle) {
            Some(previous) => {
                info!(old_conn_id = %previous.id, "Replacing existing connection for user.");
                // Dropping the old handle closes its queue; its write pump
                // then shuts the superseded transport.
                drop(previous);
            }
            None => info!(online = self.members.len(), "Client registered."),
        }
        self.announce(user_id, true);
    }

    #[instrument(skip_all, fields(user_id = key.user_id, conn_id = %key.id))]
    fn unregister(&self, key: ConnectionKey) {
        if self.remove(key.user_id, key.id) {
            info!(online = self.members.len(), "Client unregistered.");
            self.announce(key.user_id, false);
        } else {
            debug!("Connection already gone or replaced; nothing to unregister.");
        }
    }

    fn enqueue(&self, user_id: UserId, frame: Frame) {
        let (conn_id, outcome) = match self.members.get(&user_id) {
            Some(entry) => (entry.id, entry.outbound.try_send(frame)),
            None => {
                trace!(user_id, "Target offline; dropping frame.");
                return;
            }
        };

        if let Err(e) = outcome {
            if self.remove(user_id, conn_id) {
                warn!(user_id, %conn_id, reason = reason(&e), "Evicting connection.");
                self.announce(user_id, false);
            }
        }
    }

    /// Tells every other member that `user_id` went online or offline.
    ///
    /// Members whose queues cannot take the update are evicted, and their
    /// own departure is announced in turn.
    fn announce(&self, user_id: UserId, online: bool) {
        let mut pending = VecDeque::from([(user_id, online)]);

        while let Some((subject, online)) = pending.pop_front() {
            let frame = match Envelope::online_status(subject, online).to_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    error!(user_id = subject, "Failed to encode presence update: {}", e);
                    continue;
                }
            };

            let mut stuck: Vec<(UserId, ConnectionId, &'static str)> = Vec::new();
            for entry in self.members.iter() {
                if *entry.key() == subject {
                    continue;
                }
                if let Err(e) = entry.outbound.try_send(frame.clone()) {
                    stuck.push((*entry.key(), entry.id, reason(&e)));
                }
            }

            debug!(user_id = subject, online, "Presence update fanned out.");

            for (user_id, conn_id, reason) in stuck {
                if self.remove(user_id, conn_id) {
                    warn!(user_id, %conn_id, reason, "Evicting connection during presence fan-out.");
                    pending.push_back((user_id, false));
                }
            }
        }
    }

    /// Removes the entry for `user_id` only if it is connection `conn_id`.
    /// The removed handle is dropped here, closing its queue.
    fn remove(&self, user_id: UserId, conn_id: ConnectionId) -> bool {
        self.members
            .remove_if(&user_id, |_, current| current.id == conn_id)
            .is_some()
    }
}

fn reason<T>(e: &TrySendError<T>) -> &'static str {
    match e {
        TrySendError::Full(_) => "outbound queue full",
        TrySendError::Closed(_) => "outbound queue closed",
    }
}
