//! Cross-process delivery over Redis Pub/Sub.
//!
//! A single process only knows about its own connections. With the relay
//! enabled, notifications are published to one Redis channel and every
//! process enqueues the frames addressed to users it holds. Presence is not
//! relayed.

use crate::error::HubError;
use crate::ws::registry::Hub;
use crate::ws::types::{Frame, UserId};
use futures_util::StreamExt;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Delay between reconnection attempts to Redis.
const RECONNECT_DELAY: std::time::Duration = std::time::Duration::from_secs(5);

/// What travels on the relay channel.
#[derive(Debug, Serialize, Deserialize)]
struct RelayedFrame {
    user_id: UserId,
    frame: String,
}

#[derive(Debug)]
pub struct Relay {
    client: redis::Client,
    channel: String,
}

impl Relay {
    /// Prepares a relay on `channel`. No connection is made until first use.
    pub fn open(redis_url: &str, channel: &str) -> Result<Self, HubError> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
            channel: channel.to_string(),
        })
    }

    /// Publishes `frame` for `user_id` to every process on the channel.
    pub async fn publish(&self, user_id: UserId, frame: &Frame) -> Result<(), HubError> {
        let payload = serde_json::to_string(&RelayedFrame {
            user_id,
            frame: frame.as_str().to_owned(),
        })?;

        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let receivers: usize = conn.publish(&self.channel, payload).await?;
        debug!(user_id, receivers, "Published frame to relay.");
        Ok(())
    }

    /// Spawns the listener that feeds relayed frames into the local hub.
    pub fn spawn_listener(self: Arc<Self>, hub: Hub) -> JoinHandle<()> {
        tokio::spawn(async move { self.run_listener(hub).await })
    }

    async fn run_listener(&self, hub: Hub) {
        loop {
            let mut pubsub_conn = match self.client.get_async_pubsub().await {
                Ok(conn) => {
                    info!("Redis relay listener connected successfully.");
                    conn
                }
                Err(e) => {
                    error!(
                        "Failed to connect to Redis for the relay: {}. Retrying in 5s.",
                        e
                    );
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    continue;
                }
            };

            if let Err(e) = pubsub_conn.subscribe(&self.channel).await {
                error!(channel = %self.channel, "Failed to subscribe: {}. Retrying in 5s.", e);
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }

            let mut messages = pubsub_conn.on_message();
            while let Some(msg) = messages.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        error!("Failed to get payload from relayed message: {}", e);
                        continue;
                    }
                };
                if let Err(HubError::Closed) = deliver(&hub, &payload).await {
                    info!("Hub stopped; relay listener exiting.");
                    return;
                }
            }

            warn!("Redis relay stream ended. Reconnecting...");
        }
    }
}

/// Hands a relayed frame to the local hub. Malformed payloads are dropped.
async fn deliver(hub: &Hub, payload: &str) -> Result<(), HubError> {
    match RelayedFrame::decode(payload) {
        Some(relayed) => hub.enqueue(relayed.user_id, Frame::from(relayed.frame)).await,
        None => Ok(()),
    }
}

impl RelayedFrame {
    /// Parses a channel payload. Anything that is not a relayed frame is
    /// logged and skipped.
    fn decode(payload: &str) -> Option<Self> {
        match serde_json::from_str(payload) {
            Ok(relayed) => Some(relayed),
            Err(e) => {
                warn!("Ignoring malformed relayed frame: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use crate::ws::types::ConnectionHandle;

    #[test]
    fn relayed_frame_keeps_the_envelope_verbatim() {
        let frame = r#"{"type":"read","payload":{"reader_id":4}}"#;
        let encoded = serde_json::to_string(&RelayedFrame {
            user_id: 9,
            frame: frame.to_string(),
        })
        .unwrap();
        let decoded = RelayedFrame::decode(&encoded).unwrap();
        assert_eq!(decoded.user_id, 9);
        assert_eq!(decoded.frame, frame);
    }

    #[test]
    fn malformed_payloads_are_skipped() {
        for payload in [
            "",
            "not json",
            r#"{"frame":"{}"}"#,
            r#"{"user_id":"nine","frame":"{}"}"#,
            r#"{"user_id":9,"frame":{"type":"read"}}"#,
        ] {
            assert!(RelayedFrame::decode(payload).is_none(), "{payload}");
        }
    }

    #[tokio::test]
    async fn deliver_feeds_the_local_hub_and_skips_junk() {
        let (hub, task) = Hub::start(&HubConfig::default());
        let (handle, mut rx) = ConnectionHandle::new(9, 8);
        hub.register(handle).await.unwrap();

        deliver(&hub, "garbage").await.unwrap();
        deliver(&hub, r#"{"user_id":9,"frame":"hello"}"#).await.unwrap();
        deliver(&hub, r#"{"user_id":10,"frame":"nobody home"}"#).await.unwrap();
        hub.online_users().await.unwrap();

        assert_eq!(rx.try_recv().unwrap().as_str(), "hello");
        assert!(rx.try_recv().is_err());

        hub.shutdown().await.unwrap();
        task.await.unwrap();
        assert!(matches!(
            deliver(&hub, r#"{"user_id":9,"frame":"late"}"#).await,
            Err(HubError::Closed)
        ));
    }

    #[test]
    fn rejects_invalid_redis_url() {
        assert!(Relay::open("not a url", "chan").is_err());
    }
}
