// axum-chat-hub/src/ws/dispatcher.rs

//! Turns domain events into envelopes addressed to one user.
//!
//! HTTP handlers call these after their own persistence step succeeds.
//! Delivery is fire-and-forget: an offline recipient simply gets nothing
//! live, and the caller cannot tell the difference.

use crate::error::HubError;
use crate::models::{MessageWithSender, UserSummary};
use crate::ws::envelope::{Envelope, FriendRequest, ReadReceipt, TypingRequest, TypingStatus};
use crate::ws::registry::Hub;
use crate::ws::types::UserId;
use tracing::instrument;

#[cfg(feature = "redis-relay")]
use crate::relay::Relay;
#[cfg(feature = "redis-relay")]
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Dispatcher {
    hub: Hub,
    #[cfg(feature = "redis-relay")]
    relay: Option<Arc<Relay>>,
}

impl Dispatcher {
    pub fn new(hub: Hub) -> Self {
        Self {
            hub,
            #[cfg(feature = "redis-relay")]
            relay: None,
        }
    }

    /// Routes notifications through Redis so they reach whichever process
    /// holds the recipient's connection.
    #[cfg(feature = "redis-relay")]
    pub fn with_relay(hub: Hub, relay: Arc<Relay>) -> Self {
        Self {
            hub,
            relay: Some(relay),
        }
    }

    /// Serializes `envelope` and queues it for `user_id` if they are online.
    #[instrument(skip(self, envelope), fields(kind = envelope.kind()))]
    pub async fn notify(&self, user_id: UserId, envelope: &Envelope) -> Result<(), HubError> {
        let frame = envelope.to_frame()?;

        #[cfg(feature = "redis-relay")]
        if let Some(relay) = &self.relay {
            match relay.publish(user_id, &frame).await {
                Ok(()) => return Ok(()),
                Err(e) => tracing::warn!("Relay publish failed, delivering locally: {}", e),
            }
        }

        self.hub.enqueue(user_id, frame).await
    }

    /// Pushes a freshly stored message to its receiver.
    pub async fn message(&self, message: MessageWithSender) -> Result<(), HubError> {
        let receiver = message.message.receiver_id;
        self.notify(receiver, &Envelope::Message(message)).await
    }

    pub async fn friend_request(&self, to: UserId, from: UserSummary) -> Result<(), HubError> {
        self.notify(to, &Envelope::FriendRequest(FriendRequest { from }))
            .await
    }

    /// Tells `sender_id` that `reader_id` has read their messages.
    pub async fn read_receipt(&self, sender_id: UserId, reader_id: UserId) -> Result<(), HubError> {
        self.notify(sender_id, &Envelope::Read(ReadReceipt { reader_id }))
            .await
    }

    /// Forwards a client's typing indicator to the recipient it names,
    /// stamped with who is typing.
    pub async fn typing(&self, from: UserId, request: TypingRequest) -> Result<(), HubError> {
        let status = TypingStatus {
            user_id: from,
            typing: request.typing,
        };
        self.notify(request.recipient_id, &Envelope::Typing(status))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use crate::models::{ChatMessage, MessageKind};
    use crate::ws::types::{ConnectionHandle, Frame};
    use chrono::Utc;
    use serde_json::{Value, json};
    use tokio::sync::mpsc;

    async fn online(hub: &Hub, user_id: UserId) -> mpsc::Receiver<Frame> {
        let (handle, rx) = ConnectionHandle::new(user_id, 16);
        hub.register(handle).await.unwrap();
        rx
    }

    fn next(rx: &mut mpsc::Receiver<Frame>) -> Value {
        serde_json::from_str(rx.try_recv().unwrap().as_str()).unwrap()
    }

    #[tokio::test]
    async fn message_goes_to_the_receiver_only() {
        let (hub, _) = Hub::start(&HubConfig::default());
        let dispatcher = Dispatcher::new(hub.clone());
        let mut alice = online(&hub, 1).await;
        let mut bob = online(&hub, 2).await;
        hub.online_users().await.unwrap();
        let _ = alice.try_recv(); // online{2}

        let message = MessageWithSender {
            message: ChatMessage::new(11, 1, 2, "hi bob", MessageKind::Text, false, Utc::now()),
            sender_username: "alice".into(),
            sender_avatar: String::new(),
        };
        dispatcher.message(message).await.unwrap();
        hub.online_users().await.unwrap();

        let frame = next(&mut bob);
        assert_eq!(frame["type"], "message");
        assert_eq!(frame["payload"]["content"], "hi bob");
        assert_eq!(frame["payload"]["sender_username"], "alice");
        assert!(alice.try_recv().is_err());
    }

    #[tokio::test]
    async fn typing_is_reshaped_for_the_recipient() {
        let (hub, _) = Hub::start(&HubConfig::default());
        let dispatcher = Dispatcher::new(hub.clone());
        let mut alice = online(&hub, 1).await;

        let request = TypingRequest {
            recipient_id: 1,
            typing: true,
        };
        dispatcher.typing(2, request).await.unwrap();
        hub.online_users().await.unwrap();

        assert_eq!(
            next(&mut alice),
            json!({"type": "typing", "payload": {"user_id": 2, "typing": true}})
        );
    }

    #[tokio::test]
    async fn read_receipt_and_friend_request_reach_their_targets() {
        let (hub, _) = Hub::start(&HubConfig::default());
        let dispatcher = Dispatcher::new(hub.clone());
        let mut carol = online(&hub, 3).await;

        dispatcher.read_receipt(3, 4).await.unwrap();
        let from = UserSummary {
            id: 4,
            username: "dave".into(),
            avatar: String::new(),
            online: true,
        };
        dispatcher.friend_request(3, from).await.unwrap();
        // Nobody is listening as user 5; must not fail.
        dispatcher.read_receipt(5, 3).await.unwrap();
        hub.online_users().await.unwrap();

        assert_eq!(
            next(&mut carol),
            json!({"type": "read", "payload": {"reader_id": 4}})
        );
        let request = next(&mut carol);
        assert_eq!(request["type"], "friend_request");
        assert_eq!(request["payload"]["from"]["id"], 4);
    }
}
