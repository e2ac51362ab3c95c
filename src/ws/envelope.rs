// axum-chat-hub/src/ws/envelope.rs

//! Wire format for everything exchanged over a client connection.
//!
//! Every frame is `{"type": <tag>, "payload": {...}}`. Outbound frames are
//! [`Envelope`]s; inbound frames are [`ClientEvent`]s. Both are closed sum
//! types, so an unknown tag or a payload of the wrong shape fails to decode
//! instead of being half-understood.

use crate::models::{MessageWithSender, UserSummary};
use crate::ws::types::{Frame, UserId};
use serde::{Deserialize, Serialize};

/// An event pushed from the server to one client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Envelope {
    /// A new direct message addressed to the recipient.
    Message(MessageWithSender),
    /// Someone asked to become the recipient's friend.
    FriendRequest(FriendRequest),
    /// The recipient's messages were read by `reader_id`.
    Read(ReadReceipt),
    /// Another user started or stopped typing to the recipient.
    Typing(TypingStatus),
    /// Another user came online or went offline.
    OnlineStatus(OnlineStatus),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FriendRequest {
    pub from: UserSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub reader_id: UserId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingStatus {
    pub user_id: UserId,
    pub typing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineStatus {
    pub user_id: UserId,
    pub online: bool,
}

impl Envelope {
    pub fn online_status(user_id: UserId, online: bool) -> Self {
        Envelope::OnlineStatus(OnlineStatus { user_id, online })
    }

    /// The `type` tag this envelope carries on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Message(_) => "message",
            Envelope::FriendRequest(_) => "friend_request",
            Envelope::Read(_) => "read",
            Envelope::Typing(_) => "typing",
            Envelope::OnlineStatus(_) => "online_status",
        }
    }

    /// Serializes the envelope into a frame ready for an outbound queue.
    pub fn to_frame(&self) -> Result<Frame, serde_json::Error> {
        serde_json::to_string(self).map(Frame::from)
    }
}

/// An event sent by a client. Only typing indicators are interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientEvent {
    Typing(TypingRequest),
}

/// "I am (not) typing to `recipient_id`."
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingRequest {
    pub recipient_id: UserId,
    #[serde(default)]
    pub typing: bool,
}

impl ClientEvent {
    /// Decodes an inbound text frame. `None` means the frame is malformed or
    /// of a kind the server does not handle; such frames are dropped.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}
