//! Domain records carried inside envelopes.
//!
//! These mirror what the surrounding CRUD layer stores. The hub itself never
//! reads them; they exist so producers and clients agree on payload shapes.

use crate::ws::types::UserId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// How many hours a disappearing message lives after it is sent.
pub const DISAPPEARING_MESSAGE_TTL_HOURS: i64 = 24;

/// Public profile of a user, safe to hand to other users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub avatar: String,
    #[serde(default)]
    pub online: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Snap,
}

/// A direct message between two users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// Builds a new, unread message created at `now`. Disappearing messages
    /// expire [`DISAPPEARING_MESSAGE_TTL_HOURS`] after `now`.
    pub fn new(
        id: i64,
        sender_id: UserId,
        receiver_id: UserId,
        content: impl Into<String>,
        kind: MessageKind,
        disappear: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            sender_id,
            receiver_id,
            content: content.into(),
            kind,
            expires_at: disappear.then(|| now + Duration::hours(DISAPPEARING_MESSAGE_TTL_HOURS)),
            read_at: None,
            created_at: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// A message joined with the sender's display info, as pushed to recipients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageWithSender {
    #[serde(flatten)]
    pub message: ChatMessage,
    pub sender_username: String,
    #[serde(default)]
    pub sender_avatar: String,
}
