//! A small direct-messaging server wired to the hub.
//!
//! Users, friendships and messages live in memory. Two accounts are seeded:
//! `alice` (session `alice-session`) and `bob` (session `bob-session`).
//!
//! ```text
//! cargo run --example dm_chat
//! websocat "ws://127.0.0.1:3000/ws?token=bob-session"
//! curl -X POST localhost:3000/api/messages -H 'Authorization: Bearer alice-session' \
//!      -H 'Content-Type: application/json' -d '{"receiver_id": 2, "content": "hi bob"}'
//! ```

use axum::{
    Json, Router,
    extract::{Path, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_chat_hub::prelude::*;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::Mutex;
use tracing::{info, warn};

// 1. In-memory persistence

#[derive(Debug, Clone)]
struct User {
    id: UserId,
    username: String,
    avatar: String,
    disabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FriendStatus {
    Pending,
    Accepted,
}

#[derive(Debug, Clone, Copy)]
struct Friendship {
    user_id: UserId,
    friend_id: UserId,
    status: FriendStatus,
}

struct Store {
    users: Vec<User>,
    sessions: HashMap<String, UserId>,
    friends: Mutex<Vec<Friendship>>,
    messages: Mutex<Vec<ChatMessage>>,
    next_message_id: AtomicI64,
}

impl Store {
    fn seeded() -> Self {
        let users = vec![
            User {
                id: 1,
                username: "alice".into(),
                avatar: String::new(),
                disabled: false,
            },
            User {
                id: 2,
                username: "bob".into(),
                avatar: String::new(),
                disabled: false,
            },
            User {
                id: 3,
                username: "mallory".into(),
                avatar: String::new(),
                disabled: true,
            },
        ];
        let sessions = users
            .iter()
            .map(|u| (format!("{}-session", u.username), u.id))
            .collect();
        Self {
            users,
            sessions,
            friends: Mutex::new(Vec::new()),
            messages: Mutex::new(Vec::new()),
            next_message_id: AtomicI64::new(1),
        }
    }

    fn user(&self, id: UserId) -> Option<&User> {
        self.users.iter().find(|u| u.id == id)
    }

    fn user_by_name(&self, username: &str) -> Option<&User> {
        self.users.iter().find(|u| u.username == username)
    }
}

// 2. Application state, errors and session lookup

#[derive(Clone)]
struct AppState {
    store: Arc<Store>,
    chat: Arc<ChatService>,
}

impl AppState {
    fn summary(&self, user: &User) -> UserSummary {
        UserSummary {
            id: user.id,
            username: user.username.clone(),
            avatar: user.avatar.clone(),
            online: self.chat.is_online(user.id),
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error("unknown or expired session")]
    BadSession,
    #[error("{0}")]
    BadRequest(&'static str),
    #[error("{0}")]
    NotFound(&'static str),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::BadSession => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[async_trait::async_trait]
impl SessionResolver for AppState {
    type Error = ApiError;

    async fn resolve_session(&self, token: &str) -> Result<UserId, Self::Error> {
        self.store
            .sessions
            .get(token)
            .copied()
            .ok_or(ApiError::BadSession)
    }
}

// 3. WebSocket route

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    WsIdentity(user_id): WsIdentity,
) -> Response {
    let store = Arc::clone(&state.store);
    upgrade_handler(ws, State(state.chat), user_id, move |id| async move {
        match store.user(id) {
            Some(user) if !user.disabled => Ok(()),
            Some(_) => Err(StatusCode::FORBIDDEN),
            None => Err(StatusCode::UNAUTHORIZED),
        }
    })
    .await
}

// 4. CRUD routes that notify the hub after persisting

#[derive(Debug, Deserialize)]
struct SendMessageRequest {
    receiver_id: UserId,
    content: String,
    #[serde(rename = "type", default)]
    kind: MessageKind,
    /// Expire the message a day after sending.
    #[serde(default)]
    disappear: bool,
}

async fn send_message(
    State(state): State<AppState>,
    WsIdentity(sender_id): WsIdentity,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<ChatMessage>, ApiError> {
    if req.content.trim().is_empty() {
        return Err(ApiError::BadRequest("Message content is required"));
    }
    let sender = state.store.user(sender_id).ok_or(ApiError::BadSession)?;
    let receiver = state
        .store
        .user(req.receiver_id)
        .ok_or(ApiError::NotFound("Recipient not found"))?;

    let id = state.store.next_message_id.fetch_add(1, Ordering::Relaxed);
    let message = ChatMessage::new(
        id,
        sender.id,
        receiver.id,
        req.content,
        req.kind,
        req.disappear,
        Utc::now(),
    );
    state.store.messages.lock().await.push(message.clone());

    let outgoing = MessageWithSender {
        message: message.clone(),
        sender_username: sender.username.clone(),
        sender_avatar: sender.avatar.clone(),
    };
    if let Err(e) = state.chat.dispatcher().message(outgoing).await {
        warn!("Live delivery failed: {}", e);
    }

    Ok(Json(message))
}

async fn mark_read(
    State(state): State<AppState>,
    WsIdentity(reader_id): WsIdentity,
    Path(sender_id): Path<UserId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let now = Utc::now();
    let mut updated = 0;
    for message in state.store.messages.lock().await.iter_mut() {
        if message.sender_id == sender_id && message.receiver_id == reader_id && message.read_at.is_none() {
            message.read_at = Some(now);
            updated += 1;
        }
    }

    if let Err(e) = state.chat.dispatcher().read_receipt(sender_id, reader_id).await {
        warn!("Read receipt delivery failed: {}", e);
    }
    Ok(Json(json!({ "success": true, "updated": updated })))
}

#[derive(Debug, Deserialize)]
struct FriendRequestBody {
    username: String,
}

async fn request_friend(
    State(state): State<AppState>,
    WsIdentity(user_id): WsIdentity,
    Json(body): Json<FriendRequestBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let me = state.store.user(user_id).ok_or(ApiError::BadSession)?;
    let friend = state
        .store
        .user_by_name(&body.username)
        .ok_or(ApiError::NotFound("User not found"))?;
    if friend.id == me.id {
        return Err(ApiError::BadRequest("Cannot add yourself"));
    }

    {
        let mut friends = state.store.friends.lock().await;
        let exists = friends.iter().any(|f| {
            (f.user_id == me.id && f.friend_id == friend.id)
                || (f.user_id == friend.id && f.friend_id == me.id)
        });
        if exists {
            return Err(ApiError::BadRequest("Friend request already exists"));
        }
        friends.push(Friendship {
            user_id: me.id,
            friend_id: friend.id,
            status: FriendStatus::Pending,
        });
    }

    if let Err(e) = state
        .chat
        .dispatcher()
        .friend_request(friend.id, state.summary(me))
        .await
    {
        warn!("Friend request delivery failed: {}", e);
    }
    Ok(Json(json!({ "success": true, "message": "Friend request sent" })))
}

async fn accept_friend(
    State(state): State<AppState>,
    WsIdentity(user_id): WsIdentity,
    Path(requester_id): Path<UserId>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut friends = state.store.friends.lock().await;
    let request = friends
        .iter_mut()
        .find(|f| f.user_id == requester_id && f.friend_id == user_id && f.status == FriendStatus::Pending)
        .ok_or(ApiError::NotFound("Friend request not found"))?;
    request.status = FriendStatus::Accepted;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Serialize)]
struct Conversation {
    user: UserSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_message: Option<ChatMessage>,
    unread_count: usize,
}

async fn conversations(
    State(state): State<AppState>,
    WsIdentity(user_id): WsIdentity,
) -> Json<Vec<Conversation>> {
    let now = Utc::now();
    let mut messages = state.store.messages.lock().await;
    messages.retain(|m| !m.is_expired(now));

    let mut result: Vec<Conversation> = Vec::new();
    for user in state.store.users.iter().filter(|u| u.id != user_id) {
        let thread: Vec<&ChatMessage> = messages
            .iter()
            .filter(|m| {
                (m.sender_id == user_id && m.receiver_id == user.id)
                    || (m.sender_id == user.id && m.receiver_id == user_id)
            })
            .collect();
        let Some(last) = thread.last() else {
            continue;
        };
        result.push(Conversation {
            user: state.summary(user),
            last_message: Some((*last).clone()),
            unread_count: thread
                .iter()
                .filter(|m| m.receiver_id == user_id && m.read_at.is_none())
                .count(),
        });
    }

    Json(result)
}

// 5. Wiring

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("dm_chat=info,axum_chat_hub=info")),
        )
        .init();

    let chat = ChatService::start(HubConfig::from_env()).expect("failed to start chat service");
    let state = AppState {
        store: Arc::new(Store::seeded()),
        chat: Arc::clone(&chat),
    };

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/messages", post(send_message))
        .route("/api/messages/{user_id}/read", post(mark_read))
        .route("/api/friends/request", post(request_friend))
        .route("/api/friends/{user_id}/accept", post(accept_friend))
        .route("/api/conversations", get(conversations))
        .route("/health", get(|| async { "OK" }))
        .with_state(state);

    let port = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Ctrl-C received.");
            chat.shutdown().await;
        })
        .await
        .unwrap();
}
