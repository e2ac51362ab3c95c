//! Provides the Axum handler for upgrading HTTP requests to hub connections.

use crate::ws::service::ChatService;
use crate::ws::types::UserId;
use axum::{
    extract::{State, ws::WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::future::Future;
use std::sync::Arc;
use tracing::{error, instrument};

/// Orchestrates the WebSocket upgrade for an already authenticated user.
///
/// 1.  Runs the application's `admit` check (for example, rejecting disabled
///     accounts with `403 Forbidden`).
/// 2.  Upgrades the connection and hands the socket to
///     [`ChatService::connect`], which registers it with the hub.
///
/// ## Example Usage
///
/// ```rust,no_run
/// # use axum::{Router, routing::get, extract::{State, WebSocketUpgrade}};
/// # use std::sync::Arc;
/// # use axum_chat_hub::prelude::*;
/// # async fn run(service: Arc<ChatService>) {
/// let app: Router = Router::new()
///     .route(
///         "/ws",
///         get(|ws: WebSocketUpgrade, State(service): State<Arc<ChatService>>| async move {
///             // The user id normally comes from `WsIdentity`.
///             upgrade_handler(ws, State(service), 1, |_user_id| async { Ok(()) }).await
///         }),
///     )
///     .with_state(service);
/// # }
/// ```
#[instrument(skip_all, fields(user_id = user_id))]
pub async fn upgrade_handler<V, F>(
    ws: WebSocketUpgrade,
    State(service): State<Arc<ChatService>>,
    user_id: UserId,
    admit: V,
) -> Response
where
    V: FnOnce(UserId) -> F,
    F: Future<Output = Result<(), StatusCode>>,
{
    if let Err(status_code) = admit(user_id).await {
        error!(
            "WebSocket connection rejected by admission check with status: {}",
            status_code
        );
        return status_code.into_response();
    }

    // The `on_upgrade` callback runs in the background.
    ws.on_upgrade(move |socket| async move {
        service.connect(user_id, socket).await;
    })
}
