//! Session authentication for WebSocket upgrades.
//!
//! ## Example
//!
//! ```rust,no_run
//! # use async_trait::async_trait;
//! # use axum::{response::Response, routing::get, Router, response::IntoResponse};
//! # use axum_chat_hub::auth::{SessionResolver, WsIdentity};
//! # use axum_chat_hub::ws::types::UserId;
//! #
//! // Your application's shared state
//! #[derive(Clone)]
//! struct AppState {
//!     // ... your session store, etc.
//! }
//!
//! // 1. Implement the trait on your state
//! #[async_trait]
//! impl SessionResolver for AppState {
//!     type Error = std::io::Error;
//!
//!     async fn resolve_session(&self, token: &str) -> Result<UserId, Self::Error> {
//!         // Look the session up in your store...
//! #        if token == "secret-session" {
//! #            Ok(123)
//! #        } else {
//! #            Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "Invalid session"))
//! #        }
//!     }
//! }
//!
//! // 2. Use the extractor in your handler
//! async fn websocket_handler(WsIdentity(user_id): WsIdentity) -> Response {
//!     format!("Hello, user {user_id}!").into_response()
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let app: Router = Router::new()
//!         .route("/ws", get(websocket_handler))
//!         .with_state(AppState {});
//!     // ...
//! }
//! ```

use crate::ws::types::UserId;
use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Query},
    http::{HeaderMap, StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::debug;

/// Name of the cookie carrying the session token.
pub const SESSION_COOKIE: &str = "session";

/// Resolves a session token into the user it belongs to.
///
/// Implement this on your application state; the session store behind it is
/// entirely up to you.
#[async_trait]
pub trait SessionResolver {
    /// The error type returned when a session is unknown or expired.
    type Error: std::error::Error + Send + Sync + 'static;

    async fn resolve_session(&self, token: &str) -> Result<UserId, Self::Error>;
}

/// Extractor for the authenticated user behind a request.
///
/// The session token is looked for, in order, in an `Authorization: Bearer`
/// header, the `session` cookie, and a `token` query parameter. Requests
/// without a valid session are rejected with `401 Unauthorized` before any
/// upgrade happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WsIdentity(pub UserId);

#[derive(Deserialize)]
struct SessionQuery {
    token: String,
}

impl<S> FromRequestParts<S> for WsIdentity
where
    S: SessionResolver + Send + Sync + 'static,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = match session_token(&parts.headers) {
            Some(t) => Some(t),
            None => Query::<SessionQuery>::from_request_parts(parts, state)
                .await
                .ok()
                .map(|Query(q)| q.token),
        };

        let Some(token) = token else {
            return Err(StatusCode::UNAUTHORIZED.into_response());
        };

        match state.resolve_session(&token).await {
            Ok(user_id) => Ok(WsIdentity(user_id)),
            Err(e) => {
                debug!("Session rejected: {}", e);
                Err(StatusCode::UNAUTHORIZED.into_response())
            }
        }
    }
}

/// Session token from the bearer header, falling back to the session cookie.
fn session_token(headers: &HeaderMap) -> Option<String> {
    bearer_token(headers).or_else(|| session_cookie(headers))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_owned())
        .filter(|token| !token.is_empty())
}

fn session_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, token)| token.to_owned())
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(header::HeaderName, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(name.clone(), HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn bearer_header_wins_over_cookie() {
        let map = headers(&[
            (header::AUTHORIZATION, "Bearer abc"),
            (header::COOKIE, "session=xyz"),
        ]);
        assert_eq!(session_token(&map).as_deref(), Some("abc"));
    }

    #[test]
    fn finds_session_among_other_cookies() {
        let map = headers(&[
            (header::COOKIE, "theme=dark"),
            (header::COOKIE, "lang=en; session=s3cr3t; other=1"),
        ]);
        assert_eq!(session_token(&map).as_deref(), Some("s3cr3t"));
    }

    #[test]
    fn missing_or_empty_tokens_are_none() {
        assert_eq!(session_token(&HeaderMap::new()), None);
        let map = headers(&[
            (header::AUTHORIZATION, "Basic Zm9vOmJhcg=="),
            (header::COOKIE, "session="),
        ]);
        assert_eq!(session_token(&map), None);
    }
}
