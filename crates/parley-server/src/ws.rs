//! WebSocket upgrade and the per-socket read/write loops.

use std::collections::HashMap;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{header::AUTHORIZATION, HeaderMap},
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error};

use parley_shared::constants::{MAX_FRAME_SIZE, TOKEN_QUERY_PARAM};
use parley_shared::protocol::ServerEvent;

use crate::api::AppState;
use crate::rate_limit::TokenBucket;
use crate::session::Session;

/// Upgrade to a WebSocket. The credential comes from `?token=` or an
/// `Authorization: Bearer` header. A missing or bad credential still
/// upgrades, as an anonymous connection.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let token = params
        .get(TOKEN_QUERY_PARAM)
        .cloned()
        .or_else(|| bearer_token(&headers));

    ws.max_frame_size(MAX_FRAME_SIZE)
        .max_message_size(MAX_FRAME_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state, token))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

async fn handle_socket(socket: WebSocket, state: AppState, token: Option<String>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    let bucket = TokenBucket::new(state.config.rate_limit_per_sec, state.config.rate_limit_burst);
    let mut session = Session::open(
        state.chat.clone(),
        &*state.resolver,
        token.as_deref(),
        tx,
        bucket,
    )
    .await;
    let connection_id = session.id();

    let send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event.to_json() {
                Ok(json) => {
                    if sink.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!(event = event.name(), error = %e, "Failed to encode outbound event");
                }
            }
        }
    });

    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                debug!(connection_id = %connection_id, error = %e, "WebSocket read failed");
                break;
            }
        };

        match msg {
            Message::Text(text) => {
                if session.handle_text(&text).await.is_break() {
                    break;
                }
            }
            Message::Close(_) => break,
            // Pings are answered by axum; binary frames are not part of the protocol.
            _ => {}
        }
    }

    session.close().await;
    send_task.abort();
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc123"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc123"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert_eq!(bearer_token(&headers), None);
    }
}
