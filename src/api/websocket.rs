//! WebSocket endpoint for live node status
//!
//! Authentication happens before the upgrade: either a session (bearer
//! header or cookie) or a `token` query parameter resolved through the
//! share-token store. The connection is then registered with the
//! broadcast hub under the resolved account and only ever receives that
//! account's frames.

use axum::{
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, stream::StreamExt};
use serde::Deserialize;
use tracing::{debug, info};

use super::auth::session_token;
use super::error::ApiError;
use super::state::ApiState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// WebSocket upgrade handler
///
/// GET /api/monitor/ws
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
) -> Response {
    // Prefer a full session; fall back to a read-only share token.
    let resolved = match session_token(&headers) {
        Some(token) => state
            .sessions
            .resolve_session(token)
            .await
            .map(|caller| (caller.account_id, false)),
        None => None,
    };

    let resolved = match (resolved, query.token) {
        (Some(identity), _) => Some(identity),
        (None, Some(token)) => state
            .share_tokens
            .resolve_share_token(&token)
            .await
            .map(|account_id| (account_id, true)),
        (None, None) => None,
    };

    let Some((account_id, via_share_token)) = resolved else {
        return ApiError::Unauthorized("missing session or share token".to_string())
            .into_response();
    };

    ws.on_upgrade(move |socket| handle_websocket(socket, state, account_id, via_share_token))
}

/// Handle WebSocket connection
async fn handle_websocket(
    socket: WebSocket,
    state: ApiState,
    account_id: String,
    via_share_token: bool,
) {
    let registration = match state.hub.register(&account_id, via_share_token).await {
        Ok(registration) => registration,
        Err(e) => {
            debug!("hub registration failed: {}", e);
            return;
        }
    };
    let client_id = registration.client_id;
    let mut outbound = registration.outbound;

    info!(
        "WebSocket client {} connected for account {}",
        client_id, account_id
    );

    let (mut sender, mut receiver) = socket.split();

    // Forward hub frames to the socket; ends when the hub closes the
    // queue (eviction) or the socket goes away.
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if sender.send(Message::Text(frame)).await.is_err() {
                debug!("WebSocket send failed, client disconnected");
                break;
            }
        }
    });

    // Drain inbound frames for liveness only; payloads are not
    // interpreted. Pongs are handled by axum.
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Close(_) => break,
                Message::Ping(_) => {
                    debug!("received ping");
                }
                _ => {}
            }
        }
    });

    // Either loop exiting tears the connection down.
    tokio::select! {
        _ = (&mut send_task) => {
            recv_task.abort();
        }
        _ = (&mut recv_task) => {
            send_task.abort();
        }
    }

    // Removal is idempotent at the hub, so an eviction racing this
    // unregister is harmless.
    state.hub.unregister(&account_id, client_id).await;

    info!(
        "WebSocket client {} disconnected from account {}",
        client_id, account_id
    );
}
