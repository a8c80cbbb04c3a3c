//! WebSocket endpoint. A browser `WebSocket` can't set an `Authorization`
//! header, so the access token travels as a `?token=` query parameter
//! instead — verified the same way as the HTTP bearer token.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::response::IntoResponse;
use bg_domain::ws::{ClientMessage, JobSummary, ServerMessage};
use bg_registry::CancelOutcome;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::auth::jwt;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: String,
}

pub async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(q): Query<WsQuery>,
    ConnectInfo(_remote): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    let claims = match jwt::verify_access_token(&state.config.jwt, &q.token) {
        Ok(claims) => claims,
        Err(_) => return axum::http::StatusCode::UNAUTHORIZED.into_response(),
    };
    let user_id = claims.sub;

    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: String) {
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(64);
    let conn_id = match state.hub.register(&user_id, tx) {
        Ok(id) => id,
        Err(_) => {
            let _ = socket;
            tracing::warn!(user_id = %user_id, "websocket connection cap exceeded");
            return;
        }
    };

    let (mut sink, mut stream) = socket.split();

    let sync_frame = build_sync_frame(&state, &user_id);
    if let Ok(text) = serde_json::to_string(&sync_frame) {
        if sink.send(Message::Text(text.into())).await.is_err() {
            state.hub.remove(&user_id, &conn_id);
            return;
        }
    }

    let idle_timeout = Duration::from_secs(state.config.server.ws_receive_timeout_secs);

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(text) = serde_json::to_string(&msg) {
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    });

    loop {
        match tokio::time::timeout(idle_timeout, stream.next()).await {
            Ok(Some(Ok(Message::Text(raw)))) => {
                if let Ok(client_msg) = serde_json::from_str::<ClientMessage>(&raw) {
                    handle_client_message(&state, &user_id, client_msg);
                }
            }
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => break,
            Ok(Some(Ok(_))) => {}
            Ok(Some(Err(_))) => break,
            Err(_) => break, // idle timeout
        }
    }

    state.hub.remove(&user_id, &conn_id);
    writer.abort();
}

fn handle_client_message(state: &AppState, user_id: &str, msg: ClientMessage) {
    match msg {
        ClientMessage::Ping { timestamp } => {
            state.hub.send_to_user(user_id, ServerMessage::Pong { timestamp });
        }
        ClientMessage::Cancel { job_id } => {
            if let Ok(Ok(outcome)) = state.registry.cancel(&job_id, user_id, false) {
                if matches!(outcome, CancelOutcome::CancelledImmediately | CancelOutcome::SignalSent) {
                    state.hub.send_to_user(user_id, ServerMessage::JobCancelled { job_id });
                }
            }
        }
    }
}

/// Active jobs plus the ten most recent terminal ones, so a reconnecting
/// client can repaint its UI without a separate history fetch.
fn build_sync_frame(state: &AppState, user_id: &str) -> ServerMessage {
    let active = state.db.list_active_jobs_for_user(user_id).unwrap_or_default();
    let recent = state.db.list_recent_terminal_jobs(user_id, 10).unwrap_or_default();
    ServerMessage::Sync {
        active_jobs: active.iter().map(JobSummary::from).collect(),
        recent_jobs: recent.iter().map(JobSummary::from).collect(),
    }
}
