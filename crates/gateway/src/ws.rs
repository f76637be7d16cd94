use std::sync::Arc;

use {
    axum::{
        extract::{
            State, WebSocketUpgrade,
            ws::{Message, WebSocket},
        },
        http::HeaderMap,
        response::{IntoResponse, Response},
    },
    futures::{SinkExt, StreamExt},
    serde_json::json,
    tokio::sync::mpsc,
    tracing::{debug, info, warn},
};

use crate::{error::ApiError, realtime::RealtimeSession, state::GatewayState};

/// Realtime handshake. The origin check runs before the upgrade so a denied
/// client gets an HTTP 403 rather than a socket.
pub async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<GatewayState>>,
) -> Response {
    let decision = state.origin.evaluate_headers(&headers);
    if !decision.is_allowed() {
        warn!(origin = ?headers.get("origin"), "realtime handshake rejected");
        return ApiError::OriginDenied.into_response();
    }
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: Arc<GatewayState>) {
    let session_id = uuid::Uuid::new_v4().to_string();
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    state
        .realtime
        .on_connect(RealtimeSession::new(session_id.clone(), tx))
        .await;
    info!(session_id = %session_id, "realtime client connected");
    state
        .realtime
        .broadcast("session.connected", json!({ "sessionId": session_id }))
        .await;

    let write_loop = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
        // Flushes the reply to a client-initiated close.
        let _ = sink.close().await;
    });

    // Payloads are out of scope; keep reading only to notice the close.
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Close(_)) => break,
            Ok(_) => {},
            Err(e) => {
                debug!(session_id = %session_id, error = %e, "realtime read error");
                break;
            },
        }
    }

    // Dropping the session drops its sender, which ends the write loop.
    state.realtime.on_disconnect(&session_id).await;
    if let Err(e) = write_loop.await {
        debug!(session_id = %session_id, error = %e, "realtime write loop failed");
    }
    info!(session_id = %session_id, "realtime client disconnected");
    state
        .realtime
        .broadcast("session.disconnected", json!({ "sessionId": session_id }))
        .await;
}
