//! Live task progress over WebSocket.
//!
//! `GET /ws/tasks/{id}` upgrades and then streams JSON task snapshots: the
//! current state first, then every committed change until the task settles,
//! at which point the server closes the connection normally. Subscribing to
//! an unknown task still upgrades, but the socket carries a single error
//! frame and an application close code instead of snapshots.

use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tracing::{debug, info, warn};

use scribe_core::TaskFeed;

use crate::state::AppState;

/// Application close code for a subscription to a task that does not exist.
const CLOSE_NOT_FOUND: u16 = 4004;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/ws/tasks/{id}", get(ws_task_events))
}

/// Resolve the subscription before upgrading so a bad id costs no stream
/// machinery; the upgrade itself must still complete for the client to
/// receive anything, so errors are delivered on the socket.
async fn ws_task_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    match state.dispatcher.subscribe(&id).await {
        Ok(feed) => ws.on_upgrade(move |socket| stream_task(socket, id, feed)),
        Err(error) => ws.on_upgrade(move |mut socket| async move {
            debug!(task_id = %id, error = %error, "websocket subscribe rejected");
            let payload = serde_json::json!({
                "type": "error",
                "message": error.to_string(),
            });
            let _ = socket.send(Message::Text(payload.to_string().into())).await;
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_NOT_FOUND,
                    reason: "task not found".into(),
                })))
                .await;
        }),
    }
}

async fn stream_task(mut socket: WebSocket, id: String, mut feed: TaskFeed) {
    info!(task_id = %id, "websocket subscriber connected");
    loop {
        tokio::select! {
            snapshot = feed.next() => {
                let Some(task) = snapshot else { break };
                let payload = match serde_json::to_string(&task) {
                    Ok(payload) => payload,
                    Err(error) => {
                        warn!(task_id = %id, error = %error, "failed to encode task snapshot");
                        break;
                    }
                };
                if socket.send(Message::Text(payload.into())).await.is_err() {
                    debug!(task_id = %id, "websocket subscriber went away");
                    return;
                }
            }
            client_msg = socket.recv() => {
                match client_msg {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(task_id = %id, "websocket closed by client");
                        return;
                    }
                    Some(Err(error)) => {
                        debug!(task_id = %id, error = %error, "websocket receive error");
                        return;
                    }
                    // Pings are answered by axum; other frames are ignored.
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: "stream complete".into(),
        })))
        .await;
    info!(task_id = %id, "websocket stream complete");
}

// ── Tests ─────────────────────────────────────────────────────────────────────
