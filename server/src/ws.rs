//! `GET /ws/sessions/{id}` delivers the session's event bus as JSON lines.
//! A lagged subscriber resumes from the head silently; the event payload
//! itself carries no sequence number, matching the bus's at-most-once,
//! never-reordered delivery guarantee.

use crate::api::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new().route("/ws/sessions/{id}", get(upgrade)).with_state(state)
}

async fn upgrade(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_events(socket, state, id))
}

async fn stream_events(mut socket: WebSocket, state: Arc<AppState>, id: Uuid) {
    let Some(session) = state.sessions.read().await.get(&id).cloned() else {
        let _ = socket.send(Message::Close(None)).await;
        return;
    };
    let mut receiver = session.subscribe();
    loop {
        match receiver.recv().await {
            Ok(event) => {
                let line = match serde_json::to_string(&event) {
                    Ok(line) => line,
                    Err(_) => continue,
                };
                if socket.send(Message::Text(line.into())).await.is_err() {
                    break;
                }
            }
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        }
    }
}
