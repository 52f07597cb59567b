//! Live status stream

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;

use crate::session::SessionStatus;
use crate::ui::server::AppState;

pub async fn status_stream(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| stream_status(socket, state))
}

fn encode(status: &SessionStatus) -> Option<Message> {
    match serde_json::to_string(status) {
        Ok(text) => Some(Message::Text(text)),
        Err(e) => {
            tracing::warn!("Could not encode status: {}", e);
            None
        }
    }
}

/// Send the current status, then every change until either side closes
async fn stream_status(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut updates = state.session.subscribe();

    let initial = updates.borrow_and_update().clone();
    if let Some(message) = encode(&initial) {
        if sender.send(message).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = updates.borrow_and_update().clone();
                if let Some(message) = encode(&status) {
                    if sender.send(message).await.is_err() {
                        break;
                    }
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    tracing::debug!("Status stream closed");
}
