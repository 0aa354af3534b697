//! WebSocket transport.
//!
//! Connections are accepted here, frames decoded, and packets handed to
//! the core task over its command channel. The transport never interprets
//! packet types: malformed JSON and unknown types are dropped silently,
//! and a write to a dead connection is a no-op.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use parlor_core::protocol::{ClientPacket, ServerPacket};

use crate::core::{ConnId, CoreCommand};

#[derive(Clone)]
pub struct AppState {
    pub commands: mpsc::UnboundedSender<CoreCommand>,
    pub next_conn: Arc<AtomicU64>,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(commands: mpsc::UnboundedSender<CoreCommand>, shutdown: CancellationToken) -> Self {
        Self { commands, next_conn: Arc::new(AtomicU64::new(1)), shutdown }
    }
}

/// Build the HTTP router: a single `/ws` upgrade endpoint.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, addr.to_string(), state))
}

async fn handle_socket(socket: WebSocket, addr: String, state: AppState) {
    let conn: ConnId = state.next_conn.fetch_add(1, Ordering::Relaxed);
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Outbound: one writer task per connection, fed by the core.
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerPacket>();
    let writer = tokio::spawn(async move {
        while let Some(packet) = rx.recv().await {
            let Ok(json) = serde_json::to_string(&packet) else { continue };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    if state.commands.send(CoreCommand::Connected { conn, addr, sender: tx }).is_err() {
        writer.abort();
        return;
    }

    // Inbound: decode JSON text frames; protocol noise is dropped.
    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            message = ws_receiver.next() => {
                let Some(Ok(message)) = message else { break };
                match message {
                    Message::Text(text) => {
                        match serde_json::from_str::<ClientPacket>(&text) {
                            Ok(packet) => {
                                if state
                                    .commands
                                    .send(CoreCommand::Packet { conn, packet })
                                    .is_err()
                                {
                                    break;
                                }
                            },
                            Err(_) => continue,
                        }
                    },
                    Message::Close(_) => break,
                    _ => continue,
                }
            },
        }
    }

    let _ = state.commands.send(CoreCommand::Disconnected { conn });
}
