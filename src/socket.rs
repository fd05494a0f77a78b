//! WebSocket push transport. Clients join rooms keyed by chat id and get an
//! immediate `new-message` broadcast when anyone in the room sends — before
//! the store write is confirmed (that rides the HTTP POST independently).

use crate::api::AppState;
use crate::chat::ChatMessage;
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const ROOM_CAPACITY: usize = 64;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientFrame {
    JoinChat(String),
    LeaveChat(String),
    SendMessage(ChatMessage),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerFrame {
    NewMessage(ChatMessage),
}

/// Room registry for the push transport. Constructed once at startup and
/// injected through `AppState`; each room is a broadcast channel that
/// connections tap while joined.
pub struct SocketHub {
    rooms: RwLock<HashMap<String, broadcast::Sender<ServerFrame>>>,
}

impl SocketHub {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe to a room, creating it on first join.
    pub async fn join(&self, chat_id: &str) -> broadcast::Receiver<ServerFrame> {
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(chat_id.to_string())
            .or_insert_with(|| broadcast::channel(ROOM_CAPACITY).0)
            .subscribe()
    }

    /// Best-effort broadcast to everyone currently in the room.
    pub async fn broadcast(&self, chat_id: &str, frame: ServerFrame) {
        let rooms = self.rooms.read().await;
        if let Some(tx) = rooms.get(chat_id) {
            // No receivers is fine, the room is just idle
            let _ = tx.send(frame);
        }
    }

    /// Drop a room once the last member has left.
    pub async fn prune(&self, chat_id: &str) {
        let mut rooms = self.rooms.write().await;
        if let Some(tx) = rooms.get(chat_id) {
            if tx.receiver_count() == 0 {
                rooms.remove(chat_id);
            }
        }
    }

    #[cfg(test)]
    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

impl Default for SocketHub {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn socket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| handle_connection(socket, hub))
}

async fn handle_connection(socket: WebSocket, hub: Arc<SocketHub>) {
    info!("Socket client connected");

    let (mut sink, mut stream) = socket.split();

    // All outbound frames funnel through one writer task
    let (out_tx, mut out_rx) = mpsc::channel::<ServerFrame>(ROOM_CAPACITY);
    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to encode socket frame: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // One forwarder task per joined room, torn down on leave or disconnect
    let mut joined: HashMap<String, JoinHandle<()>> = HashMap::new();

    while let Some(Ok(msg)) = stream.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let frame = match serde_json::from_str::<ClientFrame>(&text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Ignoring malformed socket frame: {}", e);
                continue;
            }
        };

        match frame {
            ClientFrame::JoinChat(chat_id) => {
                if joined.contains_key(&chat_id) {
                    continue;
                }
                debug!("Socket client joined chat {}", chat_id);
                let mut rx = hub.join(&chat_id).await;
                let out = out_tx.clone();
                let forwarder = tokio::spawn(async move {
                    loop {
                        match rx.recv().await {
                            Ok(frame) => {
                                if out.send(frame).await.is_err() {
                                    break;
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!("Socket forwarder lagged, dropped {} frames", n);
                            }
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                });
                joined.insert(chat_id, forwarder);
            }
            ClientFrame::LeaveChat(chat_id) => {
                if let Some(forwarder) = joined.remove(&chat_id) {
                    debug!("Socket client left chat {}", chat_id);
                    forwarder.abort();
                    hub.prune(&chat_id).await;
                }
            }
            ClientFrame::SendMessage(message) => {
                let chat_id = message.chat_id.clone();
                hub.broadcast(&chat_id, ServerFrame::NewMessage(message)).await;
            }
        }
    }

    // Disconnect drops the client from all rooms; rejoin is explicit
    for (chat_id, forwarder) in joined {
        forwarder.abort();
        hub.prune(&chat_id).await;
    }
    writer.abort();
    info!("Socket client disconnected");
}
