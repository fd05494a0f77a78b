//! Client-side subscription management: merging the optimistic socket feed
//! with the authoritative stream snapshots, and keeping the stream connection
//! alive across errors.

use crate::chat::ChatMessage;
use futures::StreamExt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Prefix for locally generated ids, so an optimistic message is always
/// distinguishable from a server-assigned one.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// Fixed backoff before reopening a failed stream connection.
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// How far apart an optimistic timestamp and the server-assigned one may be
/// while still describing the same message.
const RECONCILE_WINDOW_SECS: i64 = 5;

/// Build an optimistic message for immediate local display.
pub fn local_message(
    chat_id: impl Into<String>,
    sender_id: impl Into<String>,
    content: impl Into<String>,
) -> ChatMessage {
    let mut msg = ChatMessage::new(chat_id, sender_id, content);
    msg.id = format!("{}{}", LOCAL_ID_PREFIX, Uuid::new_v4().simple());
    msg
}

/// One chat's merged message view. Stream snapshots are authoritative and
/// replace the state wholesale; socket pushes and local sends are appended
/// optimistically and reconciled away once a snapshot covers them. Either
/// source may arrive first.
#[derive(Debug, Default)]
pub struct ChatView {
    messages: Vec<ChatMessage>,
}

impl ChatView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Append a message the local user just sent (id must be local).
    pub fn push_local(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Append a socket-delivered message unless its id is already known —
    /// the sender's own echo comes back with the same local id.
    pub fn push_remote(&mut self, message: ChatMessage) {
        if self.messages.iter().any(|m| m.id == message.id) {
            return;
        }
        self.messages.push(message);
    }

    /// Replace the view with an authoritative snapshot, keeping only the
    /// optimistic entries the snapshot does not cover yet.
    pub fn apply_snapshot(&mut self, snapshot: Vec<ChatMessage>) {
        let kept: Vec<ChatMessage> = self
            .messages
            .drain(..)
            .filter(|m| m.id.starts_with(LOCAL_ID_PREFIX) && !snapshot.iter().any(|s| covers(s, m)))
            .collect();

        self.messages = snapshot;
        self.messages.extend(kept);
    }
}

/// Whether an authoritative message supersedes an optimistic one: same
/// sender, same content, timestamps within the reconcile window.
fn covers(authoritative: &ChatMessage, local: &ChatMessage) -> bool {
    authoritative.sender_id == local.sender_id
        && authoritative.content == local.content
        && (authoritative.timestamp - local.timestamp)
            .num_seconds()
            .abs()
            <= RECONCILE_WINDOW_SECS
}

/// A reconnecting subscription to a server-sent message stream. Snapshots
/// come out of `next_snapshot`; on a transport error the old connection is
/// fully dropped, then exactly one new one is opened after the backoff.
/// Dropping the handle tears the connection down.
pub struct MessageSubscription {
    task: JoinHandle<()>,
    rx: mpsc::Receiver<Vec<ChatMessage>>,
}

impl MessageSubscription {
    pub fn open(base_url: impl Into<String>, chat_id: impl Into<String>) -> Self {
        let url = format!(
            "{}/messages/subscribe?chatId={}",
            base_url.into(),
            chat_id.into()
        );
        let (tx, rx) = mpsc::channel(16);
        let task = tokio::spawn(run_subscription(url, tx));
        Self { task, rx }
    }

    pub async fn next_snapshot(&mut self) -> Option<Vec<ChatMessage>> {
        self.rx.recv().await
    }

    pub fn close(&self) {
        self.task.abort();
    }
}

impl Drop for MessageSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_subscription(url: String, tx: mpsc::Sender<Vec<ChatMessage>>) {
    let client = reqwest::Client::new();

    loop {
        match client.get(&url).send().await {
            Ok(response) => {
                let mut body = response.bytes_stream();
                let mut buffer = String::new();

                while let Some(chunk) = body.next().await {
                    match chunk {
                        Ok(bytes) => {
                            buffer.push_str(&String::from_utf8_lossy(&bytes));
                            while let Some(end) = buffer.find("\n\n") {
                                let frame: String = buffer.drain(..end + 2).collect();
                                if let Some(snapshot) = parse_sse_frame(&frame) {
                                    if tx.send(snapshot).await.is_err() {
                                        return;
                                    }
                                }
                            }
                        }
                        Err(e) => {
                            warn!("Message stream error: {}", e);
                            break;
                        }
                    }
                }
            }
            Err(e) => warn!("Message stream connect failed: {}", e),
        }

        if tx.is_closed() {
            return;
        }
        // The failed connection is out of scope here, so the fresh one never
        // races it for frames
        debug!("Reconnecting message stream in {:?}", RECONNECT_BACKOFF);
        tokio::time::sleep(RECONNECT_BACKOFF).await;
    }
}

/// Extract the JSON payload from one SSE frame. Comment lines (keep-alives)
/// and unknown fields are ignored; a frame without data yields nothing.
fn parse_sse_frame(frame: &str) -> Option<Vec<ChatMessage>> {
    let mut data = String::new();
    for line in frame.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.trim_start());
        }
    }

    if data.is_empty() {
        return None;
    }

    match serde_json::from_str(&data) {
        Ok(snapshot) => Some(snapshot),
        Err(e) => {
            warn!("Ignoring unparseable stream frame: {}", e);
            None
        }
    }
}
