use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// A change in the store that subscribers may care about. Events carry only
/// the coordinates of what changed; subscribers re-read the full snapshot, so
/// a missed or coalesced event is never a correctness problem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChangeEvent {
    /// A message was appended to a chat.
    MessagesChanged { chat_id: String },

    /// A chat summary changed for these participants.
    ChatsChanged { participants: Vec<String> },

    /// A user's friend-request list changed.
    FriendRequestsChanged { user_id: String },
}

pub struct EventBus {
    tx: broadcast::Sender<ChangeEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(100);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: ChangeEvent) {
        // We ignore the error if there are no receivers
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
