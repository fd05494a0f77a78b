use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A two-party conversation. The participant pair is stored normalized
/// (lexicographically ordered) so the uniqueness constraint over it holds for
/// the unordered pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub participant_a: String,
    pub participant_b: String,
    pub last_message: String,
    pub last_message_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Chat {
    pub fn new(user_a: impl Into<String>, user_b: impl Into<String>) -> Self {
        let (participant_a, participant_b) = normalize_pair(user_a.into(), user_b.into());
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            participant_a,
            participant_b,
            last_message: String::new(),
            last_message_at: now,
            created_at: now,
        }
    }

    pub fn participants(&self) -> Vec<String> {
        vec![self.participant_a.clone(), self.participant_b.clone()]
    }

    /// The participant that is not `user_id`.
    pub fn peer_of(&self, user_id: &str) -> &str {
        if self.participant_a == user_id {
            &self.participant_b
        } else {
            &self.participant_a
        }
    }
}

/// Order a participant pair so (A, B) and (B, A) map to the same row.
pub fn normalize_pair(a: String, b: String) -> (String, String) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// A single message within a chat. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
}

impl ChatMessage {
    pub fn new(
        chat_id: impl Into<String>,
        sender_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            chat_id: chat_id.into(),
            sender_id: sender_id.into(),
            content: content.into(),
            timestamp: Utc::now(),
            read: false,
        }
    }
}

/// One entry in a user's chat list: the chat with the peer's name resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: String,
    pub name: String,
    pub last_message: String,
    pub time: DateTime<Utc>,
    // TODO: per-participant unread counts need a read cursor on the chat row
    pub unread: u32,
}
