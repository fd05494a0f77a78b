use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub fullname: String,
    pub email: String,
    /// Keyed digest of the password. `None` for OAuth accounts.
    #[serde(skip_serializing, default)]
    pub password_digest: Option<String>,
    /// Unique 6-character identifier other users friend you by.
    pub pin: String,
    pub role: String,
    pub provider: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(
        fullname: impl Into<String>,
        email: impl Into<String>,
        password_digest: Option<String>,
        pin: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            fullname: fullname.into(),
            email: email.into(),
            password_digest,
            pin: pin.into(),
            role: "member".to_string(),
            provider: provider.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RequestStatus::Pending),
            "accepted" => Some(RequestStatus::Accepted),
            "rejected" => Some(RequestStatus::Rejected),
            _ => None,
        }
    }
}

/// A friend request as stored on the *target* user. Resolved requests are
/// retained with their final status rather than deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendRequest {
    pub from_user_id: String,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
}

/// A friend list entry with the display name resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendInfo {
    pub id: String,
    pub fullname: String,
}

/// A pending friend request with the requester's display metadata resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRequest {
    pub from_user_id: String,
    pub fullname: String,
    pub avatar_url: String,
}
