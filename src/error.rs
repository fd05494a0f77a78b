use thiserror::Error;

/// Errors crossing the service boundary. Everything the store or a bad
/// request can throw at us is folded into one of these; the HTTP layer maps
/// them onto status codes and a `{success, message}` body.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Missing or malformed input (400).
    #[error("{0}")]
    Invalid(&'static str),

    /// Unknown user, PIN, chat or request (404).
    #[error("{0}")]
    NotFound(&'static str),

    /// The target of a friend request is the requester (400).
    #[error("you cannot friend yourself")]
    SelfFriend,

    /// A pending request (or an account with that email) already exists (409).
    #[error("{0}")]
    AlreadyExists(&'static str),

    /// Empty or whitespace-only message content (400).
    #[error("message content cannot be empty")]
    EmptyContent,

    /// Bad email/password pair (401).
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Underlying store failure. Logged server-side, surfaced generically.
    #[error("storage failure: {0}")]
    Store(anyhow::Error),
}

impl From<anyhow::Error> for ServiceError {
    fn from(err: anyhow::Error) -> Self {
        ServiceError::Store(err)
    }
}
