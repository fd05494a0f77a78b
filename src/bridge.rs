//! Change notification bridge: turns store change events into snapshot
//! streams. Every yield is the *full* current state, not a delta — the first
//! one immediately on subscribe, then one per matching change. A lagged
//! receiver just re-reads the snapshot, so missed events only coalesce.

use crate::bus::{ChangeEvent, EventBus};
use crate::chat::{ChatMessage, ChatSummary};
use crate::friend::FriendService;
use crate::session::ChatService;
use crate::user::PendingRequest;
use futures::stream::Stream;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

/// Full ordered message list for one chat, re-emitted on every change.
pub fn message_snapshots(
    chats: ChatService,
    bus: Arc<EventBus>,
    chat_id: String,
) -> impl Stream<Item = Vec<ChatMessage>> {
    let mut rx = bus.subscribe();

    async_stream::stream! {
        match chats.list_messages(&chat_id).await {
            Ok(snapshot) => yield snapshot,
            Err(e) => warn!("Initial message snapshot for {} failed: {}", chat_id, e),
        }

        loop {
            let refresh = match rx.recv().await {
                Ok(ChangeEvent::MessagesChanged { chat_id: changed }) => changed == chat_id,
                Ok(_) => false,
                Err(broadcast::error::RecvError::Lagged(_)) => true,
                Err(broadcast::error::RecvError::Closed) => break,
            };
            if !refresh {
                continue;
            }

            match chats.list_messages(&chat_id).await {
                Ok(snapshot) => yield snapshot,
                Err(e) => warn!("Message snapshot for {} failed: {}", chat_id, e),
            }
        }
    }
}

/// The user's chat-summary list, re-emitted whenever one of their chats
/// changes.
pub fn chat_snapshots(
    chats: ChatService,
    bus: Arc<EventBus>,
    user_id: String,
) -> impl Stream<Item = Vec<ChatSummary>> {
    let mut rx = bus.subscribe();

    async_stream::stream! {
        match chats.list_chats(&user_id).await {
            Ok(snapshot) => yield snapshot,
            Err(e) => warn!("Initial chat snapshot for {} failed: {}", user_id, e),
        }

        loop {
            let refresh = match rx.recv().await {
                Ok(ChangeEvent::ChatsChanged { participants }) => {
                    participants.iter().any(|p| p == &user_id)
                }
                Ok(_) => false,
                Err(broadcast::error::RecvError::Lagged(_)) => true,
                Err(broadcast::error::RecvError::Closed) => break,
            };
            if !refresh {
                continue;
            }

            match chats.list_chats(&user_id).await {
                Ok(snapshot) => yield snapshot,
                Err(e) => warn!("Chat snapshot for {} failed: {}", user_id, e),
            }
        }
    }
}

/// The user's pending friend requests, re-emitted on every change to their
/// request list.
pub fn request_snapshots(
    friends: FriendService,
    bus: Arc<EventBus>,
    user_id: String,
) -> impl Stream<Item = Vec<PendingRequest>> {
    let mut rx = bus.subscribe();

    async_stream::stream! {
        match friends.list_pending_requests(&user_id).await {
            Ok(snapshot) => yield snapshot,
            Err(e) => warn!("Initial request snapshot for {} failed: {}", user_id, e),
        }

        loop {
            let refresh = match rx.recv().await {
                Ok(ChangeEvent::FriendRequestsChanged { user_id: changed }) => changed == user_id,
                Ok(_) => false,
                Err(broadcast::error::RecvError::Lagged(_)) => true,
                Err(broadcast::error::RecvError::Closed) => break,
            };
            if !refresh {
                continue;
            }

            match friends.list_pending_requests(&user_id).await {
                Ok(snapshot) => yield snapshot,
                Err(e) => warn!("Request snapshot for {} failed: {}", user_id, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccountService;
    use crate::friend::RequestAction;
    use crate::store::Store;
    use futures::StreamExt;

    struct Services {
        accounts: AccountService,
        friends: FriendService,
        chats: ChatService,
        bus: Arc<EventBus>,
    }

    async fn setup() -> Services {
        let store = Store::in_memory().await.unwrap();
        let bus = Arc::new(EventBus::new());
        Services {
            accounts: AccountService::new(store.clone(), "test-secret".to_string()),
            friends: FriendService::new(store.clone(), bus.clone()),
            chats: ChatService::new(store, bus.clone()),
            bus,
        }
    }

    #[tokio::test]
    async fn snapshot_arrives_on_subscribe_then_on_change() {
        let s = setup().await;
        let a = s.accounts.register("Ada", "ada@example.com", "pw").await.unwrap();
        let b = s.accounts.register("Bob", "bob@example.com", "pw").await.unwrap();
        let chat_id = s.chats.get_or_create_chat(&a.id, &b.id).await.unwrap();

        let stream = message_snapshots(s.chats.clone(), s.bus.clone(), chat_id.clone());
        futures::pin_mut!(stream);

        // Initial snapshot is the current (empty) list, not a delta
        let initial = stream.next().await.unwrap();
        assert!(initial.is_empty());

        s.chats.send_message(&chat_id, &a.id, "hello").await.unwrap();
        let next = stream.next().await.unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].content, "hello");
    }

    #[tokio::test]
    async fn unrelated_chats_do_not_wake_the_stream() {
        let s = setup().await;
        let a = s.accounts.register("Ada", "ada@example.com", "pw").await.unwrap();
        let b = s.accounts.register("Bob", "bob@example.com", "pw").await.unwrap();
        let c = s.accounts.register("Cyd", "cyd@example.com", "pw").await.unwrap();
        let watched = s.chats.get_or_create_chat(&a.id, &b.id).await.unwrap();
        let other = s.chats.get_or_create_chat(&a.id, &c.id).await.unwrap();

        let stream = message_snapshots(s.chats.clone(), s.bus.clone(), watched.clone());
        futures::pin_mut!(stream);
        assert!(stream.next().await.unwrap().is_empty());

        s.chats.send_message(&other, &a.id, "elsewhere").await.unwrap();
        s.chats.send_message(&watched, &a.id, "here").await.unwrap();

        // Only the watched chat's change produces a frame
        let next = stream.next().await.unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].content, "here");
    }

    #[tokio::test]
    async fn request_stream_tracks_pending_list() {
        let s = setup().await;
        let a = s.accounts.register("Ada", "ada@example.com", "pw").await.unwrap();
        let b = s.accounts.register("Bob", "bob@example.com", "pw").await.unwrap();

        let stream = request_snapshots(s.friends.clone(), s.bus.clone(), b.id.clone());
        futures::pin_mut!(stream);
        assert!(stream.next().await.unwrap().is_empty());

        s.friends.send_friend_request(&b.pin, &a.id).await.unwrap();
        let pending = stream.next().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].from_user_id, a.id);

        s.friends
            .respond_to_request(&b.id, &a.id, RequestAction::Accept)
            .await
            .unwrap();
        assert!(stream.next().await.unwrap().is_empty());
    }

    /// Register -> friend via PIN -> accept -> open chat -> "hi" shows up in
    /// the subscription snapshot.
    #[tokio::test]
    async fn first_contact_end_to_end() {
        let s = setup().await;
        let a = s.accounts.register("Ada", "ada@example.com", "pw").await.unwrap();
        let b = s.accounts.register("Bob", "bob@example.com", "pw").await.unwrap();

        s.friends.send_friend_request(&b.pin, &a.id).await.unwrap();
        s.friends
            .respond_to_request(&b.id, &a.id, RequestAction::Accept)
            .await
            .unwrap();

        let chat_id = s.chats.get_or_create_chat(&a.id, &b.id).await.unwrap();
        assert!(s.chats.list_messages(&chat_id).await.unwrap().is_empty());

        let stream = message_snapshots(s.chats.clone(), s.bus.clone(), chat_id.clone());
        futures::pin_mut!(stream);
        assert!(stream.next().await.unwrap().is_empty());

        s.chats.send_message(&chat_id, &a.id, "hi").await.unwrap();

        let snapshot = stream.next().await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].content, "hi");
        assert_eq!(snapshot[0].sender_id, a.id);

        // Bob's chat list sees the new summary too
        let list = s.chats.list_chats(&b.id).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].last_message, "hi");
        assert_eq!(list[0].name, "Ada");
    }
}
