use crate::bus::{ChangeEvent, EventBus};
use crate::chat::{normalize_pair, Chat, ChatMessage, ChatSummary};
use crate::error::ServiceError;
use crate::store::Store;
use std::sync::Arc;
use tracing::info;

/// Chat creation and message delivery into the store.
#[derive(Clone)]
pub struct ChatService {
    store: Store,
    bus: Arc<EventBus>,
}

impl ChatService {
    pub fn new(store: Store, bus: Arc<EventBus>) -> Self {
        Self { store, bus }
    }

    /// Find the chat between two users, creating it on first contact.
    /// Idempotent: both participants can call this concurrently and end up
    /// with the same chat id.
    pub async fn get_or_create_chat(
        &self,
        user_id: &str,
        friend_id: &str,
    ) -> Result<String, ServiceError> {
        let (a, b) = normalize_pair(user_id.to_string(), friend_id.to_string());

        if let Some(chat) = self.store.find_chat(&a, &b).await? {
            return Ok(chat.id);
        }

        let chat = Chat::new(a.clone(), b.clone());
        self.store.insert_chat(&chat).await?;

        // Re-read instead of trusting our insert: a concurrent caller may
        // have won the uniqueness race.
        let chat = self
            .store
            .find_chat(&a, &b)
            .await?
            .ok_or(ServiceError::NotFound("chat vanished after creation"))?;

        info!("Chat {} opened between {} and {}", chat.id, a, b);
        Ok(chat.id)
    }

    /// Append a message and bump the chat summary, then notify subscribers.
    pub async fn send_message(
        &self,
        chat_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<ChatMessage, ServiceError> {
        if content.trim().is_empty() {
            return Err(ServiceError::EmptyContent);
        }

        let chat = self
            .store
            .chat_by_id(chat_id)
            .await?
            .ok_or(ServiceError::NotFound("chat not found"))?;

        let message = ChatMessage::new(chat_id, sender_id, content);
        self.store.append_message(&message).await?;

        self.bus.publish(ChangeEvent::MessagesChanged {
            chat_id: chat_id.to_string(),
        });
        self.bus.publish(ChangeEvent::ChatsChanged {
            participants: chat.participants(),
        });

        Ok(message)
    }

    pub async fn list_messages(&self, chat_id: &str) -> Result<Vec<ChatMessage>, ServiceError> {
        Ok(self.store.messages_for_chat(chat_id).await?)
    }

    /// The user's chat list, most recently active first, with peer names
    /// resolved. A peer whose user document is gone gets a placeholder.
    pub async fn list_chats(&self, user_id: &str) -> Result<Vec<ChatSummary>, ServiceError> {
        let chats = self.store.chats_for_user(user_id).await?;

        let mut summaries = Vec::with_capacity(chats.len());
        for chat in chats {
            let peer_id = chat.peer_of(user_id);
            let name = match self.store.user_by_id(peer_id).await? {
                Some(peer) => peer.fullname,
                None => "Unknown User".to_string(),
            };
            summaries.push(ChatSummary {
                id: chat.id,
                name,
                last_message: chat.last_message,
                time: chat.last_message_at,
                unread: 0,
            });
        }

        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::User;
    use chrono::Utc;

    async fn setup() -> (ChatService, Store, User, User) {
        let store = Store::in_memory().await.unwrap();
        let bus = Arc::new(EventBus::new());
        let chats = ChatService::new(store.clone(), bus);

        let a = User::new("Ada", "ada@example.com", None, "AAAAAA", "credentials");
        let b = User::new("Bob", "bob@example.com", None, "BBBBBB", "credentials");
        store.create_user(&a).await.unwrap();
        store.create_user(&b).await.unwrap();
        (chats, store, a, b)
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let (chats, _, a, b) = setup().await;

        let first = chats.get_or_create_chat(&a.id, &b.id).await.unwrap();
        let second = chats.get_or_create_chat(&a.id, &b.id).await.unwrap();
        // Order of the pair must not matter either
        let third = chats.get_or_create_chat(&b.id, &a.id).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first, third);
    }

    #[tokio::test]
    async fn new_chat_starts_empty() {
        let (chats, _, a, b) = setup().await;
        let chat_id = chats.get_or_create_chat(&a.id, &b.id).await.unwrap();
        assert!(chats.list_messages(&chat_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_message_round_trip() {
        let (chats, store, a, b) = setup().await;
        let chat_id = chats.get_or_create_chat(&a.id, &b.id).await.unwrap();

        let before = Utc::now();
        chats.send_message(&chat_id, &a.id, "hello").await.unwrap();

        let messages = chats.list_messages(&chat_id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "hello");
        assert_eq!(messages[0].sender_id, a.id);
        assert!(!messages[0].read);
        assert!(messages[0].timestamp >= before);

        let chat = store.chat_by_id(&chat_id).await.unwrap().unwrap();
        assert_eq!(chat.last_message, "hello");
    }

    #[tokio::test]
    async fn empty_content_rejected() {
        let (chats, _, a, b) = setup().await;
        let chat_id = chats.get_or_create_chat(&a.id, &b.id).await.unwrap();

        let err = chats.send_message(&chat_id, &a.id, "   ").await.unwrap_err();
        assert!(matches!(err, ServiceError::EmptyContent));
        assert!(chats.list_messages(&chat_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_chat_rejected() {
        let (chats, _, a, _) = setup().await;
        let err = chats.send_message("missing", &a.id, "hi").await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn chat_list_resolves_peer_names() {
        let (chats, _, a, b) = setup().await;
        let chat_id = chats.get_or_create_chat(&a.id, &b.id).await.unwrap();
        chats.send_message(&chat_id, &a.id, "hi bob").await.unwrap();

        let list = chats.list_chats(&a.id).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].name, "Bob");
        assert_eq!(list[0].last_message, "hi bob");

        let list = chats.list_chats(&b.id).await.unwrap();
        assert_eq!(list[0].name, "Ada");
    }
}
