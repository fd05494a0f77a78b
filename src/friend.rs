use crate::bus::{ChangeEvent, EventBus};
use crate::error::ServiceError;
use crate::store::Store;
use crate::user::{FriendInfo, PendingRequest, RequestStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestAction {
    Accept,
    Reject,
}

/// Friend requests and the bidirectional friend graph.
#[derive(Clone)]
pub struct FriendService {
    store: Store,
    bus: Arc<EventBus>,
}

impl FriendService {
    pub fn new(store: Store, bus: Arc<EventBus>) -> Self {
        Self { store, bus }
    }

    /// Send a friend request to whoever holds `pin`. Re-sending while a
    /// request is pending does not create a second entry; re-sending after a
    /// rejection reopens the old one.
    pub async fn send_friend_request(
        &self,
        pin: &str,
        requester_id: &str,
    ) -> Result<(), ServiceError> {
        let target = self
            .store
            .user_by_pin(pin)
            .await?
            .ok_or(ServiceError::NotFound("no user found with this PIN"))?;

        if target.id == requester_id {
            return Err(ServiceError::SelfFriend);
        }

        match self.store.request_status(&target.id, requester_id).await? {
            None => self.store.insert_request(&target.id, requester_id).await?,
            Some(RequestStatus::Pending) => {
                return Err(ServiceError::AlreadyExists(
                    "a friend request is already pending",
                ))
            }
            Some(_) => self.store.reopen_request(&target.id, requester_id).await?,
        }

        info!("Friend request from {} to {}", requester_id, target.id);
        self.bus.publish(ChangeEvent::FriendRequestsChanged {
            user_id: target.id,
        });
        Ok(())
    }

    /// Accept or reject a pending request. The status transition is
    /// conditional on the request still being pending, so it resolves exactly
    /// once even when two actors race. Accepting records the friendship in
    /// both directions; the resolved request is kept with its final status.
    pub async fn respond_to_request(
        &self,
        target_user_id: &str,
        requester_id: &str,
        action: RequestAction,
    ) -> Result<(), ServiceError> {
        let status = match action {
            RequestAction::Accept => RequestStatus::Accepted,
            RequestAction::Reject => RequestStatus::Rejected,
        };

        let resolved = self
            .store
            .resolve_request(target_user_id, requester_id, status)
            .await?;
        if !resolved {
            return Err(ServiceError::NotFound("no pending friend request found"));
        }

        if action == RequestAction::Accept {
            self.store
                .add_friendship(target_user_id, requester_id)
                .await?;
        }

        info!(
            "Friend request from {} to {} {}",
            requester_id,
            target_user_id,
            status.as_str()
        );
        self.bus.publish(ChangeEvent::FriendRequestsChanged {
            user_id: target_user_id.to_string(),
        });
        Ok(())
    }

    /// Pending requests with the requester's display metadata resolved.
    /// Requesters that no longer exist are skipped, not errored.
    pub async fn list_pending_requests(
        &self,
        user_id: &str,
    ) -> Result<Vec<PendingRequest>, ServiceError> {
        let requests = self.store.pending_requests(user_id).await?;

        let mut resolved = Vec::with_capacity(requests.len());
        for request in requests {
            let Some(requester) = self.store.user_by_id(&request.from_user_id).await? else {
                continue;
            };
            resolved.push(PendingRequest {
                from_user_id: request.from_user_id,
                avatar_url: format!(
                    "https://api.dicebear.com/6.x/micah/svg?seed={}",
                    requester.fullname
                ),
                fullname: requester.fullname,
            });
        }

        Ok(resolved)
    }

    /// Friend list with display names resolved. A friend whose user document
    /// is gone renders with a placeholder instead of failing the whole call.
    pub async fn list_friends(&self, user_id: &str) -> Result<Vec<FriendInfo>, ServiceError> {
        let ids = self.store.friend_ids(user_id).await?;

        let mut friends = Vec::with_capacity(ids.len());
        for id in ids {
            let fullname = match self.store.user_by_id(&id).await? {
                Some(user) => user.fullname,
                None => "unknown".to_string(),
            };
            friends.push(FriendInfo { id, fullname });
        }

        Ok(friends)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccountService;
    use crate::user::User;

    async fn setup() -> (FriendService, AccountService, User, User) {
        let store = Store::in_memory().await.unwrap();
        let bus = Arc::new(EventBus::new());
        let friends = FriendService::new(store.clone(), bus);
        let accounts = AccountService::new(store, "test-secret".to_string());

        let a = accounts.register("Ada", "ada@example.com", "pw").await.unwrap();
        let b = accounts.register("Bob", "bob@example.com", "pw").await.unwrap();
        (friends, accounts, a, b)
    }

    #[tokio::test]
    async fn request_lands_once_on_target() {
        let (friends, _, a, b) = setup().await;

        friends.send_friend_request(&b.pin, &a.id).await.unwrap();
        let pending = friends.list_pending_requests(&b.id).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].from_user_id, a.id);
        assert_eq!(pending[0].fullname, "Ada");

        // Re-sending while pending is rejected, not duplicated
        let err = friends.send_friend_request(&b.pin, &a.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::AlreadyExists(_)));
        assert_eq!(friends.list_pending_requests(&b.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_pin_and_self_pin_fail() {
        let (friends, _, a, _) = setup().await;

        let err = friends.send_friend_request("ZZZZZZ", &a.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        let err = friends.send_friend_request(&a.pin, &a.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::SelfFriend));
    }

    #[tokio::test]
    async fn accept_makes_friendship_symmetric() {
        let (friends, _, a, b) = setup().await;

        friends.send_friend_request(&b.pin, &a.id).await.unwrap();
        friends
            .respond_to_request(&b.id, &a.id, RequestAction::Accept)
            .await
            .unwrap();

        let a_friends = friends.list_friends(&a.id).await.unwrap();
        let b_friends = friends.list_friends(&b.id).await.unwrap();
        assert_eq!(a_friends.len(), 1);
        assert_eq!(a_friends[0].id, b.id);
        assert_eq!(b_friends.len(), 1);
        assert_eq!(b_friends[0].id, a.id);

        // Resolved, so no longer pending
        assert!(friends.list_pending_requests(&b.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reject_leaves_friend_lists_untouched() {
        let (friends, _, a, b) = setup().await;

        friends.send_friend_request(&b.pin, &a.id).await.unwrap();
        friends
            .respond_to_request(&b.id, &a.id, RequestAction::Reject)
            .await
            .unwrap();

        assert!(friends.list_friends(&a.id).await.unwrap().is_empty());
        assert!(friends.list_friends(&b.id).await.unwrap().is_empty());

        // A rejected request can be re-sent
        friends.send_friend_request(&b.pin, &a.id).await.unwrap();
        assert_eq!(friends.list_pending_requests(&b.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn respond_is_exactly_once() {
        let (friends, _, a, b) = setup().await;

        friends.send_friend_request(&b.pin, &a.id).await.unwrap();
        friends
            .respond_to_request(&b.id, &a.id, RequestAction::Accept)
            .await
            .unwrap();

        let err = friends
            .respond_to_request(&b.id, &a.id, RequestAction::Reject)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        // The accepted friendship stands
        assert_eq!(friends.list_friends(&a.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn vanished_requester_is_skipped() {
        let store = Store::in_memory().await.unwrap();
        let bus = Arc::new(EventBus::new());
        let friends = FriendService::new(store.clone(), bus);

        let target = User::new("Bob", "bob@example.com", None, "BBBBBB", "credentials");
        store.create_user(&target).await.unwrap();
        store.insert_request(&target.id, "ghost-user").await.unwrap();

        let pending = friends.list_pending_requests(&target.id).await.unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn missing_friend_renders_placeholder() {
        let store = Store::in_memory().await.unwrap();
        let bus = Arc::new(EventBus::new());
        let friends = FriendService::new(store.clone(), bus);

        let user = User::new("Ada", "ada@example.com", None, "AAAAAA", "credentials");
        store.create_user(&user).await.unwrap();
        store.add_friendship(&user.id, "gone-user").await.unwrap();

        let list = friends.list_friends(&user.id).await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].fullname, "unknown");
    }
}
