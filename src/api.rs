use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::account::AccountService;
use crate::bridge;
use crate::bus::EventBus;
use crate::error::ServiceError;
use crate::friend::{FriendService, RequestAction};
use crate::session::ChatService;
use crate::socket::{self, SocketHub};

/// Everything a request handler needs, built once in `main` and shared.
pub struct AppState {
    pub accounts: AccountService,
    pub friends: FriendService,
    pub chats: ChatService,
    pub bus: Arc<EventBus>,
    pub hub: Arc<SocketHub>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/oauth", post(oauth_login))
        .route(
            "/friend",
            post(send_friend_request)
                .put(respond_friend_request)
                .get(list_friends),
        )
        .route("/friend/chats", post(open_chat))
        .route("/friend/requests/handle", post(handle_friend_request))
        .route("/friend/requests/pending", get(pending_requests))
        .route("/friend/requests/subscribe", get(subscribe_requests))
        .route("/messages", post(send_message).get(subscribe_chat_list))
        .route("/messages/subscribe", get(subscribe_messages))
        .route("/socket", get(socket::socket_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServiceError::Invalid(_) | ServiceError::SelfFriend | ServiceError::EmptyContent => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ServiceError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServiceError::AlreadyExists(_) => (StatusCode::CONFLICT, self.to_string()),
            ServiceError::InvalidCredentials => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServiceError::Store(e) => {
                // Detail stays in the server log, caller gets a generic failure
                error!("Store failure: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "something went wrong".to_string(),
                )
            }
        };

        (status, Json(json!({ "success": false, "message": message }))).into_response()
    }
}

type ApiResult = Result<Json<Value>, ServiceError>;

// -----------------------------------------------------------------------------
// Auth
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RegisterBody {
    fullname: String,
    email: String,
    password: String,
}

async fn register(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterBody>,
) -> ApiResult {
    if body.fullname.trim().is_empty() || body.email.trim().is_empty() || body.password.is_empty() {
        return Err(ServiceError::Invalid(
            "fullname, email and password are required",
        ));
    }

    let user = state
        .accounts
        .register(&body.fullname, &body.email, &body.password)
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "User created successfully",
        "pin": user.pin,
    })))
}

#[derive(Debug, Deserialize)]
struct LoginBody {
    email: String,
    password: String,
}

async fn login(State(state): State<Arc<AppState>>, Json(body): Json<LoginBody>) -> ApiResult {
    let user = state.accounts.login(&body.email, &body.password).await?;
    Ok(Json(json!({ "success": true, "user": user })))
}

#[derive(Debug, Deserialize)]
struct OauthBody {
    email: String,
    fullname: String,
}

async fn oauth_login(State(state): State<Arc<AppState>>, Json(body): Json<OauthBody>) -> ApiResult {
    if body.email.trim().is_empty() {
        return Err(ServiceError::Invalid("email is required"));
    }

    let user = state
        .accounts
        .oauth_login(&body.email, &body.fullname)
        .await?;
    Ok(Json(json!({ "success": true, "user": user })))
}

// -----------------------------------------------------------------------------
// Friends
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendRequestBody {
    pin: String,
    current_user_id: String,
}

async fn send_friend_request(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SendRequestBody>,
) -> ApiResult {
    if body.pin.trim().is_empty() || body.current_user_id.trim().is_empty() {
        return Err(ServiceError::Invalid(
            "PIN and current user ID are required",
        ));
    }

    state
        .friends
        .send_friend_request(&body.pin, &body.current_user_id)
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Friend request sent successfully",
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RespondBody {
    /// The requester's user id, which keys the request on the target.
    request_id: String,
    current_user_id: String,
    action: RequestAction,
}

async fn respond_friend_request(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RespondBody>,
) -> ApiResult {
    state
        .friends
        .respond_to_request(&body.current_user_id, &body.request_id, body.action)
        .await?;

    let verb = match body.action {
        RequestAction::Accept => "accepted",
        RequestAction::Reject => "rejected",
    };
    Ok(Json(json!({
        "success": true,
        "message": format!("Friend request {verb} successfully"),
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserQuery {
    user_id: String,
}

async fn list_friends(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UserQuery>,
) -> ApiResult {
    let friends = state.friends.list_friends(&query.user_id).await?;
    Ok(Json(json!({ "friends": friends })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HandleRequestBody {
    current_user_id: String,
    /// The requester's user id.
    user_id: String,
    action: RequestAction,
}

async fn handle_friend_request(
    State(state): State<Arc<AppState>>,
    Json(body): Json<HandleRequestBody>,
) -> ApiResult {
    state
        .friends
        .respond_to_request(&body.current_user_id, &body.user_id, body.action)
        .await?;
    Ok(Json(json!({ "success": true })))
}

async fn pending_requests(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UserQuery>,
) -> ApiResult {
    let requests = state.friends.list_pending_requests(&query.user_id).await?;
    Ok(Json(json!({ "requests": requests })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OpenChatBody {
    user_id: String,
    friend_id: String,
}

async fn open_chat(
    State(state): State<Arc<AppState>>,
    Json(body): Json<OpenChatBody>,
) -> ApiResult {
    if body.user_id.trim().is_empty() || body.friend_id.trim().is_empty() {
        return Err(ServiceError::Invalid(
            "user ID and friend ID are required",
        ));
    }

    let chat_id = state
        .chats
        .get_or_create_chat(&body.user_id, &body.friend_id)
        .await?;
    Ok(Json(json!({ "chatId": chat_id })))
}

// -----------------------------------------------------------------------------
// Messages
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageBody {
    chat_id: String,
    user_id: String,
    content: String,
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SendMessageBody>,
) -> ApiResult {
    state
        .chats
        .send_message(&body.chat_id, &body.user_id, &body.content)
        .await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatQuery {
    chat_id: String,
}

/// SSE stream of full message-list snapshots for one chat. The first frame
/// arrives immediately; dropping the connection drops the underlying bus
/// subscription with it.
async fn subscribe_messages(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChatQuery>,
) -> Sse<impl Stream<Item = Result<Event, axum::BoxError>>> {
    info!("New message subscription for chat {}", query.chat_id);

    let snapshots =
        bridge::message_snapshots(state.chats.clone(), state.bus.clone(), query.chat_id);

    let stream = async_stream::stream! {
        futures::pin_mut!(snapshots);
        while let Some(snapshot) = futures::StreamExt::next(&mut snapshots).await {
            match Event::default().json_data(&snapshot) {
                Ok(event) => yield Ok(event),
                Err(e) => warn!("Failed to encode message snapshot: {}", e),
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// SSE stream of the user's pending friend requests, re-pushed whole on
/// every change to their request list.
async fn subscribe_requests(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UserQuery>,
) -> Sse<impl Stream<Item = Result<Event, axum::BoxError>>> {
    info!("New friend-request subscription for user {}", query.user_id);

    let snapshots =
        bridge::request_snapshots(state.friends.clone(), state.bus.clone(), query.user_id);

    let stream = async_stream::stream! {
        futures::pin_mut!(snapshots);
        while let Some(snapshot) = futures::StreamExt::next(&mut snapshots).await {
            match Event::default().json_data(&snapshot) {
                Ok(event) => yield Ok(event),
                Err(e) => warn!("Failed to encode request snapshot: {}", e),
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// SSE stream of the user's chat list, re-pushed whole on every change.
async fn subscribe_chat_list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<UserQuery>,
) -> Sse<impl Stream<Item = Result<Event, axum::BoxError>>> {
    info!("New chat-list subscription for user {}", query.user_id);

    let snapshots = bridge::chat_snapshots(state.chats.clone(), state.bus.clone(), query.user_id);

    let stream = async_stream::stream! {
        futures::pin_mut!(snapshots);
        while let Some(snapshot) = futures::StreamExt::next(&mut snapshots).await {
            match Event::default().json_data(&snapshot) {
                Ok(event) => yield Ok(event),
                Err(e) => warn!("Failed to encode chat snapshot: {}", e),
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
