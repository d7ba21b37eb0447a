//! HTTP REST surface.
//!
//! Thin handlers over [`ChatService`]; authorization and validation live in
//! the service, not here.  The upstream auth middleware is an external
//! collaborator: the authenticated identity arrives as a trusted `x-user-id`
//! header.

use std::sync::Arc;

use axum::async_trait;
use axum::extract::{FromRequestParts, Path, Query, State};
use axum::http::request::Parts;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use huddle_shared::types::{ChatId, ChatType, MessageId, OrganizationId, UserId};
use huddle_shared::views::{ChatQuery, MessageQuery};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::gateway::ChatGateway;
use crate::service::{
    AddMembersInput, ChatService, CreateChatInput, MarkReadInput, ReactionInput,
    UpdateChatInput, UpdateMessageInput,
};
use crate::ws;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ChatService>,
    pub gateway: Arc<ChatGateway>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws::socket_handler))
        .route("/chats", post(create_chat).get(list_chats))
        .route(
            "/chats/:chat_id",
            get(get_chat).put(update_chat).delete(delete_chat),
        )
        .route(
            "/chats/:chat_id/messages",
            get(get_chat_messages).post(create_message),
        )
        .route("/chats/:chat_id/messages/read", post(mark_read))
        .route(
            "/chats/:chat_id/messages/:message_id",
            axum::routing::put(update_message).delete(delete_message),
        )
        .route(
            "/chats/:chat_id/messages/:message_id/reactions",
            post(add_reaction).delete(remove_reaction),
        )
        .route("/chats/:chat_id/members", post(add_members))
        .route("/chats/:chat_id/members/:user_id", axum::routing::delete(remove_member))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    match config
        .web_origin
        .as_deref()
        .map(|origin| origin.parse::<HeaderValue>())
    {
        Some(Ok(origin)) => cors.allow_origin(origin),
        Some(Err(_)) => {
            warn!(origin = ?config.web_origin, "Invalid WEB_URL origin, allowing any");
            cors.allow_origin(Any)
        }
        None => cors.allow_origin(Any),
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// The authenticated caller, as established by the external identity layer.
pub struct AuthedUser(pub UserId);

#[async_trait]
impl FromRequestParts<AppState> for AuthedUser {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ServerError::BadRequest("missing x-user-id header".to_string()))?;

        let user_id = value
            .parse::<UserId>()
            .map_err(|_| ServerError::BadRequest("invalid x-user-id header".to_string()))?;

        Ok(Self(user_id))
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    instance: String,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        instance: state.config.instance_name.clone(),
    })
}

async fn create_chat(
    State(state): State<AppState>,
    AuthedUser(caller): AuthedUser,
    Json(input): Json<CreateChatInput>,
) -> Result<impl axum::response::IntoResponse, ServerError> {
    let chat = state.service.create_chat(input, caller).await?;
    Ok((StatusCode::CREATED, Json(chat)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListChatsQuery {
    organization_id: OrganizationId,
    page: Option<u32>,
    limit: Option<u32>,
    #[serde(rename = "type")]
    chat_type: Option<ChatType>,
    search: Option<String>,
}

async fn list_chats(
    State(state): State<AppState>,
    AuthedUser(caller): AuthedUser,
    Query(query): Query<ListChatsQuery>,
) -> Result<impl axum::response::IntoResponse, ServerError> {
    let chat_query = ChatQuery {
        page: query.page,
        limit: query.limit,
        chat_type: query.chat_type,
        search: query.search,
    };
    let page = state
        .service
        .get_user_chats(caller, query.organization_id, &chat_query)
        .await?;
    Ok(Json(page))
}

async fn get_chat(
    State(state): State<AppState>,
    AuthedUser(caller): AuthedUser,
    Path(chat_id): Path<ChatId>,
) -> Result<impl axum::response::IntoResponse, ServerError> {
    let chat = state.service.get_chat(chat_id, caller).await?;
    Ok(Json(chat))
}

async fn update_chat(
    State(state): State<AppState>,
    AuthedUser(caller): AuthedUser,
    Path(chat_id): Path<ChatId>,
    Json(input): Json<UpdateChatInput>,
) -> Result<impl axum::response::IntoResponse, ServerError> {
    let chat = state.service.update_chat(chat_id, input, caller).await?;
    Ok(Json(chat))
}

async fn delete_chat(
    State(state): State<AppState>,
    AuthedUser(caller): AuthedUser,
    Path(chat_id): Path<ChatId>,
) -> Result<impl axum::response::IntoResponse, ServerError> {
    state.service.delete_chat(chat_id, caller).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

async fn get_chat_messages(
    State(state): State<AppState>,
    AuthedUser(caller): AuthedUser,
    Path(chat_id): Path<ChatId>,
    Query(query): Query<MessageQuery>,
) -> Result<impl axum::response::IntoResponse, ServerError> {
    let page = state
        .service
        .get_chat_messages(chat_id, &query, caller)
        .await?;
    Ok(Json(page))
}

async fn create_message(
    State(state): State<AppState>,
    AuthedUser(caller): AuthedUser,
    Path(chat_id): Path<ChatId>,
    Json(input): Json<huddle_shared::protocol::MessageInput>,
) -> Result<impl axum::response::IntoResponse, ServerError> {
    let message = state.service.send_message(chat_id, input, caller).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn update_message(
    State(state): State<AppState>,
    AuthedUser(caller): AuthedUser,
    Path((chat_id, message_id)): Path<(ChatId, MessageId)>,
    Json(input): Json<UpdateMessageInput>,
) -> Result<impl axum::response::IntoResponse, ServerError> {
    let message = state
        .service
        .update_message(chat_id, message_id, input, caller)
        .await?;
    Ok(Json(message))
}

async fn delete_message(
    State(state): State<AppState>,
    AuthedUser(caller): AuthedUser,
    Path((chat_id, message_id)): Path<(ChatId, MessageId)>,
) -> Result<impl axum::response::IntoResponse, ServerError> {
    state
        .service
        .delete_message(chat_id, message_id, caller)
        .await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

async fn mark_read(
    State(state): State<AppState>,
    AuthedUser(caller): AuthedUser,
    Path(chat_id): Path<ChatId>,
    Json(input): Json<MarkReadInput>,
) -> Result<impl axum::response::IntoResponse, ServerError> {
    let read = state
        .service
        .mark_messages_read(chat_id, &input.message_ids, caller)
        .await?;
    Ok(Json(serde_json::json!({ "read": read })))
}

async fn add_reaction(
    State(state): State<AppState>,
    AuthedUser(caller): AuthedUser,
    Path((chat_id, message_id)): Path<(ChatId, MessageId)>,
    Json(input): Json<ReactionInput>,
) -> Result<impl axum::response::IntoResponse, ServerError> {
    let message = state
        .service
        .add_reaction(chat_id, message_id, input, caller)
        .await?;
    Ok(Json(message))
}

async fn remove_reaction(
    State(state): State<AppState>,
    AuthedUser(caller): AuthedUser,
    Path((chat_id, message_id)): Path<(ChatId, MessageId)>,
    Json(input): Json<ReactionInput>,
) -> Result<impl axum::response::IntoResponse, ServerError> {
    let message = state
        .service
        .remove_reaction(chat_id, message_id, input, caller)
        .await?;
    Ok(Json(message))
}

async fn add_members(
    State(state): State<AppState>,
    AuthedUser(caller): AuthedUser,
    Path(chat_id): Path<ChatId>,
    Json(input): Json<AddMembersInput>,
) -> Result<impl axum::response::IntoResponse, ServerError> {
    let added = state.service.add_members(chat_id, input, caller).await?;
    Ok(Json(serde_json::json!({ "added": added })))
}

async fn remove_member(
    State(state): State<AppState>,
    AuthedUser(caller): AuthedUser,
    Path((chat_id, user_id)): Path<(ChatId, UserId)>,
) -> Result<impl axum::response::IntoResponse, ServerError> {
    state.service.remove_member(chat_id, user_id, caller).await?;
    Ok(Json(serde_json::json!({ "removed": true })))
}
