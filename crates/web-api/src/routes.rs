use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::{HeaderMap, StatusCode},
    response::Response,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use application::{MessageDto, SendMessageRequest, UnreadBySenderDto};

use crate::error::ApiError;
use crate::state::AppState;
use crate::ws_connection::WsConnection;

#[derive(Debug, Deserialize)]
struct SendPayload {
    content: String,
    receiver_id: Option<Uuid>,
    #[serde(default)]
    attachments: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    /// 员工端指定会话对端家长；家长端忽略
    user_id: Option<Uuid>,
    page: Option<u32>,
    limit: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryResponse {
    messages: Vec<MessageDto>,
    total: u64,
    page: u32,
    limit: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UnreadCountResponse {
    unread_count: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClearHistoryResponse {
    deleted: u64,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api/v1/chat", chat_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn chat_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(websocket_upgrade))
        .route("/chat-history", get(chat_history).delete(clear_history))
        .route("/send", post(send_message))
        .route("/unread-count", get(unread_count))
        .route("/unread-counts-by-users", get(unread_counts_by_users))
        .route("/mark-read/{message_id}", post(mark_read))
        .route("/{message_id}", delete(delete_message))
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn chat_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let identity = state.authenticate_headers(&headers).await?;
    let page = state
        .chat_service
        .chat_history(
            identity.user_id.into(),
            identity.role,
            query.user_id,
            query.page.unwrap_or(1),
            query.limit.unwrap_or(50),
        )
        .await?;

    Ok(Json(HistoryResponse {
        messages: page.messages.iter().map(MessageDto::from).collect(),
        total: page.total,
        page: page.page,
        limit: page.limit,
    }))
}

async fn send_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<SendPayload>,
) -> Result<(StatusCode, Json<MessageDto>), ApiError> {
    let identity = state.authenticate_headers(&headers).await?;
    let dto = state
        .chat_service
        .send_message(SendMessageRequest {
            sender_id: identity.user_id.into(),
            sender_role: identity.role,
            content: payload.content,
            receiver_id: payload.receiver_id,
            attachments: payload.attachments,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(dto)))
}

async fn unread_count(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<UnreadCountResponse>, ApiError> {
    let identity = state.authenticate_headers(&headers).await?;
    let unread_count = state
        .chat_service
        .unread_count(identity.user_id.into(), identity.role)
        .await?;
    Ok(Json(UnreadCountResponse { unread_count }))
}

async fn unread_counts_by_users(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<UnreadBySenderDto>>, ApiError> {
    let identity = state.authenticate_headers(&headers).await?;
    let counts = state
        .chat_service
        .unread_counts_by_parent(identity.role)
        .await?;
    Ok(Json(counts))
}

async fn mark_read(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(message_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let identity = state.authenticate_headers(&headers).await?;
    state
        .chat_service
        .mark_read(message_id, identity.user_id.into())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(message_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let identity = state.authenticate_headers(&headers).await?;
    state
        .chat_service
        .delete_message(message_id, identity.user_id.into(), identity.role)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn clear_history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ClearHistoryResponse>, ApiError> {
    let identity = state.authenticate_headers(&headers).await?;
    let deleted = state
        .chat_service
        .clear_history(identity.user_id.into(), identity.role, query.user_id)
        .await?;
    Ok(Json(ClearHistoryResponse { deleted }))
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: String,
}

/// 升级前完成认证：token 无效或用户不在目录中时拒绝握手。
async fn websocket_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let identity = state.authenticate_token(&query.token).await?;
    Ok(ws.on_upgrade(move |socket| WsConnection::run(socket, state, identity)))
}
