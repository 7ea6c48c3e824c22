use super::ApiResponse;
use crate::auth::AuthUser;
use crate::error::AppError;
use crate::models::{Attachment, MessageKind};
use crate::services::SendMessage;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct DirectConversationPayload {
    pub other_user_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct GroupConversationPayload {
    pub participant_ids: Vec<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessagePayload {
    pub content: String,
    #[serde(default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub attachment: Option<Attachment>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub before: Option<i64>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub marked: usize,
    pub message_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct UnreadResponse {
    pub conversation_id: Uuid,
    pub unread_count: u64,
}

/// Find or create the direct conversation with another user
///
/// POST /api/v1/conversations/direct
pub async fn open_direct(
    user: AuthUser,
    state: web::Data<AppState>,
    body: web::Json<DirectConversationPayload>,
) -> Result<HttpResponse, AppError> {
    let conversation = state
        .gateway
        .conversations()
        .find_or_create_direct(user.id(), body.other_user_id)
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(conversation)))
}

/// POST /api/v1/conversations/group
pub async fn create_group(
    user: AuthUser,
    state: web::Data<AppState>,
    body: web::Json<GroupConversationPayload>,
) -> Result<HttpResponse, AppError> {
    let conversation = state
        .gateway
        .conversations()
        .create_group(user.id(), body.into_inner().participant_ids)
        .await?;
    Ok(HttpResponse::Created().json(ApiResponse::ok(conversation)))
}

/// Conversations with per-user unread counts
///
/// GET /api/v1/conversations
pub async fn list_conversations(
    user: AuthUser,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let summaries = state
        .gateway
        .conversations()
        .list_for_user(user.id())
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(summaries)))
}

/// DELETE /api/v1/conversations/{id}
pub async fn deactivate_conversation(
    user: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    state
        .gateway
        .conversations()
        .deactivate(path.into_inner(), user.id())
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

/// GET /api/v1/conversations/{id}/messages?before=&limit=
pub async fn get_messages(
    user: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    query: web::Query<HistoryQuery>,
) -> Result<HttpResponse, AppError> {
    let messages = state
        .gateway
        .messages()
        .history(
            path.into_inner(),
            user.id(),
            query.before,
            query.limit.unwrap_or(50),
        )
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(messages)))
}

/// Send through the same pipeline as the WebSocket `chat:send`
///
/// POST /api/v1/conversations/{id}/messages
pub async fn send_message(
    user: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<SendMessagePayload>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let message = state
        .gateway
        .messages()
        .send_message(SendMessage {
            conversation_id: path.into_inner(),
            sender_id: user.id(),
            content: body.content,
            kind: body.kind,
            attachment: body.attachment,
        })
        .await?;
    Ok(HttpResponse::Created().json(ApiResponse::ok(message)))
}

/// POST /api/v1/conversations/{id}/read
pub async fn mark_read(
    user: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let message_ids = state
        .gateway
        .mark_conversation_read(user.id(), path.into_inner())
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(MarkReadResponse {
        marked: message_ids.len(),
        message_ids,
    })))
}

/// GET /api/v1/conversations/{id}/unread
pub async fn unread_count(
    user: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let conversation_id = path.into_inner();
    state
        .gateway
        .conversations()
        .require_participant(conversation_id, user.id())
        .await?;
    let unread_count = state
        .gateway
        .read_receipts()
        .unread_count_for(conversation_id, user.id())
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(UnreadResponse {
        conversation_id,
        unread_count,
    })))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1/conversations")
            .route("", web::get().to(list_conversations))
            .route("/direct", web::post().to(open_direct))
            .route("/group", web::post().to(create_group))
            .route("/{id}", web::delete().to(deactivate_conversation))
            .route("/{id}/messages", web::get().to(get_messages))
            .route("/{id}/messages", web::post().to(send_message))
            .route("/{id}/read", web::post().to(mark_read))
            .route("/{id}/unread", web::get().to(unread_count)),
    );
}
