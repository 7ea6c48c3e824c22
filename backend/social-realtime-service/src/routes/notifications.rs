use super::ApiResponse;
use crate::auth::AuthUser;
use crate::error::AppError;
use crate::models::CreateNotificationRequest;
use crate::state::AppState;
use crate::store::NotificationQuery;
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub unread_only: bool,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub unread_count: u64,
}

#[derive(Debug, Serialize)]
pub struct MarkAllResponse {
    pub marked: u64,
}

/// Domain-event hook for connection requests, likes, comments and
/// application status changes. The caller is always the sender; a payload
/// naming someone else is rejected.
///
/// POST /api/v1/notifications
pub async fn create_notification(
    user: AuthUser,
    state: web::Data<AppState>,
    body: web::Json<CreateNotificationRequest>,
) -> Result<HttpResponse, AppError> {
    let mut req = body.into_inner();
    if req.sender_id.is_some_and(|sender_id| sender_id != user.id()) {
        return Err(AppError::Unauthorized);
    }
    req.sender_id = Some(user.id());
    let notification = state
        .gateway
        .notifications()
        .create_notification(req)
        .await?;
    Ok(HttpResponse::Created().json(ApiResponse::ok(notification)))
}

/// GET /api/v1/notifications?unread_only=&limit=
pub async fn list_notifications(
    user: AuthUser,
    state: web::Data<AppState>,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, AppError> {
    let defaults = NotificationQuery::default();
    let query = NotificationQuery {
        unread_only: query.unread_only,
        limit: query.limit.unwrap_or(defaults.limit).clamp(1, 200),
    };
    let notifications = state
        .gateway
        .notifications()
        .list_notifications(user.id(), query)
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(notifications)))
}

/// GET /api/v1/notifications/unread-count
pub async fn unread_count(
    user: AuthUser,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let unread_count = state
        .gateway
        .notifications()
        .get_unread_count(user.id())
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(UnreadCountResponse { unread_count })))
}

/// GET /api/v1/notifications/{id}
pub async fn get_notification(
    user: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let notification = state
        .gateway
        .notifications()
        .get_notification(path.into_inner(), user.id())
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(notification)))
}

/// PUT /api/v1/notifications/{id}/read
pub async fn mark_as_read(
    user: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let notification = state
        .gateway
        .notifications()
        .mark_read(path.into_inner(), user.id())
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(notification)))
}

/// PUT /api/v1/notifications/read-all
pub async fn mark_all_as_read(
    user: AuthUser,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let marked = state
        .gateway
        .notifications()
        .mark_all_read(user.id())
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(MarkAllResponse { marked })))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1/notifications")
            .route("", web::post().to(create_notification))
            .route("", web::get().to(list_notifications))
            .route("/unread-count", web::get().to(unread_count))
            .route("/read-all", web::put().to(mark_all_as_read))
            .route("/{id}", web::get().to(get_notification))
            .route("/{id}/read", web::put().to(mark_as_read)),
    );
}
