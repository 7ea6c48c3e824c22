use super::ApiResponse;
use crate::auth::AuthUser;
use crate::error::AppError;
use crate::state::AppState;
use crate::websocket::WsOutboundEvent;
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct PostUpdatedPayload {
    /// Changed fields, e.g. `{"like_count": 12, "comment_count": 3}`
    pub changes: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct BroadcastResponse {
    pub delivered: usize,
}

/// Broadcast authoritative post counters to every live client
///
/// POST /api/v1/posts/{id}/updated
pub async fn post_updated(
    _user: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<PostUpdatedPayload>,
) -> Result<HttpResponse, AppError> {
    let post_id = path.into_inner();
    let changes = body.into_inner().changes;
    if !changes.is_object() {
        return Err(AppError::InvalidInput("changes must be an object".into()));
    }

    let delivered = state
        .gateway
        .hub()
        .broadcast(&WsOutboundEvent::PostUpdated { post_id, changes }, None);
    debug!(post_id = %post_id, delivered, "post update broadcast");
    Ok(HttpResponse::Ok().json(ApiResponse::ok(BroadcastResponse { delivered })))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/v1/posts/{id}/updated", web::post().to(post_updated));
}
