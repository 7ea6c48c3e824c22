use super::ApiResponse;
use crate::auth::AuthUser;
use crate::error::AppError;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct PresenceResponse {
    pub user_id: Uuid,
    pub online: bool,
    pub connections: usize,
}

/// GET /api/v1/presence/{user_id}
pub async fn get_presence(
    _user: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let user_id = path.into_inner();
    let presence = state.gateway.hub().presence();
    Ok(HttpResponse::Ok().json(ApiResponse::ok(PresenceResponse {
        user_id,
        online: presence.is_online(user_id),
        connections: presence.connections_for(user_id).len(),
    })))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/v1/presence/{user_id}", web::get().to(get_presence));
}
