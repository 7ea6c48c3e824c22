use super::ApiResponse;
use crate::auth::AuthUser;
use crate::error::AppError;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct EditMessagePayload {
    pub content: String,
}

/// Edit own message
///
/// PUT /api/v1/messages/{id}
pub async fn edit_message(
    user: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<EditMessagePayload>,
) -> Result<HttpResponse, AppError> {
    let message = state
        .gateway
        .messages()
        .edit_message(path.into_inner(), user.id(), body.into_inner().content)
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(message)))
}

/// Soft delete own message
///
/// DELETE /api/v1/messages/{id}
pub async fn delete_message(
    user: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let message = state
        .gateway
        .messages()
        .delete_message(path.into_inner(), user.id())
        .await?;
    Ok(HttpResponse::Ok().json(ApiResponse::ok(message)))
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1/messages")
            .route("/{id}", web::put().to(edit_message))
            .route("/{id}", web::delete().to(delete_message)),
    );
}
