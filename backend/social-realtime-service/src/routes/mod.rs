/// HTTP and WebSocket surface
pub mod conversations;
pub mod messages;
pub mod notifications;
pub mod posts;
pub mod presence;
pub mod wsroute;

use actix_web::web;
use serde::Serialize;

/// API Response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
        }
    }
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    wsroute::register_routes(cfg);
    conversations::register_routes(cfg);
    messages::register_routes(cfg);
    notifications::register_routes(cfg);
    posts::register_routes(cfg);
    presence::register_routes(cfg);
}
