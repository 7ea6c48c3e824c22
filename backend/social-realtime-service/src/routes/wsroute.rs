use crate::auth;
use crate::error::AppError;
use crate::state::AppState;
use crate::websocket::session::WsSession;
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use tracing::warn;

/// WebSocket handshake
///
/// GET /ws  (credential in `Authorization: Bearer` or `?token=`)
///
/// The credential is verified once; a failure refuses the upgrade and no
/// connection state is created.
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let identity = match auth::authenticate(&state, &req) {
        Ok(identity) => identity,
        Err(err) => {
            warn!(error = %err, "WebSocket connection rejected");
            return Err(err.into());
        }
    };

    let session = WsSession::new(
        identity.user_id,
        state.gateway.clone(),
        state.websocket.clone(),
    );
    ws::start(session, &req, stream).map_err(|e| {
        warn!(error = %e, "WebSocket upgrade failed");
        Error::from(AppError::InvalidInput("websocket upgrade failed".into()))
    })
}

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/ws", web::get().to(ws_handler));
}
