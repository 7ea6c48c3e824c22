use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error, Clone)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    /// Credential missing, malformed or expired. Refuses the connection.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Authenticated caller is not a participant/owner of the target resource.
    #[error("unauthorized")]
    Unauthorized,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found")]
    NotFound,

    /// Durable store unavailable or rejected the write.
    #[error("persistence failure: {0}")]
    Persistence(String),

    #[error("internal server error")]
    Internal,
}

impl From<tokio_postgres::Error> for AppError {
    fn from(e: tokio_postgres::Error) -> Self {
        AppError::Persistence(e.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for AppError {
    fn from(e: deadpool_postgres::PoolError) -> Self {
        AppError::Persistence(e.to_string())
    }
}

impl AppError {
    /// Stable machine-readable code, also used in WebSocket `error` events.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "CONFIG",
            AppError::StartServer(_) => "START_SERVER",
            AppError::Auth(_) => "AUTH_ERROR",
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::InvalidInput(_) => "INVALID_INPUT",
            AppError::NotFound => "NOT_FOUND",
            AppError::Persistence(_) => "PERSISTENCE_FAILURE",
            AppError::Internal => "INTERNAL",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Auth(_) => 401,
            AppError::Unauthorized => 403,
            AppError::InvalidInput(_) => 400,
            AppError::NotFound => 404,
            AppError::Persistence(_) => 503,
            _ => 500,
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(AppError::status_code(self))
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(ResponseError::status_code(self)).json(json!({
            "success": false,
            "error": self.to_string(),
            "code": self.code(),
        }))
    }
}
