//! Connection and request authentication.
//!
//! Tokens are RS256 JWTs issued by the identity service. Only the public key
//! is loaded here; symmetric algorithms are never accepted.

use crate::error::{AppError, AppResult};
use crate::state::AppState;
use actix_web::{dev::Payload, http::header, web, FromRequest, HttpRequest};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// User id as UUID string
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

/// Verified caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_id: Uuid,
    pub username: Option<String>,
}

pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> AppResult<UserIdentity>;
}

pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn from_rsa_pem(public_key_pem: &str) -> AppResult<Self> {
        let key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
            .map_err(|e| AppError::Config(format!("failed to parse RSA public key: {e}")))?;
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = true;
        Ok(Self { key, validation })
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> AppResult<UserIdentity> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| AppError::Auth(format!("token validation failed: {e}")))?;
        if data.claims.token_type.as_deref() == Some("refresh") {
            return Err(AppError::Auth("refresh tokens cannot open sessions".into()));
        }
        let user_id = Uuid::parse_str(&data.claims.sub)
            .map_err(|_| AppError::Auth("subject is not a user id".into()))?;
        Ok(UserIdentity {
            user_id,
            username: data.claims.username,
        })
    }
}

/// Fixed token table, for local development and tests.
#[derive(Debug, Default, Clone)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, Uuid>,
}

impl StaticTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, user_id: Uuid) -> Self {
        self.tokens.insert(token.into(), user_id);
        self
    }
}

impl TokenVerifier for StaticTokenVerifier {
    fn verify(&self, token: &str) -> AppResult<UserIdentity> {
        self.tokens
            .get(token)
            .map(|user_id| UserIdentity {
                user_id: *user_id,
                username: None,
            })
            .ok_or_else(|| AppError::Auth("unknown token".into()))
    }
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// `Authorization: Bearer` first, then a `?token=` query parameter, which
/// browsers need for the WebSocket handshake.
pub fn extract_token(req: &HttpRequest) -> Option<String> {
    let from_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty());

    from_header.or_else(|| {
        web::Query::<TokenQuery>::from_query(req.query_string())
            .ok()
            .and_then(|q| q.into_inner().token)
            .filter(|token| !token.is_empty())
    })
}

pub fn authenticate(state: &AppState, req: &HttpRequest) -> AppResult<UserIdentity> {
    let token = extract_token(req).ok_or_else(|| AppError::Auth("missing credential".into()))?;
    state.verifier.verify(&token)
}

/// Authenticated user extracted from the request credential
#[derive(Debug, Clone)]
pub struct AuthUser(pub UserIdentity);

impl AuthUser {
    pub fn id(&self) -> Uuid {
        self.0.user_id
    }
}

impl FromRequest for AuthUser {
    type Error = actix_web::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self, Self::Error>>>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let result = match req.app_data::<web::Data<AppState>>() {
            Some(state) => authenticate(state, req).map(AuthUser),
            None => Err(AppError::Internal),
        };

        Box::pin(async move { result.map_err(actix_web::Error::from) })
    }
}
