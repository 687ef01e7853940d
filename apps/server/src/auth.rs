//! Caller identity at the WebSocket boundary.
//!
//! Tokens are issued by the external auth service; this server only checks
//! them and reads who the caller is.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user id
    pub username: String,
    pub exp: i64,
    pub iat: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: String,
    pub name: String,
}

impl From<Claims> for CallerIdentity {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            name: claims.username,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing token")]
    MissingToken,
    #[error("Invalid token")]
    InvalidToken,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}

/// Sign a token the way the auth service does. Used by tooling and tests.
pub fn issue_token(
    user_id: &str,
    username: &str,
    secret: &[u8],
    ttl: Duration,
) -> Result<String, AuthError> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        username: username.to_string(),
        exp: (now + ttl).timestamp(),
        iat: now.timestamp(),
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))
        .map_err(|_| AuthError::InvalidToken)
}

pub fn validate_token(token: &str, secret: &[u8]) -> Result<Claims, AuthError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| AuthError::InvalidToken)
}

/// Without a configured secret every connection is anonymous and `join-room`
/// identities are taken as supplied.
pub fn resolve_identity(
    token: Option<&str>,
    secret: Option<&[u8]>,
) -> Result<Option<CallerIdentity>, AuthError> {
    let Some(secret) = secret else {
        return Ok(None);
    };
    let token = token
        .filter(|token| !token.trim().is_empty())
        .ok_or(AuthError::MissingToken)?;
    let claims = validate_token(token, secret)?;
    Ok(Some(claims.into()))
}
