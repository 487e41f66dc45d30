use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use bcrypt::{hash, verify, BcryptError, DEFAULT_COST};
use thiserror::Error;

use crate::errors::ApiError;

/// Prefix every issued token carries.
pub const TOKEN_PREFIX: &str = "token_";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Authorization header is required")]
    MissingHeader,
    #[error("Invalid authorization header format")]
    MalformedHeader,
    #[error("Invalid token")]
    InvalidToken,
    /// Well-formed token for a user that does not exist.
    #[error("Invalid user")]
    UnknownUser,
    /// Login with an unknown username or a wrong password.
    #[error("Invalid username or password")]
    InvalidCredentials,
}

/// Salted bcrypt hash; two calls with the same password never match textually.
pub fn hash_password(password: &str) -> Result<String, BcryptError> {
    hash(password, DEFAULT_COST)
}

/// `Ok(false)` on mismatch; `Err` only when the stored hash is malformed.
pub fn verify_password(password: &str, hash: &str) -> Result<bool, BcryptError> {
    verify(password, hash)
}

/// Tokens are the username behind a fixed prefix. They are not signed and
/// anyone who knows a username can build one.
pub fn issue_token(username: &str) -> String {
    format!("{TOKEN_PREFIX}{username}")
}

/// Extract the username from an `Authorization: Bearer token_<username>` value.
pub fn parse_bearer(header: Option<&str>) -> Result<String, AuthError> {
    let header = match header {
        Some(value) if !value.is_empty() => value,
        _ => return Err(AuthError::MissingHeader),
    };

    let parts: Vec<&str> = header.split(' ').collect();
    if parts.len() != 2 || parts[0] != "Bearer" {
        return Err(AuthError::MalformedHeader);
    }

    // An empty username passes here; it never matches a stored user.
    parts[1]
        .strip_prefix(TOKEN_PREFIX)
        .map(str::to_string)
        .ok_or(AuthError::InvalidToken)
}

/// Username carried by a syntactically valid bearer token. Existence of the
/// user is not checked here.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = match parts.headers.get(AUTHORIZATION) {
            Some(value) => Some(value.to_str().map_err(|_| AuthError::MalformedHeader)?),
            None => None,
        };
        let username = parse_bearer(header).map_err(|err| {
            tracing::debug!(error = %err, "rejected bearer token");
            err
        })?;
        Ok(BearerToken(username))
    }
}
