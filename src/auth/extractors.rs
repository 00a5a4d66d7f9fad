//! Axum extractors for authentication.

use axum::{extract::FromRequestParts, http::request::Parts};

use super::cookie::access_token_from_headers;
use super::state::HasAuthBackend;
use crate::db::User;
use crate::error::AuthError;
use crate::jwt::{AccessClaims, JwtError};

/// The user behind a verified access token.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub claims: AccessClaims,
    pub user: User,
}

/// Core verification: token presence, signature and expiry, then user lookup.
async fn authenticate_request<S>(parts: &Parts, state: &S) -> Result<AuthenticatedUser, AuthError>
where
    S: HasAuthBackend + Send + Sync,
{
    let token = access_token_from_headers(&parts.headers).ok_or(AuthError::Unauthenticated)?;

    let claims = state.codec().verify(token).map_err(|e| match e {
        JwtError::Expired => AuthError::TokenExpired,
        _ => AuthError::TokenInvalid,
    })?;

    let user = state
        .db()
        .users()
        .get_by_uuid(&claims.sub)
        .await?
        .ok_or(AuthError::Unauthenticated)?;

    Ok(AuthenticatedUser { claims, user })
}

/// Extractor for endpoints that require a session.
/// Rejects with a tagged JSON error so clients can tell expiry from forgery.
pub struct Auth(pub AuthenticatedUser);

impl<S> FromRequestParts<S> for Auth
where
    S: HasAuthBackend + Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        authenticate_request(parts, state).await.map(Auth)
    }
}
