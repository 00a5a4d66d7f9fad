//! Error taxonomy shared by the server and the client session coordinator.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable error tag sent in every error response.
///
/// The client decides between "refresh and retry" and "return to login"
/// from this tag alone, never from the message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Duplicate,
    Authentication,
    Unauthenticated,
    TokenExpired,
    TokenInvalid,
    TokenRevoked,
    TokenInvalidOrExpired,
    NotAuthorized,
    NotFound,
    EmailDelivery,
    OauthFailed,
    RateLimited,
    Internal,
}

impl ErrorKind {
    /// Kinds after which a client should attempt a single refresh.
    pub fn is_refreshable(self) -> bool {
        matches!(self, ErrorKind::TokenExpired | ErrorKind::Unauthenticated)
    }
}

/// Errors produced by the credential and session core.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Duplicate(String),

    #[error("{0}")]
    Authentication(String),

    #[error("Not authenticated")]
    Unauthenticated,

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token")]
    TokenInvalid,

    #[error("Token has been revoked")]
    TokenRevoked,

    #[error("Invalid or expired token")]
    TokenInvalidOrExpired,

    #[error("{0}")]
    NotAuthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Email could not be sent")]
    EmailDelivery(String),

    #[error("External sign-in failed")]
    OAuthFailed(String),

    #[error("Too many requests. Please try again later.")]
    RateLimited,

    #[error("Database error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::Validation(_) => ErrorKind::Validation,
            AuthError::Duplicate(_) => ErrorKind::Duplicate,
            AuthError::Authentication(_) => ErrorKind::Authentication,
            AuthError::Unauthenticated => ErrorKind::Unauthenticated,
            AuthError::TokenExpired => ErrorKind::TokenExpired,
            AuthError::TokenInvalid => ErrorKind::TokenInvalid,
            AuthError::TokenRevoked => ErrorKind::TokenRevoked,
            AuthError::TokenInvalidOrExpired => ErrorKind::TokenInvalidOrExpired,
            AuthError::NotAuthorized(_) => ErrorKind::NotAuthorized,
            AuthError::NotFound(_) => ErrorKind::NotFound,
            AuthError::EmailDelivery(_) => ErrorKind::EmailDelivery,
            AuthError::OAuthFailed(_) => ErrorKind::OauthFailed,
            AuthError::RateLimited => ErrorKind::RateLimited,
            AuthError::Storage(_) | AuthError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn internal(context: &str, e: impl std::fmt::Display) -> Self {
        Self::Internal(format!("{}: {}", context, e))
    }
}
