//! Error responses for API endpoints.
//!
//! Every failure is rendered as `{ success: false, kind, error }`. Storage and
//! other internal details are logged and replaced with a generic message.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::{error, warn};

use crate::error::{AuthError, ErrorKind};

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    kind: ErrorKind,
    error: String,
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::Duplicate | ErrorKind::TokenInvalidOrExpired => {
                StatusCode::BAD_REQUEST
            }
            ErrorKind::Authentication
            | ErrorKind::Unauthenticated
            | ErrorKind::TokenExpired
            | ErrorKind::TokenInvalid
            | ErrorKind::TokenRevoked
            | ErrorKind::OauthFailed => StatusCode::UNAUTHORIZED,
            ErrorKind::NotAuthorized => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::EmailDelivery | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match &self {
            AuthError::Storage(e) => {
                error!(error = %e, "Database error");
                "Internal server error".to_string()
            }
            AuthError::Internal(detail) => {
                error!("{}", detail);
                "Internal server error".to_string()
            }
            AuthError::EmailDelivery(detail) => {
                error!(detail = %detail, "Email delivery failed");
                self.to_string()
            }
            AuthError::OAuthFailed(detail) => {
                warn!(detail = %detail, "External sign-in failed");
                self.to_string()
            }
            _ => self.to_string(),
        };

        (
            self.status_code(),
            Json(ErrorResponse {
                success: false,
                kind: self.kind(),
                error: message,
            }),
        )
            .into_response()
    }
}
