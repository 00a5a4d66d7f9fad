//! Session responses shared by every endpoint that signs a user in.

use axum::{
    Json,
    http::{StatusCode, header::SET_COOKIE},
    response::{AppendHeaders, IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::auth::{ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME, clear_cookie, set_cookie};
use crate::db::User;
use crate::session::TokenPair;

/// Public view of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    pub avatar: String,
    pub is_email_verified: bool,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.uuid.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            avatar: user.avatar.clone(),
            is_email_verified: user.email_verified,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    success: bool,
    access_token: String,
    user: UserProfile,
}

/// Respond with a new session: both cookies plus the access token and
/// profile in the body.
pub fn session_response(status: StatusCode, pair: &TokenPair, user: &User, secure: bool) -> Response {
    let access_cookie = set_cookie(
        ACCESS_COOKIE_NAME,
        &pair.access_token,
        pair.access_expires_in,
        secure,
    );
    let refresh_cookie = set_cookie(
        REFRESH_COOKIE_NAME,
        &pair.refresh_token,
        pair.refresh_expires_in,
        secure,
    );

    (
        status,
        AppendHeaders([(SET_COOKIE, access_cookie), (SET_COOKIE, refresh_cookie)]),
        Json(SessionResponse {
            success: true,
            access_token: pair.access_token.clone(),
            user: UserProfile::from(user),
        }),
    )
        .into_response()
}

/// Append headers that delete both session cookies.
pub fn clear_session_cookies(response: impl IntoResponse, secure: bool) -> Response {
    (
        AppendHeaders([
            (SET_COOKIE, clear_cookie(ACCESS_COOKIE_NAME, secure)),
            (SET_COOKIE, clear_cookie(REFRESH_COOKIE_NAME, secure)),
        ]),
        response,
    )
        .into_response()
}
