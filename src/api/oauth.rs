//! Google sign-in endpoints.
//!
//! - GET `/google` - Redirect to the provider with a CSRF state cookie
//! - GET `/google/callback` - Finish the handshake, redirect with a one-time code
//! - POST `/oauth/exchange` - Redeem the code for a session

use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::{AppendHeaders, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::response::session_response;
use crate::auth::{OAUTH_STATE_COOKIE_NAME, clear_cookie, get_cookie, set_cookie};
use crate::db::generate_secret;
use crate::error::AuthError;
use crate::oauth::{IdentityProvider, OAuthBridge};

/// How long a started handshake may take before its state cookie lapses.
const OAUTH_STATE_TTL_SECS: u64 = 10 * 60;

#[derive(Clone)]
pub struct OAuthState {
    pub bridge: OAuthBridge,
    pub provider: Option<Arc<dyn IdentityProvider>>,
    pub client_url: String,
    pub secure_cookies: bool,
}

pub fn router(state: OAuthState) -> Router {
    Router::new()
        .route("/google", get(google_start))
        .route("/google/callback", get(google_callback))
        .route("/oauth/exchange", post(exchange))
        .with_state(state)
}

impl OAuthState {
    fn provider(&self) -> Result<&Arc<dyn IdentityProvider>, AuthError> {
        self.provider
            .as_ref()
            .ok_or_else(|| AuthError::NotFound("Google sign-in is not configured".into()))
    }

    fn client_redirect(&self, path_and_query: &str) -> Redirect {
        Redirect::to(&format!(
            "{}{}",
            self.client_url.trim_end_matches('/'),
            path_and_query
        ))
    }
}

async fn google_start(State(state): State<OAuthState>) -> Result<Response, AuthError> {
    let provider = state.provider()?;
    let csrf = generate_secret(24);
    let url = provider.authorize_url(&csrf)?;

    let cookie = set_cookie(
        OAUTH_STATE_COOKIE_NAME,
        &csrf,
        OAUTH_STATE_TTL_SECS,
        state.secure_cookies,
    );

    Ok((
        AppendHeaders([(SET_COOKIE, cookie)]),
        Redirect::to(url.as_str()),
    )
        .into_response())
}

#[derive(Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

async fn google_callback(
    State(state): State<OAuthState>,
    Query(query): Query<CallbackQuery>,
    headers: HeaderMap,
) -> Response {
    let clear_state = clear_cookie(OAUTH_STATE_COOKIE_NAME, state.secure_cookies);

    match complete_callback(&state, &query, &headers).await {
        Ok(code) => (
            AppendHeaders([(SET_COOKIE, clear_state)]),
            state.client_redirect(&format!("/oauth-callback?code={}", code)),
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, detail = ?e, "Google callback failed");
            (
                AppendHeaders([(SET_COOKIE, clear_state)]),
                state.client_redirect("/login?error=oauth_failed"),
            )
                .into_response()
        }
    }
}

async fn complete_callback(
    state: &OAuthState,
    query: &CallbackQuery,
    headers: &HeaderMap,
) -> Result<String, AuthError> {
    if let Some(error) = &query.error {
        return Err(AuthError::OAuthFailed(format!("Provider returned {}", error)));
    }

    let expected = get_cookie(headers, OAUTH_STATE_COOKIE_NAME).filter(|s| !s.is_empty());
    match (expected, query.state.as_deref()) {
        (Some(expected), Some(returned)) if expected == returned => {}
        _ => return Err(AuthError::OAuthFailed("State mismatch".into())),
    }

    let code = query
        .code
        .as_deref()
        .ok_or_else(|| AuthError::OAuthFailed("Missing authorization code".into()))?;

    let provider = state.provider()?;
    let exchange_code = state.bridge.complete(provider.as_ref(), code).await?;
    info!("Google sign-in completed");
    Ok(exchange_code)
}

#[derive(Deserialize)]
struct ExchangeRequest {
    #[serde(default)]
    code: String,
}

async fn exchange(
    State(state): State<OAuthState>,
    Json(payload): Json<ExchangeRequest>,
) -> Result<Response, AuthError> {
    if payload.code.is_empty() {
        return Err(AuthError::validation("Missing sign-in code"));
    }

    let (pair, user) = state.bridge.redeem(&payload.code).await?;
    Ok(session_response(
        StatusCode::OK,
        &pair,
        &user,
        state.secure_cookies,
    ))
}
