//! Local credential and session endpoints.
//!
//! - POST `/register` - Create an account and email a verification link
//! - POST `/login` - Email and password sign-in
//! - GET `/logout` - End the current session
//! - GET `/me` - Current user profile
//! - POST `/refresh-token` - Rotate the refresh token
//! - GET `/verify-email/{token}` - Confirm an email address and sign in
//! - POST `/resend-verification` - Send a new verification link
//! - POST `/forgot-password` - Email a password reset link
//! - PUT `/reset-password/{token}` - Set a new password with a reset link
//! - PUT `/update-password` - Change the password of the current user

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use super::response::{UserProfile, clear_session_cookies, session_response};
use crate::auth::{Auth, REFRESH_COOKIE_NAME, get_cookie};
use crate::db::{Database, EmailTokenKind, NewUser, User};
use crate::email_token::{ConsumeEffect, EmailTokenManager};
use crate::error::AuthError;
use crate::impl_has_auth_backend;
use crate::jwt::TokenCodec;
use crate::mailer::{EmailMessage, Mailer, password_reset_email, verification_email};
use crate::password::{hash_password, validate_password, verify_password};
use crate::rate_limit::{
    RateLimitConfig, rate_limit_forgot_password, rate_limit_login, rate_limit_register,
};
use crate::session::{SessionIssuer, TokenPair};

const MAX_NAME_LENGTH: usize = 50;

#[derive(Clone)]
pub struct AuthState {
    pub db: Database,
    pub codec: Arc<TokenCodec>,
    pub issuer: SessionIssuer,
    pub email_tokens: EmailTokenManager,
    pub mailer: Arc<dyn Mailer>,
    pub client_url: String,
    pub secure_cookies: bool,
}

impl_has_auth_backend!(AuthState);

pub fn router(state: AuthState, rate_limit: Option<Arc<RateLimitConfig>>) -> Router {
    let mut login = Router::new()
        .route("/login", post(login))
        .with_state(state.clone());
    let mut register = Router::new()
        .route("/register", post(register))
        .with_state(state.clone());
    let mut forgot = Router::new()
        .route("/forgot-password", post(forgot_password))
        .with_state(state.clone());

    if let Some(config) = rate_limit {
        login = login.layer(middleware::from_fn_with_state(
            config.clone(),
            rate_limit_login,
        ));
        register = register.layer(middleware::from_fn_with_state(
            config.clone(),
            rate_limit_register,
        ));
        forgot = forgot.layer(middleware::from_fn_with_state(
            config,
            rate_limit_forgot_password,
        ));
    }

    let rest = Router::new()
        .route("/logout", get(logout))
        .route("/me", get(me))
        .route("/refresh-token", post(refresh_token))
        .route("/verify-email/{token}", get(verify_email))
        .route("/resend-verification", post(resend_verification))
        .route("/reset-password/{token}", put(reset_password))
        .route("/update-password", put(update_password))
        .with_state(state);

    Router::new()
        .merge(login)
        .merge(register)
        .merge(forgot)
        .merge(rest)
}

#[derive(Deserialize)]
struct RegisterRequest {
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(Deserialize)]
struct LoginRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(Deserialize)]
struct ForgotPasswordRequest {
    #[serde(default)]
    email: String,
}

#[derive(Deserialize)]
struct ResetPasswordRequest {
    #[serde(default)]
    password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdatePasswordRequest {
    #[serde(default)]
    current_password: String,
    #[serde(default)]
    new_password: String,
}

fn message(text: &str) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "success": true, "message": text }))
}

/// Loose structural check: one `@`, a non-empty local part and a dotted domain.
fn validate_email(email: &str) -> Result<(), AuthError> {
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(AuthError::validation("Please add a valid email address"));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<(), AuthError> {
    if name.is_empty() {
        return Err(AuthError::validation("Please add a name"));
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        return Err(AuthError::validation(format!(
            "Name cannot be longer than {} characters",
            MAX_NAME_LENGTH
        )));
    }
    Ok(())
}

impl AuthState {
    /// Issue an email token, deliver it, and withdraw it again if delivery fails.
    async fn send_email_token(
        &self,
        kind: EmailTokenKind,
        user: &User,
        render: fn(&str, &str, &str) -> EmailMessage,
    ) -> Result<(), AuthError> {
        let token = self.email_tokens.issue(kind, user.id).await?;
        let email = render(&user.email, &self.client_url, &token);

        if let Err(e) = self.mailer.send(&email).await {
            self.email_tokens.revoke(kind, user.id, &token).await?;
            return Err(AuthError::EmailDelivery(e.to_string()));
        }
        Ok(())
    }

    fn session(&self, status: StatusCode, pair: &TokenPair, user: &User) -> Response {
        session_response(status, pair, user, self.secure_cookies)
    }
}

async fn register(
    State(state): State<AuthState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let name = payload.name.trim();
    let email = payload.email.trim();

    validate_name(name)?;
    validate_email(email)?;
    validate_password(&payload.password)?;

    if state.db.users().email_exists(email).await? {
        return Err(AuthError::Duplicate(
            "User with that email already exists".into(),
        ));
    }

    let password_hash = hash_password(&payload.password).await?;
    let uuid = uuid::Uuid::new_v4().to_string();

    let id = state
        .db
        .users()
        .create(&NewUser {
            uuid: &uuid,
            name,
            email,
            password_hash: Some(&password_hash),
            google_id: None,
            avatar: None,
            email_verified: false,
        })
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                AuthError::Duplicate("User with that email already exists".into())
            }
            e => AuthError::Storage(e),
        })?;

    let user = state
        .db
        .users()
        .get_by_id(id)
        .await?
        .ok_or_else(|| AuthError::internal("Registration", "created user not found"))?;

    state
        .send_email_token(EmailTokenKind::Verification, &user, verification_email)
        .await?;

    info!(user = %user.uuid, "User registered");
    Ok((
        StatusCode::CREATED,
        message("Registration successful. Please check your email to verify your account."),
    ))
}

async fn login(
    State(state): State<AuthState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Response, AuthError> {
    let email = payload.email.trim();
    if email.is_empty() || payload.password.is_empty() {
        return Err(AuthError::validation(
            "Please provide an email and password",
        ));
    }

    let invalid = || AuthError::Authentication("Invalid credentials".into());

    let user = state.db.users().get_by_email(email).await?.ok_or_else(invalid)?;

    // Accounts created through Google have no local password
    let Some(hash) = user.password_hash.as_deref() else {
        return Err(invalid());
    };

    if !verify_password(&payload.password, hash).await? {
        return Err(invalid());
    }

    let pair = state.issuer.issue(&user).await?;
    Ok(state.session(StatusCode::OK, &pair, &user))
}

async fn logout(
    State(state): State<AuthState>,
    Auth(auth): Auth,
    headers: HeaderMap,
) -> Result<Response, AuthError> {
    if let Some(refresh_token) = get_cookie(&headers, REFRESH_COOKIE_NAME).filter(|t| !t.is_empty())
    {
        state.issuer.logout(auth.user.id, refresh_token).await?;
    }

    info!(user = %auth.user.uuid, "User logged out");
    Ok(clear_session_cookies(
        Json(serde_json::json!({ "success": true })),
        state.secure_cookies,
    ))
}

async fn me(Auth(auth): Auth) -> impl IntoResponse {
    Json(serde_json::json!({
        "success": true,
        "user": UserProfile::from(&auth.user),
    }))
}

/// Rotate the refresh token. Any failure clears both cookies so the browser
/// drops a dead session.
async fn refresh_token(State(state): State<AuthState>, headers: HeaderMap) -> Response {
    let presented = get_cookie(&headers, REFRESH_COOKIE_NAME).filter(|t| !t.is_empty());

    let result = match presented {
        Some(token) => state.issuer.rotate(token).await,
        None => Err(AuthError::Unauthenticated),
    };

    match result {
        Ok((pair, user)) => state.session(StatusCode::OK, &pair, &user),
        Err(e) if e.status_code() == StatusCode::UNAUTHORIZED => {
            clear_session_cookies(e, state.secure_cookies)
        }
        Err(e) => e.into_response(),
    }
}

async fn verify_email(
    State(state): State<AuthState>,
    Path(token): Path<String>,
) -> Result<Response, AuthError> {
    let user = state
        .email_tokens
        .consume(&token, ConsumeEffect::MarkVerified)
        .await?;

    info!(user = %user.uuid, "Email verified");
    let pair = state.issuer.issue(&user).await?;
    Ok(state.session(StatusCode::OK, &pair, &user))
}

async fn resend_verification(
    State(state): State<AuthState>,
    Auth(auth): Auth,
) -> Result<impl IntoResponse, AuthError> {
    if auth.user.email_verified {
        return Err(AuthError::validation("Email is already verified"));
    }

    state
        .send_email_token(EmailTokenKind::Verification, &auth.user, verification_email)
        .await?;

    Ok(message("Verification email sent"))
}

async fn forgot_password(
    State(state): State<AuthState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<impl IntoResponse, AuthError> {
    let email = payload.email.trim();
    if email.is_empty() {
        return Err(AuthError::validation("Please provide an email"));
    }

    let user = state
        .db
        .users()
        .get_by_email(email)
        .await?
        .ok_or_else(|| AuthError::NotFound("No user found with that email".into()))?;

    state
        .send_email_token(EmailTokenKind::Reset, &user, password_reset_email)
        .await?;

    Ok(message("Password reset email sent"))
}

async fn reset_password(
    State(state): State<AuthState>,
    Path(token): Path<String>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Response, AuthError> {
    validate_password(&payload.password)?;
    let password_hash = hash_password(&payload.password).await?;

    let user = state
        .email_tokens
        .consume(&token, ConsumeEffect::SetPassword(&password_hash))
        .await?;

    let revoked = state.issuer.revoke_all(user.id).await?;
    warn!(user = %user.uuid, revoked, "Password reset, sessions revoked");

    let pair = state.issuer.issue(&user).await?;
    Ok(state.session(StatusCode::OK, &pair, &user))
}

async fn update_password(
    State(state): State<AuthState>,
    Auth(auth): Auth,
    Json(payload): Json<UpdatePasswordRequest>,
) -> Result<Response, AuthError> {
    let user = auth.user;
    let incorrect = || AuthError::Authentication("Current password is incorrect".into());

    let Some(hash) = user.password_hash.as_deref() else {
        return Err(incorrect());
    };
    if !verify_password(&payload.current_password, hash).await? {
        return Err(incorrect());
    }

    validate_password(&payload.new_password)?;
    let new_hash = hash_password(&payload.new_password).await?;
    state.db.users().set_password(user.id, &new_hash).await?;

    let revoked = state.issuer.revoke_all(user.id).await?;
    info!(user = %user.uuid, revoked, "Password updated, sessions revoked");

    let pair = state.issuer.issue(&user).await?;
    Ok(state.session(StatusCode::OK, &pair, &user))
}
