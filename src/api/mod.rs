mod auth;
mod error;
mod oauth;
mod response;

use axum::Router;
use std::sync::Arc;

use crate::db::Database;
use crate::email_token::EmailTokenManager;
use crate::jwt::TokenCodec;
use crate::mailer::Mailer;
use crate::oauth::{IdentityProvider, OAuthBridge};
use crate::rate_limit::RateLimitConfig;
use crate::session::SessionIssuer;

pub use auth::AuthState;
pub use oauth::OAuthState;
pub use response::UserProfile;

/// Everything the API handlers share.
pub struct ApiContext {
    pub db: Database,
    pub codec: Arc<TokenCodec>,
    pub issuer: SessionIssuer,
    pub mailer: Arc<dyn Mailer>,
    pub identity_provider: Option<Arc<dyn IdentityProvider>>,
    pub rate_limit: Option<Arc<RateLimitConfig>>,
    pub client_url: String,
    pub secure_cookies: bool,
}

/// Create the API router.
pub fn create_api_router(ctx: ApiContext) -> Router {
    let auth_state = AuthState {
        db: ctx.db.clone(),
        codec: ctx.codec,
        issuer: ctx.issuer.clone(),
        email_tokens: EmailTokenManager::new(ctx.db.clone()),
        mailer: ctx.mailer,
        client_url: ctx.client_url.clone(),
        secure_cookies: ctx.secure_cookies,
    };

    let oauth_state = OAuthState {
        bridge: OAuthBridge::new(ctx.db, ctx.issuer),
        provider: ctx.identity_provider,
        client_url: ctx.client_url,
        secure_cookies: ctx.secure_cookies,
    };

    let auth_router = auth::router(auth_state, ctx.rate_limit).merge(oauth::router(oauth_state));

    Router::new().nest("/auth", auth_router)
}
