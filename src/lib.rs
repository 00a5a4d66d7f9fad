pub mod api;
pub mod auth;
pub mod cleanup;
pub mod cli;
pub mod client;
pub mod db;
pub mod email_token;
pub mod error;
pub mod jwt;
pub mod mailer;
pub mod oauth;
pub mod password;
pub mod rate_limit;
pub mod session;

use api::{ApiContext, create_api_router};
use axum::Router;
use db::Database;
use jwt::TokenCodec;
use mailer::Mailer;
use oauth::IdentityProvider;
use rate_limit::RateLimitConfig;
use session::SessionIssuer;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// HMAC secret for signing access tokens
    pub jwt_secret: Vec<u8>,
    /// Access token lifetime in seconds
    pub access_token_ttl: u64,
    /// Refresh token lifetime in seconds
    pub refresh_token_ttl: u64,
    /// Frontend origin used in email links and OAuth redirects
    pub client_url: String,
    /// Whether to set Secure flag on cookies (should be true in production with HTTPS)
    pub secure_cookies: bool,
    /// Per-IP rate limiting on login, registration and password reset; `None` disables it
    pub rate_limit: Option<Arc<RateLimitConfig>>,
    /// Outbound email delivery
    pub mailer: Arc<dyn Mailer>,
    /// Google sign-in, when configured
    pub identity_provider: Option<Arc<dyn IdentityProvider>>,
}

/// Create the application router with the given configuration.
pub fn create_app(config: &ServerConfig) -> Router {
    let codec = Arc::new(TokenCodec::new(&config.jwt_secret, config.access_token_ttl));
    let issuer = SessionIssuer::new(config.db.clone(), codec.clone(), config.refresh_token_ttl);

    let api_router = create_api_router(ApiContext {
        db: config.db.clone(),
        codec,
        issuer,
        mailer: config.mailer.clone(),
        identity_provider: config.identity_provider.clone(),
        rate_limit: config.rate_limit.clone(),
        client_url: config.client_url.clone(),
        secure_cookies: config.secure_cookies,
    });

    Router::new().nest("/api", api_router)
}

/// Run cleanup tasks and spawn background scheduler.
/// Call this before starting the server.
pub async fn init_cleanup(config: &ServerConfig) {
    cleanup::run_cleanup(&config.db).await;
    cleanup::spawn_cleanup_scheduler(config.db.clone(), config.rate_limit.clone());
}

/// Run the server on the given listener. This function blocks until the server exits.
/// Call `init_cleanup` before this to run cleanup on startup.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let app = create_app(&config);
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service).await
}

/// Start the server on the given port in a background task. Use port 0 to let the OS choose a random port.
/// Returns the actual address the server is listening on.
/// Note: For production use, prefer `run_server` directly in main.
pub async fn start_server(
    config: ServerConfig,
    port: u16,
) -> Result<(tokio::task::JoinHandle<()>, SocketAddr), std::io::Error> {
    // Run cleanup tasks on startup
    init_cleanup(&config).await;

    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    let local_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        run_server(config, listener).await.ok();
    });

    Ok((handle, local_addr))
}
