//! CLI argument parsing, validation, and startup helpers.

use std::sync::Arc;

use crate::ServerConfig;
use crate::db::Database;
use crate::jwt::DEFAULT_ACCESS_TOKEN_TTL_SECS;
use crate::mailer::{LogMailer, Mailer, WebhookMailer};
use crate::oauth::{GoogleConfig, GoogleProvider, IdentityProvider};
use crate::rate_limit::RateLimitConfig;
use crate::session::DEFAULT_REFRESH_TOKEN_TTL_SECS;
use clap::Parser;
use tracing::{error, info, warn};
use url::Url;

const MIN_JWT_SECRET_LENGTH: usize = 32;

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "QuillJot", about = "Credential and session service for QuillJot")]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "5000")]
    pub port: u16,

    /// Path to SQLite database file
    #[arg(short, long, default_value = "quilljot.db")]
    pub database: String,

    /// Path to file containing JWT secret. Prefer using JWT_SECRET env var instead
    #[arg(long)]
    pub jwt_secret_file: Option<String>,

    /// Frontend origin, used for email links and OAuth redirects
    #[arg(long, env = "CLIENT_URL", default_value = "http://localhost:5173", value_parser = validate_url)]
    pub client_url: Url,

    /// Production mode: session cookies are marked Secure
    #[arg(long)]
    pub production: bool,

    /// Access token lifetime in seconds
    #[arg(long, default_value_t = DEFAULT_ACCESS_TOKEN_TTL_SECS)]
    pub access_token_ttl: u64,

    /// Refresh token lifetime in seconds
    #[arg(long, default_value_t = DEFAULT_REFRESH_TOKEN_TTL_SECS)]
    pub refresh_token_ttl: u64,

    /// Take client IPs from X-Forwarded-For (only behind a trusted proxy)
    #[arg(long)]
    pub trust_forwarded_for: bool,

    /// Disable per-IP rate limiting
    #[arg(long)]
    pub no_rate_limit: bool,

    /// HTTP endpoint that relays outgoing email. Emails are only logged when unset
    #[arg(long, env = "MAIL_WEBHOOK", value_parser = validate_url)]
    pub mail_webhook: Option<Url>,

    /// Sender address for outgoing email
    #[arg(long, env = "MAIL_FROM", default_value = "QuillJot <noreply@quilljot.app>")]
    pub mail_from: String,

    /// Google OAuth client ID
    #[arg(long, env = "GOOGLE_CLIENT_ID", hide_env_values = true)]
    pub google_client_id: Option<String>,

    /// Google OAuth client secret
    #[arg(long, env = "GOOGLE_CLIENT_SECRET", hide_env_values = true)]
    pub google_client_secret: Option<String>,

    /// Google OAuth redirect URL (this server's callback route)
    #[arg(long, default_value = "http://localhost:5000/api/auth/google/callback", value_parser = validate_url)]
    pub google_redirect_url: Url,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

fn validate_url(s: &str) -> Result<Url, String> {
    let url = Url::parse(s).map_err(|e| format!("Invalid URL {}: {}", s, e))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(format!("URL must use http or https: {}", s));
    }
    Ok(url)
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Load JWT secret from environment variable or file.
/// Returns None and logs an error if the secret cannot be loaded.
pub fn load_jwt_secret(jwt_secret_file: Option<&str>) -> Option<String> {
    let secret = if let Ok(secret) = std::env::var("JWT_SECRET") {
        // Clear the environment variable to prevent leaking
        // SAFETY: We're single-threaded at this point during startup,
        // and no other code is reading this environment variable.
        unsafe { std::env::remove_var("JWT_SECRET") };
        secret
    } else if let Some(path) = jwt_secret_file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read JWT secret file");
                return None;
            }
        }
    } else {
        error!(
            "JWT secret is required. Set JWT_SECRET environment variable (recommended) or use --jwt-secret-file"
        );
        return None;
    };

    if secret.len() < MIN_JWT_SECRET_LENGTH {
        error!(
            "JWT secret is shorter than {} characters. Use a longer secret",
            MIN_JWT_SECRET_LENGTH
        );
        return None;
    }

    Some(secret)
}

/// Pick the mail transport.
pub fn build_mailer(webhook: Option<Url>, from: &str) -> Arc<dyn Mailer> {
    match webhook {
        Some(url) => {
            info!(url = %url, "Sending email through webhook");
            Arc::new(WebhookMailer::new(url, from))
        }
        None => {
            warn!("No mail webhook configured, emails will only be logged");
            Arc::new(LogMailer)
        }
    }
}

/// Configure Google sign-in when both client credentials are present.
pub fn build_identity_provider(
    client_id: Option<String>,
    client_secret: Option<String>,
    redirect_url: Url,
) -> Option<Arc<dyn IdentityProvider>> {
    match (client_id, client_secret) {
        (Some(client_id), Some(client_secret)) => {
            info!(redirect = %redirect_url, "Google sign-in enabled");
            Some(Arc::new(GoogleProvider::new(GoogleConfig {
                client_id,
                client_secret,
                redirect_url,
            })))
        }
        (None, None) => {
            info!("Google sign-in disabled");
            None
        }
        _ => {
            warn!("Google sign-in needs both GOOGLE_CLIENT_ID and GOOGLE_CLIENT_SECRET, disabled");
            None
        }
    }
}

/// Build ServerConfig from validated arguments.
pub fn build_config(args: Args, db: Database, jwt_secret: String) -> ServerConfig {
    let mailer = build_mailer(args.mail_webhook, &args.mail_from);
    let identity_provider = build_identity_provider(
        args.google_client_id,
        args.google_client_secret,
        args.google_redirect_url,
    );

    ServerConfig {
        db,
        jwt_secret: jwt_secret.into_bytes(),
        access_token_ttl: args.access_token_ttl,
        refresh_token_ttl: args.refresh_token_ttl,
        client_url: args.client_url.as_str().trim_end_matches('/').to_string(),
        secure_cookies: args.production,
        rate_limit: (!args.no_rate_limit)
            .then(|| Arc::new(RateLimitConfig::new(args.trust_forwarded_for))),
        mailer,
        identity_provider,
    }
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}
