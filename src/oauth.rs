//! Delegated sign-in through an external identity provider.
//!
//! The provider handshake yields a verified [`ExternalIdentity`]. The bridge
//! maps it onto a local user and hands the browser a short-lived, one-time
//! exchange code; the session itself is only issued when the code is
//! redeemed, so access tokens never travel in a URL.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};
use url::Url;

use crate::db::{Database, NewUser, User, generate_secret, hash_secret, now_secs};
use crate::error::AuthError;
use crate::session::{SessionIssuer, TokenPair};

/// Exchange codes are valid for one minute.
pub const EXCHANGE_CODE_TTL_SECS: i64 = 60;

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";

/// An identity vouched for by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
    /// Stable account ID at the provider
    pub provider_id: String,
    pub email: String,
    pub email_verified: bool,
    pub name: String,
    pub avatar: Option<String>,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Where to send the browser to start the handshake.
    fn authorize_url(&self, state: &str) -> Result<Url, AuthError>;

    /// Complete the handshake with the code the provider sent back.
    async fn exchange(&self, code: &str) -> Result<ExternalIdentity, AuthError>;
}

#[derive(Debug, Clone)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: Url,
}

/// Google OAuth 2.0 authorization-code flow with OpenID userinfo.
pub struct GoogleProvider {
    client: reqwest::Client,
    config: GoogleConfig,
    auth_url: String,
    token_url: String,
    userinfo_url: String,
}

#[derive(Deserialize)]
struct GoogleTokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct GoogleUserInfo {
    sub: String,
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
    name: Option<String>,
    picture: Option<String>,
}

impl GoogleProvider {
    pub fn new(config: GoogleConfig) -> Self {
        Self::with_endpoints(config, GOOGLE_AUTH_URL, GOOGLE_TOKEN_URL, GOOGLE_USERINFO_URL)
    }

    /// Point the provider at non-default endpoints.
    pub fn with_endpoints(
        config: GoogleConfig,
        auth_url: &str,
        token_url: &str,
        userinfo_url: &str,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            auth_url: auth_url.to_string(),
            token_url: token_url.to_string(),
            userinfo_url: userinfo_url.to_string(),
        }
    }
}

#[async_trait]
impl IdentityProvider for GoogleProvider {
    fn authorize_url(&self, state: &str) -> Result<Url, AuthError> {
        Url::parse_with_params(
            &self.auth_url,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_url.as_str()),
                ("response_type", "code"),
                ("scope", "openid email profile"),
                ("state", state),
            ],
        )
        .map_err(|e| AuthError::internal("Invalid authorization endpoint", e))
    }

    async fn exchange(&self, code: &str) -> Result<ExternalIdentity, AuthError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("redirect_uri", self.config.redirect_url.as_str()),
        ];

        let resp = self
            .client
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| AuthError::OAuthFailed(format!("Token exchange failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::OAuthFailed(format!(
                "Token exchange HTTP {status}: {body}"
            )));
        }

        let token: GoogleTokenResponse = resp
            .json()
            .await
            .map_err(|e| AuthError::OAuthFailed(format!("Token response parse error: {e}")))?;

        let resp = self
            .client
            .get(&self.userinfo_url)
            .bearer_auth(&token.access_token)
            .send()
            .await
            .map_err(|e| AuthError::OAuthFailed(format!("Userinfo request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(AuthError::OAuthFailed(format!(
                "Userinfo HTTP {}",
                resp.status()
            )));
        }

        let info: GoogleUserInfo = resp
            .json()
            .await
            .map_err(|e| AuthError::OAuthFailed(format!("Userinfo parse error: {e}")))?;

        let email = info
            .email
            .ok_or_else(|| AuthError::OAuthFailed("Google account has no email".into()))?;

        Ok(ExternalIdentity {
            name: info.name.unwrap_or_else(|| default_name(&email)),
            provider_id: info.sub,
            email,
            email_verified: info.email_verified,
            avatar: info.picture,
        })
    }
}

fn default_name(email: &str) -> String {
    email.split('@').next().unwrap_or(email).to_string()
}

/// Turns verified external identities into local users and sessions.
#[derive(Clone)]
pub struct OAuthBridge {
    db: Database,
    issuer: SessionIssuer,
}

impl OAuthBridge {
    pub fn new(db: Database, issuer: SessionIssuer) -> Self {
        Self { db, issuer }
    }

    /// Run the provider handshake and return a one-time exchange code for
    /// the resulting user. Nothing is written unless the handshake succeeds.
    pub async fn complete(
        &self,
        provider: &dyn IdentityProvider,
        code: &str,
    ) -> Result<String, AuthError> {
        let identity = provider.exchange(code).await?;
        let user = self.resolve_user(&identity).await?;
        self.create_exchange_code(&user).await
    }

    /// Find or provision the local user for an external identity.
    ///
    /// Lookup order: linked provider ID, then an account with the same
    /// email (which gets linked), then a new password-less account. Only a
    /// provider-verified email may claim an existing account.
    pub async fn resolve_user(&self, identity: &ExternalIdentity) -> Result<User, AuthError> {
        if identity.provider_id.is_empty() || identity.email.is_empty() {
            return Err(AuthError::OAuthFailed("Incomplete identity".into()));
        }

        let users = self.db.users();

        if let Some(user) = users.get_by_google_id(&identity.provider_id).await? {
            return Ok(user);
        }

        if let Some(existing) = users.get_by_email(&identity.email).await? {
            if existing.google_id.is_some() {
                warn!(user = %existing.uuid, "Email already linked to another Google account");
                return Err(AuthError::OAuthFailed(
                    "Account is linked to a different Google identity".into(),
                ));
            }
            if !identity.email_verified {
                warn!(user = %existing.uuid, "Refusing to link an unverified Google email");
                return Err(AuthError::OAuthFailed(
                    "Google has not verified this email".into(),
                ));
            }
            users
                .link_google_id(existing.id, &identity.provider_id, identity.email_verified)
                .await?;
            info!(user = %existing.uuid, "Linked Google account to existing user");
            return users
                .get_by_id(existing.id)
                .await?
                .ok_or_else(|| AuthError::OAuthFailed("User disappeared while linking".into()));
        }

        let uuid = uuid::Uuid::new_v4().to_string();
        let id = users
            .create(&NewUser {
                uuid: &uuid,
                name: &identity.name,
                email: &identity.email,
                password_hash: None,
                google_id: Some(&identity.provider_id),
                avatar: identity.avatar.as_deref(),
                email_verified: identity.email_verified,
            })
            .await?;
        info!(user = %uuid, "Provisioned user from Google sign-in");

        users
            .get_by_id(id)
            .await?
            .ok_or_else(|| AuthError::internal("OAuth provisioning", "created user not found"))
    }

    /// Mint a one-time exchange code for a user.
    pub async fn create_exchange_code(&self, user: &User) -> Result<String, AuthError> {
        let code = generate_secret(32);
        self.db
            .exchange_codes()
            .create(&hash_secret(&code), user.id, now_secs() + EXCHANGE_CODE_TTL_SECS)
            .await?;
        Ok(code)
    }

    /// Redeem an exchange code for a session, exactly as a local login would.
    pub async fn redeem(&self, code: &str) -> Result<(TokenPair, User), AuthError> {
        let invalid = || AuthError::OAuthFailed("Invalid or expired sign-in code".into());

        let user_id = self
            .db
            .exchange_codes()
            .redeem(&hash_secret(code), now_secs())
            .await?
            .ok_or_else(invalid)?;

        let user = self
            .db
            .users()
            .get_by_id(user_id)
            .await?
            .ok_or_else(invalid)?;

        let pair = self.issuer.issue(&user).await?;
        Ok((pair, user))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        Form, Json, Router,
        http::HeaderMap,
        routing::{get, post},
    };

    use super::*;
    use crate::jwt::TokenCodec;

    async fn setup() -> (OAuthBridge, Database) {
        let db = Database::open(":memory:").await.unwrap();
        let issuer = SessionIssuer::new(
            db.clone(),
            Arc::new(TokenCodec::new(b"test-secret", 900)),
            3600,
        );
        (OAuthBridge::new(db.clone(), issuer), db)
    }

    fn identity() -> ExternalIdentity {
        ExternalIdentity {
            provider_id: "g-123".into(),
            email: "ann@example.com".into(),
            email_verified: true,
            name: "Ann".into(),
            avatar: Some("https://example.com/ann.png".into()),
        }
    }

    #[tokio::test]
    async fn test_provisions_new_user_without_password() {
        let (bridge, _) = setup().await;
        let user = bridge.resolve_user(&identity()).await.unwrap();

        assert!(user.password_hash.is_none());
        assert_eq!(user.google_id.as_deref(), Some("g-123"));
        assert_eq!(user.avatar, "https://example.com/ann.png");
        assert!(user.email_verified);

        // Second sign-in finds the same user
        let again = bridge.resolve_user(&identity()).await.unwrap();
        assert_eq!(again.id, user.id);
    }

    #[tokio::test]
    async fn test_links_existing_email_account() {
        let (bridge, db) = setup().await;
        let id = db
            .users()
            .create(&NewUser {
                uuid: "local",
                name: "Ann",
                email: "ANN@example.com",
                password_hash: Some("hash"),
                google_id: None,
                avatar: None,
                email_verified: false,
            })
            .await
            .unwrap();

        let user = bridge.resolve_user(&identity()).await.unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.google_id.as_deref(), Some("g-123"));
        assert_eq!(user.password_hash.as_deref(), Some("hash"));
        assert!(user.email_verified);
    }

    #[tokio::test]
    async fn test_unverified_email_does_not_claim_account() {
        let (bridge, db) = setup().await;
        let id = db
            .users()
            .create(&NewUser {
                uuid: "local",
                name: "Ann",
                email: "ann@example.com",
                password_hash: Some("hash"),
                google_id: None,
                avatar: None,
                email_verified: true,
            })
            .await
            .unwrap();

        let unverified = ExternalIdentity {
            email_verified: false,
            ..identity()
        };
        let err = bridge.resolve_user(&unverified).await.unwrap_err();
        assert!(matches!(err, AuthError::OAuthFailed(_)));

        let user = db.users().get_by_id(id).await.unwrap().unwrap();
        assert!(user.google_id.is_none());
    }

    #[tokio::test]
    async fn test_unverified_email_provisions_unverified_user() {
        let (bridge, _) = setup().await;
        let unverified = ExternalIdentity {
            email_verified: false,
            ..identity()
        };
        let user = bridge.resolve_user(&unverified).await.unwrap();
        assert!(!user.email_verified);
    }

    #[tokio::test]
    async fn test_exchange_code_is_single_use() {
        let (bridge, _) = setup().await;
        let user = bridge.resolve_user(&identity()).await.unwrap();
        let code = bridge.create_exchange_code(&user).await.unwrap();

        let (pair, redeemed) = bridge.redeem(&code).await.unwrap();
        assert_eq!(redeemed.id, user.id);
        assert!(!pair.refresh_token.is_empty());

        let err = bridge.redeem(&code).await.unwrap_err();
        assert!(matches!(err, AuthError::OAuthFailed(_)));
    }

    struct FailingProvider;

    #[async_trait]
    impl IdentityProvider for FailingProvider {
        fn authorize_url(&self, _state: &str) -> Result<Url, AuthError> {
            Ok(Url::parse("https://provider.invalid/auth").unwrap())
        }

        async fn exchange(&self, _code: &str) -> Result<ExternalIdentity, AuthError> {
            Err(AuthError::OAuthFailed("denied".into()))
        }
    }

    #[tokio::test]
    async fn test_failed_handshake_creates_no_user() {
        let (bridge, db) = setup().await;

        let err = bridge.complete(&FailingProvider, "code").await.unwrap_err();
        assert!(matches!(err, AuthError::OAuthFailed(_)));

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    async fn fake_token(Form(form): Form<std::collections::HashMap<String, String>>) -> Json<serde_json::Value> {
        assert_eq!(form.get("grant_type").map(String::as_str), Some("authorization_code"));
        assert_eq!(form.get("code").map(String::as_str), Some("auth-code"));
        Json(serde_json::json!({ "access_token": "provider-token", "token_type": "Bearer" }))
    }

    async fn fake_userinfo(headers: HeaderMap) -> Json<serde_json::Value> {
        assert_eq!(
            headers.get("authorization").and_then(|v| v.to_str().ok()),
            Some("Bearer provider-token")
        );
        Json(serde_json::json!({
            "sub": "g-999",
            "email": "bob@example.com",
            "email_verified": true,
            "picture": "https://example.com/bob.png"
        }))
    }

    #[tokio::test]
    async fn test_google_provider_against_stub() {
        let app = Router::new()
            .route("/token", post(fake_token))
            .route("/userinfo", get(fake_userinfo));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        let config = GoogleConfig {
            client_id: "client".into(),
            client_secret: "secret".into(),
            redirect_url: Url::parse("http://localhost:5000/api/auth/google/callback").unwrap(),
        };
        let provider = GoogleProvider::with_endpoints(
            config,
            GOOGLE_AUTH_URL,
            &format!("http://{}/token", addr),
            &format!("http://{}/userinfo", addr),
        );

        let url = provider.authorize_url("xyz").unwrap();
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs.get("state").map(String::as_str), Some("xyz"));
        assert_eq!(pairs.get("client_id").map(String::as_str), Some("client"));

        let identity = provider.exchange("auth-code").await.unwrap();
        assert_eq!(identity.provider_id, "g-999");
        assert_eq!(identity.name, "bob");
        assert!(identity.email_verified);
    }
}
