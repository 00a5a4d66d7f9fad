//! HTTP client that keeps a session alive.
//!
//! Every authorized call carries the current access token. When the server
//! answers 401 with a refreshable kind the client rotates the refresh token
//! once, behind the context's refresh gate, and replays the call. Rotation
//! failure is terminal: the context is cleared and every waiter gets
//! [`ClientError::SessionExpired`].

mod context;

pub use context::{SessionContext, SessionState, StoredTokens};

use std::sync::Arc;

use reqwest::header::{AUTHORIZATION, COOKIE, SET_COOKIE};
use reqwest::{Method, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::api::UserProfile;
use crate::auth::REFRESH_COOKIE_NAME;
use crate::error::ErrorKind;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The session is gone and the user has to sign in again.
    #[error("Session expired")]
    SessionExpired,

    #[error("{message}")]
    Api {
        status: StatusCode,
        kind: ErrorKind,
        message: String,
    },

    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl ClientError {
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ClientError::Api { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    kind: ErrorKind,
    error: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionBody {
    access_token: String,
    user: UserProfile,
}

#[derive(Deserialize)]
struct ProfileBody {
    user: UserProfile,
}

#[derive(Clone)]
pub struct SessionClient {
    http: reqwest::Client,
    base_url: Url,
    context: Arc<SessionContext>,
}

impl SessionClient {
    /// `base_url` is the server origin; routes are resolved under `/api/auth`.
    pub fn new(base_url: Url, context: Arc<SessionContext>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            context,
        }
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.context
    }

    fn url(&self, path: &str) -> Result<Url, ClientError> {
        Ok(self.base_url.join(&format!("api/auth/{}", path.trim_start_matches('/')))?)
    }

    pub async fn register(&self, name: &str, email: &str, password: &str) -> Result<(), ClientError> {
        let response = self
            .http
            .post(self.url("register")?)
            .json(&json!({ "name": name, "email": email, "password": password }))
            .send()
            .await?;
        ensure_success(response).await.map(|_| ())
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<UserProfile, ClientError> {
        let response = self
            .http
            .post(self.url("login")?)
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        self.adopt_session(response).await
    }

    pub async fn verify_email(&self, token: &str) -> Result<UserProfile, ClientError> {
        let response = self
            .http
            .get(self.url(&format!("verify-email/{}", token))?)
            .send()
            .await?;
        self.adopt_session(response).await
    }

    pub async fn reset_password(&self, token: &str, password: &str) -> Result<UserProfile, ClientError> {
        let response = self
            .http
            .put(self.url(&format!("reset-password/{}", token))?)
            .json(&json!({ "password": password }))
            .send()
            .await?;
        self.adopt_session(response).await
    }

    /// Redeem the one-time code from the OAuth callback redirect.
    pub async fn exchange_oauth_code(&self, code: &str) -> Result<UserProfile, ClientError> {
        let response = self
            .http
            .post(self.url("oauth/exchange")?)
            .json(&json!({ "code": code }))
            .send()
            .await?;
        self.adopt_session(response).await
    }

    pub async fn me(&self) -> Result<UserProfile, ClientError> {
        let body: ProfileBody = self.request(Method::GET, "me", None).await?;
        Ok(body.user)
    }

    pub async fn update_password(&self, current: &str, new: &str) -> Result<UserProfile, ClientError> {
        let body = json!({ "currentPassword": current, "newPassword": new });
        let response = self
            .send_authorized(Method::PUT, "update-password", Some(&body))
            .await?;
        self.adopt_session(response).await
    }

    /// End the session on the server, then locally. An expired access token
    /// is refreshed first so the server can revoke the current chain. Local
    /// state is cleared even when the server call fails.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let result = self
            .send_authorized_with(Method::GET, "logout", None, true)
            .await;
        self.context.clear();
        result.map(|_| ())
    }

    /// Authorized JSON request with transparent refresh.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T, ClientError> {
        let response = self.send_authorized(method, path, body).await?;
        response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Force a rotation now, regardless of access token state.
    pub async fn refresh(&self) -> Result<(), ClientError> {
        let _gate = self.context.refresh_gate().await;
        let tokens = self.context.tokens().ok_or(ClientError::SessionExpired)?;
        self.rotate_or_logout(&tokens.refresh_token).await.map(|_| ())
    }

    async fn send_authorized(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Response, ClientError> {
        self.send_authorized_with(method, path, body, false).await
    }

    /// With `refresh_cookie`, the current refresh token rides along as a
    /// cookie on every attempt, so a replay carries the rotated one.
    async fn send_authorized_with(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        refresh_cookie: bool,
    ) -> Result<Response, ClientError> {
        let access = self.context.access_token().ok_or(ClientError::SessionExpired)?;
        let response = self
            .send_with(method.clone(), path, body, &access, refresh_cookie)
            .await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return ensure_success(response).await;
        }

        let error = api_error(response).await;
        if !matches!(error.kind(), Some(kind) if kind.is_refreshable()) {
            return Err(self.handle_unauthorized(error));
        }

        debug!(path, "Access token rejected, refreshing");
        let access = self.refresh_after(&access).await?;

        let retried = self
            .send_with(method, path, body, &access, refresh_cookie)
            .await?;
        if retried.status() == StatusCode::UNAUTHORIZED {
            let error = api_error(retried).await;
            return Err(self.handle_unauthorized(error));
        }
        ensure_success(retried).await
    }

    async fn send_with(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        access_token: &str,
        refresh_cookie: bool,
    ) -> Result<Response, ClientError> {
        let mut request = self
            .http
            .request(method, self.url(path)?)
            .header(AUTHORIZATION, format!("Bearer {}", access_token));
        if refresh_cookie {
            let tokens = self.context.tokens().ok_or(ClientError::SessionExpired)?;
            request = request.header(
                COOKIE,
                format!("{}={}", REFRESH_COOKIE_NAME, tokens.refresh_token),
            );
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    /// Token kinds that can never recover end the session.
    fn handle_unauthorized(&self, error: ClientError) -> ClientError {
        match error.kind() {
            Some(ErrorKind::TokenInvalid | ErrorKind::TokenRevoked) => {
                warn!(error = %error, "Session rejected by server, logging out");
                self.context.clear();
                ClientError::SessionExpired
            }
            _ => error,
        }
    }

    /// Get a usable access token after `failed` was rejected.
    ///
    /// Only the first caller through the gate rotates. Later callers find a
    /// different current token and reuse it, or find the session cleared.
    async fn refresh_after(&self, failed: &str) -> Result<String, ClientError> {
        let _gate = self.context.refresh_gate().await;

        let tokens = self.context.tokens().ok_or(ClientError::SessionExpired)?;
        if tokens.access_token != failed {
            return Ok(tokens.access_token);
        }

        self.rotate_or_logout(&tokens.refresh_token).await
    }

    /// Caller must hold the refresh gate.
    async fn rotate_or_logout(&self, refresh_token: &str) -> Result<String, ClientError> {
        match self.rotate(refresh_token).await {
            Ok((tokens, user)) => {
                let access = tokens.access_token.clone();
                self.context.record_rotation(tokens, user);
                debug!("Refresh token rotated");
                Ok(access)
            }
            Err(e) => {
                warn!(error = %e, "Refresh failed, logging out");
                self.context.clear();
                Err(ClientError::SessionExpired)
            }
        }
    }

    async fn rotate(&self, refresh_token: &str) -> Result<(StoredTokens, UserProfile), ClientError> {
        let response = self
            .http
            .post(self.url("refresh-token")?)
            .header(COOKIE, format!("{}={}", REFRESH_COOKIE_NAME, refresh_token))
            .send()
            .await?;
        read_session(ensure_success(response).await?).await
    }

    async fn adopt_session(&self, response: Response) -> Result<UserProfile, ClientError> {
        let (tokens, user) = read_session(ensure_success(response).await?).await?;
        self.context.establish(tokens, user.clone());
        Ok(user)
    }
}

async fn ensure_success(response: Response) -> Result<Response, ClientError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(api_error(response).await)
    }
}

async fn api_error(response: Response) -> ClientError {
    let status = response.status();
    match response.json::<ErrorBody>().await {
        Ok(body) => ClientError::Api {
            status,
            kind: body.kind,
            message: body.error,
        },
        Err(e) => ClientError::Decode(format!("{} with unreadable body: {}", status, e)),
    }
}

async fn read_session(response: Response) -> Result<(StoredTokens, UserProfile), ClientError> {
    let refresh_token = response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|v| cookie_value(v, REFRESH_COOKIE_NAME))
        .ok_or_else(|| ClientError::Decode("Session response without refresh cookie".into()))?;

    let body: SessionBody = response
        .json()
        .await
        .map_err(|e| ClientError::Decode(e.to_string()))?;

    Ok((
        StoredTokens {
            access_token: body.access_token,
            refresh_token,
        },
        body.user,
    ))
}

/// Value of a `Set-Cookie` header for `name`, if it sets a non-empty one.
fn cookie_value(header: &str, name: &str) -> Option<String> {
    let pair = header.split(';').next()?;
    let (key, value) = pair.split_once('=')?;
    (key.trim() == name && !value.is_empty()).then(|| value.trim().to_string())
}
