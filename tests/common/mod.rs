#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
    response::Response,
};
use quilljot::{
    ServerConfig, create_app,
    db::Database,
    error::AuthError,
    jwt::TokenCodec,
    mailer::{EmailMessage, MailError, Mailer},
    oauth::{ExternalIdentity, IdentityProvider},
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;
use url::Url;

pub const JWT_SECRET: &[u8] = b"test-jwt-secret-that-is-long-enough";
pub const CLIENT_URL: &str = "http://client.test";
pub const ACCESS_TTL: u64 = 900;
pub const REFRESH_TTL: u64 = 7 * 24 * 60 * 60;

/// Authorization code the fake provider accepts.
pub const GOOD_CODE: &str = "good-code";

/// Identity provider that accepts `GOOD_CODE` and rejects everything else.
pub struct FakeProvider {
    pub identity: ExternalIdentity,
}

impl FakeProvider {
    pub fn new(email: &str) -> Self {
        Self {
            identity: ExternalIdentity {
                provider_id: "google-123".to_string(),
                email: email.to_string(),
                email_verified: true,
                name: "Gina".to_string(),
                avatar: Some("https://img.test/gina.png".to_string()),
            },
        }
    }
}

#[async_trait]
impl IdentityProvider for FakeProvider {
    fn authorize_url(&self, state: &str) -> Result<Url, AuthError> {
        Url::parse_with_params("https://provider.test/auth", &[("state", state)])
            .map_err(|e| AuthError::internal("authorize url", e))
    }

    async fn exchange(&self, code: &str) -> Result<ExternalIdentity, AuthError> {
        if code == GOOD_CODE {
            Ok(self.identity.clone())
        } else {
            Err(AuthError::OAuthFailed("code rejected".into()))
        }
    }
}

/// Keeps sent emails in memory, and can be told to fail.
#[derive(Default)]
pub struct MemoryMailer {
    sent: Mutex<Vec<EmailMessage>>,
    fail: AtomicBool,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<EmailMessage> {
        self.sent.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), MailError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(MailError::Transport("delivery disabled".into()));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

pub struct TestApp {
    pub app: Router,
    pub db: Database,
    pub mailer: Arc<MemoryMailer>,
    pub codec: TokenCodec,
}

pub fn test_config(db: Database, mailer: Arc<MemoryMailer>) -> ServerConfig {
    ServerConfig {
        db,
        jwt_secret: JWT_SECRET.to_vec(),
        access_token_ttl: ACCESS_TTL,
        refresh_token_ttl: REFRESH_TTL,
        client_url: CLIENT_URL.to_string(),
        secure_cookies: false,
        rate_limit: None,
        mailer,
        identity_provider: Some(Arc::new(FakeProvider::new("gina@x.com"))),
    }
}

pub async fn test_app() -> TestApp {
    let db = Database::open(":memory:")
        .await
        .expect("Failed to open test database");
    test_app_with_db(db)
}

pub fn test_app_with_db(db: Database) -> TestApp {
    build_test_app(db, FakeProvider::new("gina@x.com"))
}

/// Test app whose Google sign-in resolves to the given provider's identity.
pub async fn test_app_with_provider(provider: FakeProvider) -> TestApp {
    let db = Database::open(":memory:")
        .await
        .expect("Failed to open test database");
    build_test_app(db, provider)
}

fn build_test_app(db: Database, provider: FakeProvider) -> TestApp {
    let mailer = Arc::new(MemoryMailer::new());
    let mut config = test_config(db.clone(), mailer.clone());
    config.identity_provider = Some(Arc::new(provider));
    let app = create_app(&config);
    TestApp {
        app,
        db,
        mailer,
        codec: TokenCodec::new(JWT_SECRET, ACCESS_TTL),
    }
}

/// A session as a browser would hold it.
#[derive(Debug, Clone)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub body: Value,
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> Response {
        self.app
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request")
    }

    pub async fn post_json(&self, uri: &str, body: Value) -> Response {
        self.send(json_request(Method::POST, uri, body)).await
    }

    pub async fn register(&self, name: &str, email: &str, password: &str) -> Response {
        self.post_json(
            "/api/auth/register",
            serde_json::json!({ "name": name, "email": email, "password": password }),
        )
        .await
    }

    pub async fn login(&self, email: &str, password: &str) -> Response {
        self.post_json(
            "/api/auth/login",
            serde_json::json!({ "email": email, "password": password }),
        )
        .await
    }

    pub async fn verify_email(&self, token: &str) -> Response {
        self.send(get(&format!("/api/auth/verify-email/{}", token)))
            .await
    }

    /// Register and verify, returning the session the verification issued.
    pub async fn register_verified(&self, email: &str, password: &str) -> Session {
        let response = self.register("Ann", email, password).await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let token = self.last_email_token();
        let response = self.verify_email(&token).await;
        assert_eq!(response.status(), StatusCode::OK);
        session_from(response).await
    }

    /// Token from the link in the most recent email.
    pub fn last_email_token(&self) -> String {
        let email = self.mailer.last().expect("No email sent");
        email
            .link
            .rsplit('/')
            .next()
            .expect("Link has no token")
            .to_string()
    }

    pub async fn refresh(&self, refresh_token: &str) -> Response {
        self.send(
            Request::builder()
                .method(Method::POST)
                .uri("/api/auth/refresh-token")
                .header(header::COOKIE, format!("refreshToken={}", refresh_token))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn me(&self, access_token: &str) -> Response {
        self.send(with_bearer(get("/api/auth/me"), access_token))
            .await
    }

    pub async fn count_users(&self) -> i64 {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(self.db.pool())
            .await
            .unwrap();
        count
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn with_bearer(mut request: Request<Body>, access_token: &str) -> Request<Body> {
    request.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {}", access_token).parse().unwrap(),
    );
    request
}

pub fn with_cookie(mut request: Request<Body>, cookie: &str) -> Request<Body> {
    request
        .headers_mut()
        .append(header::COOKIE, cookie.parse().unwrap());
    request
}

pub async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn set_cookies(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

/// Value set for `name` by the response, `Some("")` when it is cleared.
pub fn cookie_value(response: &Response, name: &str) -> Option<String> {
    set_cookies(response).into_iter().find_map(|c| {
        let pair = c.split(';').next()?.to_string();
        let (key, value) = pair.split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

pub async fn session_from(response: Response) -> Session {
    let refresh_token = cookie_value(&response, "refreshToken").expect("No refresh cookie");
    let cookie_access = cookie_value(&response, "token").expect("No access cookie");
    let body = body_json(response).await;
    let access_token = body["accessToken"].as_str().unwrap().to_string();
    assert_eq!(access_token, cookie_access);
    Session {
        access_token,
        refresh_token,
        body,
    }
}

/// Assert an error response and return its body.
pub async fn assert_error(response: Response, status: StatusCode, kind: &str) -> Value {
    assert_eq!(response.status(), status);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["kind"], kind, "unexpected error body: {}", body);
    body
}
