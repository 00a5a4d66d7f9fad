//! Per-IP rate limits on credential endpoints.

mod common;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use common::*;
use quilljot::{create_app, db::Database, rate_limit::RateLimitConfig};
use std::sync::Arc;
use tower::ServiceExt;

async fn limited_app() -> Router {
    let db = Database::open(":memory:").await.unwrap();
    let mut config = test_config(db, Arc::new(MemoryMailer::new()));
    config.rate_limit = Some(Arc::new(RateLimitConfig::new(true)));
    create_app(&config)
}

fn from_ip(uri: &str, body: serde_json::Value, ip: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(ip) = ip {
        builder = builder.header("x-forwarded-for", ip);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn login_from(ip: &str) -> Request<Body> {
    from_ip(
        "/api/auth/login",
        serde_json::json!({ "email": "nobody@x.com", "password": "pw1234" }),
        Some(ip),
    )
}

#[tokio::test]
async fn test_login_burst_then_limited() {
    let app = limited_app().await;

    for _ in 0..5 {
        let response = app.clone().oneshot(login_from("10.0.0.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let response = app.clone().oneshot(login_from("10.0.0.1")).await.unwrap();
    assert_error(response, StatusCode::TOO_MANY_REQUESTS, "rate_limited").await;

    // Limits are per client
    let response = app.clone().oneshot(login_from("10.0.0.2")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_first_forwarded_entry_is_the_client() {
    let app = limited_app().await;

    for i in 0..5 {
        let proxy_chain = format!("10.0.0.9, 172.16.0.{}", i);
        app.clone().oneshot(login_from(&proxy_chain)).await.unwrap();
    }

    let response = app.clone().oneshot(login_from("10.0.0.9")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_forgot_password_limited() {
    let app = limited_app().await;
    let request = || {
        from_ip(
            "/api/auth/forgot-password",
            serde_json::json!({ "email": "nobody@x.com" }),
            Some("10.0.0.3"),
        )
    };

    for _ in 0..3 {
        let response = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
    let response = app.clone().oneshot(request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_missing_forwarded_header_is_rejected() {
    let app = limited_app().await;
    let request = from_ip(
        "/api/auth/login",
        serde_json::json!({ "email": "nobody@x.com", "password": "pw1234" }),
        None,
    );
    let response = app.oneshot(request).await.unwrap();
    assert_error(response, StatusCode::FORBIDDEN, "not_authorized").await;
}

#[tokio::test]
async fn test_unlimited_routes_ignore_ip() {
    let app = limited_app().await;
    let response = app.oneshot(get("/api/auth/me")).await.unwrap();
    assert_error(response, StatusCode::UNAUTHORIZED, "unauthenticated").await;
}
