//! Rate limiting for credential endpoints.
//!
//! Uses a token bucket algorithm with per-IP tracking to slow down credential
//! stuffing, signup spam and reset-email flooding.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::{num::NonZeroU32, sync::Arc};
use tracing::{debug, warn};

use crate::auth::extract_client_ip;
use crate::error::AuthError;

/// Per-IP rate limiter.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

const LOGIN_PER_SEC: NonZeroU32 = NonZeroU32::new(1).unwrap();
const LOGIN_BURST: NonZeroU32 = NonZeroU32::new(5).unwrap();
const REGISTER_PER_MIN: NonZeroU32 = NonZeroU32::new(3).unwrap();
const FORGOT_PASSWORD_PER_MIN: NonZeroU32 = NonZeroU32::new(3).unwrap();

/// Rate limiting configuration for credential endpoints.
#[derive(Clone)]
pub struct RateLimitConfig {
    /// Login: burst of 5, then 1 per second
    pub login: Arc<IpLimiter>,
    /// Registration: 3 per minute
    pub register: Arc<IpLimiter>,
    /// Password reset emails: 3 per minute
    pub forgot_password: Arc<IpLimiter>,
    /// Key on `X-Forwarded-For` instead of the peer address
    pub trust_forwarded_for: bool,
}

impl RateLimitConfig {
    pub fn new(trust_forwarded_for: bool) -> Self {
        Self {
            login: Arc::new(RateLimiter::keyed(
                Quota::per_second(LOGIN_PER_SEC).allow_burst(LOGIN_BURST),
            )),
            register: Arc::new(RateLimiter::keyed(Quota::per_minute(REGISTER_PER_MIN))),
            forgot_password: Arc::new(RateLimiter::keyed(Quota::per_minute(
                FORGOT_PASSWORD_PER_MIN,
            ))),
            trust_forwarded_for,
        }
    }

    /// Forget clients whose buckets have refilled, so the per-IP maps do not
    /// grow without bound. Returns how many clients are still tracked.
    pub fn prune(&self) -> usize {
        let limiters = [&self.login, &self.register, &self.forgot_password];
        let mut tracked = 0;
        for limiter in limiters {
            limiter.retain_recent();
            limiter.shrink_to_fit();
            tracked += limiter.len();
        }
        debug!(tracked, "Pruned rate limiter state");
        tracked
    }
}

async fn check(
    limiter: &IpLimiter,
    trust_forwarded_for: bool,
    request: Request,
    next: Next,
) -> Response {
    let ip = match extract_client_ip(&request, trust_forwarded_for) {
        Ok(ip) => ip,
        Err(reason) => {
            warn!(reason, "Rejecting request without a client IP");
            return AuthError::NotAuthorized("Unable to determine client IP.".into())
                .into_response();
        }
    };

    match limiter.check_key(&ip) {
        Ok(_) => next.run(request).await,
        Err(_) => {
            warn!(ip = %ip, path = %request.uri().path(), "Rate limit exceeded");
            AuthError::RateLimited.into_response()
        }
    }
}

/// Middleware for rate limiting login.
pub async fn rate_limit_login(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    check(&config.login, config.trust_forwarded_for, request, next).await
}

/// Middleware for rate limiting registration.
pub async fn rate_limit_register(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    check(&config.register, config.trust_forwarded_for, request, next).await
}

/// Middleware for rate limiting password reset requests.
pub async fn rate_limit_forgot_password(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    check(&config.forgot_password, config.trust_forwarded_for, request, next).await
}
