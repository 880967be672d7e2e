//! Rate limiting for credential endpoints.
//!
//! Uses a token bucket algorithm with per-IP tracking to slow down password
//! guessing and account spam.

use axum::{
    Json,
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use serde_json::json;
use std::{net::SocketAddr, num::NonZeroU32, sync::Arc};

/// Per-IP rate limiter.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

const LOGIN_PER_SEC: NonZeroU32 = NonZeroU32::new(5).unwrap();
const LOGIN_BURST: NonZeroU32 = NonZeroU32::new(10).unwrap();
const REGISTER_PER_MIN: NonZeroU32 = NonZeroU32::new(10).unwrap();

/// Rate limiting configuration for authentication endpoints.
#[derive(Clone)]
pub struct RateLimitConfig {
    /// Per-IP limiter for login and token renewal
    pub login: Arc<IpLimiter>,
    /// Per-IP limiter for account registration
    pub register: Arc<IpLimiter>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitConfig {
    /// Default limits: login 5/s with a burst of 10, registration 10/min.
    pub fn new() -> Self {
        Self {
            login: Arc::new(RateLimiter::keyed(
                Quota::per_second(LOGIN_PER_SEC).allow_burst(LOGIN_BURST),
            )),
            register: Arc::new(RateLimiter::keyed(Quota::per_minute(REGISTER_PER_MIN))),
        }
    }

    /// Custom limits, both per second.
    pub fn with_limits(login_per_sec: NonZeroU32, register_per_sec: NonZeroU32) -> Self {
        Self {
            login: Arc::new(RateLimiter::keyed(Quota::per_second(login_per_sec))),
            register: Arc::new(RateLimiter::keyed(Quota::per_second(register_per_sec))),
        }
    }
}

/// Client IP from the connection, or "unknown" when the server was not
/// started with connect info (tests).
fn client_ip(request: &Request) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn too_many_requests(message: &'static str) -> Response {
    (StatusCode::TOO_MANY_REQUESTS, Json(json!({ "error": message }))).into_response()
}

/// Middleware for rate limiting login and token renewal.
pub async fn rate_limit_login(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    let ip = client_ip(&request);

    match config.login.check_key(&ip) {
        Ok(_) => next.run(request).await,
        Err(_) => {
            tracing::warn!(ip = %ip, "Login rate limit exceeded");
            too_many_requests("Too many authentication attempts. Please wait before trying again.")
        }
    }
}

/// Middleware for rate limiting account registration.
pub async fn rate_limit_register(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    let ip = client_ip(&request);

    match config.register.check_key(&ip) {
        Ok(_) => next.run(request).await,
        Err(_) => {
            tracing::warn!(ip = %ip, "Registration rate limit exceeded");
            too_many_requests("Too many requests. Please try again later.")
        }
    }
}
