pub mod api;
pub mod auth;
pub mod cli;
pub mod db;
pub mod jwt;
pub mod logging;
pub mod pagination;
pub mod password;
pub mod rate_limit;
pub mod request_log;
pub mod validation;

use api::create_api_router;
use axum::{
    Json, Router,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
};
use db::Database;
use jwt::JwtSettings;
use rate_limit::RateLimitConfig;
use serde_json::json;
use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// Token settings (`Jwt:*` keys)
    pub jwt: JwtSettings,
    /// Whether new user signups are disabled
    pub no_signup: bool,
    /// Limits for the credential endpoints
    pub rate_limit: RateLimitConfig,
}

/// Turn a handler panic into a JSON 500.
fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic"
    };
    tracing::error!(error = %detail, "Handler panicked");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Internal server error" })),
    )
        .into_response()
}

/// Create the application router with the given configuration.
pub fn create_app(config: &ServerConfig) -> Router {
    let jwt = Arc::new(config.jwt.clone());

    let api_router = create_api_router(
        config.db.clone(),
        jwt,
        config.no_signup,
        Arc::new(config.rate_limit.clone()),
    );

    Router::new()
        .nest("/api", api_router)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(middleware::from_fn(request_log::log_requests))
}

/// Run the server on the given listener. This function blocks until the server exits.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let app = create_app(&config);
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service).await
}
