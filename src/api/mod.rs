mod auth;
mod cadastro;
mod error;

use axum::Router;
use std::sync::Arc;

use crate::db::Database;
use crate::jwt::JwtSettings;
use crate::rate_limit::RateLimitConfig;

pub use auth::AuthState;
pub use cadastro::{CadastroCreateDto, CadastroPatchDto, CadastroReadDto, CadastroState};
pub use error::{ApiError, FieldErrors, ResultExt};

/// Create the API router.
pub fn create_api_router(
    db: Database,
    jwt: Arc<JwtSettings>,
    no_signup: bool,
    rate_limit_config: Arc<RateLimitConfig>,
) -> Router {
    let auth_state = auth::AuthState {
        db: db.clone(),
        jwt: jwt.clone(),
        no_signup,
        rate_limit_config,
    };

    let cadastro_state = cadastro::CadastroState { db, jwt };

    Router::new()
        .nest("/auth", auth::router(auth_state))
        .nest("/cadastro", cadastro::router(cadastro_state))
}
