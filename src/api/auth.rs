//! Account and token endpoints: registration, login, token renewal and the
//! admin-only role management calls.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::post,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::error::{ApiError, FieldErrors, ResultExt};
use crate::auth::{AdminOnly, Auth};
use crate::db::{Database, User};
use crate::impl_has_auth_backend;
use crate::jwt::{self, Claim, JwtSettings, TokenError, claim_types};
use crate::password;
use crate::rate_limit::{RateLimitConfig, rate_limit_login, rate_limit_register};
use crate::validation;

const INVALID_TOKEN: &str = "Invalid token";

#[derive(Clone)]
pub struct AuthState {
    pub db: Database,
    pub jwt: Arc<JwtSettings>,
    pub no_signup: bool,
    pub rate_limit_config: Arc<RateLimitConfig>,
}

impl_has_auth_backend!(AuthState);

pub fn router(state: AuthState) -> Router {
    let login_router = Router::new()
        .route("/login", post(login))
        .route("/refresh-token", post(refresh_token))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            state.rate_limit_config.clone(),
            rate_limit_login,
        ));

    let admin_router = Router::new()
        .route("/revoke/{username}", post(revoke))
        .route("/create-role", post(create_role))
        .route("/add-user-to-role", post(add_user_to_role))
        .with_state(state.clone());

    let router = Router::new().merge(login_router).merge(admin_router);

    if state.no_signup {
        router
    } else {
        let register_router = Router::new()
            .route("/register", post(register))
            .with_state(state.clone())
            .layer(middleware::from_fn_with_state(
                state.rate_limit_config,
                rate_limit_register,
            ));
        router.merge(register_router)
    }
}

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

fn message(text: impl Into<String>) -> Json<MessageResponse> {
    Json(MessageResponse {
        message: text.into(),
    })
}

// =============================================================================
// Registration
// =============================================================================

#[derive(Deserialize)]
struct RegisterRequest {
    #[serde(default)]
    username: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

async fn register(
    State(state): State<AuthState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = payload.username.trim();
    let email = payload.email.trim();

    let mut errors = FieldErrors::new();
    errors.check("username", validation::validate_required(username));
    errors.check(
        "email",
        validation::validate_required(email).and_then(|_| validation::validate_email(email)),
    );
    errors.check("password", validation::validate_password(&payload.password));
    errors.into_result()?;

    let users = state.db.users();
    if users
        .get_by_username(username)
        .await
        .db_err("Failed to look up user")?
        .is_some()
    {
        return Err(ApiError::bad_request("User already exists"));
    }
    if users
        .get_by_email(email)
        .await
        .db_err("Failed to look up user")?
        .is_some()
    {
        return Err(ApiError::bad_request("E-mail is already registered"));
    }

    let hash = password::hash_password_blocking(payload.password)
        .await
        .internal_err("Failed to create user")?;

    users
        .create(username, email, &hash)
        .await
        .db_err("Failed to create user")?;

    info!(username, "User registered");
    Ok(message("User created successfully"))
}

// =============================================================================
// Login
// =============================================================================

#[derive(Deserialize)]
struct LoginRequest {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

#[derive(Serialize)]
struct LoginResponse {
    token: String,
    expiration: DateTime<Utc>,
    refresh_token: String,
}

/// Claims for a freshly authenticated user: name, email, a new jti and one
/// role claim per role.
fn login_claims(user: &User, roles: &[String]) -> Vec<Claim> {
    let mut claims = vec![
        Claim::new(claim_types::NAME, &user.username),
        Claim::new(claim_types::EMAIL, &user.email),
        Claim::new(claim_types::JTI, uuid::Uuid::new_v4().to_string()),
    ];
    claims.extend(roles.iter().map(|role| Claim::new(claim_types::ROLE, role)));
    claims
}

fn token_err(e: TokenError) -> ApiError {
    ApiError::internal_error("Failed to issue token", e)
}

async fn login(
    State(state): State<AuthState>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut errors = FieldErrors::new();
    errors.check("username", validation::validate_required(&payload.username));
    errors.check("password", validation::validate_required(&payload.password));
    errors.into_result()?;

    let user = state
        .db
        .users()
        .get_by_username(payload.username.trim())
        .await
        .db_err("Failed to look up user")?;

    let Some(user) = user else {
        warn!(username = payload.username.trim(), "Failed login attempt: unknown user");
        return Err(ApiError::unauthorized("Invalid username or password"));
    };

    let valid = password::verify_password_blocking(payload.password, user.password_hash.clone())
        .await
        .internal_err("Failed to verify password")?;
    if !valid {
        warn!(username = %user.username, "Failed login attempt: wrong password");
        return Err(ApiError::unauthorized("Invalid username or password"));
    }

    let roles = state
        .db
        .roles()
        .roles_for_user(user.id)
        .await
        .db_err("Failed to load roles")?;

    let access = jwt::generate_access_token(&login_claims(&user, &roles), &state.jwt)
        .map_err(token_err)?;
    let refresh = jwt::generate_refresh_token();
    let refresh_expiry = Utc::now() + state.jwt.refresh_token_validity();

    state
        .db
        .users()
        .set_refresh_token(user.id, &refresh, refresh_expiry)
        .await
        .db_err("Failed to store refresh token")?;

    info!(username = %user.username, "User logged in");
    Ok(Json(LoginResponse {
        token: access.token,
        expiration: access.expires_at,
        refresh_token: refresh,
    }))
}

// =============================================================================
// Token renewal
// =============================================================================

#[derive(Deserialize)]
struct RefreshRequest {
    access_token: Option<String>,
    refresh_token: Option<String>,
}

#[derive(Serialize)]
struct RefreshResponse {
    token: String,
    refresh_token: String,
}

/// Trade an expired (or live) access token plus the current refresh token for
/// a new pair. The presented refresh token stops working immediately.
async fn refresh_token(
    State(state): State<AuthState>,
    Json(payload): Json<RefreshRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (Some(access_token), Some(presented)) = (payload.access_token, payload.refresh_token)
    else {
        return Err(ApiError::bad_request(INVALID_TOKEN));
    };

    let principal = match jwt::get_principal_from_expired_token(&access_token, &state.jwt) {
        Ok(principal) => principal,
        Err(TokenError::InvalidToken(reason)) => {
            warn!("Token renewal rejected: {}", reason);
            return Err(ApiError::bad_request(INVALID_TOKEN));
        }
        Err(e) => return Err(token_err(e)),
    };

    let username = principal
        .name()
        .ok_or_else(|| ApiError::bad_request(INVALID_TOKEN))?;

    let now = Utc::now();
    let user = state
        .db
        .users()
        .get_by_username(username)
        .await
        .db_err("Failed to look up user")?
        .filter(|user| user.refresh_token_is_valid(&presented, now))
        .ok_or_else(|| {
            warn!(username, "Token renewal rejected: refresh token mismatch or expired");
            ApiError::bad_request(INVALID_TOKEN)
        })?;

    let claims: Vec<Claim> = principal
        .claims
        .iter()
        .map(|claim| match claim.kind.as_str() {
            claim_types::JTI => Claim::new(claim_types::JTI, uuid::Uuid::new_v4().to_string()),
            _ => claim.clone(),
        })
        .collect();

    let access = jwt::generate_access_token(&claims, &state.jwt).map_err(token_err)?;
    let refresh = jwt::generate_refresh_token();
    let refresh_expiry = now + state.jwt.refresh_token_validity();

    let rotated = state
        .db
        .users()
        .rotate_refresh_token(user.id, &presented, &refresh, refresh_expiry)
        .await
        .db_err("Failed to store refresh token")?;

    if !rotated {
        warn!(username, "Token renewal lost a race with another renewal or revocation");
        return Err(ApiError::bad_request(INVALID_TOKEN));
    }

    Ok(Json(RefreshResponse {
        token: access.token,
        refresh_token: refresh,
    }))
}

// =============================================================================
// Administration
// =============================================================================

async fn revoke(
    State(state): State<AuthState>,
    Auth(admin, _): Auth<AdminOnly>,
    Path(username): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .db
        .users()
        .get_by_username(&username)
        .await
        .db_err("Failed to look up user")?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    state
        .db
        .users()
        .revoke_refresh_token(user.id)
        .await
        .db_err("Failed to revoke refresh token")?;

    info!(admin = admin.username(), username = %user.username, "Refresh token revoked");
    Ok(message("Refresh token revoked"))
}

#[derive(Deserialize)]
struct CreateRoleQuery {
    role_name: Option<String>,
}

async fn create_role(
    State(state): State<AuthState>,
    Auth(admin, _): Auth<AdminOnly>,
    Query(query): Query<CreateRoleQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let role_name = query.role_name.as_deref().unwrap_or_default().trim();
    if role_name.is_empty() {
        return Err(ApiError::bad_request("Role name cannot be empty"));
    }

    let roles = state.db.roles();
    if roles.exists(role_name).await.db_err("Failed to look up role")? {
        return Err(ApiError::bad_request(format!(
            "Role {} already exists",
            role_name
        )));
    }

    roles.create(role_name).await.db_err("Failed to create role")?;

    info!(admin = admin.username(), role = role_name, "Role created");
    Ok((
        StatusCode::CREATED,
        message(format!("Role {} created", role_name)),
    ))
}

#[derive(Deserialize)]
struct AddUserToRoleQuery {
    email: Option<String>,
    role_name: Option<String>,
}

async fn add_user_to_role(
    State(state): State<AuthState>,
    Auth(admin, _): Auth<AdminOnly>,
    Query(query): Query<AddUserToRoleQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let email = query.email.as_deref().unwrap_or_default().trim();
    let role_name = query.role_name.as_deref().unwrap_or_default().trim();

    let user = state
        .db
        .users()
        .get_by_email(email)
        .await
        .db_err("Failed to look up user")?
        .ok_or_else(|| ApiError::bad_request(format!("User {} not found", email)))?;

    let role = state
        .db
        .roles()
        .get_by_name(role_name)
        .await
        .db_err("Failed to look up role")?
        .ok_or_else(|| ApiError::bad_request(format!("Role {} not found", role_name)))?;

    let added = state
        .db
        .roles()
        .add_user_to_role(user.id, role.id)
        .await
        .db_err("Failed to add user to role")?;

    if !added {
        return Err(ApiError::conflict(format!(
            "User {} already has role {}",
            email, role.name
        )));
    }

    info!(admin = admin.username(), email, role = %role.name, "User added to role");
    Ok(message(format!("User {} added to role {}", email, role.name)))
}
