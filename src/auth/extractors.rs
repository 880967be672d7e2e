//! Axum extractors for bearer authentication.

use std::marker::PhantomData;

use axum::{extract::FromRequestParts, http::request::Parts};

use super::bearer::get_bearer_token;
use super::errors::{ApiAuthError, AuthErrorKind};
use super::state::HasAuthBackend;
use super::types::AuthenticatedUser;
use crate::db::{ADMIN_ROLE, USER_ROLE};
use crate::jwt::{self, ClaimsPrincipal, TokenError};

/// Role requirement checked after the token itself is valid.
pub trait RoleConstraint {
    fn allows(principal: &ClaimsPrincipal) -> bool;
}

/// Any authenticated caller.
pub struct AnyRole;

/// Callers holding the `User` or `Admin` role.
pub struct UserOrAdmin;

/// Callers holding the `Admin` role.
pub struct AdminOnly;

impl RoleConstraint for AnyRole {
    fn allows(_: &ClaimsPrincipal) -> bool {
        true
    }
}

impl RoleConstraint for UserOrAdmin {
    fn allows(principal: &ClaimsPrincipal) -> bool {
        principal.is_in_role(USER_ROLE) || principal.is_in_role(ADMIN_ROLE)
    }
}

impl RoleConstraint for AdminOnly {
    fn allows(principal: &ClaimsPrincipal) -> bool {
        principal.is_in_role(ADMIN_ROLE)
    }
}

fn authenticate_request<S>(parts: &Parts, state: &S) -> Result<AuthenticatedUser, AuthErrorKind>
where
    S: HasAuthBackend,
{
    let token = get_bearer_token(&parts.headers).ok_or(AuthErrorKind::NotAuthenticated)?;

    match jwt::validate_access_token(token, state.jwt()) {
        Ok(principal) => Ok(AuthenticatedUser { principal }),
        Err(TokenError::Configuration(reason)) => {
            tracing::error!("Cannot validate access token: {}", reason);
            Err(AuthErrorKind::Configuration)
        }
        Err(e) => {
            tracing::debug!("Rejected access token: {}", e);
            Err(AuthErrorKind::InvalidToken)
        }
    }
}

/// Extractor for endpoints that require a valid access token and a role.
pub struct Auth<R: RoleConstraint = AnyRole>(pub AuthenticatedUser, pub PhantomData<R>);

impl<R: RoleConstraint> Auth<R> {
    pub fn user(&self) -> &AuthenticatedUser {
        &self.0
    }
}

impl<S, R> FromRequestParts<S> for Auth<R>
where
    S: HasAuthBackend + Send + Sync,
    R: RoleConstraint,
{
    type Rejection = ApiAuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = authenticate_request(parts, state).map_err(ApiAuthError::new)?;

        if !R::allows(&user.principal) {
            tracing::info!(
                user = user.username(),
                path = parts.uri.path(),
                "Access denied: missing role"
            );
            return Err(ApiAuthError::new(AuthErrorKind::InsufficientRole));
        }

        Ok(Auth(user, PhantomData))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwt::{Claim, JwtSettings, claim_types};
    use axum::http::{Request, header};
    use std::sync::Arc;

    #[derive(Clone)]
    struct TestState {
        jwt: Arc<JwtSettings>,
    }

    crate::impl_has_auth_backend!(TestState);

    fn state() -> TestState {
        TestState {
            jwt: Arc::new(JwtSettings::new("extractor-test-secret-0123456789abcdef")),
        }
    }

    fn parts_with(token: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/api/cadastro");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(()).unwrap().into_parts().0
    }

    fn token_with_roles(state: &TestState, roles: &[&str]) -> String {
        let mut claims = vec![Claim::new(claim_types::NAME, "alice")];
        claims.extend(roles.iter().map(|r| Claim::new(claim_types::ROLE, *r)));
        jwt::generate_access_token(&claims, &state.jwt).unwrap().token
    }

    #[tokio::test]
    async fn test_missing_token() {
        let state = state();
        let err = Auth::<AnyRole>::from_request_parts(&mut parts_with(None), &state)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), AuthErrorKind::NotAuthenticated);
    }

    #[tokio::test]
    async fn test_expired_token() {
        let state = state();
        let expired = JwtSettings::new("extractor-test-secret-0123456789abcdef")
            .with_token_validity("-1");
        let token = jwt::generate_access_token(&[Claim::new(claim_types::NAME, "alice")], &expired)
            .unwrap();

        let err = Auth::<AnyRole>::from_request_parts(&mut parts_with(Some(&token.token)), &state)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), AuthErrorKind::InvalidToken);
    }

    #[tokio::test]
    async fn test_role_constraints() {
        let state = state();
        let plain = token_with_roles(&state, &[]);
        let user = token_with_roles(&state, &["User"]);
        let admin = token_with_roles(&state, &["Admin"]);

        let mut parts = parts_with(Some(&plain));
        assert!(Auth::<AnyRole>::from_request_parts(&mut parts, &state).await.is_ok());
        let err = Auth::<UserOrAdmin>::from_request_parts(&mut parts, &state)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), AuthErrorKind::InsufficientRole);

        let mut parts = parts_with(Some(&user));
        assert!(Auth::<UserOrAdmin>::from_request_parts(&mut parts, &state).await.is_ok());
        assert!(Auth::<AdminOnly>::from_request_parts(&mut parts, &state).await.is_err());

        let mut parts = parts_with(Some(&admin));
        let auth = Auth::<AdminOnly>::from_request_parts(&mut parts, &state).await.unwrap();
        assert_eq!(auth.user().username(), "alice");
        assert!(Auth::<UserOrAdmin>::from_request_parts(&mut parts, &state).await.is_ok());
    }
}
