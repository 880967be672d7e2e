//! Authentication user types.

use crate::jwt::ClaimsPrincipal;

/// Authenticated caller, as described by a validated access token.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    /// Claims from the access token
    pub principal: ClaimsPrincipal,
}

impl AuthenticatedUser {
    /// Username from the `name` claim (empty if the token carries none).
    pub fn username(&self) -> &str {
        self.principal.name().unwrap_or_default()
    }
}
