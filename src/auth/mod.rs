//! Bearer-token authentication with role-based access control.
//!
//! Access tokens are stateless and validated on every request. Roles travel
//! inside the token as `role` claims, so a role granted after login takes
//! effect at the next login.

mod bearer;
mod errors;
mod extractors;
mod state;
mod types;

pub use bearer::get_bearer_token;
pub use errors::{ApiAuthError, AuthErrorKind};
pub use extractors::{AdminOnly, AnyRole, Auth, RoleConstraint, UserOrAdmin};
pub use state::HasAuthBackend;
pub use types::AuthenticatedUser;
