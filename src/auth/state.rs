//! Authentication state trait and macro.

use crate::jwt::JwtSettings;

/// Trait for state types that provide the token settings needed to
/// authenticate bearer tokens.
pub trait HasAuthBackend {
    fn jwt(&self) -> &JwtSettings;
}

/// Macro to implement `HasAuthBackend` for state structs with a
/// `jwt: Arc<JwtSettings>` field.
///
/// # Example
/// ```ignore
/// use crate::impl_has_auth_backend;
///
/// #[derive(Clone)]
/// pub struct MyState {
///     pub db: Database,
///     pub jwt: Arc<JwtSettings>,
/// }
///
/// impl_has_auth_backend!(MyState);
/// ```
#[macro_export]
macro_rules! impl_has_auth_backend {
    ($state_type:ty) => {
        impl $crate::auth::HasAuthBackend for $state_type {
            fn jwt(&self) -> &$crate::jwt::JwtSettings {
                &self.jwt
            }
        }
    };
}
