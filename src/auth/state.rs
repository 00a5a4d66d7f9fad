//! Authentication state trait and macro.

use crate::db::Database;
use crate::jwt::TokenCodec;

/// Trait for state types that provide database and token codec access for authentication.
pub trait HasAuthBackend {
    fn codec(&self) -> &TokenCodec;
    fn db(&self) -> &Database;
}

/// Macro to implement `HasAuthBackend` for state structs with the standard fields.
///
/// The struct must have these fields:
/// - `codec: Arc<TokenCodec>`
/// - `db: Database`
///
/// # Example
/// ```ignore
/// use crate::impl_has_auth_backend;
///
/// #[derive(Clone)]
/// pub struct MyState {
///     pub db: Database,
///     pub codec: Arc<TokenCodec>,
///     // ... other fields
/// }
///
/// impl_has_auth_backend!(MyState);
/// ```
#[macro_export]
macro_rules! impl_has_auth_backend {
    ($state_type:ty) => {
        impl $crate::auth::HasAuthBackend for $state_type {
            fn codec(&self) -> &$crate::jwt::TokenCodec {
                &self.codec
            }
            fn db(&self) -> &$crate::db::Database {
                &self.db
            }
        }
    };
}
