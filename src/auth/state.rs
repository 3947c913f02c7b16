//! Authentication state traits and macro.

use super::ip::ClientIpHeader;
use super::manager::SessionManager;

/// Trait for state types that can authenticate requests.
pub trait HasAuthBackend {
    fn sessions(&self) -> &SessionManager;
    fn ip_header(&self) -> Option<ClientIpHeader>;
}

/// Macro to implement `HasAuthBackend` for state structs with the standard fields.
///
/// The struct must have these fields:
/// - `sessions: SessionManager`
/// - `ip_header: Option<ClientIpHeader>`
///
/// # Example
/// ```ignore
/// #[derive(Clone)]
/// pub struct MyState {
///     pub sessions: SessionManager,
///     pub ip_header: Option<ClientIpHeader>,
/// }
///
/// impl_has_auth_backend!(MyState);
/// ```
#[macro_export]
macro_rules! impl_has_auth_backend {
    ($state_type:ty) => {
        impl $crate::auth::HasAuthBackend for $state_type {
            fn sessions(&self) -> &$crate::auth::SessionManager {
                &self.sessions
            }
            fn ip_header(&self) -> Option<$crate::auth::ClientIpHeader> {
                self.ip_header
            }
        }
    };
}
