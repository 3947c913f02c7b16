//! Cookie-based dual-token authentication.
//!
//! Short-lived access tokens are stateless. Long-lived refresh tokens are
//! bound to a stored session, rotated past half their lifetime and removed
//! once expired.

mod cookie;
mod errors;
mod extractors;
mod ip;
mod manager;
mod state;

pub use cookie::{
    ACCESS_COOKIE_NAME, CookieSettings, REFRESH_COOKIE_NAME, RefreshCredentials,
    SESSION_COOKIE_NAME, get_cookie,
};
pub use errors::AuthError;
pub use extractors::{Auth, ClientInfo, SessionCookies};
pub use ip::{ClientIpHeader, HasHeadersAndExtensions, extract_client_ip};
pub use manager::{
    PasswordOutcome, ProfileOutcome, RefreshOutcome, RefreshState, SessionManager, SessionSummary,
    SignInOutcome, classify,
};
pub use state::HasAuthBackend;
