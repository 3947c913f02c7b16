//! Cookie parsing and Set-Cookie construction for the three session cookies.

use axum::http::{HeaderMap, header};

/// Cookie name for the access token (short-lived).
pub const ACCESS_COOKIE_NAME: &str = "access";

/// Cookie name for the refresh token (long-lived, rotated).
pub const REFRESH_COOKIE_NAME: &str = "refresh";

/// Cookie name for the session id the refresh token is bound to.
pub const SESSION_COOKIE_NAME: &str = "current";

/// Extract a cookie value from the Cookie header.
pub fn get_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
    for part in cookie_header.split(';') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            if key.trim() == name {
                return Some(value.trim());
            }
        }
    }
    None
}

/// The refresh credential pair as presented by the client. Empty values count
/// as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshCredentials {
    pub refresh_token: Option<String>,
    pub session_id: Option<String>,
}

impl RefreshCredentials {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let read = |name| {
            get_cookie(headers, name)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        Self {
            refresh_token: read(REFRESH_COOKIE_NAME),
            session_id: read(SESSION_COOKIE_NAME),
        }
    }
}

/// Builds Set-Cookie header values with the deployment's cookie attributes.
#[derive(Debug, Clone, Copy)]
pub struct CookieSettings {
    pub secure: bool,
    pub access_ttl: u64,
    pub refresh_ttl: u64,
}

impl CookieSettings {
    fn build(&self, name: &str, value: &str, max_age: u64) -> String {
        let secure = if self.secure { "; Secure" } else { "" };
        format!(
            "{}={}; HttpOnly; SameSite=Strict; Path=/; Max-Age={}{}",
            name, value, max_age, secure
        )
    }

    pub fn access(&self, token: &str) -> String {
        self.build(ACCESS_COOKIE_NAME, token, self.access_ttl)
    }

    /// The browser keeps the refresh cookie past the token's own expiry so an
    /// expired token still reaches the server and its session gets cleaned up.
    pub fn refresh(&self, token: &str) -> String {
        self.build(REFRESH_COOKIE_NAME, token, self.refresh_ttl.saturating_mul(2))
    }

    pub fn session(&self, session_id: &str) -> String {
        self.build(SESSION_COOKIE_NAME, session_id, self.refresh_ttl.saturating_mul(2))
    }

    pub fn clear(&self, name: &str) -> String {
        self.build(name, "", 0)
    }

    pub fn clear_all(&self) -> Vec<String> {
        [ACCESS_COOKIE_NAME, REFRESH_COOKIE_NAME, SESSION_COOKIE_NAME]
            .into_iter()
            .map(|name| self.clear(name))
            .collect()
    }
}
