//! Axum extractors for authentication.

use std::convert::Infallible;

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};

use super::cookie::{ACCESS_COOKIE_NAME, RefreshCredentials, get_cookie};
use super::ip::extract_client_ip;
use super::state::HasAuthBackend;
use crate::api::ApiError;
use crate::db::{IdentitySnapshot, SessionMetadata};

/// Longest User-Agent kept as a session's device label.
const MAX_DEVICE_LENGTH: usize = 256;

/// Extractor for endpoints that require a valid access token.
/// Does not refresh: an expired access token is rejected with 401 and the
/// client is expected to call the refresh route.
pub struct Auth(pub IdentitySnapshot);

impl<S> FromRequestParts<S> for Auth
where
    S: HasAuthBackend + Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = get_cookie(&parts.headers, ACCESS_COOKIE_NAME);
        let identity = state.sessions().resolve_access(token).await?;
        Ok(Auth(identity))
    }
}

/// Device and address of the caller, recorded on their session.
pub struct ClientInfo(pub SessionMetadata);

impl<S> FromRequestParts<S> for ClientInfo
where
    S: HasAuthBackend + Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let device = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|ua| ua.chars().take(MAX_DEVICE_LENGTH).collect::<String>())
            .filter(|ua| !ua.is_empty());

        Ok(ClientInfo(SessionMetadata {
            device,
            ip_address: extract_client_ip(parts, state.ip_header()),
        }))
    }
}

/// The refresh and session-id cookies, whether or not they are present.
pub struct SessionCookies(pub RefreshCredentials);

impl<S> FromRequestParts<S> for SessionCookies
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(SessionCookies(RefreshCredentials::from_headers(&parts.headers)))
    }
}
