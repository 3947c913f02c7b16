//! Rate limiting for credential endpoints.
//!
//! Uses a token bucket per client IP. Requests whose IP cannot be determined
//! share one bucket.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{Quota, RateLimiter, clock::DefaultClock, state::keyed::DefaultKeyedStateStore};
use std::{num::NonZeroU32, sync::Arc};
use tracing::warn;

use crate::api::ApiError;
use crate::auth::{AuthError, ClientIpHeader, extract_client_ip};

/// Per-IP rate limiter.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Bucket for requests without a resolvable client IP.
const UNKNOWN_CLIENT: &str = "unknown";

#[derive(Clone)]
pub struct RateLimitConfig {
    /// Per-IP limiter for sign-in attempts
    pub sign_in: Arc<IpLimiter>,
    /// Per-IP limiter for identity creation
    pub sign_up: Arc<IpLimiter>,
    pub ip_header: Option<ClientIpHeader>,
}

impl RateLimitConfig {
    pub fn new(
        sign_in_per_minute: u32,
        sign_up_per_minute: u32,
        ip_header: Option<ClientIpHeader>,
    ) -> Self {
        let per_minute = |n: u32| Quota::per_minute(NonZeroU32::new(n).unwrap_or(NonZeroU32::MIN));
        Self {
            sign_in: Arc::new(RateLimiter::keyed(per_minute(sign_in_per_minute))),
            sign_up: Arc::new(RateLimiter::keyed(per_minute(sign_up_per_minute))),
            ip_header,
        }
    }

    fn client_key(&self, request: &Request) -> String {
        extract_client_ip(request, self.ip_header).unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
    }
}

fn too_many_requests(message: &'static str) -> Response {
    ApiError::from(AuthError::TooManyRequests(message)).into_response()
}

/// Middleware for rate limiting sign-in.
pub async fn rate_limit_sign_in(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    let key = config.client_key(&request);
    match config.sign_in.check_key(&key) {
        Ok(_) => next.run(request).await,
        Err(_) => {
            warn!(client = %key, "Sign-in rate limit exceeded");
            too_many_requests("Too many sign-in attempts. Please wait before trying again.")
        }
    }
}

/// Middleware for rate limiting sign-up.
pub async fn rate_limit_sign_up(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    let key = config.client_key(&request);
    match config.sign_up.check_key(&key) {
        Ok(_) => next.run(request).await,
        Err(_) => {
            warn!(client = %key, "Sign-up rate limit exceeded");
            too_many_requests("Too many sign-up attempts. Please wait before trying again.")
        }
    }
}
