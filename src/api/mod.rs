mod auth;
mod error;
mod user;

use axum::{Router, extract::rejection::JsonRejection, middleware};
use std::sync::Arc;

use crate::auth::{ClientIpHeader, SessionManager};
use crate::impl_has_auth_backend;
use crate::rate_limit::RateLimitConfig;

pub use error::{ApiError, ApiResponse};

/// State shared by every API route.
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionManager,
    pub ip_header: Option<ClientIpHeader>,
}

impl_has_auth_backend!(AppState);

/// Create the API router.
pub fn create_api_router(state: AppState, rate_limits: Arc<RateLimitConfig>) -> Router {
    let auth_routes = auth::router(state.clone())
        .merge(auth::sign_in_router(state.clone()).layer(
            middleware::from_fn_with_state(rate_limits.clone(), crate::rate_limit::rate_limit_sign_in),
        ))
        .merge(auth::sign_up_router(state.clone()).layer(
            middleware::from_fn_with_state(rate_limits, crate::rate_limit::rate_limit_sign_up),
        ));

    Router::new()
        .nest("/auth", auth_routes)
        .nest("/user", user::router(state))
}

/// Turn a malformed JSON body into the standard error envelope.
fn json_error(rejection: JsonRejection) -> ApiError {
    ApiError::bad_request(rejection.body_text())
}
