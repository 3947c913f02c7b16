//! Session lifecycle endpoints.
//!
//! - POST `/sign-up` - Create an identity
//! - POST `/sign-in` - Check credentials and issue cookies
//! - POST `/sign-out` - End the current session and clear cookies
//! - GET `/refresh` - Exchange the refresh cookie for a new access cookie

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use serde::Deserialize;

use super::error::{ApiError, ApiResponse};
use super::{AppState, json_error};
use crate::auth::{ACCESS_COOKIE_NAME, AuthError, ClientInfo, SessionCookies, get_cookie};
use crate::db::{IdentitySnapshot, Login};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/sign-out", post(sign_out))
        .route("/refresh", get(refresh))
        .with_state(state)
}

pub fn sign_in_router(state: AppState) -> Router {
    Router::new()
        .route("/sign-in", post(sign_in))
        .with_state(state)
}

pub fn sign_up_router(state: AppState) -> Router {
    Router::new()
        .route("/sign-up", post(sign_up))
        .with_state(state)
}

#[derive(Deserialize)]
struct SignUpRequest {
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct SignInRequest {
    email: Option<String>,
    username: Option<String>,
    password: String,
}

impl SignInRequest {
    fn login(&self) -> Option<Login> {
        let present = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_lowercase)
        };
        present(&self.email)
            .map(Login::Email)
            .or_else(|| present(&self.username).map(Login::Username))
    }
}

async fn sign_up(
    State(state): State<AppState>,
    payload: Result<Json<SignUpRequest>, JsonRejection>,
) -> Result<ApiResponse<IdentitySnapshot>, ApiError> {
    let Json(request) = payload.map_err(json_error)?;
    let identity = state
        .sessions
        .sign_up(&request.email, &request.password)
        .await?;
    Ok(ApiResponse::new(
        StatusCode::CREATED,
        "Signed up successfully!",
        identity,
    ))
}

/// Any failure clears the caller's cookies so a stale session cannot linger
/// next to a failed credential check.
async fn sign_in(
    State(state): State<AppState>,
    ClientInfo(metadata): ClientInfo,
    payload: Result<Json<SignInRequest>, JsonRejection>,
) -> Result<ApiResponse<IdentitySnapshot>, ApiError> {
    let clear = || state.sessions.cookies().clear_all();

    let Json(request) = payload.map_err(|e| json_error(e).with_cookies(clear()))?;
    let login = request.login().ok_or_else(|| {
        ApiError::from(AuthError::BadRequest("Email or Username required".to_string()))
            .with_cookies(clear())
    })?;

    let outcome = state
        .sessions
        .sign_in(&login, &request.password, &metadata)
        .await
        .map_err(|e| ApiError::from(e).with_cookies(clear()))?;

    let (status, message) = if outcome.setup_required {
        (StatusCode::ACCEPTED, "Please, complete your profile!")
    } else {
        (StatusCode::OK, "Signed in successfully!")
    };

    Ok(ApiResponse::new(status, message, outcome.identity).with_cookies(outcome.cookies))
}

async fn sign_out(
    State(state): State<AppState>,
    headers: HeaderMap,
    SessionCookies(credentials): SessionCookies,
) -> ApiResponse<()> {
    let access = get_cookie(&headers, ACCESS_COOKIE_NAME);
    let cookies = state.sessions.sign_out(&credentials, access).await;
    ApiResponse::<()>::message(StatusCode::OK, "Signed out successfully!").with_cookies(cookies)
}

async fn refresh(
    State(state): State<AppState>,
    SessionCookies(credentials): SessionCookies,
    ClientInfo(metadata): ClientInfo,
) -> Result<ApiResponse<IdentitySnapshot>, ApiError> {
    match state.sessions.refresh(&credentials, &metadata).await {
        Ok(outcome) => Ok(ApiResponse::new(
            StatusCode::OK,
            "Authentication refreshed!",
            outcome.identity,
        )
        .with_cookies(outcome.cookies)),
        Err(AuthError::SessionExpired) => Err(ApiError::from(AuthError::SessionExpired)
            .with_cookies(state.sessions.cookies().clear_all())),
        Err(e) => Err(e.into()),
    }
}
