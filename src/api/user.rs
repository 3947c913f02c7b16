//! Endpoints for the signed-in identity.
//!
//! - GET `/me` - Current identity snapshot
//! - PATCH `/profile-setup` - Update profile fields, completing setup
//! - PATCH `/change-password` - Replace the password and reissue the access cookie
//! - GET `/sessions` - Active sessions of the caller

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    routing::{get, patch},
};
use serde::Deserialize;

use super::error::{ApiError, ApiResponse};
use super::{AppState, json_error};
use crate::auth::{Auth, ClientInfo, SessionCookies, SessionSummary};
use crate::db::{Gender, IdentitySnapshot, ProfileUpdate};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/me", get(me))
        .route("/profile-setup", patch(profile_setup))
        .route("/change-password", patch(change_password))
        .route("/sessions", get(list_sessions))
        .with_state(state)
}

const SETUP_PENDING: &str = "Please, complete your profile!";

#[derive(Deserialize)]
struct ProfileRequest {
    name: Option<String>,
    username: Option<String>,
    gender: Option<Gender>,
    bio: Option<String>,
}

#[derive(Deserialize)]
struct ChangePasswordRequest {
    old_password: String,
    new_password: String,
}

async fn me(Auth(identity): Auth) -> ApiResponse<IdentitySnapshot> {
    let message = if identity.setup {
        "User profile details!"
    } else {
        SETUP_PENDING
    };
    ApiResponse::new(StatusCode::OK, message, identity)
}

async fn profile_setup(
    State(state): State<AppState>,
    Auth(identity): Auth,
    ClientInfo(metadata): ClientInfo,
    SessionCookies(credentials): SessionCookies,
    payload: Result<Json<ProfileRequest>, JsonRejection>,
) -> Result<ApiResponse<IdentitySnapshot>, ApiError> {
    let Json(request) = payload.map_err(json_error)?;
    let update = ProfileUpdate {
        name: request.name,
        username: request.username,
        gender: request.gender,
        bio: request.bio,
    };
    let has_session = credentials.session_id.is_some() && credentials.refresh_token.is_some();

    let outcome = state
        .sessions
        .complete_profile(&identity.id, update, has_session, &metadata)
        .await?;

    let message = if outcome.identity.setup {
        "Profile updated successfully!"
    } else {
        SETUP_PENDING
    };
    Ok(ApiResponse::new(StatusCode::OK, message, outcome.identity).with_cookies(outcome.cookies))
}

async fn change_password(
    State(state): State<AppState>,
    Auth(identity): Auth,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<ApiResponse<IdentitySnapshot>, ApiError> {
    let Json(request) = payload.map_err(json_error)?;
    let outcome = state
        .sessions
        .change_password(&identity.id, &request.old_password, &request.new_password)
        .await?;
    Ok(ApiResponse::new(
        StatusCode::ACCEPTED,
        "Password changed successfully!",
        outcome.identity,
    )
    .with_cookies(outcome.cookies))
}

async fn list_sessions(
    State(state): State<AppState>,
    Auth(identity): Auth,
    SessionCookies(credentials): SessionCookies,
) -> Result<ApiResponse<Vec<SessionSummary>>, ApiError> {
    let sessions = state
        .sessions
        .list_sessions(&identity.id, credentials.session_id.as_deref())
        .await?;
    Ok(ApiResponse::new(StatusCode::OK, "Active sessions", sessions))
}
