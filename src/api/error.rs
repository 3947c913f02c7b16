//! Response envelope and error conversion for API endpoints.
//!
//! Every response, success or failure, has the shape
//! `{success, message, data?, error?}` with `success = status < 400`.

use axum::{
    Json,
    http::{StatusCode, header::SET_COOKIE},
    response::{AppendHeaders, IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

use crate::auth::AuthError;

#[derive(Serialize)]
struct Envelope<T: Serialize> {
    success: bool,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'static str>,
}

/// Successful API response with optional payload and cookies.
pub struct ApiResponse<T: Serialize> {
    status: StatusCode,
    message: String,
    data: Option<T>,
    cookies: Vec<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(status: StatusCode, message: impl Into<String>, data: T) -> Self {
        Self {
            status,
            message: message.into(),
            data: Some(data),
            cookies: Vec::new(),
        }
    }

    pub fn with_cookies(mut self, cookies: Vec<String>) -> Self {
        self.cookies.extend(cookies);
        self
    }
}

impl ApiResponse<()> {
    pub fn message(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            data: None,
            cookies: Vec::new(),
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let body = Envelope {
            success: self.status.as_u16() < 400,
            message: self.message,
            data: self.data,
            error: None,
        };
        let cookies: Vec<_> = self.cookies.into_iter().map(|c| (SET_COOKIE, c)).collect();
        (self.status, AppendHeaders(cookies), Json(body)).into_response()
    }
}

/// API error type with automatic response conversion.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    code: &'static str,
    cookies: Vec<String>,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::from(AuthError::BadRequest(msg.into()))
    }

    /// Attach Set-Cookie values, e.g. to clear a dead session's cookies.
    pub fn with_cookies(mut self, cookies: Vec<String>) -> Self {
        self.cookies.extend(cookies);
        self
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        if e.is_internal() {
            error!(error = %e, "Request failed");
        }
        Self {
            status: e.status_code(),
            message: e.public_message(),
            code: e.code(),
            cookies: Vec::new(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Envelope::<()> {
            success: false,
            message: self.message,
            data: None,
            error: Some(self.code),
        };
        let cookies: Vec<_> = self.cookies.into_iter().map(|c| (SET_COOKIE, c)).collect();
        (self.status, AppendHeaders(cookies), Json(body)).into_response()
    }
}
