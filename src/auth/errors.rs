//! Authentication error types.

use axum::http::StatusCode;

use crate::jwt::JwtError;
use crate::password::PasswordError;

/// Every way a session operation can fail. Each variant maps to one status
/// code and one stable machine-readable code.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("Session expired, please login again")]
    SessionExpired,
    #[error("{0}")]
    Forbidden(&'static str),
    #[error("{0}")]
    NotFound(&'static str),
    #[error("{0}")]
    Conflict(&'static str),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    TooManyRequests(&'static str),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("token error: {0}")]
    Token(#[from] JwtError),
    #[error(transparent)]
    Password(#[from] PasswordError),
    #[error("{0}")]
    Internal(String),
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::Unauthorized(_) | AuthError::SessionExpired => StatusCode::UNAUTHORIZED,
            AuthError::Forbidden(_) => StatusCode::FORBIDDEN,
            AuthError::NotFound(_) => StatusCode::NOT_FOUND,
            AuthError::Conflict(_) => StatusCode::CONFLICT,
            AuthError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AuthError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            AuthError::Database(_)
            | AuthError::Token(_)
            | AuthError::Password(_)
            | AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Unauthorized(_) => "unauthorized",
            AuthError::SessionExpired => "session_expired",
            AuthError::Forbidden(_) => "forbidden",
            AuthError::NotFound(_) => "not_found",
            AuthError::Conflict(_) => "conflict",
            AuthError::BadRequest(_) => "bad_request",
            AuthError::TooManyRequests(_) => "rate_limited",
            AuthError::Database(_)
            | AuthError::Token(_)
            | AuthError::Password(_)
            | AuthError::Internal(_) => "internal",
        }
    }

    /// Message safe to show the client. Internal details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            AuthError::Database(_) => "Database error".to_string(),
            AuthError::Token(_) | AuthError::Password(_) | AuthError::Internal(_) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }

    pub fn is_internal(&self) -> bool {
        self.status_code() == StatusCode::INTERNAL_SERVER_ERROR
    }
}
