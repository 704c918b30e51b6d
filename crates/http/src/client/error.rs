//! Client error types

use flowtest_core::CoreError;
use thiserror::Error;

/// Client error types
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network or request error
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Server returned an error status
    #[error("Server error {status}: {message}")]
    ServerError { status: u16, message: String },

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Bad request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Forbidden
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Path or origin could not be turned into a URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Session storage could not be read or written
    #[error("Session storage error: {0}")]
    Storage(#[from] CoreError),

    /// No access token was stored; the navigator was sent to the login page
    #[error("Not authenticated, redirected to login")]
    NotAuthenticated,

    /// The access token could not be refreshed; the session has ended
    #[error("Session expired: {0}")]
    SessionExpired(#[source] RefreshError),
}

impl ClientError {
    /// Create error from HTTP status code
    pub fn from_status(status: reqwest::StatusCode, message: String) -> Self {
        match status.as_u16() {
            400 => Self::BadRequest(message),
            401 => Self::AuthenticationFailed(message),
            403 => Self::Forbidden(message),
            404 => Self::NotFound(message),
            _ => Self::ServerError {
                status: status.as_u16(),
                message,
            },
        }
    }

    /// Whether the caller has to log in again before retrying
    pub const fn is_auth_expired(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed(_) | Self::NotAuthenticated | Self::SessionExpired(_)
        )
    }
}

/// Why a refresh attempt failed
///
/// Cloneable so that every caller waiting on a shared refresh receives the outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    #[error("no refresh token stored")]
    MissingRefreshToken,

    #[error("refresh rejected with status {status}")]
    Rejected { status: u16 },

    #[error("refresh request failed: {0}")]
    Transport(String),

    #[error("malformed refresh response: {0}")]
    MalformedResponse(String),

    #[error("refresh endpoint is invalid: {0}")]
    InvalidEndpoint(String),

    #[error("could not store refreshed token: {0}")]
    Storage(String),

    #[error("session ended while the refresh was in flight")]
    SessionEnded,
}
