//! Wire types for the token endpoints

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Obtain a token pair
pub const TOKEN_OBTAIN_PATH: &str = "api/token/";
/// Exchange a refresh token for a new access token
pub const TOKEN_REFRESH_PATH: &str = "api/token/refresh/";
/// Check whether a token is still accepted
pub const TOKEN_VERIFY_PATH: &str = "api/token/verify/";
/// Profile of the authenticated user
pub const CURRENT_USER_PATH: &str = "api/users/get_current_user/";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenObtainRequest {
    pub username: String,
    pub password: String,
}

/// Response of the obtain endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
    #[serde(default)]
    pub user: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRefreshRequest {
    pub refresh: String,
}

/// Response of the refresh endpoint
///
/// `refresh` is only present when the backend rotates refresh tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRefreshResponse {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
    #[serde(default)]
    pub user: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenVerifyRequest {
    pub token: String,
}

/// Error body returned by the backend on rejected credentials
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendError {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

impl BackendError {
    /// Best human-readable message, falling back to the raw body
    pub fn message(body: &str) -> String {
        serde_json::from_str::<Self>(body)
            .ok()
            .and_then(|parsed| parsed.error.or(parsed.detail))
            .unwrap_or_else(|| body.to_string())
    }
}
