//! Reading the expiry claim of an access token
//!
//! Only the payload is decoded; the signature is the backend's concern.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Deserialize;

#[derive(Deserialize)]
struct Claims {
    #[serde(default)]
    exp: Option<i64>,
}

/// Unix timestamp of the `exp` claim, if the token is a JWT that carries one
pub fn expires_at(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    serde_json::from_slice::<Claims>(&bytes).ok()?.exp
}

/// `Some(true)` when the token expired at or before `now`, `None` when unknown
pub fn is_expired_at(token: &str, now: i64) -> Option<bool> {
    expires_at(token).map(|exp| now >= exp)
}

pub fn is_expired(token: &str) -> Option<bool> {
    is_expired_at(token, chrono::Utc::now().timestamp())
}
