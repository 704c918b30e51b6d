//! Authentication API client methods

use super::{ClientError, FlowTestClient};
use crate::types::{
    BackendError, CURRENT_USER_PATH, TOKEN_OBTAIN_PATH, TOKEN_VERIFY_PATH, TokenObtainRequest,
    TokenPair, TokenVerifyRequest,
};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{info, warn};

impl FlowTestClient {
    /// Obtain a token pair and start an authenticated session
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::AuthenticationFailed`] with the backend's
    /// message when the credentials are rejected.
    pub async fn login(&self, username: &str, password: &str) -> Result<TokenPair, ClientError> {
        let url = self.inner.resolver.endpoint(TOKEN_OBTAIN_PATH)?;
        let response = self
            .inner
            .http
            .post(url)
            .json(&TokenObtainRequest {
                username: username.to_string(),
                password: password.to_string(),
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = if body.is_empty() {
                "Login failed".to_string()
            } else {
                BackendError::message(&body)
            };
            warn!(status = status.as_u16(), "Login rejected");
            return Err(match status {
                StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => {
                    ClientError::AuthenticationFailed(message)
                }
                _ => ClientError::from_status(status, message),
            });
        }

        let pair: TokenPair = response.json().await?;
        let session = self.session();
        session.store_tokens(&pair.access, &pair.refresh)?;
        if let Some(user) = pair.user.clone() {
            self.cache_user(user)?;
        }
        session.apply_pre_login_preferences()?;

        if self.inner.navigator.is_login_page() {
            self.inner.navigator.redirect_to_home();
        }
        info!(username, "Logged in");
        Ok(pair)
    }

    /// Ask the backend whether `token` is still valid
    ///
    /// # Errors
    ///
    /// Returns network errors and statuses other than 2xx, 400 and 401
    pub async fn verify(&self, token: &str) -> Result<bool, ClientError> {
        let url = self.inner.resolver.endpoint(TOKEN_VERIFY_PATH)?;
        let response = self
            .inner
            .http
            .post(url)
            .json(&TokenVerifyRequest {
                token: token.to_string(),
            })
            .send()
            .await?;

        let status = response.status();
        match status {
            s if s.is_success() => Ok(true),
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => Ok(false),
            _ => {
                let message = response.text().await.unwrap_or_else(|_| status.to_string());
                Err(ClientError::from_status(status, message))
            }
        }
    }

    /// Fetch the authenticated user's profile and cache it under `currentUser`
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute)
    pub async fn current_user(&self) -> Result<Value, ClientError> {
        let user: Value = self.get_json(CURRENT_USER_PATH).await?;
        self.session().store_current_user(&user)?;
        Ok(user)
    }

    /// End the session: stop the background refresh, clear tokens and
    /// cached profiles, and go to the login page
    ///
    /// # Errors
    ///
    /// Returns an error if the session storage cannot be written
    pub fn logout(&self) -> Result<(), ClientError> {
        self.stop_background_refresh();
        self.session().clear()?;
        if !self.inner.navigator.is_login_page() {
            self.inner.navigator.redirect_to_login();
        }
        info!("Logged out");
        Ok(())
    }
}
