//! Single-flight access token refresh

use super::error::RefreshError;
use super::session::Session;
use super::{FlowTestClient, lock, with_absolute_avatar};
use crate::types::{TOKEN_REFRESH_PATH, TokenRefreshRequest, TokenRefreshResponse};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use reqwest::Client;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// Refresh shared by every caller that asks while it is running
pub(crate) type InflightRefresh = Shared<BoxFuture<'static, Result<String, RefreshError>>>;

impl FlowTestClient {
    /// Exchange the stored refresh token for a new access token
    ///
    /// Concurrent callers share one request to the backend. A failed refresh
    /// ends the session: tokens are cleared, the background timer is stopped
    /// and the navigator is sent to the login page, once, whatever the number
    /// of waiting callers. A refresh that completes after the session ended
    /// (logout or a new login) stores nothing.
    ///
    /// # Errors
    ///
    /// Returns the reason the refresh failed; the session is already ended.
    pub async fn refresh_access_token(&self) -> Result<String, RefreshError> {
        let inflight = {
            let mut slot = lock(&self.inner.refresh);
            if let Some(inflight) = slot.as_ref() {
                debug!("Joining in-flight token refresh");
                inflight.clone()
            } else {
                let exchange = TokenExchange::prepare(self);
                // The future lives in `inner.refresh`, so it only holds a weak handle
                let client = Arc::downgrade(&self.inner);
                let refresh = async move {
                    let outcome = match exchange {
                        Ok(exchange) => exchange.run().await,
                        Err(err) => Err(err),
                    };
                    if let Some(inner) = client.upgrade() {
                        let client = FlowTestClient { inner };
                        lock(&client.inner.refresh).take();
                        match &outcome {
                            Err(RefreshError::SessionEnded) => {
                                debug!("Session ended during refresh, result discarded");
                            }
                            Err(err) => client.expire_session(err),
                            Ok(_) => {}
                        }
                    }
                    outcome
                }
                .boxed()
                .shared();
                *slot = Some(refresh.clone());
                refresh
            }
        };

        inflight.await
    }

    /// Token to retry with after `stale` was rejected
    ///
    /// When another caller already replaced `stale`, the stored token is
    /// reused instead of refreshing again.
    pub(crate) async fn token_after_rejection(&self, stale: &str) -> Result<String, RefreshError> {
        if let Some(current) = self.session().access_token() {
            if current != stale {
                debug!("Access token was refreshed concurrently, reusing it");
                return Ok(current);
            }
        }
        self.refresh_access_token().await
    }

    /// End the session after a failed refresh
    fn expire_session(&self, reason: &RefreshError) {
        warn!(reason = %reason, "Token refresh failed, ending session");
        let session = self.session();
        if let Err(err) = session.save_pre_login_preferences() {
            warn!(error = %err, "Could not save pre-login preferences");
        }
        if let Err(err) = session.clear() {
            warn!(error = %err, "Could not clear session storage");
        }
        self.stop_background_refresh();
        if !self.inner.navigator.is_login_page() {
            self.inner.navigator.redirect_to_login();
        }
    }
}

/// One refresh request, detached from the client that started it
struct TokenExchange {
    http: Client,
    url: Url,
    origin: String,
    session: Session,
    refresh: String,
}

impl TokenExchange {
    fn prepare(client: &FlowTestClient) -> Result<Self, RefreshError> {
        let session = client.session();
        let refresh = session
            .refresh_token()
            .ok_or(RefreshError::MissingRefreshToken)?;
        let url = client
            .inner
            .resolver
            .endpoint(TOKEN_REFRESH_PATH)
            .map_err(|e| RefreshError::InvalidEndpoint(e.to_string()))?;

        Ok(Self {
            http: client.inner.http.clone(),
            url,
            origin: client.base_url().to_string(),
            session,
            refresh,
        })
    }

    async fn run(self) -> Result<String, RefreshError> {
        info!("Refreshing access token");
        let response = self
            .http
            .post(self.url)
            .json(&TokenRefreshRequest {
                refresh: self.refresh.clone(),
            })
            .send()
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RefreshError::Rejected {
                status: status.as_u16(),
            });
        }

        let body: TokenRefreshResponse = response
            .json()
            .await
            .map_err(|e| RefreshError::MalformedResponse(e.to_string()))?;

        let user = body
            .user
            .map(|user| with_absolute_avatar(&self.origin, user));
        let stored = self
            .session
            .store_refreshed(
                &self.refresh,
                &body.access,
                body.refresh.as_deref(),
                user.as_ref(),
            )
            .map_err(|e| RefreshError::Storage(e.to_string()))?;
        if !stored {
            return Err(RefreshError::SessionEnded);
        }

        info!("Access token refreshed");
        Ok(body.access)
    }
}
