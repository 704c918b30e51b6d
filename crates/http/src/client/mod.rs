//! FlowTest HTTP client

pub mod auth;
pub mod error;
pub mod jwt;
pub mod navigation;
pub mod path;
pub mod refresh;
pub mod request;
pub mod session;
pub mod timer;

use error::ClientError;
use flowtest_core::{ClientSettings, MemoryStorage, Storage};
use navigation::{Navigator, PageNavigator};
use path::{PathResolver, ResolvedUrl};
use refresh::InflightRefresh;
use request::PendingRequest;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, ClientBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use session::Session;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use timer::RefreshTimer;
use tracing::{debug, warn};
use url::Url;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Authenticated FlowTest API client
///
/// Cheap to clone; clones share the session, the in-flight refresh and the
/// background timer.
#[derive(Clone)]
pub struct FlowTestClient {
    pub(crate) inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    http: Client,
    resolver: PathResolver,
    session: Session,
    navigator: Arc<dyn Navigator>,
    proactive_refresh: bool,
    refresh_interval: Duration,
    refresh: Mutex<Option<InflightRefresh>>,
    timer: Mutex<Option<RefreshTimer>>,
}

impl std::fmt::Debug for FlowTestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowTestClient")
            .field("base_url", &self.base_url())
            .field("session", &self.inner.session)
            .finish_non_exhaustive()
    }
}

impl FlowTestClient {
    /// Create a new client with in-memory storage
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is not an http(s) origin
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        Self::builder().base_url(base_url).build()
    }

    /// Create a new client builder
    pub fn builder() -> FlowTestClientBuilder {
        FlowTestClientBuilder::default()
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        self.inner.resolver.origin()
    }

    pub fn session(&self) -> Session {
        self.inner.session.clone()
    }

    pub fn navigator(&self) -> &Arc<dyn Navigator> {
        &self.inner.navigator
    }

    /// Resolve a caller path against the backend origin
    ///
    /// # Errors
    ///
    /// Returns an error if the path cannot be turned into a URL
    pub fn resolve(&self, path: &str) -> Result<ResolvedUrl, ClientError> {
        self.inner.resolver.resolve(path)
    }

    /// Send a request with the stored bearer token
    ///
    /// A 404 on a relative path is retried once without the `api/` prefix.
    /// A 401 triggers one refresh and one retry with the new token. Off the
    /// login page, a missing token or a failed refresh redirects to login and
    /// returns an error without further requests.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotAuthenticated`] or
    /// [`ClientError::SessionExpired`] after a redirect, and propagates
    /// network errors unchanged. Non-success statuses are returned as responses.
    pub async fn send(&self, request: PendingRequest) -> Result<Response, ClientError> {
        let target = self.inner.resolver.resolve(&request.path)?;
        let on_login_page = self.inner.navigator.is_login_page();

        let token = if on_login_page {
            None
        } else if let Some(stored) = self.inner.session.access_token() {
            Some(self.usable_token(stored).await?)
        } else {
            warn!(url = %target.url, "No access token stored");
            self.inner.navigator.redirect_to_login();
            return Err(ClientError::NotAuthenticated);
        };

        let mut url = target.url;
        let mut response = self.dispatch(&request, url.clone(), token.as_deref()).await?;

        if response.status() == StatusCode::NOT_FOUND {
            if let Some(alternate) = target.alternate {
                debug!(from = %url, to = %alternate, "Not found, retrying alternate path");
                url = alternate;
                response = self.dispatch(&request, url.clone(), token.as_deref()).await?;
            }
        }

        if response.status() == StatusCode::UNAUTHORIZED && !on_login_page {
            if let Some(rejected) = token {
                let fresh = self
                    .token_after_rejection(&rejected)
                    .await
                    .map_err(ClientError::SessionExpired)?;
                debug!(url = %url, "Retrying request with refreshed token");
                response = self.dispatch(&request, url, Some(&fresh)).await?;
            }
        }

        Ok(response)
    }

    /// Send a request and decode a JSON success body
    ///
    /// # Errors
    ///
    /// Returns the [`send`](Self::send) errors, a status-mapped error for
    /// non-success responses, or a decoding error.
    pub async fn execute<T: DeserializeOwned>(
        &self,
        request: PendingRequest,
    ) -> Result<T, ClientError> {
        let response = self.send(request).await?;
        let status = response.status();

        if status.is_success() {
            Ok(response.json().await?)
        } else {
            let message = response.text().await.unwrap_or_else(|_| status.to_string());
            Err(ClientError::from_status(status, message))
        }
    }

    /// # Errors
    ///
    /// See [`execute`](Self::execute)
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.execute(PendingRequest::get(path)).await
    }

    /// # Errors
    ///
    /// See [`execute`](Self::execute)
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.execute(PendingRequest::post(path).json(body)?).await
    }

    /// # Errors
    ///
    /// See [`execute`](Self::execute)
    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.execute(PendingRequest::put(path).json(body)?).await
    }

    /// Delete a resource, ignoring the response body
    ///
    /// # Errors
    ///
    /// Returns the [`send`](Self::send) errors or a status-mapped error
    pub async fn delete(&self, path: &str) -> Result<(), ClientError> {
        let response = self.send(PendingRequest::delete(path)).await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let message = response.text().await.unwrap_or_else(|_| status.to_string());
            Err(ClientError::from_status(status, message))
        }
    }

    /// Start (or restart) the periodic background refresh
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_background_refresh(&self) {
        let timer = RefreshTimer::spawn(Arc::downgrade(&self.inner), self.inner.refresh_interval);
        // Replacing the handle drops, and so cancels, any previous timer
        *lock(&self.inner.timer) = Some(timer);
    }

    pub fn stop_background_refresh(&self) {
        if let Some(timer) = lock(&self.inner.timer).take() {
            timer.cancel();
        }
    }

    pub fn is_background_refresh_active(&self) -> bool {
        lock(&self.inner.timer)
            .as_ref()
            .is_some_and(RefreshTimer::is_active)
    }

    async fn usable_token(&self, stored: String) -> Result<String, ClientError> {
        if self.inner.proactive_refresh && jwt::is_expired(&stored) == Some(true) {
            debug!("Access token expired, refreshing before sending");
            return self
                .token_after_rejection(&stored)
                .await
                .map_err(ClientError::SessionExpired);
        }
        Ok(stored)
    }

    async fn dispatch(
        &self,
        request: &PendingRequest,
        url: Url,
        token: Option<&str>,
    ) -> Result<Response, ClientError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.extend(request.headers.clone());

        let mut builder = self.inner.http.request(request.method.clone(), url.clone());
        if let Some(token) = token {
            headers.remove(header::AUTHORIZATION);
            builder = builder.bearer_auth(token);
        }
        builder = builder.headers(headers);
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        debug!(method = %request.method, url = %url, "Sending request");
        let response = builder.send().await?;
        debug!(status = response.status().as_u16(), url = %url, "Received response");
        Ok(response)
    }

    /// Cache a profile under `user`, making a relative avatar path absolute
    pub(crate) fn cache_user(&self, user: Value) -> Result<(), ClientError> {
        let user = with_absolute_avatar(self.base_url(), user);
        Ok(self.inner.session.store_user(&user)?)
    }
}

/// Prefix an avatar path such as `/media/avatars/qa.png` with the backend origin
pub(crate) fn with_absolute_avatar(origin: &str, mut user: Value) -> Value {
    if let Some(avatar) = user.get_mut("avatar") {
        let absolute = avatar
            .as_str()
            .filter(|path| path.starts_with('/'))
            .map(|path| format!("{origin}{path}"));
        if let Some(absolute) = absolute {
            *avatar = Value::String(absolute);
        }
    }
    user
}

/// Builder for FlowTestClient
#[derive(Default)]
pub struct FlowTestClientBuilder {
    base_url: Option<String>,
    storage: Option<Arc<dyn Storage>>,
    navigator: Option<Arc<dyn Navigator>>,
    timeout: Option<Duration>,
    user_agent: Option<String>,
    refresh_interval: Option<Duration>,
    proactive_refresh: Option<bool>,
}

impl FlowTestClientBuilder {
    /// Start from loaded settings
    pub fn from_settings(settings: &ClientSettings) -> Self {
        let mut builder = Self::default()
            .base_url(settings.base_url.clone())
            .user_agent(settings.user_agent.clone())
            .refresh_interval(settings.refresh_interval())
            .proactive_refresh(settings.proactive_refresh)
            .navigator(Arc::new(PageNavigator::new(
                settings.login_page.clone(),
                navigation::HOME_PAGE,
            )));
        if let Some(timeout) = settings.timeout() {
            builder = builder.timeout(timeout);
        }
        builder
    }

    /// Set the base URL
    #[must_use]
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set the session storage
    #[must_use]
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Set the navigator used for login redirects
    #[must_use]
    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    /// Set the request timeout
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the user agent
    #[must_use]
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Set the background refresh period
    #[must_use]
    pub const fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = Some(interval);
        self
    }

    /// Refresh before sending when the stored token is already expired
    #[must_use]
    pub const fn proactive_refresh(mut self, enabled: bool) -> Self {
        self.proactive_refresh = Some(enabled);
        self
    }

    /// Build the client
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is missing or invalid, the refresh
    /// interval is zero, or the HTTP client cannot be created
    pub fn build(self) -> Result<FlowTestClient, ClientError> {
        let base_url = self
            .base_url
            .ok_or_else(|| ClientError::Configuration("base_url is required".into()))?;
        let resolver = PathResolver::new(&base_url)?;

        let defaults = ClientSettings::default();
        let refresh_interval = self
            .refresh_interval
            .unwrap_or_else(|| defaults.refresh_interval());
        if refresh_interval.is_zero() {
            return Err(ClientError::Configuration(
                "refresh interval must be greater than zero".into(),
            ));
        }

        let mut client_builder = ClientBuilder::new();
        if let Some(timeout) = self.timeout {
            client_builder = client_builder.timeout(timeout);
        }
        client_builder =
            client_builder.user_agent(self.user_agent.unwrap_or(defaults.user_agent));
        let http = client_builder.build()?;

        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let navigator = self
            .navigator
            .unwrap_or_else(|| Arc::new(PageNavigator::default()));

        Ok(FlowTestClient {
            inner: Arc::new(ClientInner {
                http,
                resolver,
                session: Session::new(storage),
                navigator,
                proactive_refresh: self.proactive_refresh.unwrap_or(defaults.proactive_refresh),
                refresh_interval,
                refresh: Mutex::new(None),
                timer: Mutex::new(None),
            }),
        })
    }
}
