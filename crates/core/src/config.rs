//! Client configuration

use crate::CoreResult;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default backend origin
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

/// Default login page location
pub const DEFAULT_LOGIN_PAGE: &str = "/login.html";

/// Background refresh period: 55 minutes
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 55 * 60;

/// Settings for the authenticated FlowTest client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Backend origin every relative path is resolved against
    pub base_url: String,

    /// Page the navigator is sent to when the session ends
    pub login_page: String,

    /// Period of the background token refresh in seconds
    pub refresh_interval_secs: u64,

    /// Optional request timeout in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// User agent sent with every request
    pub user_agent: String,

    /// Refresh before sending when the access token is already expired
    pub proactive_refresh: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            login_page: DEFAULT_LOGIN_PAGE.to_string(),
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL_SECS,
            timeout_secs: None,
            user_agent: concat!("flowtest-client/", env!("CARGO_PKG_VERSION")).to_string(),
            proactive_refresh: true,
        }
    }
}

impl ClientSettings {
    /// Load settings from defaults, an optional file and `FLOWTEST_*` environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a value has the wrong type
    pub fn load(path: Option<&Path>) -> CoreResult<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix("FLOWTEST")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Self = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check values that serde alone cannot reject
    ///
    /// # Errors
    ///
    /// Returns an error for an empty base URL or a zero refresh interval
    pub fn validate(&self) -> CoreResult<()> {
        if self.base_url.trim().is_empty() {
            return Err(crate::CoreError::invalid_config("base_url must not be empty"));
        }
        if self.refresh_interval_secs == 0 {
            return Err(crate::CoreError::invalid_config(
                "refresh_interval_secs must be greater than zero",
            ));
        }
        Ok(())
    }

    pub const fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}
