//! Token pair and cached preferences held in session storage

use flowtest_core::storage::keys;
use flowtest_core::{CoreResult, Storage};
use serde_json::Value;
use std::sync::{Arc, Mutex};

use super::lock;

const DEFAULT_THEME: &str = "light";
const DEFAULT_LANGUAGE: &str = "en";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No access token stored
    Anonymous,
    /// An access token is stored
    Authenticated,
}

/// Typed view over the session storage
///
/// Token writes are serialized so that a refresh finishing after a logout
/// cannot bring the old session back.
#[derive(Clone)]
pub struct Session {
    storage: Arc<dyn Storage>,
    tokens: Arc<Mutex<()>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            tokens: Arc::new(Mutex::new(())),
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn state(&self) -> SessionState {
        if self.access_token().is_some() {
            SessionState::Authenticated
        } else {
            SessionState::Anonymous
        }
    }

    pub fn access_token(&self) -> Option<String> {
        non_empty(self.storage.get_item(keys::ACCESS))
    }

    pub fn refresh_token(&self) -> Option<String> {
        non_empty(self.storage.get_item(keys::REFRESH))
    }

    /// Store a freshly obtained token pair
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be written
    pub fn store_tokens(&self, access: &str, refresh: &str) -> CoreResult<()> {
        let _tokens = lock(&self.tokens);
        self.storage.set_item(keys::ACCESS, access)?;
        self.storage.set_item(keys::REFRESH, refresh)
    }

    /// Replace the access token after a refresh
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be written
    pub fn store_access_token(&self, access: &str) -> CoreResult<()> {
        let _tokens = lock(&self.tokens);
        self.storage.set_item(keys::ACCESS, access)
    }

    /// Store the outcome of a refresh made with the `expected` refresh token
    ///
    /// Nothing is written and `false` is returned when the stored refresh
    /// token is no longer `expected` (logout, expiry or a new login happened
    /// while the refresh was in flight).
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be written
    pub fn store_refreshed(
        &self,
        expected: &str,
        access: &str,
        rotated: Option<&str>,
        user: Option<&Value>,
    ) -> CoreResult<bool> {
        let _tokens = lock(&self.tokens);
        if self.refresh_token().as_deref() != Some(expected) {
            return Ok(false);
        }

        self.storage.set_item(keys::ACCESS, access)?;
        if let Some(rotated) = rotated {
            self.storage.set_item(keys::REFRESH, rotated)?;
        }
        if let Some(user) = user {
            self.store_user(user)?;
        }
        Ok(true)
    }

    fn remove_tokens(&self) -> CoreResult<()> {
        self.storage.remove_item(keys::ACCESS)?;
        self.storage.remove_item(keys::REFRESH)
    }

    /// Drop tokens and cached profiles
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be written
    pub fn clear(&self) -> CoreResult<()> {
        let _tokens = lock(&self.tokens);
        self.remove_tokens()?;
        self.storage.remove_item(keys::USER)?;
        self.storage.remove_item(keys::CURRENT_USER)
    }

    pub fn user(&self) -> Option<Value> {
        self.json_item(keys::USER)
    }

    /// # Errors
    ///
    /// Returns an error if the storage cannot be written
    pub fn store_user(&self, user: &Value) -> CoreResult<()> {
        self.storage.set_item(keys::USER, &user.to_string())
    }

    pub fn current_user(&self) -> Option<Value> {
        self.json_item(keys::CURRENT_USER)
    }

    /// # Errors
    ///
    /// Returns an error if the storage cannot be written
    pub fn store_current_user(&self, user: &Value) -> CoreResult<()> {
        self.storage.set_item(keys::CURRENT_USER, &user.to_string())
    }

    pub fn theme(&self) -> Option<String> {
        non_empty(self.storage.get_item(keys::THEME))
    }

    /// # Errors
    ///
    /// Returns an error if the storage cannot be written
    pub fn set_theme(&self, theme: &str) -> CoreResult<()> {
        self.storage.set_item(keys::THEME, theme)
    }

    pub fn language(&self) -> Option<String> {
        non_empty(self.storage.get_item(keys::LANGUAGE))
    }

    /// # Errors
    ///
    /// Returns an error if the storage cannot be written
    pub fn set_language(&self, language: &str) -> CoreResult<()> {
        self.storage.set_item(keys::LANGUAGE, language)
    }

    /// Last project the user worked in; unparseable values read as `None`
    pub fn selected_project(&self) -> Option<u64> {
        self.storage
            .get_item(keys::SELECTED_PROJECT)
            .and_then(|id| id.trim().parse().ok())
    }

    /// # Errors
    ///
    /// Returns an error if the storage cannot be written
    pub fn set_selected_project(&self, project_id: u64) -> CoreResult<()> {
        self.storage
            .set_item(keys::SELECTED_PROJECT, &project_id.to_string())
    }

    /// Remember theme and language so the login page and the next session keep them
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be written
    pub fn save_pre_login_preferences(&self) -> CoreResult<()> {
        let theme = self.theme().unwrap_or_else(|| DEFAULT_THEME.to_string());
        let language = self
            .language()
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());
        self.storage.set_item(keys::PRE_LOGIN_THEME, &theme)?;
        self.storage.set_item(keys::PRE_LOGIN_LANGUAGE, &language)
    }

    /// Copy the pre-login theme and language back after a login
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be written
    pub fn apply_pre_login_preferences(&self) -> CoreResult<()> {
        if let Some(theme) = non_empty(self.storage.get_item(keys::PRE_LOGIN_THEME)) {
            self.set_theme(&theme)?;
        }
        if let Some(language) = non_empty(self.storage.get_item(keys::PRE_LOGIN_LANGUAGE)) {
            self.set_language(&language)?;
        }
        Ok(())
    }

    fn json_item(&self, key: &str) -> Option<Value> {
        self.storage
            .get_item(key)
            .and_then(|raw| serde_json::from_str(&raw).ok())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
