//! Key/value storage backing the client session
//!
//! The store mirrors the browser `localStorage` contract: string keys,
//! string values, synchronous reads and writes. [`MemoryStorage`] lives for
//! the process, [`FileStorage`] persists every write to a JSON file.

use crate::{CoreError, CoreResult};
use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Well-known storage keys
pub mod keys {
    pub const ACCESS: &str = "access";
    pub const REFRESH: &str = "refresh";
    pub const USER: &str = "user";
    pub const CURRENT_USER: &str = "currentUser";
    pub const THEME: &str = "theme";
    pub const LANGUAGE: &str = "language";
    pub const SELECTED_PROJECT: &str = "selectedProject";
    pub const PRE_LOGIN_THEME: &str = "preLoginTheme";
    pub const PRE_LOGIN_LANGUAGE: &str = "preLoginLanguage";
}

/// Synchronous string key/value store
pub trait Storage: Send + Sync {
    fn get_item(&self, key: &str) -> Option<String>;

    /// Insert or overwrite a value
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be written
    fn set_item(&self, key: &str, value: &str) -> CoreResult<()>;

    /// Remove a value; removing a missing key is not an error
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be written
    fn remove_item(&self, key: &str) -> CoreResult<()>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Process-local storage
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with the given pairs
    pub fn with_items<'a>(items: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let items = items
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self {
            items: Mutex::new(items),
        }
    }
}

impl Storage for MemoryStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        lock(&self.items).get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> CoreResult<()> {
        lock(&self.items).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> CoreResult<()> {
        lock(&self.items).remove(key);
        Ok(())
    }
}

/// Storage persisted as a JSON object on disk
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    items: Mutex<BTreeMap<String, String>>,
}

impl FileStorage {
    /// Open the store at `path`, starting empty when the file does not exist
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or is not a JSON object of strings
    pub fn open(path: impl Into<PathBuf>) -> CoreResult<Self> {
        let path = path.into();
        let items = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content).map_err(|e| {
                    CoreError::storage_error(format!("{} is corrupt: {e}", path.display()))
                })?
            }
        } else {
            BTreeMap::new()
        };

        debug!(path = %path.display(), entries = items.len(), "Opened session storage");
        Ok(Self {
            path,
            items: Mutex::new(items),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, items: &BTreeMap<String, String>) -> CoreResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(items)?;
        let tmp = self.path.with_extension("json.tmp");
        let mut file = create_private(&tmp)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Create (or truncate) a file readable only by its owner; it holds bearer tokens
#[cfg(unix)]
fn create_private(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // `mode` only applies on creation; a leftover temp file keeps its old bits
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn create_private(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

impl Storage for FileStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        lock(&self.items).get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> CoreResult<()> {
        let mut items = lock(&self.items);
        items.insert(key.to_string(), value.to_string());
        self.persist(&items)
    }

    fn remove_item(&self, key: &str) -> CoreResult<()> {
        let mut items = lock(&self.items);
        if items.remove(key).is_some() {
            self.persist(&items)?;
        }
        Ok(())
    }
}
