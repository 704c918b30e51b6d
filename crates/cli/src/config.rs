//! CLI configuration utilities

use anyhow::{Context, Result};
use flowtest_core::ClientSettings;
use std::path::{Path, PathBuf};

/// Settings file looked up in the data directory
pub const SETTINGS_FILE: &str = "flowtest.toml";

/// Session storage file in the data directory
pub const SESSION_FILE: &str = "session.json";

/// Pick the data directory: explicit flag, `FLOWTEST_STATE_DIR`, then the system data dir
pub fn resolve_data_dir(data_dir: Option<PathBuf>) -> PathBuf {
    data_dir.unwrap_or_else(|| {
        std::env::var("FLOWTEST_STATE_DIR").map_or_else(
            |_| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("flowtest")
            },
            PathBuf::from,
        )
    })
}

/// Load client settings from the explicit file, or the data directory's file when present
pub fn load_settings(config: Option<&Path>, data_dir: &Path) -> Result<ClientSettings> {
    let default_file = data_dir.join(SETTINGS_FILE);
    let file = config.or_else(|| default_file.exists().then_some(default_file.as_path()));

    ClientSettings::load(file).with_context(|| match file {
        Some(path) => format!("Failed to load configuration from {}", path.display()),
        None => "Failed to load configuration from environment".to_string(),
    })
}

pub fn session_path(data_dir: &Path) -> PathBuf {
    data_dir.join(SESSION_FILE)
}
