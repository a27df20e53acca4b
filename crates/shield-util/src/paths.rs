//! Default paths for shield components
//!
//! Paths are user-writable by default (no root required):
//! - Config: `$XDG_CONFIG_HOME/shield/config.toml` or `~/.config/shield/config.toml`
//! - Data: `$XDG_DATA_HOME/shield` or `~/.local/share/shield`

use std::path::PathBuf;

/// Environment variable for overriding the config file path
pub const SHIELD_CONFIG_ENV: &str = "SHIELD_CONFIG";

/// Environment variable for overriding the data directory
pub const SHIELD_DATA_DIR_ENV: &str = "SHIELD_DATA_DIR";

/// Application subdirectory name
const APP_DIR: &str = "shield";

/// Store filename within the data directory
pub const STORE_FILENAME: &str = "shield.db";

/// Get the default config file path.
///
/// Order of precedence:
/// 1. `$SHIELD_CONFIG` environment variable (if set)
/// 2. `$XDG_CONFIG_HOME/shield/config.toml` (if XDG_CONFIG_HOME is set)
/// 3. `~/.config/shield/config.toml` (fallback)
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(SHIELD_CONFIG_ENV) {
        return PathBuf::from(path);
    }

    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(APP_DIR).join("config.toml");
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join("config.toml");
    }

    PathBuf::from("/etc").join(APP_DIR).join("config.toml")
}

/// Get the default data directory.
///
/// Order of precedence:
/// 1. `$SHIELD_DATA_DIR` environment variable (if set)
/// 2. `$XDG_DATA_HOME/shield` (if XDG_DATA_HOME is set)
/// 3. `~/.local/share/shield` (fallback)
pub fn default_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var(SHIELD_DATA_DIR_ENV) {
        return PathBuf::from(path);
    }

    data_dir_without_env()
}

/// Get the data directory without checking SHIELD_DATA_DIR env var.
/// Used for default values in configs where the env var is checked separately.
pub fn data_dir_without_env() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home)
            .join(".local")
            .join("share")
            .join(APP_DIR);
    }

    // Last resort
    PathBuf::from("/tmp").join(APP_DIR).join("data")
}
