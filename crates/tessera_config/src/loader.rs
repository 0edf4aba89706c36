//! Reading `tessera.toml` into a validated [`TesseraConfig`].

use crate::error::ConfigError;
use crate::types::TesseraConfig;
use std::path::Path;

/// File name looked up in the project directory.
pub const CONFIG_FILE_NAME: &str = "tessera.toml";

/// Loads and validates a `tessera.toml` configuration from a project directory.
///
/// Reads `<project_dir>/tessera.toml`, parses it, and validates its values.
pub fn load_config(project_dir: &Path) -> Result<TesseraConfig, ConfigError> {
    let config_path = project_dir.join(CONFIG_FILE_NAME);
    let content = std::fs::read_to_string(&config_path)
        .map_err(|source| ConfigError::Unreadable { path: config_path, source })?;
    load_config_from_str(&content)
}

/// Like [`load_config`], but returns the defaults when the file does not exist.
pub fn load_config_or_default(project_dir: &Path) -> Result<TesseraConfig, ConfigError> {
    match load_config(project_dir) {
        Err(e) if e.is_missing_file() => Ok(TesseraConfig::default()),
        other => other,
    }
}

/// Parses and validates configuration text.
pub fn load_config_from_str(content: &str) -> Result<TesseraConfig, ConfigError> {
    let config: TesseraConfig =
        toml::from_str(content).map_err(|e| ConfigError::Malformed(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Validates that configuration values are usable.
fn validate_config(config: &TesseraConfig) -> Result<(), ConfigError> {
    let invalid = |key, reason| -> Result<(), ConfigError> {
        Err(ConfigError::InvalidSetting { key, reason })
    };
    if config.cache.engine_version.trim().is_empty() {
        return invalid("cache.engine_version", "must not be blank");
    }
    if config.cache.dir.as_os_str().is_empty() {
        return invalid("cache.dir", "must not be empty");
    }
    if config.serialization.max_bean_depth == 0 {
        return invalid("serialization.max_bean_depth", "must be greater than zero");
    }
    Ok(())
}
