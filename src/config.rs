use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{AppError, AppResult};
use crate::security::InputValidator;

pub const DEFAULT_ENDPOINT_URL: &str = "http://imgur.com/api/upload.json";
pub const DEFAULT_PLACEHOLDER_FILENAME: &str = "uploaded-from-reddit-is-fun";

const ENDPOINT_ENV: &str = "IMAGE_SHARE_ENDPOINT";
const API_KEY_ENV: &str = "IMAGE_SHARE_API_KEY";

/// Immutable per-process upload settings. Shared read-only by every upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploaderConfig {
    pub endpoint_url: String,
    pub api_key: String,
    /// Bounded wait on the network call. `None` waits indefinitely.
    pub request_timeout_secs: Option<u64>,
    /// Cap on the accumulated response body. `None` reads until exhausted.
    pub max_response_bytes: Option<u64>,
    pub image_field_name: String,
    pub key_field_name: String,
    /// The remote API treats an image part without a filename as a URL
    /// reference, so one is always sent.
    pub placeholder_filename: String,
    pub log_level: String,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            endpoint_url: DEFAULT_ENDPOINT_URL.to_string(),
            api_key: String::new(),
            request_timeout_secs: None,
            max_response_bytes: None,
            image_field_name: "image".to_string(),
            key_field_name: "key".to_string(),
            placeholder_filename: DEFAULT_PLACEHOLDER_FILENAME.to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl UploaderConfig {
    pub fn new(endpoint_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Apply `IMAGE_SHARE_ENDPOINT` / `IMAGE_SHARE_API_KEY` when set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(endpoint) = std::env::var(ENDPOINT_ENV) {
            if !endpoint.trim().is_empty() {
                log::debug!("Endpoint overridden from {}", ENDPOINT_ENV);
                self.endpoint_url = endpoint.trim().to_string();
            }
        }
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                log::debug!("API key overridden from {}", API_KEY_ENV);
                self.api_key = key.trim().to_string();
            }
        }
        self
    }
}

pub fn get_config_path() -> AppResult<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| AppError::Config("Could not find config directory".to_string()))?
        .join("Image Share Uploader");

    fs::create_dir_all(&config_dir)?;
    Ok(config_dir.join("config.json"))
}

pub fn load_config() -> AppResult<UploaderConfig> {
    load_config_from(&get_config_path()?)
}

/// Read the config at `path`, creating a default file when none exists.
/// The result is not validated; an unset API key is a normal first-run
/// state and is only rejected when an uploader is built.
pub fn load_config_from(config_path: &Path) -> AppResult<UploaderConfig> {
    if config_path.exists() {
        let config_str = fs::read_to_string(config_path)?;
        let config: UploaderConfig = serde_json::from_str(&config_str).unwrap_or_else(|e| {
            log::warn!("Failed to parse config file: {}. Using defaults.", e);
            UploaderConfig::default()
        });
        Ok(config)
    } else {
        let default_config = UploaderConfig::default();
        save_config_internal(config_path, &default_config)?;
        Ok(default_config)
    }
}

pub fn save_config(config: &UploaderConfig) -> AppResult<()> {
    save_config_to(&get_config_path()?, config)
}

pub fn save_config_to(config_path: &Path, config: &UploaderConfig) -> AppResult<()> {
    validate_config(config)?;
    save_config_internal(config_path, config)
}

fn save_config_internal(config_path: &Path, config: &UploaderConfig) -> AppResult<()> {
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }

    // Create backup of existing config
    if config_path.exists() {
        let backup_path = config_path.with_extension("json.bak");
        if let Err(e) = fs::copy(config_path, &backup_path) {
            log::warn!("Failed to create config backup: {}", e);
        }
    }

    let config_str = serde_json::to_string_pretty(config)?;
    fs::write(config_path, config_str)?;

    log::info!("Configuration saved to {}", config_path.display());
    Ok(())
}

pub fn validate_config(config: &UploaderConfig) -> AppResult<()> {
    InputValidator::validate_endpoint_url(&config.endpoint_url)?;
    InputValidator::validate_api_key(&config.api_key)?;

    if config.request_timeout_secs == Some(0) {
        return Err(AppError::validation("request_timeout_secs", "Must be greater than 0"));
    }

    if config.max_response_bytes == Some(0) {
        return Err(AppError::validation("max_response_bytes", "Must be greater than 0"));
    }

    if config.placeholder_filename.trim().is_empty() {
        // An empty filename makes the API read the part as a URL
        return Err(AppError::validation("placeholder_filename", "Must not be empty"));
    }

    InputValidator::validate_field_name("image_field_name", &config.image_field_name)?;
    InputValidator::validate_field_name("key_field_name", &config.key_field_name)?;

    if config.image_field_name == config.key_field_name {
        return Err(AppError::validation("key_field_name", "Must differ from image_field_name"));
    }

    let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
    if !valid_log_levels.contains(&config.log_level.as_str()) {
        return Err(AppError::validation("log_level", "Must be a valid log level"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> UploaderConfig {
        UploaderConfig::new("http://localhost:9000/api/upload.json", "testkey123")
    }

    #[test]
    fn test_defaults_preserve_legacy_behaviour() {
        let config = UploaderConfig::default();
        assert_eq!(config.endpoint_url, DEFAULT_ENDPOINT_URL);
        assert_eq!(config.placeholder_filename, "uploaded-from-reddit-is-fun");
        assert_eq!(config.image_field_name, "image");
        assert_eq!(config.key_field_name, "key");
        assert!(config.request_timeout().is_none());
        assert!(config.max_response_bytes.is_none());
    }

    #[test]
    fn test_validate_config() {
        assert!(validate_config(&valid_config()).is_ok());

        // First-run default has no key yet
        assert!(validate_config(&UploaderConfig::default()).is_err());

        let mut config = valid_config();
        config.request_timeout_secs = Some(0);
        assert!(validate_config(&config).is_err());

        let mut config = valid_config();
        config.placeholder_filename = "  ".to_string();
        assert!(validate_config(&config).is_err());

        let mut config = valid_config();
        config.key_field_name = "image".to_string();
        assert!(validate_config(&config).is_err());

        let mut config = valid_config();
        config.log_level = "verbose".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_missing_fields_fall_back_to_defaults() {
        let config: UploaderConfig =
            serde_json::from_str(r#"{ "api_key": "abc123", "request_timeout_secs": 30 }"#).unwrap();
        assert_eq!(config.api_key, "abc123");
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.endpoint_url, DEFAULT_ENDPOINT_URL);
    }

    #[test]
    fn test_load_creates_default_and_save_backs_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded, UploaderConfig::default());
        assert!(path.exists());

        save_config_to(&path, &valid_config()).unwrap();
        assert!(path.with_extension("json.bak").exists());
        assert_eq!(load_config_from(&path).unwrap(), valid_config());
    }

    #[test]
    fn test_unparsable_config_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        assert_eq!(load_config_from(&path).unwrap(), UploaderConfig::default());
    }
}
