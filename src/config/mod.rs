//! Configuration module for recipe synchronization
//!
//! The configuration is one TOML file with a table per concern:
//!
//! ```toml
//! [controller]
//! namespace_uri = "http://www.siemens.com/simatic-s7-opcua"
//! connect_timeout_ms = 10000
//! username = "operator"
//! password = "secret"
//!
//! [addresses]
//! step_array = '"StepData"."RunningSteps"."Steps"'
//!
//! [units]
//! reference_unit_id = 3
//!
//! [upload]
//! clear_settle_ms = 5000
//! ```
//!
//! # File Location
//!
//! Unless a path is given explicitly, the file is looked up in
//! `$RECIPE_SYNC_CONFIG`, then in the platform configuration directory:
//!
//! - **Linux**: `~/.config/recipe-sync/config.toml`
//! - **macOS**: `~/Library/Application Support/recipe-sync/config.toml`
//! - **Windows**: `%APPDATA%\recipe-sync\config.toml`

pub mod settings;

pub use settings::*;

use crate::error::{RecipeSyncError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for configuration directories
pub const APP_ID: &str = "recipe-sync";

/// Configuration filename
pub const CONFIG_FILE: &str = "config.toml";

/// Environment variable overriding the configuration path
pub const CONFIG_ENV_VAR: &str = "RECIPE_SYNC_CONFIG";

/// Get the default configuration file path
pub fn default_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    dirs_next::config_dir().map(|p| p.join(APP_ID).join(CONFIG_FILE))
}

/// Complete synchronization configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SyncConfig {
    #[serde(default)]
    pub controller: ControllerConfig,

    #[serde(default)]
    pub addresses: AddressConfig,

    #[serde(default)]
    pub units: UnitPolicy,

    #[serde(default)]
    pub upload: UploadConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SyncConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| RecipeSyncError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RecipeSyncError::Config(format!("Failed to read configuration {:?}: {}", path, e))
        })?;
        Self::from_toml(&content)
    }

    /// Load from the default location, returning defaults on any error
    pub fn load_or_default() -> Self {
        let Some(path) = default_config_path() else {
            return Self::default();
        };
        if !path.exists() {
            tracing::debug!("No configuration at {:?}, using defaults", path);
            return Self::default();
        }
        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load configuration, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save configuration to disk as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                RecipeSyncError::Config(format!("Failed to create configuration directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| {
            RecipeSyncError::Config(format!("Failed to serialize configuration: {}", e))
        })?;

        std::fs::write(path, content).map_err(|e| {
            RecipeSyncError::Config(format!("Failed to write configuration {:?}: {}", path, e))
        })
    }

    /// Check that every configured address parses
    pub fn validate(&self) -> Result<()> {
        self.addresses
            .step_array_path()
            .and_then(|_| self.addresses.clear_pending_steps_path())
            .and_then(|_| self.addresses.recipe_name_path())
            .map_err(|e| RecipeSyncError::Config(format!("Invalid address: {}", e)))?;
        if self.queue.capacity == 0 {
            return Err(RecipeSyncError::Config(
                "queue.capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Configuration with every delay set to zero, for tests and dry runs
    pub fn without_delays(mut self) -> Self {
        self.upload.clear_settle_ms = 0;
        self.upload.unit_pause_ms = 0;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults_validate() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.units.reference_unit_id, 3);
        assert_eq!(config.controller.connect_timeout_ms, DEFAULT_CONNECT_TIMEOUT_MS);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = SyncConfig::from_toml(
            r#"
            [upload]
            clear_settle_ms = 10

            [units]
            reference_unit_id = 7
            "#,
        )
        .unwrap();
        assert_eq!(config.upload.clear_settle_ms, 10);
        assert_eq!(config.upload.unit_pause_ms, DEFAULT_UNIT_PAUSE_MS);
        assert_eq!(config.units.reference_unit_id, 7);
        assert_eq!(config.queue.capacity, 16);
    }

    #[test]
    fn test_client_pki_dir_and_request_timeout() {
        let config = SyncConfig::from_toml(
            r#"
            [controller]
            pki_dir = "/var/lib/recipe-sync/pki"
            request_timeout_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(
            config.controller.pki_dir(),
            PathBuf::from("/var/lib/recipe-sync/pki")
        );
        assert_eq!(
            config.controller.request_timeout(),
            std::time::Duration::from_millis(250)
        );
        assert!(SyncConfig::default().controller.pki_dir().ends_with("pki"));
    }

    #[test]
    fn test_invalid_address_is_rejected() {
        let result = SyncConfig::from_toml(
            r#"
            [addresses]
            step_array = '"StepData".'
            "#,
        );
        assert!(matches!(result, Err(RecipeSyncError::Config(_))));
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let result = SyncConfig::from_toml("[queue]\ncapacity = 0\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);

        let mut config = SyncConfig::default();
        config.controller.username = "operator".to_string();
        config.logging.directory = Some(dir.path().join("logs"));
        config.save(&path).unwrap();

        let loaded = SyncConfig::load(&path).unwrap();
        assert_eq!(loaded.controller.username, "operator");
        assert_eq!(loaded.logging.directory, config.logging.directory);
    }

    #[test]
    fn test_anonymous_credentials_without_username() {
        let config = ControllerConfig::default();
        assert_eq!(config.credentials(), crate::controller::Credentials::Anonymous);
    }

    #[test]
    #[serial]
    fn test_env_var_overrides_location() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[queue]\ncapacity = 4\n").unwrap();

        std::env::set_var(CONFIG_ENV_VAR, &path);
        let config = SyncConfig::load_or_default();
        std::env::remove_var(CONFIG_ENV_VAR);

        assert_eq!(config.queue.capacity, 4);
    }

    #[test]
    #[serial]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var(CONFIG_ENV_VAR, dir.path().join("absent.toml"));
        let config = SyncConfig::load_or_default();
        std::env::remove_var(CONFIG_ENV_VAR);

        assert_eq!(config.queue.capacity, 16);
    }
}
