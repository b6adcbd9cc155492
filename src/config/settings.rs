//! Configuration sections
//!
//! Each section maps to one `[table]` of the TOML configuration file. Every
//! field has a default so partial files load cleanly.
//!
//! Durations are stored in milliseconds and exposed as [`Duration`] through
//! accessor methods.

use crate::address::TagPath;
use crate::controller::Credentials;
use crate::error::Result;
use crate::types::UnitId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default timeout for establishing a controller session
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Default timeout of one request on an open session
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;

/// Default wait after clearing pending steps
pub const DEFAULT_CLEAR_SETTLE_MS: u64 = 5_000;

/// Default pause between units during upload
pub const DEFAULT_UNIT_PAUSE_MS: u64 = 3_000;

/// Default port of an OPC UA endpoint
pub const DEFAULT_OPCUA_PORT: u16 = 4840;

// ==================== Controller ====================

/// Controller session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Namespace URI whose index qualifies persisted tag names
    pub namespace_uri: String,

    /// Per-attempt connect timeout
    pub connect_timeout_ms: u64,

    /// Maximum depth of a recursive address-space browse
    pub max_browse_depth: usize,

    /// Session user name
    pub username: String,

    /// Session password
    pub password: String,

    /// Certificate store of the OPC UA client (default: platform data dir)
    pub pki_dir: Option<PathBuf>,

    /// Timeout of a single service request on an open session
    pub request_timeout_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace_uri: "http://www.siemens.com/simatic-s7-opcua".to_string(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            max_browse_depth: 4,
            username: String::new(),
            password: String::new(),
            pki_dir: None,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

impl ControllerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn pki_dir(&self) -> PathBuf {
        match &self.pki_dir {
            Some(dir) => dir.clone(),
            None => dirs_next::data_local_dir()
                .map(|p| p.join(super::APP_ID).join("pki"))
                .unwrap_or_else(|| PathBuf::from("pki")),
        }
    }

    pub fn credentials(&self) -> Credentials {
        if self.username.is_empty() {
            Credentials::Anonymous
        } else {
            Credentials::UserName {
                username: self.username.clone(),
                password: self.password.clone(),
            }
        }
    }
}

// ==================== Well-known addresses ====================

/// Namespace-relative addresses shared by every controller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressConfig {
    /// Root of the step array on satellite units
    pub step_array: String,

    /// Boolean control that clears the pending step state
    pub clear_pending_steps: String,

    /// String node receiving the uploaded recipe name
    pub recipe_name: String,
}

impl Default for AddressConfig {
    fn default() -> Self {
        Self {
            step_array: r#""StepData"."RunningSteps"."Steps""#.to_string(),
            clear_pending_steps: r#""Recipe_Handler"."External"."ClearRunningSteps""#.to_string(),
            recipe_name: r#""StepData"."RunningSteps"."Name""#.to_string(),
        }
    }
}

impl AddressConfig {
    pub fn step_array_path(&self) -> Result<TagPath> {
        TagPath::parse(&self.step_array)
    }

    pub fn clear_pending_steps_path(&self) -> Result<TagPath> {
        TagPath::parse(&self.clear_pending_steps)
    }

    pub fn recipe_name_path(&self) -> Result<TagPath> {
        TagPath::parse(&self.recipe_name)
    }
}

// ==================== Units ====================

/// Unit role policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitPolicy {
    /// The master unit: never cleared, read and written as scalars
    pub reference_unit_id: UnitId,
}

impl Default for UnitPolicy {
    fn default() -> Self {
        Self {
            reference_unit_id: 3,
        }
    }
}

// ==================== Upload ====================

/// Upload pipeline timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Upper bound for the whole clear step of one unit
    pub clear_timeout_ms: u64,

    /// Wait after the clear write before writing fields
    pub clear_settle_ms: u64,

    /// Pause after each unit
    pub unit_pause_ms: u64,

    /// Write the recipe name to satellite units after their fields
    pub write_recipe_name: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            clear_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            clear_settle_ms: DEFAULT_CLEAR_SETTLE_MS,
            unit_pause_ms: DEFAULT_UNIT_PAUSE_MS,
            write_recipe_name: true,
        }
    }
}

impl UploadConfig {
    pub fn clear_timeout(&self) -> Duration {
        Duration::from_millis(self.clear_timeout_ms)
    }

    pub fn clear_settle(&self) -> Duration {
        Duration::from_millis(self.clear_settle_ms)
    }

    pub fn unit_pause(&self) -> Duration {
        Duration::from_millis(self.unit_pause_ms)
    }
}

// ==================== Store ====================

/// Relational store connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://recipes.db?mode=rwc".to_string(),
        }
    }
}

// ==================== Queue ====================

/// Job queue sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of queued jobs
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: 16 }
    }
}

// ==================== Health ====================

/// Reachability probe settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Attempts per unit; every attempt must succeed
    pub attempts: u32,

    /// Timeout per attempt
    pub timeout_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            attempts: 2,
            timeout_ms: 1_000,
        }
    }
}

impl HealthConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

// ==================== Logging ====================

/// Log output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,

    /// Directory for daily rolling log files; console only when unset
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,recipe_sync=debug".to_string(),
            directory: None,
        }
    }
}
