//! # recipe-sync: Recipe synchronization for OPC UA controllers
//!
//! Keeps production recipes consistent between a relational store and the
//! controllers of a plant. Each unit of the plant is an OPC UA server; a
//! recipe structure maps units to the tags their part of the recipe lives
//! under, either a step array or a single scalar tag.
//!
//! ## Architecture
//!
//! - **Controller**: Session seam over the protocol library, plus a simulated
//!   plant for tests and dry runs
//! - **Traversal**: Extracts step records from a controller's step array
//! - **Coercion**: Converts between store values and declared protocol types
//! - **Sync**: Download, upload and consistency pipelines over all units
//! - **Worker**: Single-consumer job queue so pipeline runs never overlap
//! - **Store**: Relational store contract with in-memory and SQLite backends
//!
//! ## Configuration
//!
//! Settings are read from `config.toml` in the platform configuration
//! directory under `recipe-sync`, or from the file named by
//! `RECIPE_SYNC_CONFIG`:
//!
//! - **Linux**: `~/.config/recipe-sync/config.toml`
//! - **macOS**: `~/Library/Application Support/recipe-sync/config.toml`
//! - **Windows**: `%APPDATA%\recipe-sync\config.toml`
//!
//! ## Example
//!
//! ```ignore
//! use recipe_sync::{
//!     config::SyncConfig,
//!     store::SqliteStore,
//!     sync::SyncEngine,
//!     worker::SyncService,
//! };
//!
//! let config = SyncConfig::load_or_default();
//! let store = SqliteStore::connect(&config.store.database_url).await?;
//! let engine = SyncEngine::new(connector, Arc::new(store), config.clone());
//!
//! let (service, jobs) = SyncService::new(engine, config.queue.capacity);
//! service.spawn()?;
//!
//! let id = jobs.submit_download(recipe_id, structure_id)?;
//! println!("{}", jobs.wait_for(id, Duration::from_secs(300))?);
//! ```

pub mod address;
pub mod coercion;
pub mod config;
pub mod controller;
pub mod directory;
pub mod error;
pub mod health;
pub mod logging;
pub mod store;
pub mod sync;
pub mod traversal;
pub mod types;
pub mod worker;

// Re-export commonly used types
pub use address::{TagAddress, TagPath};
pub use config::SyncConfig;
pub use controller::{ControllerClient, ControllerConnector, ControllerSession, Credentials};
#[cfg(feature = "opcua-client")]
pub use controller::UaConnector;
pub use error::{RecipeSyncError, Result};
pub use store::{MemoryStore, RecipeStore};
pub use sync::{DownloadReport, SyncEngine, UploadReport, Verification};
pub use types::{
    DeclaredType, DeviceValue, Discrepancy, DiscrepancyKind, RecipeId, StoreValue, StructureId,
    TagValue, Unit, UnitId, UnitRole,
};
pub use worker::{Job, JobEvent, JobHandle, JobOutcome, SyncService};
