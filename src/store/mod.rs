//! Relational store contract
//!
//! The recipe store is an external collaborator; the pipelines only use the
//! calls of [`RecipeStore`]. Two implementations ship with the crate:
//!
//! - [`MemoryStore`] - in-process, for tests and embedding
//! - [`SqliteStore`] - `sqlx` over SQLite (feature `sqlite-store`)
//!
//! Writes of tag values are staged by the pipelines and handed over in one
//! [`RecipeStore::upsert_tag_values`] call, which implementations apply as a
//! single transaction.

mod memory;
#[cfg(feature = "sqlite-store")]
mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite-store")]
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::types::{RecipeId, RecipeStructureMapping, TagValue, UnitEndpoint};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Call contract of the recipe store
#[async_trait]
pub trait RecipeStore: Send + Sync {
    /// Every (unit, structure, tag origin, address) mapping
    async fn recipe_structure_map(&self) -> Result<Vec<RecipeStructureMapping>>;

    /// Every known unit with its endpoint
    async fn units(&self) -> Result<Vec<UnitEndpoint>>;

    /// Insert or update rows keyed by (recipe, unit, tag name), all or nothing
    async fn upsert_tag_values(&self, rows: &[TagValue]) -> Result<()>;

    /// All rows of a recipe
    async fn tag_values(&self, recipe_id: RecipeId) -> Result<Vec<TagValue>>;

    /// Record when a recipe was last verified against the controllers
    async fn mark_recipe_synchronized(&self, recipe_id: RecipeId, at: DateTime<Utc>) -> Result<()>;

    /// Record the recipe currently loaded on the line
    async fn set_active_recipe(&self, name: &str) -> Result<()>;
}
