//! In-memory recipe store

use super::RecipeStore;
use crate::error::Result;
use crate::types::{
    RecipeId, RecipeStructureMapping, StructureId, TagValue, UnitEndpoint, UnitId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MemoryState {
    units: Vec<UnitEndpoint>,
    mappings: Vec<RecipeStructureMapping>,
    rows: Vec<TagValue>,
    synchronized: HashMap<RecipeId, DateTime<Utc>>,
    active_recipe: Option<String>,
}

/// Thread-safe store kept entirely in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a unit
    pub fn add_unit(&self, id: UnitId, address: impl Into<String>) {
        let address = address.into();
        let mut state = self.lock();
        state.units.retain(|u| u.id != id);
        state.units.push(UnitEndpoint { id, address });
    }

    /// Map a unit into a recipe structure
    ///
    /// The unit is registered too if it is not known yet.
    pub fn map_structure(
        &self,
        structure_id: StructureId,
        unit_id: UnitId,
        unit_name: impl Into<String>,
        tag_origin: impl Into<String>,
        address: impl Into<String>,
    ) {
        let address = address.into();
        let mut state = self.lock();
        if !state.units.iter().any(|u| u.id == unit_id) {
            state.units.push(UnitEndpoint {
                id: unit_id,
                address: address.clone(),
            });
        }
        state.mappings.push(RecipeStructureMapping {
            unit_id,
            unit_name: unit_name.into(),
            structure_id,
            tag_origin: tag_origin.into(),
            address,
        });
    }

    /// Insert or replace rows by (recipe, unit, tag name)
    pub fn insert(&self, rows: impl IntoIterator<Item = TagValue>) {
        let mut state = self.lock();
        for row in rows {
            match state.rows.iter().position(|r| r.key() == row.key()) {
                Some(i) => {
                    state.rows[i].value = row.value;
                    state.rows[i].declared = row.declared;
                }
                None => state.rows.push(row),
            }
        }
    }

    /// Timestamp recorded by the last successful verification
    pub fn synchronized_at(&self, recipe_id: RecipeId) -> Option<DateTime<Utc>> {
        self.lock().synchronized.get(&recipe_id).copied()
    }

    pub fn active_recipe(&self) -> Option<String> {
        self.lock().active_recipe.clone()
    }

    /// Number of rows held for a recipe
    pub fn row_count(&self, recipe_id: RecipeId) -> usize {
        self.lock()
            .rows
            .iter()
            .filter(|r| r.recipe_id == recipe_id)
            .count()
    }
}

#[async_trait]
impl RecipeStore for MemoryStore {
    async fn recipe_structure_map(&self) -> Result<Vec<RecipeStructureMapping>> {
        Ok(self.lock().mappings.clone())
    }

    async fn units(&self) -> Result<Vec<UnitEndpoint>> {
        Ok(self.lock().units.clone())
    }

    async fn upsert_tag_values(&self, rows: &[TagValue]) -> Result<()> {
        self.insert(rows.iter().cloned());
        Ok(())
    }

    async fn tag_values(&self, recipe_id: RecipeId) -> Result<Vec<TagValue>> {
        Ok(self
            .lock()
            .rows
            .iter()
            .filter(|r| r.recipe_id == recipe_id)
            .cloned()
            .collect())
    }

    async fn mark_recipe_synchronized(&self, recipe_id: RecipeId, at: DateTime<Utc>) -> Result<()> {
        self.lock().synchronized.insert(recipe_id, at);
        Ok(())
    }

    async fn set_active_recipe(&self, name: &str) -> Result<()> {
        self.lock().active_recipe = Some(name.to_string());
        Ok(())
    }
}
