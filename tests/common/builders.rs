//! Test data builders for creating test plants

use super::{fast_config, STEPS};
use recipe_sync::config::SyncConfig;
use recipe_sync::controller::mock::{MockConnector, MockController, DEFAULT_NAMESPACE_INDEX};
use recipe_sync::{
    DeclaredType, MemoryStore, RecipeId, StoreValue, StructureId, SyncEngine, TagValue, UnitId,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Endpoint URL of a test unit
pub fn endpoint(unit_id: UnitId) -> String {
    format!("opc.tcp://10.0.0.{}:4840", 10 + unit_id)
}

/// Builder for a plant: store mappings plus simulated controllers
pub struct PlantBuilder {
    structure_id: StructureId,
    store: MemoryStore,
    connector: MockConnector,
    controllers: HashMap<UnitId, MockController>,
}

impl PlantBuilder {
    pub fn new(structure_id: StructureId) -> Self {
        Self {
            structure_id,
            store: MemoryStore::new(),
            connector: MockConnector::new(),
            controllers: HashMap::new(),
        }
    }

    /// A unit whose data lives in the configured step array
    pub fn array_unit(self, id: UnitId, name: &str, controller: MockController) -> Self {
        let origin = format!("ns={};s={}", DEFAULT_NAMESPACE_INDEX, STEPS);
        self.unit(id, name, &origin, controller)
    }

    /// A unit whose data is one scalar at `tag`
    pub fn scalar_unit(self, id: UnitId, name: &str, tag: &str, controller: MockController) -> Self {
        let origin = format!("ns={};s={}", DEFAULT_NAMESPACE_INDEX, tag);
        self.unit(id, name, &origin, controller)
    }

    /// A unit known to the store whose endpoint nobody answers
    pub fn offline_unit(self, id: UnitId, name: &str) -> Self {
        let origin = format!("ns={};s={}", DEFAULT_NAMESPACE_INDEX, STEPS);
        self.store
            .map_structure(self.structure_id, id, name, origin, endpoint(id));
        self
    }

    fn unit(mut self, id: UnitId, name: &str, origin: &str, controller: MockController) -> Self {
        self.store
            .map_structure(self.structure_id, id, name, origin, endpoint(id));
        self.connector = self.connector.with_controller(endpoint(id), controller.clone());
        self.controllers.insert(id, controller);
        self
    }

    /// Seed a stored row
    pub fn stored(
        self,
        recipe_id: RecipeId,
        unit_id: UnitId,
        tag: &str,
        value: StoreValue,
        declared: DeclaredType,
    ) -> Self {
        self.store.insert([TagValue {
            recipe_id,
            unit_id,
            tag_name: tag.to_string(),
            value,
            declared,
        }]);
        self
    }

    pub fn build(self) -> Plant {
        Plant {
            store: Arc::new(self.store),
            connector: self.connector,
            controllers: self.controllers,
        }
    }
}

/// A built plant
pub struct Plant {
    pub store: Arc<MemoryStore>,
    pub connector: MockConnector,
    pub controllers: HashMap<UnitId, MockController>,
}

impl Plant {
    pub fn controller(&self, unit_id: UnitId) -> &MockController {
        &self.controllers[&unit_id]
    }

    pub fn engine(&self) -> SyncEngine {
        self.engine_with(fast_config())
    }

    pub fn engine_with(&self, config: SyncConfig) -> SyncEngine {
        SyncEngine::new(Arc::new(self.connector.clone()), self.store.clone(), config)
    }
}
