//! Synchronization engine
//!
//! [`SyncEngine`] ties the controller connector, the recipe store and the
//! configuration together and runs the three pipelines:
//!
//! - [`SyncEngine::download_to_recipe`] - controllers to store
//! - [`SyncEngine::upload_from_recipe`] - store to controllers
//! - [`SyncEngine::check_consistency`] - diff live values against the store
//!
//! Units are processed one after another. A failing unit is recorded in the
//! run's report and the run moves on; only store, configuration and channel
//! errors abort a run.

mod checker;
mod download;
mod report;
mod upload;

pub use report::{DownloadReport, UnitOutcome, UnitReport, UploadReport, Verification};

use crate::address::{TagAddress, TagPath};
use crate::config::SyncConfig;
use crate::controller::{ControllerClient, ControllerConnector};
use crate::directory::EndpointDirectory;
use crate::error::{RecipeSyncError, Result};
use crate::health::{self, UnitReachability};
use crate::store::RecipeStore;
use crate::traversal::{self, BrowseEntry};
use crate::types::{Unit, UnitId, UnitRole};
use std::sync::Arc;

/// Runs synchronization pipelines against one plant
pub struct SyncEngine {
    connector: Arc<dyn ControllerConnector>,
    store: Arc<dyn RecipeStore>,
    config: SyncConfig,
}

impl SyncEngine {
    pub fn new(
        connector: Arc<dyn ControllerConnector>,
        store: Arc<dyn RecipeStore>,
        config: SyncConfig,
    ) -> Self {
        Self {
            connector,
            store,
            config,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn RecipeStore> {
        &self.store
    }

    fn directory(&self) -> Result<EndpointDirectory<'_>> {
        let step_array = self
            .config
            .addresses
            .step_array_path()
            .map_err(|e| RecipeSyncError::Config(format!("Invalid step array address: {}", e)))?;
        Ok(EndpointDirectory::new(
            self.store.as_ref(),
            self.config.units.reference_unit_id,
            step_array,
        ))
    }

    async fn connect(&self, unit: &Unit) -> Result<ControllerClient> {
        ControllerClient::connect(
            self.connector.as_ref(),
            &unit.address,
            &self.config.controller.credentials(),
            self.config.controller.connect_timeout(),
        )
        .await
    }

    /// Check whether every known unit answers on its endpoint port
    pub async fn probe_units(&self) -> Result<Vec<UnitReachability>> {
        let units = self.store.units().await?;
        Ok(health::probe_units(&units, &self.config.health).await)
    }

    /// List the address space below `address` on one unit
    ///
    /// `address` may be namespace-relative (`"A"."B"`) or qualified
    /// (`ns=3;s="A"."B"`); either way it is requalified with the namespace
    /// index resolved for this session.
    pub async fn browse(
        &self,
        unit_id: UnitId,
        address: &str,
        max_depth: Option<usize>,
    ) -> Result<Vec<BrowseEntry>> {
        let endpoint = self
            .store
            .units()
            .await?
            .into_iter()
            .find(|u| u.id == unit_id)
            .ok_or_else(|| RecipeSyncError::Config(format!("Unknown unit {}", unit_id)))?;
        let unit = Unit {
            id: endpoint.id,
            name: format!("unit {}", endpoint.id),
            role: UnitRole::Satellite,
            address: endpoint.address,
        };
        let depth = max_depth.unwrap_or(self.config.controller.max_browse_depth);

        let mut client = self.connect(&unit).await?;
        let result = async {
            let ns = client
                .namespace_index(&self.config.controller.namespace_uri)
                .await?;
            let root = qualify(address, ns)?;
            traversal::browse_tree(&mut client, &root, depth).await
        }
        .await;
        client.disconnect().await;
        result
    }
}

/// Qualify a persisted tag name with a session's namespace index
///
/// Tag names are normally namespace-relative; a name that carries its own
/// `ns=` prefix is moved to `namespace` as well.
pub(crate) fn qualify(tag_name: &str, namespace: u16) -> Result<TagAddress> {
    if tag_name.trim_start().starts_with("ns=") {
        Ok(TagAddress::parse(tag_name)?.in_namespace(namespace))
    } else {
        Ok(TagAddress::new(namespace, TagPath::parse(tag_name)?))
    }
}
