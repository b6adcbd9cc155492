//! Download pipeline: controllers to store

use super::report::{DownloadReport, UnitReport, Verification};
use super::SyncEngine;
use crate::address::TagAddress;
use crate::coercion;
use crate::controller::ControllerClient;
use crate::directory::{EndpointDirectory, Participant, TagOrigin};
use crate::error::{RecipeSyncError, Result};
use crate::traversal;
use crate::types::{DeviceValue, RecipeId, StructureId, TagValue, Unit};
use chrono::Utc;
use std::collections::HashSet;

/// Rows read from one unit
struct UnitData {
    steps: usize,
    rows: Vec<TagValue>,
}

fn tag_value(recipe_id: RecipeId, unit: &Unit, node: &TagAddress, value: &DeviceValue) -> TagValue {
    TagValue {
        recipe_id,
        unit_id: unit.id,
        tag_name: node.identifier(),
        value: coercion::to_store(value),
        declared: value.declared_type(),
    }
}

impl SyncEngine {
    /// Read every participating unit of `structure_id` into `recipe_id`
    ///
    /// Unit failures are isolated: the remaining units are still read, and
    /// rows of the units that succeeded are committed in one batch. The
    /// consistency check runs, and the recipe is marked synchronized, only
    /// when every unit succeeded. A store failure aborts the run.
    pub async fn download_to_recipe(
        &self,
        recipe_id: RecipeId,
        structure_id: StructureId,
    ) -> Result<DownloadReport> {
        let directory = self.directory()?;
        let participants = directory.participants(structure_id).await?;
        tracing::info!(
            "Downloading structure {} into recipe {} from {} units",
            structure_id,
            recipe_id,
            participants.len()
        );

        let mut units = Vec::with_capacity(participants.len());
        let mut staged: Vec<TagValue> = Vec::new();

        for participant in &participants {
            let unit = &participant.unit;
            match self.download_unit(&directory, recipe_id, participant).await {
                Ok(data) => {
                    tracing::info!("{}: read {} steps, {} values", unit, data.steps, data.rows.len());
                    units.push(UnitReport::succeeded(unit, data.steps, data.rows.len()));
                    staged.extend(data.rows);
                }
                Err(e) => {
                    tracing::warn!("{}: download failed: {}", unit, e);
                    units.push(UnitReport::failed(unit, e.to_string()));
                }
            }
        }

        if !staged.is_empty() {
            if let Err(e) = self.store.upsert_tag_values(&staged).await {
                tracing::error!("Commit of recipe {} failed: {}", recipe_id, e);
                return Err(e);
            }
        }

        let mut report = DownloadReport {
            recipe_id,
            structure_id,
            units,
            committed_rows: staged.len(),
            verification: Verification::NotRun,
            synchronized_at: None,
        };

        if !report.succeeded() {
            let failed: Vec<&str> = report
                .failed_units()
                .iter()
                .map(|u| u.unit_name.as_str())
                .collect();
            if failed.is_empty() {
                tracing::warn!("Structure {} has no participating units", structure_id);
            } else {
                tracing::warn!("Download of recipe {} failed for: {}", recipe_id, failed.join(", "));
            }
            return Ok(report);
        }

        let missing = self.missing_after_commit(recipe_id, &staged).await?;
        if missing > 0 {
            tracing::error!("{} committed rows of recipe {} not found in store", missing, recipe_id);
            report.verification =
                Verification::Failed(format!("{} committed rows not found in store", missing));
            return Ok(report);
        }

        report.verification = match self.check_consistency(recipe_id, structure_id).await {
            Ok(discrepancies) => Verification::Completed(discrepancies),
            Err(e) if e.is_unit_scoped() => {
                tracing::warn!("Verification of recipe {} failed: {}", recipe_id, e);
                Verification::Failed(e.to_string())
            }
            Err(e) => return Err(e),
        };

        if let Verification::Completed(_) = report.verification {
            let now = Utc::now();
            self.store.mark_recipe_synchronized(recipe_id, now).await?;
            report.synchronized_at = Some(now);
            tracing::info!("Recipe {} synchronized", recipe_id);
        }

        Ok(report)
    }

    async fn missing_after_commit(&self, recipe_id: RecipeId, staged: &[TagValue]) -> Result<usize> {
        let persisted = self.store.tag_values(recipe_id).await?;
        let keys: HashSet<_> = persisted.iter().map(TagValue::key).collect();
        Ok(staged.iter().filter(|row| !keys.contains(&row.key())).count())
    }

    async fn download_unit(
        &self,
        directory: &EndpointDirectory<'_>,
        recipe_id: RecipeId,
        participant: &Participant,
    ) -> Result<UnitData> {
        let origin = directory.origin(participant)?;
        let mut client = self.connect(&participant.unit).await?;
        let result = self
            .read_unit(&mut client, recipe_id, &participant.unit, &origin)
            .await;
        client.disconnect().await;
        result
    }

    async fn read_unit(
        &self,
        client: &mut ControllerClient,
        recipe_id: RecipeId,
        unit: &Unit,
        origin: &TagOrigin,
    ) -> Result<UnitData> {
        let ns = client
            .namespace_index(&self.config.controller.namespace_uri)
            .await?;

        match origin {
            TagOrigin::Array(root) => {
                let root = root.in_namespace(ns);
                let records = traversal::extract_steps(client, &root)
                    .await?
                    .ok_or_else(|| RecipeSyncError::Traversal {
                        address: root.to_string(),
                        message: format!("no step data on {}", unit.name),
                    })?;
                if records.is_empty() {
                    return Err(RecipeSyncError::Traversal {
                        address: root.to_string(),
                        message: format!("no valid steps on {}", unit.name),
                    });
                }

                let rows = records
                    .iter()
                    .flat_map(|record| record.fields.iter())
                    .map(|field| tag_value(recipe_id, unit, &field.node, &field.value))
                    .collect();
                Ok(UnitData {
                    steps: records.len(),
                    rows,
                })
            }
            TagOrigin::Scalar(address) => {
                let address = address.in_namespace(ns);
                let value = client.read(&address).await?;
                tracing::debug!("{}: {} = {}", unit, address, value);
                Ok(UnitData {
                    steps: 0,
                    rows: vec![tag_value(recipe_id, unit, &address, &value)],
                })
            }
        }
    }
}
