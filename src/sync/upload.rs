//! Upload pipeline: store to controllers

use super::report::{UnitReport, UploadReport};
use super::{qualify, SyncEngine};
use crate::address::{TagAddress, TagPath};
use crate::controller::ControllerClient;
use crate::error::{RecipeSyncError, Result, ResultExt};
use crate::types::{RecipeId, StoreValue, TagValue, Unit};
use std::collections::{BTreeSet, HashMap};

impl SyncEngine {
    /// Write the stored rows of `recipe_id` to every known unit
    ///
    /// Satellite units have their pending steps cleared first, including
    /// those the recipe has no rows for; a unit whose clear is not confirmed
    /// gets no writes. A failing field write fails its
    /// unit after the remaining fields were attempted. When `recipe_name` is
    /// given it is recorded as the active recipe and written to the
    /// satellites.
    pub async fn upload_from_recipe(
        &self,
        recipe_id: RecipeId,
        recipe_name: Option<&str>,
    ) -> Result<UploadReport> {
        let clear_path = self
            .config
            .addresses
            .clear_pending_steps_path()
            .map_err(|e| RecipeSyncError::Config(format!("Invalid clear address: {}", e)))?;
        let name_path = self
            .config
            .addresses
            .recipe_name_path()
            .map_err(|e| RecipeSyncError::Config(format!("Invalid recipe name address: {}", e)))?;

        let directory = self.directory()?;
        let endpoints = directory.units().await?;
        let names: HashMap<_, _> = self
            .store
            .recipe_structure_map()
            .await?
            .into_iter()
            .map(|m| (m.unit_id, m.unit_name))
            .collect();
        let rows = self.store.tag_values(recipe_id).await?;

        for row in &rows {
            if !endpoints.iter().any(|(e, _)| e.id == row.unit_id) {
                tracing::warn!("Ignoring {} of unknown unit {}", row.tag_name, row.unit_id);
            }
        }

        if let Some(name) = recipe_name {
            self.store.set_active_recipe(name).await?;
        }

        tracing::info!(
            "Uploading recipe {} ({} values) to {} units",
            recipe_id,
            rows.len(),
            endpoints.len()
        );

        let mut units = Vec::with_capacity(endpoints.len());
        let mut first = true;
        for (endpoint, role) in endpoints {
            let unit = Unit {
                id: endpoint.id,
                name: names
                    .get(&endpoint.id)
                    .cloned()
                    .unwrap_or_else(|| format!("unit {}", endpoint.id)),
                role,
                address: endpoint.address,
            };
            let unit_rows: Vec<&TagValue> = rows.iter().filter(|r| r.unit_id == unit.id).collect();

            if unit_rows.is_empty() && unit.is_reference() {
                tracing::debug!("{}: nothing to upload", unit);
                units.push(UnitReport::succeeded(&unit, 0, 0));
                continue;
            }

            if !first {
                tokio::time::sleep(self.config.upload.unit_pause()).await;
            }
            first = false;

            match self
                .upload_unit(&unit, &unit_rows, recipe_name, &clear_path, &name_path)
                .await
            {
                Ok(written) => {
                    let steps = step_count(&unit_rows);
                    tracing::info!("{}: wrote {} values", unit, written);
                    units.push(UnitReport::succeeded(&unit, steps, written));
                }
                Err(e) => {
                    tracing::warn!("{}: upload failed: {}", unit, e);
                    units.push(UnitReport::failed(&unit, e.to_string()));
                }
            }
        }

        let report = UploadReport {
            recipe_id,
            recipe_name: recipe_name.map(str::to_string),
            units,
        };
        if report.succeeded() {
            tracing::info!("Recipe {} uploaded", recipe_id);
        } else {
            tracing::warn!(
                "Upload of recipe {} failed for {} units",
                recipe_id,
                report.failed_units().len()
            );
        }
        Ok(report)
    }

    async fn upload_unit(
        &self,
        unit: &Unit,
        rows: &[&TagValue],
        recipe_name: Option<&str>,
        clear_path: &TagPath,
        name_path: &TagPath,
    ) -> Result<usize> {
        if !unit.is_reference() {
            self.clear_pending_steps(unit, clear_path).await?;
            tokio::time::sleep(self.config.upload.clear_settle()).await;
        }
        if rows.is_empty() {
            tracing::debug!("{}: cleared, nothing to upload", unit);
            return Ok(0);
        }

        let mut client = self.connect(unit).await?;
        let result = self.write_rows(&mut client, unit, rows).await;

        if let (Ok(_), Some(name)) = (&result, recipe_name) {
            if self.config.upload.write_recipe_name && !unit.is_reference() {
                self.write_recipe_name(&mut client, unit, name, name_path).await;
            }
        }

        client.disconnect().await;
        result
    }

    /// Clear a unit's pending step state in a session of its own
    async fn clear_pending_steps(&self, unit: &Unit, clear_path: &TagPath) -> Result<()> {
        let timeout = self.config.upload.clear_timeout();
        let mut client = self.connect(unit).await?;

        let outcome = tokio::time::timeout(timeout, async {
            let ns = client
                .namespace_index(&self.config.controller.namespace_uri)
                .await?;
            client
                .write(&TagAddress::new(ns, clear_path.clone()), &StoreValue::Bool(true))
                .await
        })
        .await;
        client.disconnect().await;

        match outcome {
            Ok(Ok(_)) => {
                tracing::debug!("{}: pending steps cleared", unit);
                Ok(())
            }
            Ok(Err(e)) => Err(e).context(format!("clearing pending steps on {}", unit.name)),
            Err(_) => Err(RecipeSyncError::write(
                clear_path,
                format!("clear not confirmed within {:?}", timeout),
            )),
        }
    }

    /// Write every row, then fail if any single write failed
    async fn write_rows(
        &self,
        client: &mut ControllerClient,
        unit: &Unit,
        rows: &[&TagValue],
    ) -> Result<usize> {
        let ns = client
            .namespace_index(&self.config.controller.namespace_uri)
            .await?;

        let mut written = 0;
        let mut failures: Vec<(String, RecipeSyncError)> = Vec::new();
        for row in rows {
            let result = match qualify(&row.tag_name, ns) {
                Ok(address) => client.write(&address, &row.value).await.map(|_| ()),
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => written += 1,
                Err(e) => {
                    tracing::warn!("{}: writing {} failed: {}", unit, row.tag_name, e);
                    failures.push((row.tag_name.clone(), e));
                }
            }
        }

        match failures.into_iter().next() {
            None => Ok(written),
            Some((tag, first)) => Err(RecipeSyncError::Write {
                address: tag,
                message: format!(
                    "{} of {} values not written, first error: {}",
                    rows.len() - written,
                    rows.len(),
                    first
                ),
            }),
        }
    }

    async fn write_recipe_name(
        &self,
        client: &mut ControllerClient,
        unit: &Unit,
        name: &str,
        name_path: &TagPath,
    ) {
        let result = async {
            let ns = client
                .namespace_index(&self.config.controller.namespace_uri)
                .await?;
            client
                .write(&TagAddress::new(ns, name_path.clone()), &StoreValue::text(name))
                .await
        }
        .await;
        if let Err(e) = result {
            tracing::warn!("{}: recipe name not written: {}", unit, e);
        }
    }
}

/// Distinct step elements touched by a set of rows
fn step_count(rows: &[&TagValue]) -> usize {
    rows.iter()
        .filter_map(|r| qualify(&r.tag_name, 0).ok()?.path().array_index())
        .collect::<BTreeSet<_>>()
        .len()
}
