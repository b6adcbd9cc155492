//! Consistency checker: live values against the store

use super::SyncEngine;
use crate::coercion;
use crate::directory::{Participant, TagOrigin};
use crate::error::{RecipeSyncError, Result, ResultExt};
use crate::traversal;
use crate::types::{Discrepancy, DiscrepancyKind, DeviceValue, RecipeId, StructureId};
use std::collections::HashMap;

impl SyncEngine {
    /// Compare the stored rows of `recipe_id` with the participating devices
    ///
    /// The store is the baseline: a stored tag absent on its device or holding
    /// a different value is reported; device tags unknown to the store are
    /// not. An empty result means both sides agree.
    pub async fn check_consistency(
        &self,
        recipe_id: RecipeId,
        structure_id: StructureId,
    ) -> Result<Vec<Discrepancy>> {
        let directory = self.directory()?;
        let participants = directory.participants(structure_id).await?;
        let stored = self.store.tag_values(recipe_id).await?;

        let mut discrepancies = Vec::new();
        for participant in &participants {
            let unit = &participant.unit;
            let live = self
                .read_live(participant)
                .await
                .with_context(|| format!("checking {}", unit))?;
            let mut compared = 0usize;

            for row in stored.iter().filter(|r| r.unit_id == unit.id) {
                compared += 1;
                let kind = match live.get(&row.tag_name) {
                    None => DiscrepancyKind::MissingOnDevice {
                        stored: row.value.to_string(),
                    },
                    Some(value) if !coercion::values_agree(row.declared, &row.value, value) => {
                        DiscrepancyKind::ValueMismatch {
                            stored: row.value.to_string(),
                            live: value.to_string(),
                        }
                    }
                    Some(_) => continue,
                };
                let discrepancy = Discrepancy {
                    unit_id: unit.id,
                    tag_name: row.tag_name.clone(),
                    kind,
                };
                tracing::warn!("{}", discrepancy);
                discrepancies.push(discrepancy);
            }

            tracing::debug!("{}: compared {} stored values", unit, compared);
        }

        if discrepancies.is_empty() {
            tracing::info!("Recipe {} matches all controllers", recipe_id);
        } else {
            tracing::warn!(
                "Recipe {} has {} discrepancies",
                recipe_id,
                discrepancies.len()
            );
        }
        Ok(discrepancies)
    }

    /// Live values of one unit keyed by namespace-relative tag name
    async fn read_live(&self, participant: &Participant) -> Result<HashMap<String, DeviceValue>> {
        let origin = self.directory()?.origin(participant)?;
        let mut client = self.connect(&participant.unit).await?;

        let result = async {
            let ns = client
                .namespace_index(&self.config.controller.namespace_uri)
                .await?;
            let mut live = HashMap::new();
            match &origin {
                TagOrigin::Array(root) => {
                    let records = traversal::extract_steps(&mut client, &root.in_namespace(ns))
                        .await?
                        .unwrap_or_default();
                    for field in records.into_iter().flat_map(|r| r.fields) {
                        live.insert(field.node.identifier(), field.value);
                    }
                }
                TagOrigin::Scalar(address) => {
                    let address = address.in_namespace(ns);
                    let value = client.read(&address).await?;
                    live.insert(address.identifier(), value);
                }
            }
            Ok::<_, RecipeSyncError>(live)
        }
        .await;

        client.disconnect().await;
        result
    }
}
