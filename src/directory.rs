//! Endpoint directory
//!
//! Resolves which units take part in a recipe structure, and how each unit's
//! data is addressed: a step array to traverse, or a single scalar.

use crate::address::{TagAddress, TagPath};
use crate::error::Result;
use crate::store::RecipeStore;
use crate::types::{StructureId, Unit, UnitEndpoint, UnitId, UnitRole};

/// How a participating unit's data is addressed
#[derive(Debug, Clone, PartialEq)]
pub enum TagOrigin {
    /// Root of a step array
    Array(TagAddress),
    /// A single variable
    Scalar(TagAddress),
}

impl TagOrigin {
    pub fn address(&self) -> &TagAddress {
        match self {
            TagOrigin::Array(addr) | TagOrigin::Scalar(addr) => addr,
        }
    }
}

/// A unit taking part in a synchronization run
#[derive(Debug, Clone)]
pub struct Participant {
    pub unit: Unit,
    /// Tag origin as stored, parsed per unit by [`EndpointDirectory::origin`]
    pub raw_origin: String,
}

/// Directory over the store's structure map
pub struct EndpointDirectory<'a> {
    store: &'a dyn RecipeStore,
    reference_unit_id: UnitId,
    step_array: TagPath,
}

impl<'a> EndpointDirectory<'a> {
    pub fn new(store: &'a dyn RecipeStore, reference_unit_id: UnitId, step_array: TagPath) -> Self {
        Self {
            store,
            reference_unit_id,
            step_array,
        }
    }

    fn role(&self, unit_id: UnitId) -> UnitRole {
        if unit_id == self.reference_unit_id {
            UnitRole::Reference
        } else {
            UnitRole::Satellite
        }
    }

    /// Units mapped into `structure_id`, in store order
    pub async fn participants(&self, structure_id: StructureId) -> Result<Vec<Participant>> {
        let participants: Vec<Participant> = self
            .store
            .recipe_structure_map()
            .await?
            .into_iter()
            .filter(|m| m.structure_id == structure_id)
            .map(|m| Participant {
                unit: Unit {
                    id: m.unit_id,
                    name: m.unit_name,
                    role: self.role(m.unit_id),
                    address: m.address,
                },
                raw_origin: m.tag_origin,
            })
            .collect();

        tracing::debug!(
            "Structure {} has {} participating units",
            structure_id,
            participants.len()
        );
        Ok(participants)
    }

    /// Every known unit, with its role
    pub async fn units(&self) -> Result<Vec<(UnitEndpoint, UnitRole)>> {
        Ok(self
            .store
            .units()
            .await?
            .into_iter()
            .map(|u| {
                let role = self.role(u.id);
                (u, role)
            })
            .collect())
    }

    /// Parse and classify a participant's tag origin
    ///
    /// The reference unit always holds a scalar. Other units hold a step array
    /// when their origin names the configured step array path.
    pub fn origin(&self, participant: &Participant) -> Result<TagOrigin> {
        let address = TagAddress::parse(&participant.raw_origin)?;
        if participant.unit.is_reference() {
            return Ok(TagOrigin::Scalar(address));
        }
        if address.path().same_node(&self.step_array) {
            Ok(TagOrigin::Array(address))
        } else {
            Ok(TagOrigin::Scalar(address))
        }
    }
}
