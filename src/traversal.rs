//! Array traversal and step extraction
//!
//! A step array on a controller is an object whose children are the array
//! elements; each element's variable children are the step's fields:
//!
//! ```text
//! "StepData"."RunningSteps"."Steps"
//! ├── "Steps"[0]            template, never data
//! │   └── "Speed"
//! ├── "Steps"[1]
//! │   ├── "Speed"           Float 12.5
//! │   └── "Enabled"         Boolean true
//! └── "Steps"[2]
//!     └── ...
//! ```
//!
//! [`extract_steps`] turns such a tree into [`StepRecord`]s in server
//! order. [`browse_tree`] is a depth-bounded listing used for diagnostics.

use crate::address::TagAddress;
use crate::controller::{BrowsedNode, ControllerClient};
use crate::error::Result;
use crate::types::{DeviceValue, StepField, StepRecord};

/// Extract the step records below an array root
///
/// Returns `Ok(None)` when the root has no children at all. Elements
/// addressing the template index are skipped, as are elements without any
/// variable child. Only one level below each element is read; nested
/// containers are ignored.
pub async fn extract_steps(
    client: &mut ControllerClient,
    root: &TagAddress,
) -> Result<Option<Vec<StepRecord>>> {
    let elements = client.browse(root).await?;
    if elements.is_empty() {
        tracing::debug!("{}: {} has no elements", client.endpoint(), root);
        return Ok(None);
    }

    let mut records = Vec::with_capacity(elements.len());
    for element in elements {
        if element.address.contains_placeholder() {
            tracing::trace!("Skipping template element {}", element.address);
            continue;
        }

        let mut fields: Vec<StepField> = Vec::new();
        for child in client.browse(&element.address).await? {
            if !child.is_variable() {
                continue;
            }
            if fields.iter().any(|f| f.name == child.display_name) {
                tracing::warn!(
                    "{}: duplicate field '{}' in {}, keeping the first",
                    client.endpoint(),
                    child.display_name,
                    element.address
                );
                continue;
            }
            let value = client.read(&child.address).await?;
            fields.push(StepField {
                name: child.display_name,
                declared: value.declared_type(),
                value,
                node: child.address,
            });
        }

        if fields.is_empty() {
            tracing::debug!("{} has no variables, skipped", element.address);
            continue;
        }
        records.push(StepRecord {
            element: element.address,
            fields,
        });
    }

    Ok(Some(records))
}

/// One node found by [`browse_tree`]
#[derive(Debug, Clone)]
pub struct BrowseEntry {
    /// Depth below the browsed root, starting at 1
    pub depth: usize,
    pub node: BrowsedNode,
    /// Current value for variables that could be read
    pub value: Option<DeviceValue>,
}

/// List the descendants of `root` depth-first, down to `max_depth` levels
pub async fn browse_tree(
    client: &mut ControllerClient,
    root: &TagAddress,
    max_depth: usize,
) -> Result<Vec<BrowseEntry>> {
    let mut entries = Vec::new();
    if max_depth == 0 {
        return Ok(entries);
    }

    let mut stack: Vec<(usize, BrowsedNode)> = client
        .browse(root)
        .await?
        .into_iter()
        .rev()
        .map(|n| (1, n))
        .collect();

    while let Some((depth, node)) = stack.pop() {
        let value = if node.is_variable() {
            match client.read(&node.address).await {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::debug!("Could not read {}: {}", node.address, e);
                    None
                }
            }
        } else {
            None
        };

        if !node.is_variable() && depth < max_depth {
            let children = client.browse(&node.address).await?;
            stack.extend(children.into_iter().rev().map(|c| (depth + 1, c)));
        }

        entries.push(BrowseEntry { depth, node, value });
    }

    Ok(entries)
}
