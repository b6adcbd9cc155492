//! Pipeline run reports
//!
//! Every pipeline run returns an immutable snapshot of what happened. Callers
//! (the job worker, the CLI) read step counts and failures from the report
//! instead of shared counters.

use crate::types::{Discrepancy, RecipeId, StructureId, Unit, UnitId};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Result of processing one unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum UnitOutcome {
    Succeeded {
        /// Step elements read or written (0 for scalar units)
        steps: usize,
        /// Individual values read or written
        fields: usize,
    },
    Failed { reason: String },
}

/// Per-unit line of a report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitReport {
    pub unit_id: UnitId,
    pub unit_name: String,
    pub outcome: UnitOutcome,
}

impl UnitReport {
    pub fn succeeded(unit: &Unit, steps: usize, fields: usize) -> Self {
        Self {
            unit_id: unit.id,
            unit_name: unit.name.clone(),
            outcome: UnitOutcome::Succeeded { steps, fields },
        }
    }

    pub fn failed(unit: &Unit, reason: impl Into<String>) -> Self {
        Self {
            unit_id: unit.id,
            unit_name: unit.name.clone(),
            outcome: UnitOutcome::Failed {
                reason: reason.into(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, UnitOutcome::Succeeded { .. })
    }

    /// Step count of a successful unit
    pub fn steps(&self) -> Option<usize> {
        match self.outcome {
            UnitOutcome::Succeeded { steps, .. } => Some(steps),
            UnitOutcome::Failed { .. } => None,
        }
    }
}

impl std::fmt::Display for UnitReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.outcome {
            UnitOutcome::Succeeded { steps, fields } => write!(
                f,
                "{} (unit {}): {} steps, {} values",
                self.unit_name, self.unit_id, steps, fields
            ),
            UnitOutcome::Failed { reason } => {
                write!(f, "{} (unit {}): FAILED - {}", self.unit_name, self.unit_id, reason)
            }
        }
    }
}

/// Outcome of the post-download verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Verification {
    /// Skipped because a unit failed
    NotRun,
    /// Checker ran; an empty list means store and devices agree
    Completed(Vec<Discrepancy>),
    /// Checker could not complete
    Failed(String),
}

/// Snapshot of one download run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadReport {
    pub recipe_id: RecipeId,
    pub structure_id: StructureId,
    pub units: Vec<UnitReport>,
    /// Rows handed to the store in the run's single commit
    pub committed_rows: usize,
    pub verification: Verification,
    /// Set when the recipe was marked synchronized
    pub synchronized_at: Option<DateTime<Utc>>,
}

impl DownloadReport {
    /// True when at least one unit took part and every unit succeeded
    pub fn succeeded(&self) -> bool {
        !self.units.is_empty() && self.units.iter().all(UnitReport::is_success)
    }

    pub fn failed_units(&self) -> Vec<&UnitReport> {
        self.units.iter().filter(|u| !u.is_success()).collect()
    }

    /// Step count of a unit, if it succeeded
    pub fn steps_for(&self, unit_id: UnitId) -> Option<usize> {
        self.units
            .iter()
            .find(|u| u.unit_id == unit_id)
            .and_then(UnitReport::steps)
    }

    pub fn discrepancies(&self) -> Option<&[Discrepancy]> {
        match &self.verification {
            Verification::Completed(list) => Some(list),
            _ => None,
        }
    }
}

impl std::fmt::Display for DownloadReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Download of structure {} into recipe {}: {}",
            self.structure_id,
            self.recipe_id,
            if self.succeeded() { "OK" } else { "FAILED" }
        )?;
        for unit in &self.units {
            writeln!(f, "  {}", unit)?;
        }
        writeln!(f, "  committed rows: {}", self.committed_rows)?;
        match &self.verification {
            Verification::NotRun => writeln!(f, "  verification: not run")?,
            Verification::Failed(reason) => writeln!(f, "  verification failed: {}", reason)?,
            Verification::Completed(list) if list.is_empty() => {
                writeln!(f, "  verification: store and controllers agree")?
            }
            Verification::Completed(list) => {
                writeln!(f, "  verification: {} discrepancies", list.len())?;
                for d in list {
                    writeln!(f, "    {}", d)?;
                }
            }
        }
        if let Some(at) = self.synchronized_at {
            writeln!(f, "  synchronized at {}", at.to_rfc3339())?;
        }
        Ok(())
    }
}

/// Snapshot of one upload run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadReport {
    pub recipe_id: RecipeId,
    pub recipe_name: Option<String>,
    pub units: Vec<UnitReport>,
}

impl UploadReport {
    /// True when at least one unit took part and every unit succeeded
    pub fn succeeded(&self) -> bool {
        !self.units.is_empty() && self.units.iter().all(UnitReport::is_success)
    }

    pub fn failed_units(&self) -> Vec<&UnitReport> {
        self.units.iter().filter(|u| !u.is_success()).collect()
    }

    pub fn unit(&self, unit_id: UnitId) -> Option<&UnitReport> {
        self.units.iter().find(|u| u.unit_id == unit_id)
    }
}

impl std::fmt::Display for UploadReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "Upload of recipe {}{}: {}",
            self.recipe_id,
            self.recipe_name
                .as_deref()
                .map(|n| format!(" ({})", n))
                .unwrap_or_default(),
            if self.succeeded() { "OK" } else { "FAILED" }
        )?;
        for unit in &self.units {
            writeln!(f, "  {}", unit)?;
        }
        Ok(())
    }
}
