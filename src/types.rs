//! Core data types for recipe synchronization
//!
//! This module contains the data model shared by the pipelines: units and
//! their structure mappings, step records produced by traversal, persisted
//! tag values, and the discrepancies reported by the consistency checker.
//!
//! # Value Types
//!
//! Two type systems meet here:
//!
//! - [`DeviceValue`] - the controller's discriminated variant, always tagged
//!   with one of the supported [`DeclaredType`]s
//! - [`StoreValue`] - the loosely typed scalar held by the relational store
//!
//! Conversion between them lives in [`crate::coercion`].

use crate::address::TagAddress;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Identifier of a unit (one field controller)
pub type UnitId = u16;

/// Identifier of a persisted recipe
pub type RecipeId = i64;

/// Identifier of a recipe structure
pub type StructureId = i64;

/// Protocol variant types supported by the synchronization engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeclaredType {
    Boolean,
    Float,
    Int16,
    Int32,
    Int64,
    UInt16,
    UInt32,
    UInt64,
    String,
}

impl DeclaredType {
    /// All supported types, in protocol order
    pub fn all() -> &'static [DeclaredType] {
        &[
            DeclaredType::Boolean,
            DeclaredType::Float,
            DeclaredType::Int16,
            DeclaredType::Int32,
            DeclaredType::Int64,
            DeclaredType::UInt16,
            DeclaredType::UInt32,
            DeclaredType::UInt64,
            DeclaredType::String,
        ]
    }

    /// Type name as persisted in the store
    pub fn name(&self) -> &'static str {
        match self {
            DeclaredType::Boolean => "Boolean",
            DeclaredType::Float => "Float",
            DeclaredType::Int16 => "Int16",
            DeclaredType::Int32 => "Int32",
            DeclaredType::Int64 => "Int64",
            DeclaredType::UInt16 => "UInt16",
            DeclaredType::UInt32 => "UInt32",
            DeclaredType::UInt64 => "UInt64",
            DeclaredType::String => "String",
        }
    }

    /// Returns true for the signed integer widths
    pub fn is_signed_integer(&self) -> bool {
        matches!(
            self,
            DeclaredType::Int16 | DeclaredType::Int32 | DeclaredType::Int64
        )
    }

    /// Returns true for the unsigned integer widths
    pub fn is_unsigned_integer(&self) -> bool {
        matches!(
            self,
            DeclaredType::UInt16 | DeclaredType::UInt32 | DeclaredType::UInt64
        )
    }
}

impl std::fmt::Display for DeclaredType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for DeclaredType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeclaredType::all()
            .iter()
            .copied()
            .find(|t| t.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unsupported variant type '{}'", s))
    }
}

/// A typed value as read from or written to a controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeviceValue {
    Boolean(bool),
    Float(f32),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    String(String),
}

impl DeviceValue {
    /// The variant type carried by this value
    pub fn declared_type(&self) -> DeclaredType {
        match self {
            DeviceValue::Boolean(_) => DeclaredType::Boolean,
            DeviceValue::Float(_) => DeclaredType::Float,
            DeviceValue::Int16(_) => DeclaredType::Int16,
            DeviceValue::Int32(_) => DeclaredType::Int32,
            DeviceValue::Int64(_) => DeclaredType::Int64,
            DeviceValue::UInt16(_) => DeclaredType::UInt16,
            DeviceValue::UInt32(_) => DeclaredType::UInt32,
            DeviceValue::UInt64(_) => DeclaredType::UInt64,
            DeviceValue::String(_) => DeclaredType::String,
        }
    }
}

/// Canonical printable form, used for store-vs-device comparison
impl std::fmt::Display for DeviceValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceValue::Boolean(v) => write!(f, "{}", v),
            DeviceValue::Float(v) => write!(f, "{}", v),
            DeviceValue::Int16(v) => write!(f, "{}", v),
            DeviceValue::Int32(v) => write!(f, "{}", v),
            DeviceValue::Int64(v) => write!(f, "{}", v),
            DeviceValue::UInt16(v) => write!(f, "{}", v),
            DeviceValue::UInt32(v) => write!(f, "{}", v),
            DeviceValue::UInt64(v) => write!(f, "{}", v),
            DeviceValue::String(v) => write!(f, "{}", v),
        }
    }
}

/// A scalar as held by the relational store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoreValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl StoreValue {
    /// Shorthand for a text value
    pub fn text(value: impl Into<String>) -> Self {
        StoreValue::Text(value.into())
    }

    /// Store type name, used in log and error messages
    pub fn kind(&self) -> &'static str {
        match self {
            StoreValue::Bool(_) => "bool",
            StoreValue::Int(_) => "int",
            StoreValue::Float(_) => "float",
            StoreValue::Text(_) => "string",
        }
    }
}

impl std::fmt::Display for StoreValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreValue::Bool(v) => write!(f, "{}", v),
            StoreValue::Int(v) => write!(f, "{}", v),
            StoreValue::Float(v) => write!(f, "{}", v),
            StoreValue::Text(v) => write!(f, "{}", v),
        }
    }
}

/// Role of a unit within a recipe structure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum UnitRole {
    /// Master unit; holds a single scalar, never traversed or cleared
    Reference,
    /// Unit owning a step array
    #[default]
    Satellite,
}

impl std::fmt::Display for UnitRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitRole::Reference => write!(f, "reference"),
            UnitRole::Satellite => write!(f, "satellite"),
        }
    }
}

/// One independently addressable field controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub id: UnitId,
    pub name: String,
    pub role: UnitRole,
    /// Endpoint URL, e.g. `opc.tcp://192.168.0.11:4840`
    pub address: String,
}

impl Unit {
    pub fn is_reference(&self) -> bool {
        self.role == UnitRole::Reference
    }
}

impl std::fmt::Display for Unit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (unit {})", self.name, self.id)
    }
}

/// Row of the store's unit listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitEndpoint {
    pub id: UnitId,
    pub address: String,
}

/// Row of the store's recipe-structure map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeStructureMapping {
    pub unit_id: UnitId,
    pub unit_name: String,
    pub structure_id: StructureId,
    /// Address of the step array root or of a scalar
    pub tag_origin: String,
    /// Endpoint URL of the unit
    pub address: String,
}

/// One variable of a step element
#[derive(Debug, Clone, PartialEq)]
pub struct StepField {
    /// Display name of the variable
    pub name: String,
    pub value: DeviceValue,
    pub declared: DeclaredType,
    /// Address of the variable node
    pub node: TagAddress,
}

/// The variables of one array element, in server order
#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    /// Address of the array element
    pub element: TagAddress,
    pub fields: Vec<StepField>,
}

impl StepRecord {
    /// Array index embedded in the element address
    pub fn index(&self) -> Option<u32> {
        self.element.path().array_index()
    }

    /// Look up a field by display name
    pub fn field(&self, name: &str) -> Option<&StepField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// The persisted unit of recipe data
///
/// Within one recipe, `(unit_id, tag_name)` is unique.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagValue {
    pub recipe_id: RecipeId,
    pub unit_id: UnitId,
    /// Namespace-relative tag path, e.g. `"StepData"."RunningSteps"."Steps"[1]."Speed"`
    pub tag_name: String,
    pub value: StoreValue,
    pub declared: DeclaredType,
}

impl TagValue {
    /// Key under which the store keeps this row unique
    pub fn key(&self) -> (RecipeId, UnitId, &str) {
        (self.recipe_id, self.unit_id, self.tag_name.as_str())
    }
}

/// Kind of mismatch between store and device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscrepancyKind {
    /// Present in the store, absent on the device
    MissingOnDevice { stored: String },
    /// Present on both sides with different values
    ValueMismatch { stored: String, live: String },
}

/// One mismatch found by the consistency checker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub unit_id: UnitId,
    pub tag_name: String,
    pub kind: DiscrepancyKind,
}

impl Discrepancy {
    pub fn is_value_mismatch(&self) -> bool {
        matches!(self.kind, DiscrepancyKind::ValueMismatch { .. })
    }
}

impl std::fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            DiscrepancyKind::MissingOnDevice { stored } => write!(
                f,
                "unit {}: {} exists in store (\"{}\") but not on device",
                self.unit_id, self.tag_name, stored
            ),
            DiscrepancyKind::ValueMismatch { stored, live } => write!(
                f,
                "unit {}: {} differs, store has \"{}\", device has \"{}\"",
                self.unit_id, self.tag_name, stored, live
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_type_parse() {
        assert_eq!("float".parse::<DeclaredType>(), Ok(DeclaredType::Float));
        assert_eq!("UInt32".parse::<DeclaredType>(), Ok(DeclaredType::UInt32));
        assert!("Double".parse::<DeclaredType>().is_err());
    }

    #[test]
    fn test_declared_type_name_roundtrip() {
        for t in DeclaredType::all() {
            assert_eq!(t.name().parse::<DeclaredType>(), Ok(*t));
        }
    }

    #[test]
    fn test_device_value_canonical_form() {
        assert_eq!(DeviceValue::Float(12.5).to_string(), "12.5");
        assert_eq!(DeviceValue::Float(3.0).to_string(), "3");
        assert_eq!(DeviceValue::Boolean(false).to_string(), "false");
        assert_eq!(DeviceValue::Int16(-4).to_string(), "-4");
        assert_eq!(DeviceValue::UInt64(7).declared_type(), DeclaredType::UInt64);
    }

    #[test]
    fn test_store_value_untagged_json() {
        let values: Vec<StoreValue> = serde_json::from_str(r#"[true, 3, 2.5, "x"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                StoreValue::Bool(true),
                StoreValue::Int(3),
                StoreValue::Float(2.5),
                StoreValue::text("x"),
            ]
        );
    }

    #[test]
    fn test_discrepancy_display_quotes_both_values() {
        let d = Discrepancy {
            unit_id: 1,
            tag_name: "\"X\".\"Z\"".to_string(),
            kind: DiscrepancyKind::ValueMismatch {
                stored: "true".to_string(),
                live: "false".to_string(),
            },
        };
        let text = d.to_string();
        assert!(text.contains("\"true\""));
        assert!(text.contains("\"false\""));
        assert!(d.is_value_mismatch());
    }
}
