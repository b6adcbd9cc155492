//! Type coercion between store scalars and controller variants
//!
//! The store keeps loosely typed scalars; controllers declare a concrete
//! variant type per node. Each declared type accepts a fixed set of store
//! representations:
//!
//! | Declared type | Accepted store values |
//! |---|---|
//! | Boolean | bool, `"true"`/`"false"` (any case) |
//! | Float | numeric string, int, float |
//! | Int16/Int32/Int64 | numeric string, int, float (truncated) |
//! | UInt16/UInt32/UInt64 | numeric string, int, float (truncated, not negative) |
//! | String | string |
//!
//! Anything else is a [`CoercionError`]. Out-of-range values are rejected,
//! never clamped.
//!
//! In the other direction every [`DeviceValue`] maps to a canonical text
//! form so that store and device readings compare equal exactly when they
//! denote the same value.

use crate::error::CoercionError;
use crate::types::{DeclaredType, DeviceValue, StoreValue};

/// Convert a store value to the variant type declared by the target node
pub fn to_device(declared: DeclaredType, value: &StoreValue) -> Result<DeviceValue, CoercionError> {
    match declared {
        DeclaredType::Boolean => to_bool(value).map(DeviceValue::Boolean),
        DeclaredType::Float => to_float(value).map(DeviceValue::Float),
        DeclaredType::Int16 => to_integer(declared, value, i16::MIN as i128, i16::MAX as i128)
            .map(|v| DeviceValue::Int16(v as i16)),
        DeclaredType::Int32 => to_integer(declared, value, i32::MIN as i128, i32::MAX as i128)
            .map(|v| DeviceValue::Int32(v as i32)),
        DeclaredType::Int64 => to_integer(declared, value, i64::MIN as i128, i64::MAX as i128)
            .map(|v| DeviceValue::Int64(v as i64)),
        DeclaredType::UInt16 => to_integer(declared, value, 0, u16::MAX as i128)
            .map(|v| DeviceValue::UInt16(v as u16)),
        DeclaredType::UInt32 => to_integer(declared, value, 0, u32::MAX as i128)
            .map(|v| DeviceValue::UInt32(v as u32)),
        DeclaredType::UInt64 => to_integer(declared, value, 0, u64::MAX as i128)
            .map(|v| DeviceValue::UInt64(v as u64)),
        DeclaredType::String => match value {
            StoreValue::Text(s) => Ok(DeviceValue::String(s.clone())),
            other => Err(CoercionError::new(declared, other, "expected a string")),
        },
    }
}

/// Convert a device reading to its persisted store form
pub fn to_store(value: &DeviceValue) -> StoreValue {
    StoreValue::Text(value.to_string())
}

/// Canonical printable form of a store value under a declared type
pub fn canonical_form(declared: DeclaredType, value: &StoreValue) -> Result<String, CoercionError> {
    to_device(declared, value).map(|v| v.to_string())
}

/// Whether a persisted value and a live reading denote the same value
///
/// Both sides must carry the declared type. A persisted value that no
/// longer coerces to it never agrees, whatever its text.
pub fn values_agree(declared: DeclaredType, stored: &StoreValue, live: &DeviceValue) -> bool {
    if live.declared_type() != declared {
        return false;
    }
    match canonical_form(declared, stored) {
        Ok(stored_text) => stored_text == live.to_string(),
        Err(_) => false,
    }
}

fn to_bool(value: &StoreValue) -> Result<bool, CoercionError> {
    match value {
        StoreValue::Bool(b) => Ok(*b),
        StoreValue::Text(s) => {
            let s = s.trim();
            if s.eq_ignore_ascii_case("true") {
                Ok(true)
            } else if s.eq_ignore_ascii_case("false") {
                Ok(false)
            } else {
                Err(CoercionError::new(
                    DeclaredType::Boolean,
                    value,
                    "expected \"true\" or \"false\"",
                ))
            }
        }
        other => Err(CoercionError::new(
            DeclaredType::Boolean,
            other,
            format!("{} is not accepted for Boolean", other.kind()),
        )),
    }
}

fn to_float(value: &StoreValue) -> Result<f32, CoercionError> {
    let parsed = match value {
        StoreValue::Text(s) => s
            .trim()
            .parse::<f32>()
            .map_err(|_| CoercionError::new(DeclaredType::Float, value, "not a number"))?,
        StoreValue::Int(i) => *i as f32,
        StoreValue::Float(f) => {
            if f.abs() > f32::MAX as f64 {
                return Err(CoercionError::new(
                    DeclaredType::Float,
                    value,
                    "out of range for Float",
                ));
            }
            *f as f32
        }
        StoreValue::Bool(_) => {
            return Err(CoercionError::new(
                DeclaredType::Float,
                value,
                "bool is not accepted for Float",
            ))
        }
    };

    if parsed.is_finite() {
        Ok(parsed)
    } else {
        Err(CoercionError::new(DeclaredType::Float, value, "not a finite number"))
    }
}

fn to_integer(
    declared: DeclaredType,
    value: &StoreValue,
    min: i128,
    max: i128,
) -> Result<i128, CoercionError> {
    let parsed = match value {
        StoreValue::Int(i) => *i as i128,
        StoreValue::Float(f) => truncate(*f)
            .ok_or_else(|| CoercionError::new(declared, value, "not a finite number"))?,
        StoreValue::Text(s) => {
            let s = s.trim();
            match s.parse::<i128>() {
                Ok(v) => v,
                Err(_) => s
                    .parse::<f64>()
                    .ok()
                    .and_then(truncate)
                    .ok_or_else(|| CoercionError::new(declared, value, "not an integer"))?,
            }
        }
        StoreValue::Bool(_) => {
            return Err(CoercionError::new(
                declared,
                value,
                format!("bool is not accepted for {}", declared),
            ))
        }
    };

    if parsed < 0 && declared.is_unsigned_integer() {
        return Err(CoercionError::new(declared, value, "negative value"));
    }
    if parsed < min || parsed > max {
        return Err(CoercionError::new(
            declared,
            value,
            format!("out of range for {}", declared),
        ));
    }
    Ok(parsed)
}

fn truncate(f: f64) -> Option<i128> {
    if f.is_finite() {
        Some(f.trunc() as i128)
    } else {
        None
    }
}
