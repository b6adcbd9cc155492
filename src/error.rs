//! Error handling for recipe synchronization
//!
//! This module defines the error taxonomy shared by the controller client,
//! the pipelines and the store, plus a Result alias for use throughout the
//! crate.
//!
//! Errors fall into two groups:
//!
//! - **Unit-scoped** errors (connection, authentication, coercion, read,
//!   write, traversal, address) fail the unit being processed; the pipeline
//!   moves on to the next unit.
//! - **Pipeline-fatal** errors (store, config, channel, IO) abort the run.

use crate::types::{DeclaredType, StoreValue};
use thiserror::Error;

/// Why a transport-level connection attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionFailure {
    /// Socket or channel could not be established
    Transport,
    /// The connect attempt exceeded the configured timeout
    Timeout,
    /// The server answered with a protocol-level error
    Protocol,
    /// Anything the client library could not classify
    Unknown,
}

impl std::fmt::Display for ConnectionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionFailure::Transport => write!(f, "transport error"),
            ConnectionFailure::Timeout => write!(f, "timed out"),
            ConnectionFailure::Protocol => write!(f, "protocol error"),
            ConnectionFailure::Unknown => write!(f, "unknown error"),
        }
    }
}

/// Why the server refused the session identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// Credentials were rejected (access denied, token rejected)
    Rejected,
    /// The identity token itself was malformed or unsupported
    IdentityInvalid,
}

impl std::fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthFailure::Rejected => write!(f, "credentials rejected"),
            AuthFailure::IdentityInvalid => write!(f, "identity token invalid"),
        }
    }
}

/// A store value that cannot be represented in a declared protocol type
#[derive(Error, Debug, Clone, PartialEq)]
#[error("cannot coerce {value:?} to {declared}: {reason}")]
pub struct CoercionError {
    /// Type declared by the target node
    pub declared: DeclaredType,
    /// The rejected store-side value
    pub value: StoreValue,
    /// Short human readable reason
    pub reason: String,
}

impl CoercionError {
    pub(crate) fn new(declared: DeclaredType, value: &StoreValue, reason: impl Into<String>) -> Self {
        Self {
            declared,
            value: value.clone(),
            reason: reason.into(),
        }
    }
}

/// Main error type for recipe synchronization
#[derive(Error, Debug)]
pub enum RecipeSyncError {
    /// Transport or timeout failure while connecting to a controller
    #[error("Connection to {endpoint} failed ({kind}): {message}")]
    Connection {
        endpoint: String,
        kind: ConnectionFailure,
        message: String,
    },

    /// The controller rejected the session identity
    #[error("Authentication at {endpoint} failed ({reason}): {message}")]
    Authentication {
        endpoint: String,
        reason: AuthFailure,
        message: String,
    },

    /// Value cannot be represented in the declared protocol type
    #[error("Coercion error: {0}")]
    Coercion(#[from] CoercionError),

    /// Reading a node failed
    #[error("Read error at {address}: {message}")]
    Read { address: String, message: String },

    /// The device accepted the address but rejected the write
    #[error("Write error at {address}: {message}")]
    Write { address: String, message: String },

    /// The address tree was empty or malformed
    #[error("Traversal error at {address}: {message}")]
    Traversal { address: String, message: String },

    /// A persisted-store call failed
    #[error("Store error: {0}")]
    Store(String),

    /// A protocol address could not be parsed
    #[error("Address error: {0}")]
    Address(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors related to channel communication
    #[error("Channel error: {0}")]
    Channel(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<RecipeSyncError>,
    },
}

impl RecipeSyncError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        RecipeSyncError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error only fails the unit being processed
    pub fn is_unit_scoped(&self) -> bool {
        match self {
            RecipeSyncError::Connection { .. }
            | RecipeSyncError::Authentication { .. }
            | RecipeSyncError::Coercion(_)
            | RecipeSyncError::Read { .. }
            | RecipeSyncError::Write { .. }
            | RecipeSyncError::Traversal { .. }
            | RecipeSyncError::Address(_) => true,
            RecipeSyncError::WithContext { source, .. } => source.is_unit_scoped(),
            _ => false,
        }
    }

    /// Whether the failure came from the controller refusing credentials
    pub fn is_authentication(&self) -> bool {
        match self {
            RecipeSyncError::Authentication { .. } => true,
            RecipeSyncError::WithContext { source, .. } => source.is_authentication(),
            _ => false,
        }
    }

    pub(crate) fn read(address: impl ToString, message: impl Into<String>) -> Self {
        RecipeSyncError::Read {
            address: address.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn write(address: impl ToString, message: impl Into<String>) -> Self {
        RecipeSyncError::Write {
            address: address.to_string(),
            message: message.into(),
        }
    }
}

/// Result type alias for recipe synchronization
pub type Result<T> = std::result::Result<T, RecipeSyncError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

#[cfg(feature = "sqlite-store")]
impl From<sqlx::Error> for RecipeSyncError {
    fn from(err: sqlx::Error) -> Self {
        RecipeSyncError::Store(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RecipeSyncError::Store("deadlock victim".to_string());
        assert_eq!(err.to_string(), "Store error: deadlock victim");
    }

    #[test]
    fn test_error_with_context() {
        let err = RecipeSyncError::Config("missing".to_string());
        let with_ctx = err.with_context("Failed to load");
        assert!(with_ctx.to_string().contains("Failed to load"));
    }

    #[test]
    fn test_unit_scope_classification() {
        let conn = RecipeSyncError::Connection {
            endpoint: "opc.tcp://10.0.0.1:4840".to_string(),
            kind: ConnectionFailure::Timeout,
            message: "no answer".to_string(),
        };
        assert!(conn.is_unit_scoped());
        assert!(conn.with_context("unit 1").is_unit_scoped());
        assert!(!RecipeSyncError::Store("x".to_string()).is_unit_scoped());
    }

    #[test]
    fn test_authentication_error() {
        let err = RecipeSyncError::Authentication {
            endpoint: "opc.tcp://plc".to_string(),
            reason: AuthFailure::IdentityInvalid,
            message: "BadIdentityTokenInvalid".to_string(),
        };
        assert!(err.is_authentication());
        assert!(err.to_string().contains("identity token invalid"));
    }

    #[test]
    fn test_coercion_error_display() {
        let err = CoercionError::new(
            DeclaredType::Float,
            &StoreValue::Text("abc".to_string()),
            "not a number",
        );
        let msg = RecipeSyncError::from(err).to_string();
        assert!(msg.contains("Float"));
        assert!(msg.contains("abc"));
    }
}
