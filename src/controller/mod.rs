//! Controller client
//!
//! This module is the seam between the synchronization pipelines and the
//! protocol library that talks to field controllers:
//!
//! - [`ControllerConnector`] - opens sessions to endpoints
//! - [`ControllerSession`] - one live protocol session (browse, read, write,
//!   namespace resolution, disconnect)
//! - [`ControllerClient`] - the wrapper the pipelines use; it enforces the
//!   connect timeout, coerces values before writing, and never escalates a
//!   failed disconnect
//!
//! Connectors map their failures onto [`RecipeSyncError::Connection`] and
//! [`RecipeSyncError::Authentication`]; [`classify_status`] does that for
//! textual status codes.
//!
//! # OPC UA
//!
//! With the `opcua-client` feature (enabled by default) [`ua::UaConnector`]
//! talks to real controllers through the `async-opcua` client.
//!
//! # Mock controllers
//!
//! With the `mock-controller` feature (enabled by default) the [`mock`]
//! module provides in-memory controllers used by the tests and by the CLI's
//! simulated plant.

mod client;
#[cfg(feature = "mock-controller")]
pub mod mock;
#[cfg(feature = "opcua-client")]
pub mod ua;

pub use client::ControllerClient;
#[cfg(feature = "opcua-client")]
pub use ua::UaConnector;

use crate::address::TagAddress;
use crate::error::{AuthFailure, ConnectionFailure, RecipeSyncError, Result};
use crate::types::{DeclaredType, DeviceValue};
use async_trait::async_trait;

/// Session identity presented to a controller
#[derive(Clone, PartialEq, Eq, Default)]
pub enum Credentials {
    #[default]
    Anonymous,
    UserName { username: String, password: String },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Anonymous => write!(f, "Anonymous"),
            Credentials::UserName { username, .. } => f
                .debug_struct("UserName")
                .field("username", username)
                .field("password", &"***")
                .finish(),
        }
    }
}

/// Node class as reported by a browse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeClass {
    /// Leaf holding a value
    Variable,
    /// Container (structure, array, folder)
    Object,
}

/// One reference returned by browsing a node
#[derive(Debug, Clone, PartialEq)]
pub struct BrowsedNode {
    pub address: TagAddress,
    pub display_name: String,
    pub class: NodeClass,
}

impl BrowsedNode {
    pub fn is_variable(&self) -> bool {
        self.class == NodeClass::Variable
    }
}

/// One live protocol session to one controller
///
/// Implementations are driven from a single task; `Send` lets the owning
/// worker move them between await points.
#[async_trait]
pub trait ControllerSession: Send {
    /// Immediate children of a node, in server order
    async fn browse(&mut self, node: &TagAddress) -> Result<Vec<BrowsedNode>>;

    /// Read the current value of a variable node
    async fn read(&mut self, node: &TagAddress) -> Result<DeviceValue>;

    /// Read the variant type a variable node declares
    async fn read_data_type(&mut self, node: &TagAddress) -> Result<DeclaredType>;

    /// Write an already typed value
    async fn write(&mut self, node: &TagAddress, value: DeviceValue) -> Result<()>;

    /// Index of a namespace URI in the server's namespace array
    async fn namespace_index(&mut self, uri: &str) -> Result<u16>;

    /// Close the session
    async fn disconnect(&mut self) -> Result<()>;
}

/// Opens sessions to controller endpoints
#[async_trait]
pub trait ControllerConnector: Send + Sync {
    /// Connect and authenticate
    ///
    /// Failures are terminal for this attempt; retry policy belongs to the
    /// caller.
    async fn connect(
        &self,
        endpoint: &str,
        credentials: &Credentials,
    ) -> Result<Box<dyn ControllerSession>>;
}

/// Map a protocol status code name onto the connection error taxonomy
///
/// Unrecognized codes starting with `Bad` are protocol errors; anything else
/// is unknown.
pub fn classify_status(endpoint: &str, status: &str, message: impl Into<String>) -> RecipeSyncError {
    let endpoint = endpoint.to_string();
    let message = message.into();
    let connection = |kind| RecipeSyncError::Connection {
        endpoint: endpoint.clone(),
        kind,
        message: message.clone(),
    };

    match status {
        "BadUserAccessDenied" | "BadIdentityTokenRejected" => RecipeSyncError::Authentication {
            endpoint,
            reason: AuthFailure::Rejected,
            message,
        },
        "BadIdentityTokenInvalid" => RecipeSyncError::Authentication {
            endpoint,
            reason: AuthFailure::IdentityInvalid,
            message,
        },
        "BadTimeout" | "BadRequestTimeout" => connection(ConnectionFailure::Timeout),
        "BadCommunicationError" | "BadConnectionClosed" | "BadConnectionRejected"
        | "BadNotConnected" | "BadServerNotConnected" | "BadTcpEndpointUrlInvalid" => {
            connection(ConnectionFailure::Transport)
        }
        s if s.starts_with("Bad") => connection(ConnectionFailure::Protocol),
        _ => connection(ConnectionFailure::Unknown),
    }
}
