//! Simulated controllers for testing
//!
//! This module provides in-memory controllers that implement
//! [`ControllerConnector`] and [`ControllerSession`] without any network.
//! Each [`MockController`] holds an address space (objects, variables and
//! step arrays), a namespace array, and failure injection switches. Handles
//! are cheap clones sharing one state, so tests keep a handle to inspect the
//! write log after a pipeline ran.
//!
//! # Example
//!
//! ```ignore
//! use recipe_sync::controller::mock::{MockConnector, MockController};
//!
//! let root = TagPath::parse(r#""StepData"."RunningSteps"."Steps""#)?;
//! let unit1 = MockController::new(NAMESPACE_URI).with_step_array(
//!     &root,
//!     vec![vec![("Speed".to_string(), DeviceValue::Float(12.5))]],
//! );
//! let connector = MockConnector::new().with_controller("opc.tcp://10.0.0.11:4840", unit1.clone());
//! ```
//!
//! Step arrays always get a template element at index 0, like real
//! controllers do.
//!
//! # Plant files
//!
//! [`PlantSpec`] describes a set of simulated controllers in TOML, which is
//! what the CLI's `--plant` option loads:
//!
//! ```toml
//! [[controller]]
//! endpoint = "opc.tcp://10.0.0.11:4840"
//! steps = [
//!     [{ name = "Speed", type = "Float", value = "12.5" }],
//! ]
//! ```

use super::{
    classify_status, BrowsedNode, ControllerConnector, ControllerSession, Credentials, NodeClass,
};
use crate::address::{TagAddress, TagPath, PLACEHOLDER_INDEX};
use crate::coercion;
use crate::config::AddressConfig;
use crate::error::{ConnectionFailure, RecipeSyncError, Result};
use crate::types::{DeclaredType, DeviceValue, StoreValue};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Namespace 0 of every server
pub const OPC_UA_NAMESPACE: &str = "http://opcfoundation.org/UA/";

/// Namespace 1 of simulated servers
pub const MOCK_SERVER_NAMESPACE: &str = "urn:recipe-sync:mock-server";

/// Index at which the application namespace is registered by default
pub const DEFAULT_NAMESPACE_INDEX: u16 = 3;

/// Field name and value of one simulated step variable
pub type MockStep = Vec<(String, DeviceValue)>;

#[derive(Debug, Clone)]
enum MockNodeKind {
    Object,
    Variable(DeviceValue),
}

#[derive(Debug, Clone)]
struct MockNode {
    path: TagPath,
    parent: Option<TagPath>,
    display_name: String,
    kind: MockNodeKind,
}

/// What happens when a session is opened
#[derive(Debug, Clone, PartialEq, Default)]
pub enum MockConnectBehavior {
    #[default]
    Accept,
    /// Refuse with a protocol status code
    Fail { status: String, message: String },
    /// Never answer
    Hang,
}

#[derive(Debug, Default)]
struct ControllerState {
    namespace_uri: String,
    namespaces: Vec<String>,
    nodes: Vec<MockNode>,
    connect: MockConnectBehavior,
    required_credentials: Option<Credentials>,
    failing_reads: Vec<TagPath>,
    failing_writes: Vec<TagPath>,
    hanging_writes: Vec<TagPath>,
    fail_disconnect: bool,
    writes: Vec<(TagAddress, DeviceValue)>,
    connects: usize,
    disconnects: usize,
}

impl ControllerState {
    fn namespace_index(&self) -> u16 {
        self.namespaces.len().saturating_sub(1) as u16
    }

    fn find(&self, path: &TagPath) -> Option<usize> {
        self.nodes.iter().position(|n| n.path.same_node(path))
    }

    fn ensure_node(&mut self, path: &TagPath, kind: MockNodeKind) {
        if let Some(i) = self.find(path) {
            if let MockNodeKind::Variable(_) = kind {
                self.nodes[i].kind = kind;
            }
            return;
        }
        let parent = path.parent();
        if let Some(parent) = &parent {
            self.ensure_node(parent, MockNodeKind::Object);
        }
        let display_name = match path.segments().last() {
            Some(segment) => match segment.index() {
                Some(index) => format!("{}[{}]", segment.name(), index),
                None => segment.name().to_string(),
            },
            None => String::new(),
        };
        self.nodes.push(MockNode {
            path: path.clone(),
            parent,
            display_name,
            kind,
        });
    }

    fn in_namespace(&self, node: &TagAddress) -> bool {
        node.namespace() == self.namespace_index()
    }

    fn listed(list: &[TagPath], path: &TagPath) -> bool {
        list.iter().any(|p| p.same_node(path))
    }
}

/// A simulated controller
#[derive(Debug, Clone)]
pub struct MockController {
    state: Arc<Mutex<ControllerState>>,
}

impl MockController {
    /// Create a controller registering `namespace_uri` at the default index
    pub fn new(namespace_uri: impl Into<String>) -> Self {
        let controller = Self {
            state: Arc::new(Mutex::new(ControllerState {
                namespace_uri: namespace_uri.into(),
                ..Default::default()
            })),
        };
        controller.with_namespace_index(DEFAULT_NAMESPACE_INDEX)
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register the application namespace at another index (at least 1)
    pub fn with_namespace_index(self, index: u16) -> Self {
        {
            let mut state = self.lock();
            let index = index.max(1) as usize;
            let mut namespaces = vec![
                OPC_UA_NAMESPACE.to_string(),
                MOCK_SERVER_NAMESPACE.to_string(),
            ];
            while namespaces.len() < index {
                namespaces.push(format!("urn:recipe-sync:vendor:{}", namespaces.len()));
            }
            namespaces.truncate(index);
            namespaces.push(state.namespace_uri.clone());
            state.namespaces = namespaces;
        }
        self
    }

    /// Add a step array with a template element and one element per step
    pub fn with_step_array(self, root: &TagPath, steps: Vec<MockStep>) -> Self {
        {
            let mut state = self.lock();
            state.ensure_node(root, MockNodeKind::Object);

            let template = root.element(PLACEHOLDER_INDEX);
            state.ensure_node(&template, MockNodeKind::Object);
            if let Some(first) = steps.first() {
                for (name, value) in first {
                    state.ensure_node(&template.child(name.clone()), MockNodeKind::Variable(value.clone()));
                }
            }

            for (i, step) in steps.into_iter().enumerate() {
                let element = root.element(i as u32 + 1);
                state.ensure_node(&element, MockNodeKind::Object);
                for (name, value) in step {
                    state.ensure_node(&element.child(name), MockNodeKind::Variable(value));
                }
            }
        }
        self
    }

    /// Add a variable, creating missing parent objects
    pub fn with_variable(self, path: &TagPath, value: DeviceValue) -> Self {
        self.lock().ensure_node(path, MockNodeKind::Variable(value));
        self
    }

    /// Add an object node
    pub fn with_object(self, path: &TagPath) -> Self {
        self.lock().ensure_node(path, MockNodeKind::Object);
        self
    }

    /// Refuse every session with a protocol status code
    pub fn fail_connect(self, status: impl Into<String>, message: impl Into<String>) -> Self {
        self.lock().connect = MockConnectBehavior::Fail {
            status: status.into(),
            message: message.into(),
        };
        self
    }

    /// Never answer connection attempts
    pub fn hang_on_connect(self) -> Self {
        self.lock().connect = MockConnectBehavior::Hang;
        self
    }

    /// Reject sessions whose identity differs from `credentials`
    pub fn require_credentials(self, credentials: Credentials) -> Self {
        self.lock().required_credentials = Some(credentials);
        self
    }

    pub fn fail_read(self, path: &TagPath) -> Self {
        self.lock().failing_reads.push(path.clone());
        self
    }

    pub fn fail_write(self, path: &TagPath) -> Self {
        self.lock().failing_writes.push(path.clone());
        self
    }

    /// Writes to `path` never complete
    pub fn hang_on_write(self, path: &TagPath) -> Self {
        self.lock().hanging_writes.push(path.clone());
        self
    }

    pub fn fail_disconnect(self) -> Self {
        self.lock().fail_disconnect = true;
        self
    }

    /// Change a variable's value from the device side
    pub fn set_value(&self, path: &TagPath, value: DeviceValue) {
        self.lock().ensure_node(path, MockNodeKind::Variable(value));
    }

    /// Current value of a variable
    pub fn value(&self, path: &TagPath) -> Option<DeviceValue> {
        let state = self.lock();
        state.find(path).and_then(|i| match &state.nodes[i].kind {
            MockNodeKind::Variable(v) => Some(v.clone()),
            MockNodeKind::Object => None,
        })
    }

    /// Every accepted write, in order
    pub fn writes(&self) -> Vec<(TagAddress, DeviceValue)> {
        self.lock().writes.clone()
    }

    /// Accepted writes to one path
    pub fn writes_to(&self, path: &TagPath) -> Vec<DeviceValue> {
        self.lock()
            .writes
            .iter()
            .filter(|(addr, _)| addr.path().same_node(path))
            .map(|(_, value)| value.clone())
            .collect()
    }

    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }

    /// Number of sessions opened
    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    /// Number of disconnect calls, failed ones included
    pub fn disconnects(&self) -> usize {
        self.lock().disconnects
    }

    /// Index of the application namespace
    pub fn namespace_index(&self) -> u16 {
        self.lock().namespace_index()
    }
}

/// A session on a [`MockController`]
#[derive(Debug)]
pub struct MockSession {
    endpoint: String,
    state: Arc<Mutex<ControllerState>>,
}

impl MockSession {
    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ControllerSession for MockSession {
    async fn browse(&mut self, node: &TagAddress) -> Result<Vec<BrowsedNode>> {
        let state = self.lock();
        if !state.in_namespace(node) || state.find(node.path()).is_none() {
            return Err(RecipeSyncError::read(node, "BadNodeIdUnknown"));
        }
        Ok(state
            .nodes
            .iter()
            .filter(|n| n.parent.as_ref().is_some_and(|p| p.same_node(node.path())))
            .map(|n| BrowsedNode {
                address: TagAddress::new(node.namespace(), n.path.clone()),
                display_name: n.display_name.clone(),
                class: match n.kind {
                    MockNodeKind::Object => NodeClass::Object,
                    MockNodeKind::Variable(_) => NodeClass::Variable,
                },
            })
            .collect())
    }

    async fn read(&mut self, node: &TagAddress) -> Result<DeviceValue> {
        let state = self.lock();
        if ControllerState::listed(&state.failing_reads, node.path()) {
            return Err(RecipeSyncError::read(node, "BadCommunicationError"));
        }
        let index = state
            .find(node.path())
            .filter(|_| state.in_namespace(node))
            .ok_or_else(|| RecipeSyncError::read(node, "BadNodeIdUnknown"))?;
        match &state.nodes[index].kind {
            MockNodeKind::Variable(value) => Ok(value.clone()),
            MockNodeKind::Object => Err(RecipeSyncError::read(node, "BadAttributeIdInvalid")),
        }
    }

    async fn read_data_type(&mut self, node: &TagAddress) -> Result<DeclaredType> {
        self.read(node).await.map(|v| v.declared_type())
    }

    async fn write(&mut self, node: &TagAddress, value: DeviceValue) -> Result<()> {
        let hang = {
            let mut state = self.lock();
            if ControllerState::listed(&state.hanging_writes, node.path()) {
                true
            } else {
                if ControllerState::listed(&state.failing_writes, node.path()) {
                    return Err(RecipeSyncError::write(node, "BadNotWritable"));
                }
                let index = state
                    .find(node.path())
                    .filter(|_| state.in_namespace(node))
                    .ok_or_else(|| RecipeSyncError::write(node, "BadNodeIdUnknown"))?;
                match &state.nodes[index].kind {
                    MockNodeKind::Variable(current)
                        if current.declared_type() == value.declared_type() => {}
                    _ => return Err(RecipeSyncError::write(node, "BadTypeMismatch")),
                }
                state.nodes[index].kind = MockNodeKind::Variable(value.clone());
                state.writes.push((node.clone(), value));
                false
            }
        };

        if hang {
            tracing::debug!("{}: write to {} will not complete", self.endpoint, node);
            return std::future::pending::<Result<()>>().await;
        }
        Ok(())
    }

    async fn namespace_index(&mut self, uri: &str) -> Result<u16> {
        let state = self.lock();
        state
            .namespaces
            .iter()
            .position(|ns| ns == uri)
            .map(|i| i as u16)
            .ok_or_else(|| {
                RecipeSyncError::read("NamespaceArray", format!("namespace '{}' not registered", uri))
            })
    }

    async fn disconnect(&mut self) -> Result<()> {
        let mut state = self.lock();
        state.disconnects += 1;
        if state.fail_disconnect {
            return Err(RecipeSyncError::Connection {
                endpoint: self.endpoint.clone(),
                kind: ConnectionFailure::Transport,
                message: "BadConnectionClosed".to_string(),
            });
        }
        Ok(())
    }
}

/// Connector resolving endpoints to simulated controllers
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    controllers: HashMap<String, MockController>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_controller(mut self, endpoint: impl Into<String>, controller: MockController) -> Self {
        self.controllers.insert(endpoint.into(), controller);
        self
    }

    pub fn controller(&self, endpoint: &str) -> Option<&MockController> {
        self.controllers.get(endpoint)
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &str> {
        self.controllers.keys().map(String::as_str)
    }
}

#[async_trait]
impl ControllerConnector for MockConnector {
    async fn connect(
        &self,
        endpoint: &str,
        credentials: &Credentials,
    ) -> Result<Box<dyn ControllerSession>> {
        let controller = self.controllers.get(endpoint).ok_or_else(|| RecipeSyncError::Connection {
            endpoint: endpoint.to_string(),
            kind: ConnectionFailure::Transport,
            message: "no route to host".to_string(),
        })?;

        let behavior = {
            let mut state = controller.lock();
            if let Some(required) = &state.required_credentials {
                if required != credentials {
                    return Err(classify_status(endpoint, "BadUserAccessDenied", "user access denied"));
                }
            }
            if state.connect == MockConnectBehavior::Accept {
                state.connects += 1;
            }
            state.connect.clone()
        };

        match behavior {
            MockConnectBehavior::Accept => Ok(Box::new(MockSession {
                endpoint: endpoint.to_string(),
                state: Arc::clone(&controller.state),
            })),
            MockConnectBehavior::Fail { status, message } => {
                Err(classify_status(endpoint, &status, message))
            }
            MockConnectBehavior::Hang => std::future::pending().await,
        }
    }
}

// ==================== Plant files ====================

/// A simulated plant: one entry per controller
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PlantSpec {
    #[serde(default, rename = "controller")]
    pub controllers: Vec<ControllerSpec>,
}

/// One simulated controller of a plant file
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerSpec {
    pub endpoint: String,

    #[serde(default)]
    pub namespace_index: Option<u16>,

    /// Refuse connections as if the host were down
    #[serde(default)]
    pub unreachable: bool,

    /// Step array root; the configured one when unset
    #[serde(default)]
    pub step_array: Option<String>,

    #[serde(default)]
    pub steps: Vec<Vec<FieldSpec>>,

    /// Standalone variables, `name` being the full path
    #[serde(default)]
    pub variables: Vec<FieldSpec>,
}

/// A typed value in a plant file
#[derive(Debug, Clone, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub declared: DeclaredType,
    pub value: String,
}

impl FieldSpec {
    fn device_value(&self) -> Result<DeviceValue> {
        Ok(coercion::to_device(
            self.declared,
            &StoreValue::text(self.value.clone()),
        )?)
    }
}

impl PlantSpec {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| RecipeSyncError::Config(format!("Failed to parse plant file: {}", e)))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RecipeSyncError::Config(format!("Failed to read plant file {:?}: {}", path, e))
        })?;
        Self::from_toml(&content)
    }

    /// Build a connector serving every controller of the plant
    ///
    /// Controllers with steps also get the clear control and recipe name
    /// variables at their configured addresses.
    pub fn build(&self, namespace_uri: &str, addresses: &AddressConfig) -> Result<MockConnector> {
        let mut connector = MockConnector::new();

        for spec in &self.controllers {
            let mut controller = MockController::new(namespace_uri)
                .with_namespace_index(spec.namespace_index.unwrap_or(DEFAULT_NAMESPACE_INDEX));

            if spec.step_array.is_some() || !spec.steps.is_empty() {
                let root = match &spec.step_array {
                    Some(path) => TagPath::parse(path)?,
                    None => addresses.step_array_path()?,
                };
                let steps = spec
                    .steps
                    .iter()
                    .map(|fields| {
                        fields
                            .iter()
                            .map(|f| -> Result<(String, DeviceValue)> {
                                Ok((f.name.clone(), f.device_value()?))
                            })
                            .collect::<Result<MockStep>>()
                    })
                    .collect::<Result<Vec<_>>>()?;
                controller = controller
                    .with_step_array(&root, steps)
                    .with_variable(&addresses.clear_pending_steps_path()?, DeviceValue::Boolean(false))
                    .with_variable(&addresses.recipe_name_path()?, DeviceValue::String(String::new()));
            }

            for variable in &spec.variables {
                controller =
                    controller.with_variable(&TagPath::parse(&variable.name)?, variable.device_value()?);
            }

            if spec.unreachable {
                controller = controller.fail_connect("BadCommunicationError", "host unreachable");
            }

            tracing::debug!("Simulating controller at {}", spec.endpoint);
            connector = connector.with_controller(spec.endpoint.clone(), controller);
        }

        Ok(connector)
    }
}
