//! OPC UA connector backed by the `async-opcua` client
//!
//! One [`UaConnector`] builds a fresh client per connect call, so a hung
//! or dropped controller never affects the next unit. Sessions run their
//! event loop on a spawned task that ends with the session.

use super::{
    classify_status, BrowsedNode, ControllerConnector, ControllerSession, Credentials, NodeClass,
};
use crate::address::{TagAddress, TagPath};
use crate::config::{ControllerConfig, APP_ID};
use crate::error::{RecipeSyncError, Result};
use crate::types::{DeclaredType, DeviceValue};
use async_trait::async_trait;
use opcua::client::{ClientBuilder, IdentityToken, Session};
use opcua::types::{
    AttributeId, BrowseDescription, BrowseDirection, BrowseResultMask, DataTypeId,
    DataValue, EndpointDescription, Identifier, NodeClass as UaNodeClass, NodeId, NumericRange,
    QualifiedName, ReadValueId, ReferenceDescription, ReferenceTypeId, StatusCode,
    TimestampsToReturn, UAString, Variant, WriteValue,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Browse mask selecting objects and variables
const OBJECT_OR_VARIABLE: u32 = UaNodeClass::Object as u32 | UaNodeClass::Variable as u32;

/// Opens OPC UA sessions with no message security
#[derive(Debug, Clone)]
pub struct UaConnector {
    application_name: String,
    application_uri: String,
    pki_dir: PathBuf,
    request_timeout: Duration,
}

impl UaConnector {
    pub fn new(config: &ControllerConfig) -> Self {
        Self {
            application_name: APP_ID.to_string(),
            application_uri: format!("urn:{}", APP_ID),
            pki_dir: config.pki_dir(),
            request_timeout: config.request_timeout(),
        }
    }

    fn builder(&self) -> ClientBuilder {
        ClientBuilder::new()
            .application_name(&self.application_name)
            .application_uri(&self.application_uri)
            .product_uri(&self.application_uri)
            .pki_dir(&self.pki_dir)
            .create_sample_keypair(true)
            .trust_server_certs(true)
            .session_retry_limit(0)
            .request_timeout(self.request_timeout)
    }
}

#[async_trait]
impl ControllerConnector for UaConnector {
    async fn connect(
        &self,
        endpoint: &str,
        credentials: &Credentials,
    ) -> Result<Box<dyn ControllerSession>> {
        let mut client = self
            .builder()
            .client()
            .map_err(|errors| RecipeSyncError::Config(errors.join("; ")))?;

        let (session, event_loop) = client
            .connect_to_matching_endpoint(EndpointDescription::from(endpoint), identity(credentials))
            .await
            .map_err(|e| status_error(endpoint, e.status(), e.to_string()))?;

        let mut event_loop = event_loop.spawn();
        tokio::select! {
            _ = session.wait_for_connection() => {}
            ended = &mut event_loop => {
                let status = ended.unwrap_or(StatusCode::BadUnexpectedError);
                return Err(status_error(endpoint, status, "session closed while connecting"));
            }
        }

        Ok(Box::new(UaSession {
            endpoint: endpoint.to_string(),
            session,
            event_loop,
            request_timeout: self.request_timeout,
        }))
    }
}

/// One connected OPC UA session
pub struct UaSession {
    endpoint: String,
    session: Arc<Session>,
    event_loop: JoinHandle<StatusCode>,
    request_timeout: Duration,
}

impl UaSession {
    async fn read_attribute(&self, node: &TagAddress, attribute: AttributeId) -> Result<Variant> {
        let request = ReadValueId::new(node_id(node), attribute);
        let mut values = self
            .session
            .read(&[request], TimestampsToReturn::Neither, 0.0)
            .await
            .map_err(|status| RecipeSyncError::read(node, status.to_string()))?;
        let DataValue { value, status, .. } = values
            .pop()
            .ok_or_else(|| RecipeSyncError::read(node, "empty read response"))?;
        if let Some(status) = status.filter(|s| s.is_bad()) {
            return Err(RecipeSyncError::read(node, status.to_string()));
        }
        value.ok_or_else(|| RecipeSyncError::read(node, "BadNoValue"))
    }

    async fn browse_all(&self, node: &TagAddress) -> Result<Vec<ReferenceDescription>> {
        let description = BrowseDescription {
            node_id: node_id(node),
            browse_direction: BrowseDirection::Forward,
            reference_type_id: ReferenceTypeId::HierarchicalReferences.into(),
            include_subtypes: true,
            node_class_mask: OBJECT_OR_VARIABLE,
            result_mask: BrowseResultMask::All as u32,
        };
        let mut results = self
            .session
            .browse(&[description], 0, None)
            .await
            .map_err(|status| RecipeSyncError::read(node, status.to_string()))?;

        let mut references = Vec::new();
        loop {
            let Some(result) = results.pop() else {
                return Err(RecipeSyncError::read(node, "empty browse response"));
            };
            if result.status_code.is_bad() {
                return Err(RecipeSyncError::read(node, result.status_code.to_string()));
            }
            references.extend(result.references.unwrap_or_default());
            if result.continuation_point.is_null_or_empty() {
                return Ok(references);
            }
            results = self
                .session
                .browse_next(false, &[result.continuation_point])
                .await
                .map_err(|status| RecipeSyncError::read(node, status.to_string()))?;
        }
    }
}

#[async_trait]
impl ControllerSession for UaSession {
    async fn browse(&mut self, node: &TagAddress) -> Result<Vec<BrowsedNode>> {
        let references = self.browse_all(node).await?;
        let mut children = Vec::with_capacity(references.len());
        for reference in references {
            let Some(address) = tag_address(&reference.node_id.node_id) else {
                tracing::debug!(
                    "{}: skipping non-symbolic node {} below {}",
                    self.endpoint,
                    reference.node_id.node_id,
                    node
                );
                continue;
            };
            let class = match reference.node_class {
                UaNodeClass::Variable => NodeClass::Variable,
                _ => NodeClass::Object,
            };
            children.push(BrowsedNode {
                display_name: display_name(&reference, &address),
                address,
                class,
            });
        }
        Ok(children)
    }

    async fn read(&mut self, node: &TagAddress) -> Result<DeviceValue> {
        let value = self.read_attribute(node, AttributeId::Value).await?;
        device_value(value).map_err(|message| RecipeSyncError::read(node, message))
    }

    async fn read_data_type(&mut self, node: &TagAddress) -> Result<DeclaredType> {
        match self.read_attribute(node, AttributeId::DataType).await? {
            Variant::NodeId(id) => declared_type(&id)
                .ok_or_else(|| RecipeSyncError::read(node, format!("unsupported data type {}", id))),
            other => Err(RecipeSyncError::read(
                node,
                format!("data type attribute holds {:?}", other.type_id()),
            )),
        }
    }

    async fn write(&mut self, node: &TagAddress, value: DeviceValue) -> Result<()> {
        let request = WriteValue {
            node_id: node_id(node),
            attribute_id: AttributeId::Value as u32,
            index_range: NumericRange::None,
            value: DataValue::value_only(variant(value)),
        };
        let results = self
            .session
            .write(&[request])
            .await
            .map_err(|status| RecipeSyncError::write(node, status.to_string()))?;
        match results.first() {
            Some(status) if status.is_good() => Ok(()),
            Some(status) => Err(RecipeSyncError::write(node, status.to_string())),
            None => Err(RecipeSyncError::write(node, "empty write response")),
        }
    }

    async fn namespace_index(&mut self, uri: &str) -> Result<u16> {
        self.session
            .get_namespace_index(uri)
            .await
            .map_err(|e| RecipeSyncError::read("NamespaceArray", e.to_string()))
    }

    async fn disconnect(&mut self) -> Result<()> {
        // a controller that already dropped the channel never confirms the close
        let closed = tokio::time::timeout(self.request_timeout, self.session.disconnect()).await;
        self.event_loop.abort();
        match closed {
            Ok(Ok(())) => Ok(()),
            Ok(Err(status)) => Err(status_error(&self.endpoint, status, "disconnect failed")),
            Err(_) => Err(status_error(
                &self.endpoint,
                StatusCode::BadTimeout,
                "disconnect not confirmed",
            )),
        }
    }
}

impl Drop for UaSession {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

fn identity(credentials: &Credentials) -> IdentityToken {
    match credentials {
        Credentials::Anonymous => IdentityToken::Anonymous,
        Credentials::UserName { username, password } => {
            IdentityToken::new_user_name(username.clone(), password.clone())
        }
    }
}

fn status_error(endpoint: &str, status: StatusCode, message: impl Into<String>) -> RecipeSyncError {
    classify_status(endpoint, status.sub_code().name(), message)
}

/// Symbolic node id of a tag, `ns=<n>;s=<path>`
fn node_id(address: &TagAddress) -> NodeId {
    NodeId::new(address.namespace(), address.identifier())
}

/// Tag address of a string node id; numeric and opaque ids have none
fn tag_address(id: &NodeId) -> Option<TagAddress> {
    match &id.identifier {
        Identifier::String(text) => {
            let path = TagPath::parse(text.as_ref()).ok()?;
            Some(TagAddress::new(id.namespace, path))
        }
        _ => None,
    }
}

fn display_name(reference: &ReferenceDescription, address: &TagAddress) -> String {
    let text = &reference.display_name.text;
    if !text.is_empty() {
        return text.as_ref().to_string();
    }
    let QualifiedName { name, .. } = &reference.browse_name;
    if !name.is_empty() {
        return name.as_ref().to_string();
    }
    address.path().leaf_name().to_string()
}

fn declared_type(id: &NodeId) -> Option<DeclaredType> {
    if id.namespace != 0 {
        return None;
    }
    let declared = match DataTypeId::try_from(id.as_u32()?).ok()? {
        DataTypeId::Boolean => DeclaredType::Boolean,
        DataTypeId::Float => DeclaredType::Float,
        DataTypeId::Int16 => DeclaredType::Int16,
        DataTypeId::Int32 => DeclaredType::Int32,
        DataTypeId::Int64 => DeclaredType::Int64,
        DataTypeId::UInt16 => DeclaredType::UInt16,
        DataTypeId::UInt32 => DeclaredType::UInt32,
        DataTypeId::UInt64 => DeclaredType::UInt64,
        DataTypeId::String => DeclaredType::String,
        _ => return None,
    };
    Some(declared)
}

fn device_value(value: Variant) -> std::result::Result<DeviceValue, String> {
    Ok(match value {
        Variant::Boolean(v) => DeviceValue::Boolean(v),
        Variant::Float(v) => DeviceValue::Float(v),
        Variant::Int16(v) => DeviceValue::Int16(v),
        Variant::Int32(v) => DeviceValue::Int32(v),
        Variant::Int64(v) => DeviceValue::Int64(v),
        Variant::UInt16(v) => DeviceValue::UInt16(v),
        Variant::UInt32(v) => DeviceValue::UInt32(v),
        Variant::UInt64(v) => DeviceValue::UInt64(v),
        Variant::String(v) => DeviceValue::String(v.as_ref().to_string()),
        other => return Err(format!("unsupported variant {:?}", other.type_id())),
    })
}

fn variant(value: DeviceValue) -> Variant {
    match value {
        DeviceValue::Boolean(v) => Variant::Boolean(v),
        DeviceValue::Float(v) => Variant::Float(v),
        DeviceValue::Int16(v) => Variant::Int16(v),
        DeviceValue::Int32(v) => Variant::Int32(v),
        DeviceValue::Int64(v) => Variant::Int64(v),
        DeviceValue::UInt16(v) => Variant::UInt16(v),
        DeviceValue::UInt32(v) => Variant::UInt32(v),
        DeviceValue::UInt64(v) => Variant::UInt64(v),
        DeviceValue::String(v) => Variant::String(UAString::from(v)),
    }
}
