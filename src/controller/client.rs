//! Session wrapper used by the pipelines

use super::{BrowsedNode, ControllerConnector, ControllerSession, Credentials};
use crate::address::TagAddress;
use crate::coercion;
use crate::error::{ConnectionFailure, RecipeSyncError, Result};
use crate::types::{DeviceValue, StoreValue};
use std::time::Duration;

/// A connected controller session
///
/// Obtained from [`ControllerClient::connect`]; must be consumed by
/// [`ControllerClient::disconnect`] on every exit path.
pub struct ControllerClient {
    endpoint: String,
    session: Box<dyn ControllerSession>,
}

impl ControllerClient {
    /// Connect to an endpoint, bounded by `timeout`
    pub async fn connect(
        connector: &dyn ControllerConnector,
        endpoint: &str,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<Self> {
        tracing::debug!("Connecting to {}", endpoint);
        let session = match tokio::time::timeout(timeout, connector.connect(endpoint, credentials))
            .await
        {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                tracing::warn!("Connection to {} failed: {}", endpoint, e);
                return Err(e);
            }
            Err(_) => {
                tracing::warn!("Connection to {} timed out after {:?}", endpoint, timeout);
                return Err(RecipeSyncError::Connection {
                    endpoint: endpoint.to_string(),
                    kind: ConnectionFailure::Timeout,
                    message: format!("no session after {:?}", timeout),
                });
            }
        };

        tracing::info!("Connected to {}", endpoint);
        Ok(Self {
            endpoint: endpoint.to_string(),
            session,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Resolve a namespace URI for this session
    pub async fn namespace_index(&mut self, uri: &str) -> Result<u16> {
        let index = self.session.namespace_index(uri).await?;
        tracing::debug!("{}: namespace '{}' has index {}", self.endpoint, uri, index);
        Ok(index)
    }

    pub async fn browse(&mut self, node: &TagAddress) -> Result<Vec<BrowsedNode>> {
        self.session.browse(node).await
    }

    /// Read a node's value together with its variant type
    pub async fn read(&mut self, node: &TagAddress) -> Result<DeviceValue> {
        self.session.read(node).await
    }

    /// Write a store value to a node
    ///
    /// The node's declared type is read first and the value coerced to it;
    /// a value that does not coerce is rejected before anything is sent.
    pub async fn write(&mut self, node: &TagAddress, value: &StoreValue) -> Result<DeviceValue> {
        let declared = self.session.read_data_type(node).await?;
        let typed = coercion::to_device(declared, value)?;
        self.session.write(node, typed.clone()).await?;
        tracing::debug!("{}: wrote {} = {} ({})", self.endpoint, node, typed, declared);
        Ok(typed)
    }

    /// Close the session
    ///
    /// A failed disconnect is logged and otherwise ignored.
    pub async fn disconnect(mut self) {
        match self.session.disconnect().await {
            Ok(()) => tracing::debug!("Disconnected from {}", self.endpoint),
            Err(e) => tracing::warn!("Disconnect from {} failed: {}", self.endpoint, e),
        }
    }
}

impl std::fmt::Debug for ControllerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, feature = "mock-controller"))]
mod tests {
    use super::*;
    use crate::address::TagPath;
    use crate::controller::mock::{MockConnector, MockController, DEFAULT_NAMESPACE_INDEX};
    use crate::types::DeclaredType;

    const NS: &str = "urn:test";
    const ENDPOINT: &str = "opc.tcp://10.0.0.1:4840";

    fn speed() -> TagPath {
        TagPath::parse(r#""X"."Speed""#).unwrap()
    }

    async fn connect(connector: &MockConnector) -> Result<ControllerClient> {
        ControllerClient::connect(
            connector,
            ENDPOINT,
            &Credentials::Anonymous,
            Duration::from_millis(200),
        )
        .await
    }

    #[tokio::test]
    async fn test_write_coerces_to_declared_type() {
        let controller = MockController::new(NS).with_variable(&speed(), DeviceValue::Float(0.0));
        let connector = MockConnector::new().with_controller(ENDPOINT, controller.clone());

        let mut client = connect(&connector).await.unwrap();
        let ns = client.namespace_index(NS).await.unwrap();
        let addr = TagAddress::new(ns, speed());
        let written = client.write(&addr, &StoreValue::text("12.5")).await.unwrap();
        client.disconnect().await;

        assert_eq!(written, DeviceValue::Float(12.5));
        assert_eq!(controller.writes_to(&speed()), vec![DeviceValue::Float(12.5)]);
        assert_eq!(controller.disconnects(), 1);
    }

    #[tokio::test]
    async fn test_uncoercible_value_never_reaches_device() {
        let controller = MockController::new(NS).with_variable(&speed(), DeviceValue::Float(0.0));
        let connector = MockConnector::new().with_controller(ENDPOINT, controller.clone());

        let mut client = connect(&connector).await.unwrap();
        let addr = TagAddress::new(DEFAULT_NAMESPACE_INDEX, speed());
        let err = client.write(&addr, &StoreValue::text("abc")).await.unwrap_err();
        client.disconnect().await;

        match err {
            RecipeSyncError::Coercion(e) => assert_eq!(e.declared, DeclaredType::Float),
            other => panic!("expected coercion error, got {other}"),
        }
        assert!(controller.writes().is_empty());
    }

    #[tokio::test]
    async fn test_connect_timeout_is_classified() {
        let controller = MockController::new(NS).hang_on_connect();
        let connector = MockConnector::new().with_controller(ENDPOINT, controller);

        let err = connect(&connector).await.unwrap_err();
        assert!(matches!(
            err,
            RecipeSyncError::Connection {
                kind: ConnectionFailure::Timeout,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_failed_disconnect_is_not_escalated() {
        let controller = MockController::new(NS).fail_disconnect();
        let connector = MockConnector::new().with_controller(ENDPOINT, controller.clone());

        let client = connect(&connector).await.unwrap();
        client.disconnect().await;
        assert_eq!(controller.disconnects(), 1);
    }
}
