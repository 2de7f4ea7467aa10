//! Broker topology management: addresses and queues.
//!
//! [`TopologyManager`] drives the Artemis management endpoint through the
//! transport's request/reply channel. Operations are synchronous
//! request/response; broker rejections surface as
//! [`ClientError::TopologyConflict`] carrying the broker's message (e.g.
//! `"Address already exists"`, `"AddressDoesNotExist"`) and are never
//! retried; the caller decides whether an existing address is an error or
//! an idempotent success.

use serde::Serialize;
use serde_json::json;

use crate::config::RoutingType;
use crate::error::ClientError;
use crate::transport::{ManagementLink, ManagementReply, TransportError, TransportErrorKind};

/// Parameters for creating a queue, in the broker's recognized shape.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSpec {
    /// Queue name.
    pub name: String,
    /// Address the queue binds to.
    pub address: String,
    /// Routing semantics of the binding.
    pub routing_type: RoutingType,
    /// Whether the queue survives broker restarts.
    pub durable: bool,
    /// Restrict delivery to a single consumer.
    pub exclusive: bool,
    /// Rebalance message groups when consumers change.
    pub group_rebalance: bool,
    /// Number of group buckets, when grouping is bucketed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_buckets: Option<i32>,
    /// Upper bound on concurrent consumers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_consumers: Option<i32>,
    /// Create the address on demand if it does not exist.
    pub auto_create_address: bool,
    /// Delete remaining messages when the last consumer detaches.
    pub purge_on_no_consumers: bool,
}

impl QueueSpec {
    /// A durable anycast queue bound to `address`, with broker-side
    /// address auto-creation enabled.
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            routing_type: RoutingType::Anycast,
            durable: true,
            exclusive: false,
            group_rebalance: false,
            group_buckets: None,
            max_consumers: None,
            auto_create_address: true,
            purge_on_no_consumers: false,
        }
    }

    pub fn with_routing(mut self, routing: RoutingType) -> Self {
        self.routing_type = routing;
        self
    }

    pub fn non_durable(mut self) -> Self {
        self.durable = false;
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn with_max_consumers(mut self, max: i32) -> Self {
        self.max_consumers = Some(max);
        self
    }

    pub fn with_group_buckets(mut self, buckets: i32) -> Self {
        self.group_rebalance = true;
        self.group_buckets = Some(buckets);
        self
    }

    /// Fail queue creation when the address does not already exist.
    pub fn without_address_auto_create(mut self) -> Self {
        self.auto_create_address = false;
        self
    }

    pub fn purge_on_no_consumers(mut self) -> Self {
        self.purge_on_no_consumers = true;
        self
    }
}

/// Handle for broker management operations.
///
/// Bound to the connection it was created on: after a reconnect, obtain a
/// fresh one via `Client::topology()`.
pub struct TopologyManager {
    link: Box<dyn ManagementLink>,
}

impl TopologyManager {
    pub(crate) fn new(link: Box<dyn ManagementLink>) -> Self {
        Self { link }
    }

    /// Creates an address with the given routing types.
    ///
    /// # Errors
    /// `TopologyConflict` when the address already exists (the broker
    /// message contains `"Address already exists"`).
    pub async fn create_address(
        &self,
        name: &str,
        routing: &[RoutingType],
    ) -> Result<(), ClientError> {
        if name.is_empty() {
            return Err(ClientError::configuration("address name must not be empty"));
        }
        if routing.is_empty() {
            return Err(ClientError::configuration(
                "at least one routing type is required",
            ));
        }
        let csv = routing
            .iter()
            .map(|r| r.artemis_name())
            .collect::<Vec<_>>()
            .join(",");
        let reply = self.request("createAddress", json!([name, csv])).await?;
        Self::expect_success(reply).map(|_| ())
    }

    /// Creates a queue.
    ///
    /// # Errors
    /// `TopologyConflict` when the queue exists or its address is missing
    /// with auto-creation disabled (broker message contains
    /// `"AddressDoesNotExist"`).
    pub async fn create_queue(&self, spec: &QueueSpec) -> Result<(), ClientError> {
        if spec.name.is_empty() || spec.address.is_empty() {
            return Err(ClientError::configuration(
                "queue name and address must not be empty",
            ));
        }
        let body = serde_json::to_string(spec)
            .map_err(|e| ClientError::configuration(format!("queue spec: {e}")))?;
        let reply = self.request("createQueue", json!([body])).await?;
        Self::expect_success(reply).map(|_| ())
    }

    /// Lists all address names known to the broker.
    pub async fn get_address_names(&self) -> Result<Vec<String>, ClientError> {
        let reply = self.request("getAddressNames", json!([])).await?;
        Self::parse_names(Self::expect_success(reply)?)
    }

    /// Lists all queue names known to the broker.
    pub async fn get_queue_names(&self) -> Result<Vec<String>, ClientError> {
        let reply = self.request("getQueueNames", json!([])).await?;
        Self::parse_names(Self::expect_success(reply)?)
    }

    /// Detaches the management channel.
    pub async fn close(self) {
        self.link.close().await;
    }

    async fn request(
        &self,
        operation: &str,
        params: serde_json::Value,
    ) -> Result<ManagementReply, ClientError> {
        self.link
            .request(operation, params)
            .await
            .map_err(Self::map_transport)
    }

    fn map_transport(e: TransportError) -> ClientError {
        match e.kind {
            TransportErrorKind::Cancelled => ClientError::Cancelled,
            _ => ClientError::LinkDetached {
                reason: e.to_string(),
            },
        }
    }

    fn expect_success(reply: ManagementReply) -> Result<ManagementReply, ClientError> {
        if reply.success {
            Ok(reply)
        } else {
            Err(ClientError::TopologyConflict {
                message: reply.body,
            })
        }
    }

    /// Reply bodies wrap the result in an outer JSON array; name listings
    /// arrive as `[[name, ...]]`.
    fn parse_names(reply: ManagementReply) -> Result<Vec<String>, ClientError> {
        let value: serde_json::Value = serde_json::from_str(&reply.body)
            .map_err(|e| ClientError::Fatal(format!("malformed management reply: {e}")))?;
        let names = match &value {
            serde_json::Value::Array(outer) => match outer.first() {
                Some(serde_json::Value::Array(inner)) => inner.as_slice(),
                _ => outer.as_slice(),
            },
            _ => {
                return Err(ClientError::Fatal(
                    "malformed management reply: expected an array".to_string(),
                ))
            }
        };
        Ok(names
            .iter()
            .filter_map(|n| n.as_str().map(str::to_owned))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;
    use crate::transport::mock::MockBroker;
    use crate::transport::{TransportConnector, TransportSession};

    async fn manager(broker: &MockBroker) -> TopologyManager {
        let endpoint = Endpoint::parse("amqp://localhost:5672").unwrap();
        let session = broker.connector().open(&endpoint).await.unwrap();
        let link = session.open_management().await.unwrap();
        TopologyManager::new(link)
    }

    #[tokio::test]
    async fn create_address_twice_is_a_conflict() {
        let broker = MockBroker::new();
        let topology = manager(&broker).await;

        topology
            .create_address("orders", &[RoutingType::Anycast])
            .await
            .unwrap();

        let err = topology
            .create_address("orders", &[RoutingType::Multicast])
            .await
            .unwrap_err();
        match err {
            ClientError::TopologyConflict { message } => {
                assert!(message.contains("Address already exists"));
            }
            other => panic!("expected TopologyConflict, got {other}"),
        }
    }

    #[tokio::test]
    async fn create_queue_without_auto_create_needs_the_address() {
        let broker = MockBroker::new();
        let topology = manager(&broker).await;

        let spec = QueueSpec::new("missing", "missing.q").without_address_auto_create();
        let err = topology.create_queue(&spec).await.unwrap_err();
        match err {
            ClientError::TopologyConflict { message } => {
                assert!(message.contains("AddressDoesNotExist"));
            }
            other => panic!("expected TopologyConflict, got {other}"),
        }

        // With auto-creation the same spec succeeds.
        let spec = QueueSpec::new("missing", "missing.q");
        topology.create_queue(&spec).await.unwrap();
    }

    #[tokio::test]
    async fn name_listings_round_trip() {
        let broker = MockBroker::new();
        let topology = manager(&broker).await;

        topology
            .create_address("alpha", &[RoutingType::Anycast])
            .await
            .unwrap();
        topology
            .create_address("beta", &[RoutingType::Multicast])
            .await
            .unwrap();
        topology
            .create_queue(&QueueSpec::new("alpha", "alpha.q"))
            .await
            .unwrap();

        assert_eq!(
            topology.get_address_names().await.unwrap(),
            vec!["alpha".to_string(), "beta".to_string()]
        );
        assert_eq!(
            topology.get_queue_names().await.unwrap(),
            vec!["alpha.q".to_string()]
        );
    }

    #[tokio::test]
    async fn validation_errors_are_local() {
        let broker = MockBroker::new();
        let topology = manager(&broker).await;

        assert!(matches!(
            topology.create_address("", &[RoutingType::Anycast]).await,
            Err(ClientError::Configuration(_))
        ));
        assert!(matches!(
            topology.create_address("a", &[]).await,
            Err(ClientError::Configuration(_))
        ));
    }
}
