//! The thin public façade: builder, connect handshake, resource creation.
//!
//! [`Client::builder`] collects endpoints, a recovery policy and (for
//! tests) a transport override, then [`ClientBuilder::connect`] spawns the
//! recovery supervisor and performs the initial connect through the same
//! command channel every later recovery uses. Producers and consumers are
//! created through an attach handshake with the supervisor, so link
//! attachment stays single-writer no matter when resources are created.

use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;
use validator::Validate;

use crate::config::{ClientConfig, ConsumerOptions, ProducerOptions};
use crate::connection::{ActiveConnection, ConnectCommand};
use crate::consumer::{Consumer, ConsumerInner};
use crate::endpoint::Endpoint;
use crate::error::ClientError;
use crate::policy::RecoveryPolicy;
use crate::producer::{Producer, ProducerInner};
use crate::registry::{Recoverable, RecoverableId, RecoverableRegistry};
use crate::state::ConnectionState;
use crate::supervisor::RecoverySupervisor;
use crate::topology::TopologyManager;
use crate::transport::amqp::AmqpConnector;
use crate::transport::TransportConnector;

/// Builder for a [`Client`].
#[derive(Default)]
pub struct ClientBuilder {
    endpoints: Vec<Endpoint>,
    policy: Option<RecoveryPolicy>,
    container_id: Option<String>,
    connector: Option<Arc<dyn TransportConnector>>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds from a loaded [`ClientConfig`].
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let mut builder = Self::new();
        for url in &config.endpoints {
            builder = builder.endpoint(Endpoint::parse(url)?);
        }
        if let Some(container_id) = &config.container_id {
            builder = builder.container_id(container_id.clone());
        }
        Ok(builder.policy(config.recovery.build()?))
    }

    /// Appends one broker endpoint to the rotation.
    pub fn endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// Appends several endpoints, preserving order.
    pub fn endpoints(mut self, endpoints: impl IntoIterator<Item = Endpoint>) -> Self {
        self.endpoints.extend(endpoints);
        self
    }

    /// Overrides the recovery policy (default: unbounded exponential
    /// backoff, 1 s doubling to 60 s).
    pub fn policy(mut self, policy: impl Into<RecoveryPolicy>) -> Self {
        self.policy = Some(policy.into());
        self
    }

    /// Sets the AMQP container id.
    pub fn container_id(mut self, container_id: impl Into<String>) -> Self {
        self.container_id = Some(container_id.into());
        self
    }

    /// Replaces the transport, e.g. with
    /// [`MockBroker::connector`](crate::transport::mock::MockBroker::connector)
    /// in tests.
    pub fn connector(mut self, connector: Arc<dyn TransportConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Spawns the supervisor and establishes the first connection.
    ///
    /// Blocks until the initial connect cycle completes; with an unbounded
    /// policy and an unreachable broker, that is until cancellation. On
    /// failure the supervisor is torn down again.
    pub async fn connect(self) -> Result<Client, ClientError> {
        if self.endpoints.is_empty() {
            return Err(ClientError::configuration(
                "at least one endpoint is required",
            ));
        }
        let connector = match self.connector {
            Some(connector) => connector,
            None => {
                let mut amqp = AmqpConnector::new();
                if let Some(container_id) = &self.container_id {
                    amqp = amqp.with_container_id(container_id.clone());
                }
                Arc::new(amqp)
            }
        };

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let cancel = CancellationToken::new();
        let registry = Arc::new(RecoverableRegistry::new());
        let current = Arc::new(RwLock::new(None));

        let supervisor = RecoverySupervisor::new(
            self.endpoints,
            self.policy.unwrap_or_default(),
            connector,
            registry.clone(),
            command_rx,
            command_tx.clone(),
            cancel.clone(),
            state_tx,
            current.clone(),
        );
        let task = tokio::spawn(supervisor.run());

        let client = Client {
            command_tx,
            cancel,
            registry,
            state_rx,
            current,
            task: StdMutex::new(Some(task)),
        };

        let (notify_tx, notify_rx) = oneshot::channel();
        client
            .command_tx
            .send(ConnectCommand::Reconnect {
                notifier: Some(notify_tx),
            })
            .map_err(|_| ClientError::Fatal("supervisor terminated before connect".to_string()))?;

        let connected = match notify_rx.await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Fatal(
                "supervisor terminated during connect".to_string(),
            )),
        };
        if let Err(e) = connected {
            client.close().await;
            return Err(e);
        }
        info!("client connected");
        Ok(client)
    }
}

/// A long-lived logical connection with auto-recovering producers and
/// consumers.
///
/// Handles created from it stay valid across broker outages; the recovery
/// supervisor re-establishes session and links transparently. Call
/// [`Client::close`] to shut down; dropping the client without closing
/// leaves the supervisor task running.
pub struct Client {
    command_tx: mpsc::UnboundedSender<ConnectCommand>,
    cancel: CancellationToken,
    registry: Arc<RecoverableRegistry>,
    state_rx: watch::Receiver<ConnectionState>,
    current: Arc<RwLock<Option<ActiveConnection>>>,
    task: StdMutex<Option<JoinHandle<()>>>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Watch channel of connection state transitions.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Whether the connection is currently established.
    pub fn is_connected(&self) -> bool {
        self.state_rx.borrow().is_connected()
    }

    /// Creates a producer and attaches its link.
    ///
    /// # Errors
    /// `Validation` for bad options, `Cancelled` after [`Client::close`],
    /// or the attach failure reported by the supervisor.
    pub async fn create_producer(&self, options: ProducerOptions) -> Result<Producer, ClientError> {
        if self.cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }
        options.validate()?;
        let inner = ProducerInner::new(options, self.command_tx.clone(), self.registry.clone());
        self.registry.add(inner.clone()).await;
        match self.attach(inner.id()).await {
            Ok(()) => Ok(inner.handle()),
            Err(e) => {
                inner.shutdown().await;
                Err(e)
            }
        }
    }

    /// Creates a consumer, attaches its link and starts its prefetch pump.
    ///
    /// # Errors
    /// As for [`Client::create_producer`].
    pub async fn create_consumer(&self, options: ConsumerOptions) -> Result<Consumer, ClientError> {
        if self.cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }
        options.validate()?;
        let inner = ConsumerInner::new(options, self.command_tx.clone(), self.registry.clone());
        self.registry.add(inner.clone()).await;
        inner.start();
        match self.attach(inner.id()).await {
            Ok(()) => Ok(inner.handle()),
            Err(e) => {
                inner.shutdown().await;
                Err(e)
            }
        }
    }

    /// Opens a topology manager on the current connection.
    ///
    /// # Errors
    /// `ConnectFailed` when the connection is not open right now.
    pub async fn topology(&self) -> Result<TopologyManager, ClientError> {
        if self.cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }
        let connection = self.current.read().await.clone();
        let connection = connection
            .filter(|c| c.is_opened())
            .ok_or_else(|| ClientError::ConnectFailed {
                endpoint: "activemq.management".to_string(),
                reason: "connection is not open".to_string(),
            })?;
        let link = connection
            .session()
            .open_management()
            .await
            .map_err(|e| ClientError::ConnectFailed {
                endpoint: "activemq.management".to_string(),
                reason: e.to_string(),
            })?;
        Ok(TopologyManager::new(link))
    }

    /// Shuts the client down: closes every producer/consumer, stops the
    /// supervisor and closes the connection. Idempotent; subsequent
    /// operations fail with `Cancelled`.
    pub async fn close(&self) {
        for recoverable in self.registry.snapshot().await {
            recoverable.shutdown().await;
        }
        self.cancel.cancel();
        let task = self.task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        info!("client closed");
    }

    async fn attach(&self, id: RecoverableId) -> Result<(), ClientError> {
        let (notify_tx, notify_rx) = oneshot::channel();
        self.command_tx
            .send(ConnectCommand::Attach {
                id,
                notifier: notify_tx,
            })
            .map_err(|_| ClientError::Cancelled)?;
        match notify_rx.await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Cancelled),
        }
    }
}
