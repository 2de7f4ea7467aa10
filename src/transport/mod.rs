//! Transport adapter: the minimal interface the recovery core depends on.
//!
//! Everything above this module (supervisor, producer, consumer, topology)
//! sees only these object-safe traits, never the AMQP library. That keeps
//! the protocol engine swappable and lets the test suite drive the full
//! recovery machinery against the in-memory [`mock`] broker.
//!
//! Two implementations ship:
//! - [`amqp`]: the production binding over `fe2o3-amqp`.
//! - [`mock`]: an in-memory broker for tests and local development.
//!
//! Error classification follows the same fatal-vs-retryable discipline as
//! the rest of the crate: every [`TransportError`] carries a
//! [`TransportErrorKind`] the core maps onto its own error kinds.

pub mod amqp;
pub mod mock;

use std::fmt;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::endpoint::Endpoint;
use crate::message::Message;

/// Coarse classification of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// A session could not be opened against the endpoint.
    ConnectFailed,
    /// The connection died underneath an operation.
    ConnectionLost,
    /// The link detached (remote close, attach refusal, forced detach).
    LinkDetached,
    /// The broker settled a delivery with a terminal rejection.
    Rejected,
    /// The operation was cancelled locally.
    Cancelled,
    /// A management request could not be exchanged.
    Management,
    /// An inbound message body could not be decoded into a supported type.
    Decode,
}

/// An error reported by a transport implementation.
#[derive(Debug, Clone)]
pub struct TransportError {
    /// What failed, coarsely.
    pub kind: TransportErrorKind,
    /// Human-readable cause from the underlying library or broker.
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn connect_failed(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::ConnectFailed, message)
    }

    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::ConnectionLost, message)
    }

    pub fn link_detached(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::LinkDetached, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Rejected, message)
    }

    pub fn cancelled() -> Self {
        Self::new(TransportErrorKind::Cancelled, "cancelled")
    }

    pub fn management(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Management, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Decode, message)
    }

    /// True when the failure invalidates the whole connection, not just the
    /// operation that observed it.
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self.kind,
            TransportErrorKind::ConnectionLost | TransportErrorKind::LinkDetached
        )
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for TransportError {}

/// Why a session is no longer usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedInfo {
    /// True when the remote peer initiated the close.
    pub closed_by_peer: bool,
    /// The close condition, when one was reported.
    pub error: Option<String>,
}

/// Options for opening a sender link.
#[derive(Debug, Clone)]
pub struct SenderOptions {
    /// Unique link name; the producer generates a fresh one per attach.
    pub link_name: String,
    /// Target address.
    pub address: String,
    /// Optional queue for a fully-qualified target.
    pub queue: Option<String>,
    /// Routing capabilities to advertise on the target (symbol names).
    pub capabilities: Vec<&'static str>,
    /// Open the link pre-settled (fire-and-forget).
    pub presettled: bool,
}

impl SenderOptions {
    /// The AMQP node address: `address` or `address::queue`.
    pub fn node_address(&self) -> String {
        match &self.queue {
            Some(queue) => format!("{}::{}", self.address, queue),
            None => self.address.clone(),
        }
    }
}

/// Options for opening a receiver link.
#[derive(Debug, Clone)]
pub struct ReceiverOptions {
    /// Unique link name; the consumer generates a fresh one per attach.
    pub link_name: String,
    /// Source address.
    pub address: String,
    /// Optional queue for a fully-qualified source.
    pub queue: Option<String>,
    /// Routing capabilities to advertise on the source (symbol names).
    pub capabilities: Vec<&'static str>,
    /// Credit granted immediately after attach.
    pub initial_credit: u32,
}

impl ReceiverOptions {
    /// The AMQP node address: `address` or `address::queue`.
    pub fn node_address(&self) -> String {
        match &self.queue {
            Some(queue) => format!("{}::{}", self.address, queue),
            None => self.address.clone(),
        }
    }
}

/// Terminal outcome of a delivery as settled by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendDisposition {
    /// The broker accepted the delivery.
    Accepted,
    /// The broker rejected the delivery; retrying the same message is
    /// pointless.
    Rejected(String),
    /// The broker released the delivery without consuming it.
    Released,
}

/// Waiter for the broker's settlement of an already dispatched delivery.
///
/// Returned by [`SenderLink::send`] once the message is on the wire, so the
/// caller can await settlement without holding any link state: many
/// deliveries may be in flight concurrently while wire order stays the
/// dispatch order.
pub struct DispositionWaiter {
    inner: WaiterInner,
}

enum WaiterInner {
    Ready(Result<SendDisposition, TransportError>),
    Pending(oneshot::Receiver<Result<SendDisposition, TransportError>>),
}

impl DispositionWaiter {
    /// A waiter that is already settled: pre-settled links and in-memory
    /// transports resolve at dispatch time.
    pub fn resolved(result: Result<SendDisposition, TransportError>) -> Self {
        Self {
            inner: WaiterInner::Ready(result),
        }
    }

    /// A waiter fed by a transport task. The transport resolves the
    /// returned sender when the disposition frame arrives.
    pub fn channel() -> (
        oneshot::Sender<Result<SendDisposition, TransportError>>,
        Self,
    ) {
        let (tx, rx) = oneshot::channel();
        (
            tx,
            Self {
                inner: WaiterInner::Pending(rx),
            },
        )
    }

    /// Resolves with the disposition. A transport that goes away before
    /// settling counts as a detached link.
    pub async fn wait(self) -> Result<SendDisposition, TransportError> {
        match self.inner {
            WaiterInner::Ready(result) => result,
            WaiterInner::Pending(rx) => rx.await.unwrap_or_else(|_| {
                Err(TransportError::link_detached(
                    "link closed before the delivery was settled",
                ))
            }),
        }
    }
}

/// A message delivered by a receiver link, tagged for disposition.
#[derive(Debug, Clone)]
pub struct InboundDelivery {
    /// Link-scoped delivery tag; pass it back to accept/reject.
    pub tag: u64,
    /// The decoded message.
    pub message: Message,
}

/// Reply to a management request.
#[derive(Debug, Clone)]
pub struct ManagementReply {
    /// Whether the broker reported the operation as succeeded.
    pub success: bool,
    /// Reply body: a JSON document on success, an error message otherwise.
    pub body: String,
}

/// Opens transport sessions against broker endpoints.
///
/// Re-invoked by the supervisor for every (re)connection attempt.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Opens a session over the given endpoint.
    async fn open(&self, endpoint: &Endpoint) -> Result<Box<dyn TransportSession>, TransportError>;
}

/// One open connection+session pair.
///
/// All methods take `&self`; implementations handle interior mutability so
/// the session can be shared behind an `Arc` by the supervisor and every
/// recoverable attached to it.
#[async_trait]
pub trait TransportSession: Send + Sync {
    /// Opens a sender link.
    async fn open_sender(
        &self,
        options: SenderOptions,
    ) -> Result<Box<dyn SenderLink>, TransportError>;

    /// Opens a receiver link.
    async fn open_receiver(
        &self,
        options: ReceiverOptions,
    ) -> Result<Box<dyn ReceiverLink>, TransportError>;

    /// Opens a management request/reply channel.
    async fn open_management(&self) -> Result<Box<dyn ManagementLink>, TransportError>;

    /// Whether the underlying transport still considers itself open.
    fn is_open(&self) -> bool;

    /// Token cancelled when the session stops being usable (peer close, or
    /// a connection-level failure observed by any operation).
    fn closed(&self) -> CancellationToken;

    /// Details of the close, once [`closed`](Self::closed) has fired.
    fn closed_info(&self) -> Option<ClosedInfo>;

    /// Closes the session and its connection.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Outbound side of a link.
#[async_trait]
pub trait SenderLink: Send + Sync {
    /// Dispatches one message onto the wire. Dispatch order is wire order.
    /// The returned waiter resolves when the broker settles the delivery
    /// (immediately for pre-settled links); awaiting it holds no link
    /// state, so any number of deliveries may be unsettled at once. The
    /// tag is link-scoped and strictly increasing; it is chosen by the
    /// producer.
    async fn send(&self, tag: u64, message: Message)
        -> Result<DispositionWaiter, TransportError>;

    /// Detaches the link. Best effort.
    async fn close(&self);
}

/// Inbound side of a link.
#[async_trait]
pub trait ReceiverLink: Send + Sync {
    /// Waits for the next delivery. Single-consumer: only the owning
    /// consumer's pump task calls this.
    async fn receive(&self) -> Result<InboundDelivery, TransportError>;

    /// Accepts the delivery with the given tag.
    async fn accept(&self, tag: u64) -> Result<(), TransportError>;

    /// Rejects the delivery with the given tag.
    async fn reject(&self, tag: u64) -> Result<(), TransportError>;

    /// Grants additional credit to the broker.
    async fn add_credit(&self, n: u32) -> Result<(), TransportError>;

    /// Detaches the link. Best effort.
    async fn close(&self);
}

/// Broker management request/reply channel.
#[async_trait]
pub trait ManagementLink: Send + Sync {
    /// Executes one management operation with JSON-encoded parameters.
    async fn request(
        &self,
        operation: &str,
        params: serde_json::Value,
    ) -> Result<ManagementReply, TransportError>;

    /// Detaches the channel. Best effort.
    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_address_formats_fqqn() {
        let options = SenderOptions {
            link_name: "l".into(),
            address: "orders".into(),
            queue: Some("eu".into()),
            capabilities: vec!["queue"],
            presettled: false,
        };
        assert_eq!(options.node_address(), "orders::eu");

        let options = ReceiverOptions {
            link_name: "l".into(),
            address: "orders".into(),
            queue: None,
            capabilities: vec!["queue"],
            initial_credit: 10,
        };
        assert_eq!(options.node_address(), "orders");
    }

    #[test]
    fn connection_level_classification() {
        assert!(TransportError::connection_lost("x").is_connection_level());
        assert!(TransportError::link_detached("x").is_connection_level());
        assert!(!TransportError::rejected("x").is_connection_level());
        assert!(!TransportError::cancelled().is_connection_level());
    }

    #[tokio::test]
    async fn disposition_waiter_resolution() {
        let waiter = DispositionWaiter::resolved(Ok(SendDisposition::Accepted));
        assert_eq!(waiter.wait().await.unwrap(), SendDisposition::Accepted);

        let (tx, waiter) = DispositionWaiter::channel();
        tx.send(Ok(SendDisposition::Released)).ok();
        assert_eq!(waiter.wait().await.unwrap(), SendDisposition::Released);

        // A transport dropped mid-flight settles as a detached link.
        let (tx, waiter) = DispositionWaiter::channel();
        drop(tx);
        let err = waiter.wait().await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::LinkDetached);
    }
}
