//! Auto-recovering consumer.
//!
//! A [`Consumer`] owns a receiver link plus a bounded prefetch buffer. A
//! pump task pulls deliveries from the current link into the buffer; the
//! application drains the buffer FIFO via [`Consumer::receive`]. During
//! recovery the buffer is drained but not refilled, and it survives the
//! link swap untouched. No buffered message is ever discarded except by
//! [`Consumer::close`].
//!
//! Credit accounting: the link opens with credit equal to the prefetch
//! window; on recovery the fresh link opens with `prefetch - buffered` so
//! the broker can never overrun the buffer. Credit is returned one-for-one
//! per settled (or, optionally, per received) message.
//!
//! Deliveries are stamped with the link generation that produced them.
//! Settling a delivery from a previous generation succeeds silently
//! locally: the broker still owns the message and redelivers it on the next
//! attach, which is what gives at-least-once semantics across a reconnect.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{ConsumerOptions, CreditRefillMode};
use crate::connection::{ActiveConnection, ConnectCommand};
use crate::error::ClientError;
use crate::message::Message;
use crate::registry::{
    next_recoverable_id, Recoverable, RecoverableId, RecoverableRegistry,
};
use crate::state::LinkState;
use crate::transport::{ReceiverLink, ReceiverOptions, TransportErrorKind};

/// A received message, ready to be settled.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    message: Message,
    tag: u64,
    generation: u64,
}

impl InboundMessage {
    /// The message payload and attributes.
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Consumes the wrapper, returning the message.
    pub fn into_message(self) -> Message {
        self.message
    }
}

#[derive(Clone)]
struct LinkSlot {
    link: Arc<dyn ReceiverLink>,
    generation: u64,
}

/// Application handle for receiving messages from one address or queue.
///
/// Cheap to clone; receives are serialized across clones (the prefetch
/// buffer has a single consumer).
#[derive(Clone)]
pub struct Consumer {
    inner: Arc<ConsumerInner>,
}

impl Consumer {
    /// The source address.
    pub fn address(&self) -> &str {
        &self.inner.options.address
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LinkState {
        *self.inner.state_tx.borrow()
    }

    /// Waits for the next message, FIFO from the prefetch buffer.
    ///
    /// Buffered messages remain receivable while the link recovers; the
    /// call parks only when the buffer is empty.
    ///
    /// # Errors
    /// `Cancelled` when `cancel` fires or the consumer is closed.
    pub async fn receive(&self, cancel: &CancellationToken) -> Result<InboundMessage, ClientError> {
        let inner = &self.inner;
        if inner.lifecycle().is_closed() {
            return Err(ClientError::Cancelled);
        }
        let mut buffer = inner.buffer_rx.lock().await;
        let message = tokio::select! {
            message = buffer.recv() => message.ok_or(ClientError::Cancelled)?,
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            _ = inner.closed.cancelled() => return Err(ClientError::Cancelled),
        };
        drop(buffer);
        inner.buffered.fetch_sub(1, Ordering::AcqRel);

        if inner.options.credit_refill == CreditRefillMode::OnReceive {
            inner.refill_credit().await;
        }
        Ok(message)
    }

    /// Accepts a delivery.
    ///
    /// After the originating link is gone this succeeds silently; the
    /// broker redelivers the message on the next attach.
    pub async fn accept(&self, message: &InboundMessage) -> Result<(), ClientError> {
        self.inner.settle(message, Settlement::Accept).await
    }

    /// Rejects a delivery.
    ///
    /// Same post-link-loss semantics as [`accept`](Consumer::accept).
    pub async fn reject(&self, message: &InboundMessage) -> Result<(), ClientError> {
        self.inner.settle(message, Settlement::Reject).await
    }

    /// Closes the consumer. Terminal: the buffer is discarded, the link
    /// detaches and the registry entry is removed exactly once.
    pub async fn close(&self) {
        self.inner.close().await;
    }
}

#[derive(Clone, Copy)]
enum Settlement {
    Accept,
    Reject,
}

pub(crate) struct ConsumerInner {
    id: RecoverableId,
    options: ConsumerOptions,
    state_tx: watch::Sender<LinkState>,
    slot: StdMutex<Option<LinkSlot>>,
    generation: AtomicU64,
    buffer_tx: mpsc::Sender<InboundMessage>,
    buffer_rx: Mutex<mpsc::Receiver<InboundMessage>>,
    /// Messages delivered by the link but not yet handed to the
    /// application; drives the recovery credit computation.
    buffered: AtomicUsize,
    last_error: StdMutex<Option<String>>,
    connection: StdMutex<Option<ActiveConnection>>,
    commands: mpsc::UnboundedSender<ConnectCommand>,
    registry: Arc<RecoverableRegistry>,
    closed: CancellationToken,
}

impl ConsumerInner {
    pub(crate) fn new(
        options: ConsumerOptions,
        commands: mpsc::UnboundedSender<ConnectCommand>,
        registry: Arc<RecoverableRegistry>,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(LinkState::Initializing);
        let (buffer_tx, buffer_rx) = mpsc::channel(options.prefetch.max(1) as usize);
        Arc::new(Self {
            id: next_recoverable_id(),
            options,
            state_tx,
            slot: StdMutex::new(None),
            generation: AtomicU64::new(0),
            buffer_tx,
            buffer_rx: Mutex::new(buffer_rx),
            buffered: AtomicUsize::new(0),
            last_error: StdMutex::new(None),
            connection: StdMutex::new(None),
            commands,
            registry,
            closed: CancellationToken::new(),
        })
    }

    pub(crate) fn handle(self: &Arc<Self>) -> Consumer {
        Consumer {
            inner: self.clone(),
        }
    }

    /// Spawns the pump that moves deliveries from the current link into the
    /// prefetch buffer. Called once at creation.
    pub(crate) fn start(self: &Arc<Self>) {
        let inner = self.clone();
        tokio::spawn(async move { inner.pump().await });
    }

    fn link_snapshot(&self) -> Option<LinkSlot> {
        self.slot.lock().unwrap().clone()
    }

    fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    async fn pump(self: Arc<Self>) {
        loop {
            let mut state_rx = self.state_tx.subscribe();
            let waited = tokio::select! {
                waited = state_rx.wait_for(|s| {
                    matches!(s, LinkState::Attached | LinkState::Closed)
                }) => waited.map(|state| *state),
                _ = self.closed.cancelled() => return,
            };
            match waited {
                Ok(state) if state.is_closed() => return,
                Ok(_) => {}
                Err(_) => return,
            }

            let Some(slot) = self.link_snapshot() else {
                tokio::task::yield_now().await;
                continue;
            };

            let received = tokio::select! {
                received = slot.link.receive() => received,
                _ = self.closed.cancelled() => return,
            };
            match received {
                Ok(delivery) => {
                    self.buffered.fetch_add(1, Ordering::AcqRel);
                    let inbound = InboundMessage {
                        message: delivery.message,
                        tag: delivery.tag,
                        generation: slot.generation,
                    };
                    tokio::select! {
                        sent = self.buffer_tx.send(inbound) => {
                            if sent.is_err() {
                                return;
                            }
                        }
                        _ = self.closed.cancelled() => return,
                    }
                }
                Err(e) if e.kind == TransportErrorKind::Cancelled => {}
                Err(e) => {
                    // Only the current link's failure is news; a stale link
                    // erroring after the supervisor moved on is expected.
                    if self.state_tx.borrow().is_attached()
                        && self.current_generation() == slot.generation
                    {
                        self.on_link_failure(&e.to_string());
                    }
                }
            }
        }
    }

    /// Returns one credit to the broker, best effort.
    async fn refill_credit(&self) {
        if !self.state_tx.borrow().is_attached() {
            return;
        }
        if let Some(slot) = self.link_snapshot() {
            if let Err(e) = slot.link.add_credit(1).await {
                debug!("credit refill deferred: {e}");
            }
        }
    }

    async fn settle(&self, message: &InboundMessage, how: Settlement) -> Result<(), ClientError> {
        if self.lifecycle().is_closed() {
            return Err(ClientError::Cancelled);
        }
        let Some(slot) = self.link_snapshot() else {
            return Ok(());
        };
        // A delivery from an earlier link generation settles locally only;
        // the broker redelivers it on the next attach. Its buffer space is
        // freed all the same, so the current link still earns the credit.
        if slot.generation != message.generation || !self.state_tx.borrow().is_attached() {
            if self.options.credit_refill == CreditRefillMode::OnSettlement {
                self.refill_credit().await;
            }
            return Ok(());
        }

        let result = match how {
            Settlement::Accept => slot.link.accept(message.tag).await,
            Settlement::Reject => slot.link.reject(message.tag).await,
        };
        match result {
            Ok(()) => {
                if self.options.credit_refill == CreditRefillMode::OnSettlement {
                    self.refill_credit().await;
                }
                Ok(())
            }
            Err(e) if e.kind == TransportErrorKind::Cancelled => Err(ClientError::Cancelled),
            Err(e) => {
                if e.is_connection_level() {
                    self.on_link_failure(&e.to_string());
                }
                Ok(())
            }
        }
    }

    fn on_link_failure(&self, reason: &str) {
        {
            let state = *self.state_tx.borrow();
            if matches!(state, LinkState::Closed | LinkState::Suspended) {
                return;
            }
        }
        warn!(address = %self.options.address, "consumer link failed: {reason}");
        *self.last_error.lock().unwrap() = Some(reason.to_string());
        let connection = self.connection.lock().unwrap().clone();
        if let Some(connection) = connection {
            connection.mark_failed(reason, true);
        }
        self.suspend();
        let _ = self.commands.send(ConnectCommand::wakeup());
    }

    async fn close(&self) {
        let previous = self.state_tx.send_replace(LinkState::Closed);
        if previous == LinkState::Closed {
            return;
        }
        self.closed.cancel();
        let slot = self.slot.lock().unwrap().take();
        if let Some(slot) = slot {
            slot.link.close().await;
        }
        self.registry.remove(self.id).await;
        debug!(address = %self.options.address, "consumer closed");
    }
}

#[async_trait]
impl Recoverable for ConsumerInner {
    fn id(&self) -> RecoverableId {
        self.id
    }

    fn lifecycle(&self) -> LinkState {
        *self.state_tx.borrow()
    }

    fn suspend(&self) {
        self.state_tx.send_if_modified(|state| match state {
            LinkState::Attached | LinkState::Recovering => {
                *state = LinkState::Suspended;
                true
            }
            _ => false,
        });
    }

    async fn recover(
        &self,
        connection: &ActiveConnection,
        cancel: &CancellationToken,
    ) -> Result<(), ClientError> {
        if self.lifecycle().is_closed() {
            return Ok(());
        }
        self.state_tx.send_if_modified(|state| {
            if state.is_closed() {
                false
            } else {
                *state = LinkState::Recovering;
                true
            }
        });

        // The broker may only fill what the buffer can still hold.
        let buffered = self.buffered.load(Ordering::Acquire) as u32;
        let initial_credit = self.options.prefetch.saturating_sub(buffered);
        let options = ReceiverOptions {
            link_name: format!("receiver-{}", Uuid::new_v4()),
            address: self.options.address.clone(),
            queue: self.options.queue.clone(),
            capabilities: vec![self.options.routing.capability()],
            initial_credit,
        };

        let opened = tokio::select! {
            result = connection.session().open_receiver(options) => result,
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
        };
        let link = opened.map_err(|e| ClientError::LinkDetached {
            reason: format!("receiver re-attach failed: {e}"),
        })?;

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *self.slot.lock().unwrap() = Some(LinkSlot {
            link: Arc::from(link),
            generation,
        });
        *self.connection.lock().unwrap() = Some(connection.clone());
        *self.last_error.lock().unwrap() = None;
        debug!(
            address = %self.options.address,
            credit = initial_credit,
            "consumer link re-attached"
        );
        Ok(())
    }

    fn resume(&self) {
        if self.link_snapshot().is_none() {
            return;
        }
        self.state_tx.send_if_modified(|state| match state {
            LinkState::Initializing | LinkState::Suspended | LinkState::Recovering => {
                *state = LinkState::Attached;
                true
            }
            _ => false,
        });
    }

    async fn shutdown(&self) {
        self.close().await;
    }
}
