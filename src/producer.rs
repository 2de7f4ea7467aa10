//! Auto-recovering producer.
//!
//! A [`Producer`] owns a sender link whose lifecycle is driven by the
//! recovery supervisor. While the link is attached, sends take the fast
//! path straight to the transport. While it is suspended or recovering,
//! behavior depends on the configured [`SendMode`]:
//!
//! - `Reliable` sends park on the state watch channel and dispatch on the
//!   new link after recovery, strictly after every send that completed
//!   before the suspension.
//! - `FireAndForget` sends fail fast with a retryable error.
//!
//! Dispatch and settlement are decoupled: the link mutex is held only
//! while a message is put on the wire (so submission order is wire order),
//! and the broker's disposition is awaited afterwards with no lock held.
//! Any number of deliveries may therefore be unsettled concurrently, each
//! tracked in the outstanding-unsettled map by its delivery tag.
//!
//! Deliveries in flight at the moment of link failure are completed with a
//! retryable [`ClientError::LinkDetached`] carrying the link-close cause.
//! The producer never resends them: without an end-to-end message id
//! contract it cannot guarantee idempotence, so the retry decision belongs
//! to the application.
//!
//! Delivery tags are strictly increasing per link instance and reset when a
//! fresh link is attached; tags are never reused across re-attachment.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{ProducerOptions, SendMode};
use crate::connection::{ActiveConnection, ConnectCommand};
use crate::error::ClientError;
use crate::message::Message;
use crate::registry::{
    next_recoverable_id, Recoverable, RecoverableId, RecoverableRegistry,
};
use crate::state::LinkState;
use crate::transport::{SendDisposition, SenderLink, SenderOptions, TransportErrorKind};

/// Application handle for sending messages to one address.
///
/// Cheap to clone; all clones share the same link and state machine.
#[derive(Clone)]
pub struct Producer {
    inner: Arc<ProducerInner>,
}

impl Producer {
    /// The target address.
    pub fn address(&self) -> &str {
        &self.inner.options.address
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LinkState {
        *self.inner.state_tx.borrow()
    }

    /// Sends one message.
    ///
    /// Unset message attributes (durability, priority, TTL) inherit the
    /// producer defaults. Completion resolves when the broker settles the
    /// delivery; for a fire-and-forget producer, when the transport accepts
    /// the frame.
    ///
    /// # Errors
    /// - `LinkDetached` (retryable): the link failed mid-send or, for
    ///   fire-and-forget producers, is currently recovering.
    /// - `MessageRejected`: the broker refused the delivery.
    /// - `Cancelled`: `cancel` fired, or the producer is closed.
    pub async fn send(
        &self,
        message: Message,
        cancel: &CancellationToken,
    ) -> Result<(), ClientError> {
        let inner = &self.inner;
        let mut message = message;
        message.apply_defaults(
            inner.options.durable,
            inner.options.priority,
            inner.options.time_to_live,
        );

        loop {
            // State gate: fast-path when attached, park or fail otherwise.
            {
                let mut state_rx = inner.state_tx.subscribe();
                let state = *state_rx.borrow_and_update();
                match state {
                    LinkState::Closed => return Err(ClientError::Cancelled),
                    LinkState::Attached => {}
                    _ => {
                        if inner.options.send_mode == SendMode::FireAndForget {
                            return Err(ClientError::LinkDetached {
                                reason: "producer link is recovering".to_string(),
                            });
                        }
                        tokio::select! {
                            waited = state_rx.wait_for(|s| {
                                matches!(s, LinkState::Attached | LinkState::Closed)
                            }) => {
                                match waited {
                                    Ok(state) if state.is_closed() => {
                                        return Err(ClientError::Cancelled)
                                    }
                                    Ok(_) => {}
                                    Err(_) => return Err(ClientError::Cancelled),
                                }
                            }
                            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                        }
                    }
                }
            }

            // Dispatch under the link mutex, which is held only until the
            // message is on the wire: submission order is wire order, and
            // the settlement wait below holds no lock, so any number of
            // deliveries can be unsettled at once.
            let (tag, fail_rx, waiter) = {
                let guard = inner.link.lock().await;
                if !inner.state_tx.borrow().is_attached() {
                    continue;
                }
                let Some(link) = guard.as_ref() else {
                    continue;
                };

                let tag = inner.next_tag.fetch_add(1, Ordering::Relaxed) + 1;
                let (fail_tx, fail_rx) = oneshot::channel::<String>();
                inner.unsettled.lock().unwrap().insert(tag, fail_tx);

                match link.send(tag, message).await {
                    Ok(waiter) => (tag, fail_rx, waiter),
                    Err(e) => {
                        inner.unsettled.lock().unwrap().remove(&tag);
                        if e.kind == TransportErrorKind::Cancelled {
                            return Err(ClientError::Cancelled);
                        }
                        let reason = e.to_string();
                        drop(guard);
                        if e.is_connection_level() {
                            inner.on_link_failure(&reason);
                        }
                        return Err(ClientError::LinkDetached { reason });
                    }
                }
            };

            enum SendRace {
                Transport(Result<SendDisposition, crate::transport::TransportError>),
                LinkFailed(Option<String>),
                Cancelled,
            }

            let race = tokio::select! {
                result = waiter.wait() => SendRace::Transport(result),
                reason = fail_rx => SendRace::LinkFailed(reason.ok()),
                _ = cancel.cancelled() => SendRace::Cancelled,
            };
            inner.unsettled.lock().unwrap().remove(&tag);

            return match race {
                SendRace::Transport(Ok(SendDisposition::Accepted)) => Ok(()),
                SendRace::Transport(Ok(SendDisposition::Rejected(reason))) => {
                    Err(ClientError::MessageRejected { reason })
                }
                SendRace::Transport(Ok(SendDisposition::Released)) => {
                    Err(ClientError::LinkDetached {
                        reason: "delivery released by broker".to_string(),
                    })
                }
                SendRace::Transport(Err(e)) => {
                    if e.kind == TransportErrorKind::Cancelled {
                        return Err(ClientError::Cancelled);
                    }
                    let reason = e.to_string();
                    if e.is_connection_level() {
                        inner.on_link_failure(&reason);
                    }
                    Err(ClientError::LinkDetached { reason })
                }
                SendRace::LinkFailed(reason) => Err(ClientError::LinkDetached {
                    reason: reason
                        .unwrap_or_else(|| "link suspended during recovery".to_string()),
                }),
                SendRace::Cancelled => Err(ClientError::Cancelled),
            };
        }
    }

    /// Closes the producer. Terminal: parked and in-flight sends fail, the
    /// link detaches, and the registry entry is removed exactly once.
    pub async fn close(&self) {
        self.inner.close().await;
    }
}

pub(crate) struct ProducerInner {
    id: RecoverableId,
    options: ProducerOptions,
    state_tx: watch::Sender<LinkState>,
    link: Mutex<Option<Box<dyn SenderLink>>>,
    has_link: AtomicBool,
    next_tag: AtomicU64,
    /// In-flight deliveries: tag → failure waiter, drained on suspension.
    unsettled: StdMutex<HashMap<u64, oneshot::Sender<String>>>,
    last_error: StdMutex<Option<String>>,
    connection: StdMutex<Option<ActiveConnection>>,
    commands: mpsc::UnboundedSender<ConnectCommand>,
    registry: Arc<RecoverableRegistry>,
}

impl ProducerInner {
    pub(crate) fn new(
        options: ProducerOptions,
        commands: mpsc::UnboundedSender<ConnectCommand>,
        registry: Arc<RecoverableRegistry>,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(LinkState::Initializing);
        Arc::new(Self {
            id: next_recoverable_id(),
            options,
            state_tx,
            link: Mutex::new(None),
            has_link: AtomicBool::new(false),
            next_tag: AtomicU64::new(0),
            unsettled: StdMutex::new(HashMap::new()),
            last_error: StdMutex::new(None),
            connection: StdMutex::new(None),
            commands,
            registry,
        })
    }

    pub(crate) fn handle(self: &Arc<Self>) -> Producer {
        Producer {
            inner: self.clone(),
        }
    }

    /// Completes every in-flight send with a retryable error.
    fn drain_unsettled(&self, reason: &str) {
        let waiters: Vec<oneshot::Sender<String>> = {
            let mut unsettled = self.unsettled.lock().unwrap();
            unsettled.drain().map(|(_, tx)| tx).collect()
        };
        if !waiters.is_empty() {
            debug!(
                count = waiters.len(),
                "failing in-flight sends after link loss"
            );
        }
        for waiter in waiters {
            let _ = waiter.send(reason.to_string());
        }
    }

    /// Reacts to a witnessed link failure: quiesce, invalidate the shared
    /// connection and wake the supervisor.
    fn on_link_failure(&self, reason: &str) {
        {
            let state = *self.state_tx.borrow();
            if matches!(state, LinkState::Closed | LinkState::Suspended) {
                return;
            }
        }
        warn!(address = %self.options.address, "producer link failed: {reason}");
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
        self.has_link.store(false, Ordering::Release);
        self.drain_unsettled("producer closed");
        if let Some(link) = self.link.lock().await.take() {
            link.close().await;
        }
        self.registry.remove(self.id).await;
        debug!(address = %self.options.address, "producer closed");
    }
}

#[async_trait]
impl Recoverable for ProducerInner {
    fn id(&self) -> RecoverableId {
        self.id
    }

    fn lifecycle(&self) -> LinkState {
        *self.state_tx.borrow()
    }

    fn suspend(&self) {
        let suspended = self.state_tx.send_if_modified(|state| match state {
            LinkState::Attached | LinkState::Recovering => {
                *state = LinkState::Suspended;
                true
            }
            _ => false,
        });
        if suspended {
            self.has_link.store(false, Ordering::Release);
            let reason = self
                .last_error
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| "producer suspended for connection recovery".to_string());
            self.drain_unsettled(&reason);
        }
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

        let options = SenderOptions {
            // Fresh link name per attach; tags restart with the new link.
            link_name: format!("sender-{}", Uuid::new_v4()),
            address: self.options.address.clone(),
            queue: self.options.queue.clone(),
            capabilities: match self.options.routing {
                Some(routing) => vec![routing.capability()],
                None => vec!["queue", "topic"],
            },
            presettled: self.options.send_mode == SendMode::FireAndForget,
        };

        let opened = tokio::select! {
            result = connection.session().open_sender(options) => result,
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
        };
        let link = opened.map_err(|e| ClientError::LinkDetached {
            reason: format!("sender re-attach failed: {e}"),
        })?;

        *self.link.lock().await = Some(link);
        self.next_tag.store(0, Ordering::Release);
        *self.connection.lock().unwrap() = Some(connection.clone());
        *self.last_error.lock().unwrap() = None;
        self.has_link.store(true, Ordering::Release);
        debug!(address = %self.options.address, "producer link re-attached");
        Ok(())
    }

    fn resume(&self) {
        if !self.has_link.load(Ordering::Acquire) {
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
