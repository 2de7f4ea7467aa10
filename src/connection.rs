//! Logical connection wrapper and supervisor commands.
//!
//! An [`ActiveConnection`] is the supervisor-owned handle to one transport
//! session. Recoverables receive it during recovery, open their links
//! through it, and keep a clone so a witnessed link failure can mark the
//! whole connection failed, which is what forces the next supervisor cycle
//! to rebuild rather than fast-path.
//!
//! `is_opened` follows the strict rule: it reflects the transport's actual
//! open state, and a local close makes it false immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ClientError;
use crate::registry::RecoverableId;
use crate::transport::{ClosedInfo, TransportSession};

/// Completion notifier carried by a connect command.
pub(crate) type ConnectNotifier = oneshot::Sender<Result<(), ClientError>>;

/// A single-shot message on the supervisor's command channel.
pub(crate) enum ConnectCommand {
    /// "Please (re)connect now." Failure handlers emit these without a
    /// notifier; explicit connect requests carry one and are fulfilled when
    /// the cycle finishes.
    Reconnect { notifier: Option<ConnectNotifier> },

    /// Attach one newly registered resource on the live connection. The
    /// supervisor stays the sole caller of the recovery lifecycle even for
    /// resources created after connect.
    Attach {
        id: RecoverableId,
        notifier: ConnectNotifier,
    },
}

impl ConnectCommand {
    /// A fire-and-forget wake-up.
    pub(crate) fn wakeup() -> Self {
        ConnectCommand::Reconnect { notifier: None }
    }
}

/// The supervisor-owned wrapper around one transport session.
///
/// Cheap to clone; all clones observe the same open/failed state.
#[derive(Clone)]
pub struct ActiveConnection {
    session: Arc<dyn TransportSession>,
    opened: Arc<AtomicBool>,
    failure: Arc<Mutex<Option<ClosedInfo>>>,
    closed: CancellationToken,
}

impl ActiveConnection {
    pub(crate) fn new(session: Box<dyn TransportSession>) -> Self {
        let session: Arc<dyn TransportSession> = Arc::from(session);
        let closed = session.closed();
        Self {
            session,
            opened: Arc::new(AtomicBool::new(true)),
            failure: Arc::new(Mutex::new(None)),
            closed,
        }
    }

    /// Whether the connection is usable: not locally failed or closed, and
    /// still open at the transport level.
    pub fn is_opened(&self) -> bool {
        self.opened.load(Ordering::Acquire) && self.session.is_open()
    }

    /// The transport session, for opening links during recovery.
    pub(crate) fn session(&self) -> &dyn TransportSession {
        self.session.as_ref()
    }

    /// Marks the connection failed. Called by a recoverable that witnessed
    /// a link-level failure, or by the supervisor before discarding it.
    pub(crate) fn mark_failed(&self, reason: impl Into<String>, closed_by_peer: bool) {
        self.opened.store(false, Ordering::Release);
        {
            let mut slot = self.failure.lock().unwrap();
            if slot.is_none() {
                *slot = Some(ClosedInfo {
                    closed_by_peer,
                    error: Some(reason.into()),
                });
            }
        }
        self.closed.cancel();
    }

    /// Token cancelled once the connection stops being usable, whether by
    /// peer close, transport failure or local mark/close.
    pub(crate) fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Why the connection closed, once it has.
    pub(crate) fn closed_info(&self) -> Option<ClosedInfo> {
        self.session
            .closed_info()
            .or_else(|| self.failure.lock().unwrap().clone())
    }

    /// Closes the underlying session. Best effort.
    pub(crate) async fn shutdown(&self) {
        self.opened.store(false, Ordering::Release);
        if let Err(e) = self.session.close().await {
            debug!("session close reported: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;
    use crate::transport::mock::MockBroker;
    use crate::transport::TransportConnector;

    async fn open_connection(broker: &MockBroker) -> ActiveConnection {
        let endpoint = Endpoint::parse("amqp://localhost:5672").unwrap();
        let session = broker.connector().open(&endpoint).await.unwrap();
        ActiveConnection::new(session)
    }

    #[tokio::test]
    async fn mark_failed_flips_is_opened_and_fires_token() {
        let broker = MockBroker::new();
        let connection = open_connection(&broker).await;
        assert!(connection.is_opened());

        let closed = connection.closed();
        connection.mark_failed("sender link detached", true);

        assert!(!connection.is_opened());
        assert!(closed.is_cancelled());
        let info = connection.closed_info().unwrap();
        assert!(info.closed_by_peer);
        assert_eq!(info.error.as_deref(), Some("sender link detached"));
    }

    #[tokio::test]
    async fn peer_close_is_visible_through_the_wrapper() {
        let broker = MockBroker::new();
        let connection = open_connection(&broker).await;
        broker.drop_connections();

        assert!(!connection.is_opened());
        assert!(connection.closed().is_cancelled());
        assert!(connection.closed_info().unwrap().closed_by_peer);
    }

    #[tokio::test]
    async fn shutdown_closes_the_session() {
        let broker = MockBroker::new();
        let connection = open_connection(&broker).await;
        connection.shutdown().await;
        assert!(!connection.is_opened());
        assert!(!connection.closed_info().unwrap().closed_by_peer);
    }
}
