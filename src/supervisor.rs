//! The recovery supervisor: one task that owns all reconnection.
//!
//! The supervisor drains the connect-command channel and performs reconnect
//! cycles, so at most one recovery is ever in progress. A full cycle follows
//! a strict order:
//!
//! 1. Suspend every registered resource (no network I/O).
//! 2. Open a transport session, rotating endpoints under the recovery
//!    policy's delay sequence. Cancellation aborts immediately.
//! 3. Re-attach every previously attached resource against the new
//!    connection. A failure here discards the connection and restarts the
//!    cycle, paced by the next policy delay.
//! 4. Resume all resources; parked operations unblock.
//! 5. Install the connection and watch its closed token; a peer close
//!    enqueues a fresh wake-up command.
//!
//! Commands arriving while the connection is already open take the fast
//! path: attach anything still initializing, resume everything (idempotent)
//! and fulfill the notifier. Duplicate wake-ups are therefore cheap and the
//! channel needs no coalescing.
//!
//! Connection state transitions are broadcast over a watch channel for
//! observability.

use std::sync::Arc;

use tokio::sync::{mpsc, watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connection::{ActiveConnection, ConnectCommand};
use crate::endpoint::Endpoint;
use crate::error::ClientError;
use crate::policy::{DelaySequence, RecoveryPolicy};
use crate::registry::{RecoverableId, RecoverableRegistry};
use crate::state::{ConnectionState, LinkState};
use crate::transport::TransportConnector;

pub(crate) struct RecoverySupervisor {
    endpoints: Vec<Endpoint>,
    policy: RecoveryPolicy,
    connector: Arc<dyn TransportConnector>,
    registry: Arc<RecoverableRegistry>,
    commands: mpsc::UnboundedReceiver<ConnectCommand>,
    command_tx: mpsc::UnboundedSender<ConnectCommand>,
    cancel: CancellationToken,
    state_tx: watch::Sender<ConnectionState>,
    current: Arc<RwLock<Option<ActiveConnection>>>,
}

impl RecoverySupervisor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        endpoints: Vec<Endpoint>,
        policy: RecoveryPolicy,
        connector: Arc<dyn TransportConnector>,
        registry: Arc<RecoverableRegistry>,
        commands: mpsc::UnboundedReceiver<ConnectCommand>,
        command_tx: mpsc::UnboundedSender<ConnectCommand>,
        cancel: CancellationToken,
        state_tx: watch::Sender<ConnectionState>,
        current: Arc<RwLock<Option<ActiveConnection>>>,
    ) -> Self {
        Self {
            endpoints,
            policy,
            connector,
            registry,
            commands,
            command_tx,
            cancel,
            state_tx,
            current,
        }
    }

    /// The supervisor event loop. Runs until cancellation; individual cycle
    /// failures are logged and never terminate it.
    pub(crate) async fn run(mut self) {
        info!("recovery supervisor started");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                command = self.commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => break,
                    }
                }
            }
        }
        if let Some(connection) = self.current.write().await.take() {
            connection.shutdown().await;
        }
        self.set_state(ConnectionState::Disconnected("client closed".to_string()));
        info!("recovery supervisor stopped");
    }

    async fn handle_command(&mut self, command: ConnectCommand) {
        match command {
            ConnectCommand::Reconnect { notifier } => {
                let result = self.ensure_connected().await;
                match &result {
                    Ok(()) => {}
                    Err(ClientError::Cancelled) => debug!("reconnect cycle cancelled"),
                    Err(e) => warn!("reconnect cycle failed: {e}"),
                }
                if let Some(notifier) = notifier {
                    let _ = notifier.send(result);
                }
            }
            ConnectCommand::Attach { id, notifier } => {
                let result = self.attach_one(id).await;
                let _ = notifier.send(result);
            }
        }
    }

    /// Loop invariant on success: the connection is open and every
    /// non-closed, non-initializing resource is attached.
    async fn ensure_connected(&mut self) -> Result<(), ClientError> {
        let current = self.current.read().await.clone();
        if let Some(connection) = current {
            if connection.is_opened() {
                // Fast path: an earlier command already rebuilt everything.
                // Resume is idempotent; anything still initializing gets
                // attached here.
                self.attach_pending(&connection).await;
                self.resume_all().await;
                return Ok(());
            }
        }
        self.full_cycle().await
    }

    async fn full_cycle(&mut self) -> Result<(), ClientError> {
        if let Some(old) = self.current.write().await.take() {
            old.mark_failed("connection superseded by reconnect", false);
            old.shutdown().await;
        }

        // One delay sequence paces the whole cycle, including restarts
        // caused by resource recovery failures, so a bounded policy bounds
        // the entire recovery, not just the socket opens.
        let mut delays = self.policy.delays();
        let mut attempt: u64 = 0;

        'cycle: loop {
            if self.cancel.is_cancelled() {
                return Err(ClientError::Cancelled);
            }

            self.suspend_all().await;
            let connection = self.connect_with_retry(&mut delays, &mut attempt).await?;

            for recoverable in self.registry.snapshot().await {
                if recoverable.is_closed()
                    || recoverable.lifecycle() == LinkState::Initializing
                {
                    continue;
                }
                match recoverable.recover(&connection, &self.cancel).await {
                    Ok(()) => {}
                    Err(ClientError::Cancelled) => return Err(ClientError::Cancelled),
                    Err(e) => {
                        warn!("resource recovery failed ({e}); restarting reconnect cycle");
                        connection.mark_failed(format!("recovery failed: {e}"), false);
                        connection.shutdown().await;
                        self.pace_restart(&mut delays, &mut attempt, &e).await?;
                        continue 'cycle;
                    }
                }
            }

            self.resume_all().await;
            self.attach_pending(&connection).await;
            self.install(connection).await;
            self.set_state(ConnectionState::Connected);
            info!("connection established; all resources attached");
            return Ok(());
        }
    }

    /// Opens a session, rotating endpoints: attempt `i` targets
    /// `endpoints[i mod n]`. Waits the policy delay between failures.
    async fn connect_with_retry(
        &mut self,
        delays: &mut DelaySequence,
        attempt: &mut u64,
    ) -> Result<ActiveConnection, ClientError> {
        loop {
            if self.cancel.is_cancelled() {
                return Err(ClientError::Cancelled);
            }
            let endpoint = &self.endpoints[(*attempt as usize) % self.endpoints.len()];
            self.set_state(ConnectionState::Connecting);
            debug!(endpoint = %endpoint, attempt = *attempt, "opening transport session");

            let opened = tokio::select! {
                result = self.connector.open(endpoint) => result,
                _ = self.cancel.cancelled() => return Err(ClientError::Cancelled),
            };

            match opened {
                Ok(session) => return Ok(ActiveConnection::new(session)),
                Err(e) => {
                    let Some(delay) = delays.next() else {
                        let endpoint = endpoint.to_string();
                        error!("retry budget exhausted connecting to {endpoint}: {e}");
                        self.set_state(ConnectionState::Disconnected(format!(
                            "retry budget exhausted: {e}"
                        )));
                        return Err(ClientError::ConnectFailed {
                            endpoint,
                            reason: format!("retry budget exhausted: {e}"),
                        });
                    };
                    *attempt += 1;
                    error!(
                        "connection attempt to {endpoint} failed ({e}); retrying in {:.2}s",
                        delay.as_secs_f64()
                    );
                    self.set_state(ConnectionState::Reconnecting(delay.as_secs_f64()));
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancel.cancelled() => return Err(ClientError::Cancelled),
                    }
                }
            }
        }
    }

    /// Waits the next policy delay before a cycle restart, or fails the
    /// command when the budget is spent.
    async fn pace_restart(
        &mut self,
        delays: &mut DelaySequence,
        attempt: &mut u64,
        cause: &ClientError,
    ) -> Result<(), ClientError> {
        let Some(delay) = delays.next() else {
            return Err(ClientError::ConnectFailed {
                endpoint: self.endpoints[(*attempt as usize) % self.endpoints.len()].to_string(),
                reason: format!("retry budget exhausted: {cause}"),
            });
        };
        *attempt += 1;
        self.set_state(ConnectionState::Reconnecting(delay.as_secs_f64()));
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = self.cancel.cancelled() => Err(ClientError::Cancelled),
        }
    }

    /// Attaches resources that were registered but never recovered yet.
    /// Individual failures are logged only: the creator's `Attach` command
    /// surfaces them.
    async fn attach_pending(&self, connection: &ActiveConnection) {
        for recoverable in self.registry.snapshot().await {
            if recoverable.lifecycle() != LinkState::Initializing {
                continue;
            }
            match recoverable.recover(connection, &self.cancel).await {
                Ok(()) => recoverable.resume(),
                Err(e) => debug!("initial attach deferred: {e}"),
            }
        }
    }

    async fn attach_one(&mut self, id: RecoverableId) -> Result<(), ClientError> {
        self.ensure_connected().await?;
        let connection = self
            .current
            .read()
            .await
            .clone()
            .ok_or_else(|| ClientError::Fatal("no connection after reconnect cycle".to_string()))?;
        let Some(recoverable) = self.registry.get(id).await else {
            // Removed concurrently by its creator; nothing to attach.
            return Err(ClientError::Cancelled);
        };
        if recoverable.lifecycle().is_attached() {
            return Ok(());
        }
        recoverable.recover(&connection, &self.cancel).await?;
        recoverable.resume();
        Ok(())
    }

    async fn suspend_all(&self) {
        for recoverable in self.registry.snapshot().await {
            if !recoverable.is_closed() {
                recoverable.suspend();
            }
        }
    }

    async fn resume_all(&self) {
        for recoverable in self.registry.snapshot().await {
            if !recoverable.is_closed() {
                recoverable.resume();
            }
        }
    }

    /// Publishes the connection and spawns its closed-watcher: a peer close
    /// becomes a fire-and-forget wake-up command.
    async fn install(&mut self, connection: ActiveConnection) {
        let closed = connection.closed();
        let watched = connection.clone();
        let command_tx = self.command_tx.clone();
        let cancel = self.cancel.clone();
        let state_tx = self.state_tx.clone();
        *self.current.write().await = Some(connection);

        tokio::spawn(async move {
            tokio::select! {
                _ = closed.cancelled() => {
                    let info = watched.closed_info();
                    let by_peer = info.as_ref().map(|i| i.closed_by_peer).unwrap_or(false);
                    let reason = info
                        .and_then(|i| i.error)
                        .unwrap_or_else(|| "connection closed".to_string());
                    warn!(closed_by_peer = by_peer, "connection lost: {reason}");
                    state_tx.send_if_modified(|state| {
                        if matches!(state, ConnectionState::Connected) {
                            *state = ConnectionState::Disconnected(reason.clone());
                            true
                        } else {
                            false
                        }
                    });
                    let _ = command_tx.send(ConnectCommand::wakeup());
                }
                _ = cancel.cancelled() => {}
            }
        });
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current != state {
                info!("connection state changed to: {state}");
                *current = state;
                true
            } else {
                false
            }
        });
    }
}
