//! Lifecycle state types for connections and recoverable resources.
//!
//! Two state machines live here. [`ConnectionState`] describes the logical
//! connection as a whole and is broadcast over a watch channel so application
//! code can observe recovery progress. [`LinkState`] describes a single
//! producer or consumer and is driven by the recovery supervisor.

use std::fmt;

/// State of the logical connection, as published by the recovery supervisor.
///
/// The lifecycle flows through these states:
/// - `Connecting` -> `Connected` (transport session established)
/// - `Connected` -> `Disconnected` (peer closed, network error, link failure)
/// - `Disconnected` -> `Reconnecting` -> `Connecting` -> ... (retry loop
///   under the configured recovery policy)
///
/// Subscribe via `Client::state()` to implement adaptive behavior, e.g.
/// surfacing recovery countdowns in diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Actively attempting to establish a transport session.
    Connecting,

    /// Session established and every live producer/consumer re-attached.
    Connected,

    /// Connection lost. The `String` carries the reason (peer close message,
    /// network error, or a link failure that forced a rebuild).
    Disconnected(String),

    /// Waiting before the next attempt. The `f64` is seconds until the
    /// supervisor retries, as produced by the recovery policy.
    Reconnecting(f64),
}

impl ConnectionState {
    /// Short static identifier, useful for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Disconnected(_) => "Disconnected",
            ConnectionState::Reconnecting(_) => "Reconnecting",
        }
    }

    /// True only while the session is open and resources are attached.
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected(reason) => write!(f, "Disconnected ({reason})"),
            ConnectionState::Reconnecting(secs) => write!(f, "Reconnecting (in {secs} seconds)"),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

/// Per-resource lifecycle driven by the recovery supervisor.
///
/// Transitions form a DAG:
///
/// ```text
/// Initializing ──(recover + resume)──> Attached
/// Attached <──(resume)── Suspended ──(recover)──> Recovering ──(resume)──> Attached
/// any state ──(close)──> Closed (terminal)
/// ```
///
/// While `Suspended` or `Recovering`, operations that would cross the link
/// either park until re-attachment or fail fast with a retryable error,
/// depending on the producer's send mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Registered but never attached to a connection yet.
    Initializing,

    /// Link open; operations take the fast path.
    Attached,

    /// Quiesced by the supervisor or by a witnessed link failure.
    Suspended,

    /// A new link is being opened against a fresh connection.
    Recovering,

    /// Closed by the application. Terminal.
    Closed,
}

impl LinkState {
    /// Short static identifier, useful for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkState::Initializing => "Initializing",
            LinkState::Attached => "Attached",
            LinkState::Suspended => "Suspended",
            LinkState::Recovering => "Recovering",
            LinkState::Closed => "Closed",
        }
    }

    /// True once the resource reached its terminal state.
    pub fn is_closed(&self) -> bool {
        matches!(self, LinkState::Closed)
    }

    /// True while the resource can serve operations without parking.
    pub fn is_attached(&self) -> bool {
        matches!(self, LinkState::Attached)
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
