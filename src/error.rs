//! Unified error handling for client operations.
//!
//! This module defines [`ClientError`], the single error type returned by
//! all public operations. It aggregates failures from every layer
//! (configuration, transport, broker dispositions, management requests)
//! into one enum application code can pattern-match on.
//!
//! # Error Categories
//!
//! The variants fall into logical categories:
//!
//! **Configuration errors** (caught at startup, fix and restart):
//! - `Configuration`: bad policy parameters, empty endpoint list,
//!   malformed endpoint URL
//! - `Validation`: field-level constraint violations on options structs
//!
//! **Recovery-loop errors** (retried by the supervisor):
//! - `ConnectFailed`: the transport could not open a session; surfaces to
//!   callers only once a bounded policy exhausts its retry budget
//!
//! **Retryable runtime errors** (recovery already underway):
//! - `LinkDetached`: the remote closed a link mid-operation
//!
//! **Terminal operation errors** (retrying the same call will not help):
//! - `MessageRejected`: the broker refused the delivery
//! - `TopologyConflict`: the broker rejected a management request
//! - `Cancelled`: the caller's token fired or the handle was closed
//! - `Fatal`: an internal invariant was violated
//!
//! # Usage
//!
//! Most functions return `Result<T, ClientError>`. Handle errors by
//! recoverability:
//!
//! ```ignore
//! match producer.send(message, &cancel).await {
//!     Ok(()) => println!("settled"),
//!     Err(ClientError::MessageRejected { reason }) => {
//!         eprintln!("broker refused the message: {reason}");
//!         // Don't retry, the message itself is the problem.
//!     }
//!     Err(e) if e.is_retryable() => {
//!         eprintln!("transient failure: {e}, recovery is underway");
//!         // Safe to retry once the producer re-attaches, if the
//!         // application can tolerate a possible duplicate.
//!     }
//!     Err(e) => return Err(e),
//! }
//! ```
//!
//! # Examples
//!
//! ```
//! use artemis_client::ClientError;
//!
//! let err = ClientError::LinkDetached {
//!     reason: "remote detached the link".into(),
//! };
//! assert!(err.is_retryable());
//! assert_eq!(
//!     err.to_string(),
//!     "link detached: remote detached the link"
//! );
//!
//! let conflict = ClientError::TopologyConflict {
//!     message: "Address already exists: orders".into(),
//! };
//! assert!(!conflict.is_retryable());
//! ```
//!
//! # Display vs Debug
//!
//! `Display` messages are written for log lines and end users: lowercase
//! prefix naming the failure class, then the underlying cause. `Debug`
//! includes the variant name and field structure; use it when correlating
//! with match arms during development.

use thiserror::Error;

/// The unified error type for client operations.
///
/// Covers every failure mode in the client: configuration issues,
/// connection and link failures, broker dispositions, management
/// rejections and cancellation. Each variant documents its likely causes
/// and the sensible recovery.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Invalid parameter detected before any network activity.
    ///
    /// Possible causes:
    /// - A policy factor below 1, or `max_delay < initial_delay`
    /// - An empty endpoint list, or an endpoint URL with an unsupported
    ///   scheme or malformed port
    /// - An empty address passed to a topology operation
    ///
    /// The message names the offending parameter, e.g.
    /// `"factor must be >= 1 (factor = 0.5)"`.
    ///
    /// Recovery: fix the parameter and rebuild. This is a programming or
    /// deployment error, not a transient condition.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Field-level validation of an options struct failed.
    ///
    /// Produced by the `validator` constraints on [`crate::config`] types,
    /// which check things like:
    /// - Address length (1-255 characters)
    /// - Priority in range (0-9)
    /// - Prefetch in range (1-65535)
    ///
    /// The error lists each field and the constraint it violated.
    ///
    /// Recovery: fix the options and retry the creation call. Caught
    /// before anything is registered or attached.
    #[error("configuration error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    /// The transport could not open a session against an endpoint.
    ///
    /// Possible causes:
    /// - Network unreachable or broker down
    /// - Broker refused the connection (credentials, resource limits)
    /// - TLS handshake failure
    ///
    /// Inside the recovery loop these are swallowed, logged and retried
    /// under the configured policy with endpoint rotation. A caller only
    /// receives this kind when a bounded policy's retry budget is
    /// exhausted, or when an operation needs the connection right now
    /// (e.g. opening a topology manager) and it is down.
    ///
    /// Recovery: automatic. If surfaced, the outage outlasted the retry
    /// budget; alert operators and reconnect later.
    #[error("failed to connect to {endpoint}: {reason}")]
    ConnectFailed {
        /// The endpoint of the last attempt, redacted form.
        endpoint: String,
        /// The transport's failure message.
        reason: String,
    },

    /// The remote closed a link while an operation was in flight.
    ///
    /// Possible causes:
    /// - The broker or network dropped the connection mid-operation
    /// - The broker force-detached the link (address deleted, permissions)
    /// - A fire-and-forget send was attempted while the link recovers
    ///
    /// Recovery has already been requested when this surfaces. The
    /// operation was not silently retried: for producer sends the message
    /// may or may not have reached the broker, and only the application
    /// can decide whether re-sending is idempotent.
    ///
    /// Recovery: wait for re-attachment (observe `Client::state()`), then
    /// retry if the operation is safe to repeat.
    #[error("link detached: {reason}")]
    LinkDetached {
        /// The link-close cause reported by the transport.
        reason: String,
    },

    /// The broker settled a delivery with a terminal rejection.
    ///
    /// Possible causes:
    /// - The message violates a broker limit (size, address full)
    /// - Broker-side security or filtering rejected it
    ///
    /// Recovery: do not resend as-is; the same message will be rejected
    /// again. Fix the message or the broker configuration.
    #[error("message rejected by broker: {reason}")]
    MessageRejected {
        /// The rejection condition/description from the disposition.
        reason: String,
    },

    /// The operation was cancelled by the caller or by shutdown.
    ///
    /// Possible causes:
    /// - The caller's cancellation token fired while the operation was
    ///   parked or awaiting settlement
    /// - The handle (or the whole client) was closed
    ///
    /// Cancellation is never converted into another error kind, and link
    /// state is never corrupted by it.
    ///
    /// Recovery: none needed; the caller asked for this.
    #[error("operation cancelled")]
    Cancelled,

    /// The broker rejected a topology management request.
    ///
    /// The message contains the broker-side cause, e.g.
    /// `"Address already exists"` when creating a duplicate address, or
    /// `"AddressDoesNotExist"` when creating a queue with address
    /// auto-creation disabled.
    ///
    /// Recovery: never retried by the client. The caller decides whether
    /// an existing address is an error or an idempotent success.
    #[error("topology request rejected by broker: {message}")]
    TopologyConflict {
        /// The broker's error message.
        message: String,
    },

    /// An internal invariant was violated.
    ///
    /// Examples: the supervisor completed a cycle without a connection, or
    /// a management reply was not parseable at all. The supervisor logs
    /// these and continues best-effort.
    ///
    /// Recovery: file a bug report. Should not happen in normal operation.
    #[error("internal error: {0}")]
    Fatal(String),
}

impl ClientError {
    /// True when retrying the same operation after recovery is reasonable.
    ///
    /// `Cancelled` is deliberately not retryable: cancellation is a caller
    /// decision and is never reinterpreted.
    ///
    /// # Examples
    ///
    /// ```
    /// use artemis_client::ClientError;
    ///
    /// assert!(ClientError::LinkDetached { reason: "peer detach".into() }.is_retryable());
    /// assert!(!ClientError::Cancelled.is_retryable());
    /// assert!(!ClientError::MessageRejected { reason: "too large".into() }.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::ConnectFailed { .. } | ClientError::LinkDetached { .. }
        )
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        ClientError::Configuration(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_parameter() {
        let err = ClientError::configuration("factor must be >= 1 (factor = 0.5)");
        assert_eq!(
            err.to_string(),
            "configuration error: factor must be >= 1 (factor = 0.5)"
        );
    }

    #[test]
    fn retryable_classification() {
        assert!(ClientError::LinkDetached {
            reason: "peer detach".into()
        }
        .is_retryable());
        assert!(ClientError::ConnectFailed {
            endpoint: "amqp://localhost:5672".into(),
            reason: "refused".into()
        }
        .is_retryable());
        assert!(!ClientError::Cancelled.is_retryable());
        assert!(!ClientError::TopologyConflict {
            message: "Address already exists".into()
        }
        .is_retryable());
        assert!(!ClientError::MessageRejected {
            reason: "size limit".into()
        }
        .is_retryable());
    }

    #[test]
    fn topology_conflict_carries_broker_message() {
        let err = ClientError::TopologyConflict {
            message: "Address already exists: orders".into(),
        };
        assert!(err.to_string().contains("Address already exists"));
    }

    #[test]
    fn debug_includes_the_variant() {
        let err = ClientError::LinkDetached {
            reason: "remote detach".into(),
        };
        let debug = format!("{err:?}");
        assert!(debug.contains("LinkDetached"));
        assert!(debug.contains("remote detach"));
    }
}
