//! Recoverable resources and the registry the supervisor iterates.
//!
//! Every producer and consumer registers itself here while it lives. The
//! supervisor drives registered resources through the quiesce → recover →
//! resume cycle; application tasks add and remove entries concurrently.
//! Iteration works on a snapshot, so additions racing with a recovery cycle
//! become visible on the next cycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::connection::ActiveConnection;
use crate::error::ClientError;
use crate::state::LinkState;

/// Identifier of a registered recoverable, unique per process.
pub type RecoverableId = u64;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_recoverable_id() -> RecoverableId {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// A resource whose link state is re-established after a connection drop.
///
/// The supervisor is the sole caller of [`suspend`](Recoverable::suspend) /
/// [`recover`](Recoverable::recover) / [`resume`](Recoverable::resume)
/// during its cycle; a resource may additionally suspend itself when it
/// witnesses its own link fail.
#[async_trait]
pub trait Recoverable: Send + Sync {
    /// Registry identity.
    fn id(&self) -> RecoverableId;

    /// Current lifecycle state.
    fn lifecycle(&self) -> LinkState;

    /// Quiesces the resource: parks or fails operations that would cross
    /// the link. Must not block on network I/O.
    fn suspend(&self);

    /// Re-opens the resource's link against a fresh connection.
    async fn recover(
        &self,
        connection: &ActiveConnection,
        cancel: &CancellationToken,
    ) -> Result<(), ClientError>;

    /// Unparks operations after a successful recovery. Idempotent.
    fn resume(&self);

    /// Closes the resource during client teardown. Terminal.
    async fn shutdown(&self);

    /// Whether the resource reached its terminal state.
    fn is_closed(&self) -> bool {
        self.lifecycle().is_closed()
    }
}

/// The set of recoverables attached to one logical connection.
pub(crate) struct RecoverableRegistry {
    entries: RwLock<HashMap<RecoverableId, Arc<dyn Recoverable>>>,
}

impl RecoverableRegistry {
    pub(crate) fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) async fn add(&self, recoverable: Arc<dyn Recoverable>) {
        self.entries
            .write()
            .await
            .insert(recoverable.id(), recoverable);
    }

    /// Removes an entry. Returns false when it was already gone, so close
    /// paths can assert exactly-once removal.
    pub(crate) async fn remove(&self, id: RecoverableId) -> bool {
        self.entries.write().await.remove(&id).is_some()
    }

    pub(crate) async fn get(&self, id: RecoverableId) -> Option<Arc<dyn Recoverable>> {
        self.entries.read().await.get(&id).cloned()
    }

    /// A consistent snapshot for iteration.
    pub(crate) async fn snapshot(&self) -> Vec<Arc<dyn Recoverable>> {
        self.entries.read().await.values().cloned().collect()
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct StubRecoverable {
        id: RecoverableId,
        state: Mutex<LinkState>,
    }

    impl StubRecoverable {
        fn new() -> Self {
            Self {
                id: next_recoverable_id(),
                state: Mutex::new(LinkState::Initializing),
            }
        }
    }

    #[async_trait]
    impl Recoverable for StubRecoverable {
        fn id(&self) -> RecoverableId {
            self.id
        }

        fn lifecycle(&self) -> LinkState {
            *self.state.lock().unwrap()
        }

        fn suspend(&self) {
            *self.state.lock().unwrap() = LinkState::Suspended;
        }

        async fn recover(
            &self,
            _connection: &ActiveConnection,
            _cancel: &CancellationToken,
        ) -> Result<(), ClientError> {
            *self.state.lock().unwrap() = LinkState::Recovering;
            Ok(())
        }

        fn resume(&self) {
            *self.state.lock().unwrap() = LinkState::Attached;
        }

        async fn shutdown(&self) {
            *self.state.lock().unwrap() = LinkState::Closed;
        }
    }

    #[tokio::test]
    async fn ids_are_unique() {
        let a = StubRecoverable::new();
        let b = StubRecoverable::new();
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn snapshot_reflects_membership() {
        let registry = RecoverableRegistry::new();
        let a = Arc::new(StubRecoverable::new());
        let b = Arc::new(StubRecoverable::new());
        registry.add(a.clone()).await;
        registry.add(b.clone()).await;
        assert_eq!(registry.snapshot().await.len(), 2);
        assert!(registry.get(a.id()).await.is_some());
    }

    #[tokio::test]
    async fn remove_is_exactly_once() {
        let registry = RecoverableRegistry::new();
        let a = Arc::new(StubRecoverable::new());
        registry.add(a.clone()).await;
        assert!(registry.remove(a.id()).await);
        assert!(!registry.remove(a.id()).await);
        assert_eq!(registry.len().await, 0);
    }
}
