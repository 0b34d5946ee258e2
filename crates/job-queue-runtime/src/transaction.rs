//! Ambient transaction scope for job persistence.
//!
//! A job host typically writes the job record and announces it on the queue
//! while a database transaction is open. The transaction is carried as a
//! task-local so that transports able to enlist (the in-memory provider does)
//! can defer their side effects until commit. The send path runs under
//! [`suppress`], which clears the ambient transaction so that a queued message
//! becomes visible independently of the caller's commit or rollback.

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;

#[cfg(test)]
#[path = "transaction_tests.rs"]
mod tests;

tokio::task_local! {
    static AMBIENT_TRANSACTION: Option<AmbientTransaction>;
}

type CommitAction = Box<dyn FnOnce() + Send>;

const ACTIVE: u8 = 0;
const COMMITTED: u8 = 1;
const ROLLED_BACK: u8 = 2;

/// Outcome of an ambient transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

struct TransactionInner {
    id: Uuid,
    state: AtomicU8,
    on_commit: Mutex<Vec<CommitAction>>,
}

/// Handle to an open transaction that operations may enlist in.
#[derive(Clone)]
pub struct AmbientTransaction {
    inner: Arc<TransactionInner>,
}

impl std::fmt::Debug for AmbientTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmbientTransaction")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .finish()
    }
}

impl AmbientTransaction {
    /// Begin a new transaction
    pub fn begin() -> Self {
        Self {
            inner: Arc::new(TransactionInner {
                id: Uuid::new_v4(),
                state: AtomicU8::new(ACTIVE),
                on_commit: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Transaction identifier
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Current state
    pub fn state(&self) -> TransactionState {
        match self.inner.state.load(Ordering::Acquire) {
            ACTIVE => TransactionState::Active,
            COMMITTED => TransactionState::Committed,
            _ => TransactionState::RolledBack,
        }
    }

    /// The transaction active for the current task, if any
    pub fn current() -> Option<AmbientTransaction> {
        AMBIENT_TRANSACTION
            .try_with(|transaction| transaction.clone())
            .ok()
            .flatten()
    }

    /// Run `future` with this transaction as the ambient one
    pub async fn scope<F: Future>(&self, future: F) -> F::Output {
        AMBIENT_TRANSACTION.scope(Some(self.clone()), future).await
    }

    /// Defer `action` until commit. Returns `false` (and drops the action) if
    /// the transaction is no longer active.
    pub fn enlist(&self, action: impl FnOnce() + Send + 'static) -> bool {
        if self.state() != TransactionState::Active {
            return false;
        }
        match self.inner.on_commit.lock() {
            Ok(mut actions) => {
                actions.push(Box::new(action));
                true
            }
            Err(_) => false,
        }
    }

    /// Commit: run all enlisted actions in order
    pub fn commit(&self) {
        if self
            .inner
            .state
            .compare_exchange(ACTIVE, COMMITTED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let actions = match self.inner.on_commit.lock() {
            Ok(mut actions) => std::mem::take(&mut *actions),
            Err(_) => Vec::new(),
        };
        debug!(transaction_id = %self.inner.id, actions = actions.len(), "Committing transaction");
        for action in actions {
            action();
        }
    }

    /// Roll back: discard all enlisted actions
    pub fn rollback(&self) {
        if self
            .inner
            .state
            .compare_exchange(ACTIVE, ROLLED_BACK, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        if let Ok(mut actions) = self.inner.on_commit.lock() {
            debug!(transaction_id = %self.inner.id, actions = actions.len(), "Rolling back transaction");
            actions.clear();
        }
    }
}

/// Run `future` outside of any ambient transaction.
pub async fn suppress<F: Future>(future: F) -> F::Output {
    AMBIENT_TRANSACTION.scope(None, future).await
}
