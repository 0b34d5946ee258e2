//! Fetched-job lease: one locked message plus its renewal task.
//!
//! A [`FetchedJob`] owns a background task that keeps the message lock alive
//! while the job host processes the job. Exactly one terminal operation takes
//! effect per lease:
//!
//! | Operation | Transport call | Final state |
//! |-----------|----------------|-------------|
//! | [`FetchedJob::remove_from_queue`] | complete | `Completed` |
//! | [`FetchedJob::requeue`] | abandon | `Abandoned` |
//! | [`FetchedJob::dead_letter`] | dead-letter | `DeadLettered` |
//! | [`FetchedJob::dispose`] / drop | abandon | `Disposed` |
//!
//! Later calls are no-ops. The renewal task is cancelled and joined before the
//! terminal transport call is issued. That call runs on a task of its own, so
//! dropping a pending terminal future does not leave the message unreleased.

use crate::client::MessageReceiver;
use crate::error::QueueError;
use crate::message::{JobId, ReceiptHandle, ReceivedMessage, Timestamp};
use crate::observer::LeaseObserver;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "lease_tests.rs"]
mod tests;

/// Renewal fires this long before the reported lock expiry
pub const RENEWAL_SAFETY_MARGIN: Duration = Duration::from_secs(1);

/// Shortest wait between two renewal attempts
pub const MIN_RENEWAL_INTERVAL: Duration = Duration::from_secs(1);

/// How the renewal task picks its next wake-up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalSchedule {
    /// Renew at a fixed interval regardless of the lock expiry, never more
    /// often than [`MIN_RENEWAL_INTERVAL`]
    Fixed(Duration),
    /// Renew [`RENEWAL_SAFETY_MARGIN`] before the current lock expiry
    BeforeExpiry,
}

impl RenewalSchedule {
    /// Fixed schedule when a delay is configured, expiry-based otherwise
    pub fn from_delay(delay: Option<Duration>) -> Self {
        match delay {
            Some(delay) => Self::Fixed(delay),
            None => Self::BeforeExpiry,
        }
    }

    /// Wait before the next renewal of a lock expiring at `locked_until`
    pub fn next_wait(&self, locked_until: Timestamp) -> Duration {
        match self {
            Self::Fixed(delay) => (*delay).max(MIN_RENEWAL_INTERVAL),
            Self::BeforeExpiry => locked_until
                .duration_from_now()
                .saturating_sub(RENEWAL_SAFETY_MARGIN)
                .max(MIN_RENEWAL_INTERVAL),
        }
    }
}

/// Lifecycle of a lease
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    Active,
    Completed,
    Abandoned,
    DeadLettered,
    Disposed,
}

impl LeaseState {
    fn as_u8(self) -> u8 {
        match self {
            Self::Active => 0,
            Self::Completed => 1,
            Self::Abandoned => 2,
            Self::DeadLettered => 3,
            Self::Disposed => 4,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Active,
            1 => Self::Completed,
            2 => Self::Abandoned,
            3 => Self::DeadLettered,
            _ => Self::Disposed,
        }
    }
}

/// A job claimed from a queue, held under a renewed peek-lock
pub struct FetchedJob {
    job_id: JobId,
    queue: String,
    delivery_count: u32,
    receiver: Arc<dyn MessageReceiver>,
    receipt: ReceiptHandle,
    locked_until: Arc<Mutex<Timestamp>>,
    state: AtomicU8,
    cancel: CancellationToken,
    renewal: Mutex<Option<JoinHandle<()>>>,
}

impl FetchedJob {
    /// Wrap a received message and start renewing its lock.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        job_id: JobId,
        queue: impl Into<String>,
        message: ReceivedMessage,
        receiver: Arc<dyn MessageReceiver>,
        schedule: RenewalSchedule,
        observer: Arc<dyn LeaseObserver>,
    ) -> Self {
        let queue = queue.into();
        let receipt = message.receipt_handle;
        let locked_until = Arc::new(Mutex::new(receipt.locked_until()));
        let cancel = CancellationToken::new();

        let task = RenewalTask {
            job_id: job_id.clone(),
            queue: queue.clone(),
            receiver: Arc::clone(&receiver),
            receipt: receipt.clone(),
            locked_until: Arc::clone(&locked_until),
            schedule,
            observer,
            cancel: cancel.clone(),
        };
        let renewal = tokio::spawn(task.run());

        debug!(
            job_id = %job_id,
            queue = %queue,
            lock_token = %receipt.lock_token(),
            locked_until = %receipt.locked_until(),
            "Leased job"
        );

        Self {
            job_id,
            queue,
            delivery_count: message.delivery_count,
            receiver,
            receipt,
            locked_until,
            state: AtomicU8::new(LeaseState::Active.as_u8()),
            cancel,
            renewal: Mutex::new(Some(renewal)),
        }
    }

    /// Identifier of the leased job
    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// Logical queue the job was fetched from
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Number of times the message has been delivered, this delivery included
    pub fn delivery_count(&self) -> u32 {
        self.delivery_count
    }

    /// Current lease state
    pub fn state(&self) -> LeaseState {
        LeaseState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Lock expiry as last reported by the transport
    pub fn locked_until(&self) -> Timestamp {
        match self.locked_until.lock() {
            Ok(locked_until) => *locked_until,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Acknowledge the job and remove its message from the queue
    pub async fn remove_from_queue(&self) -> Result<(), QueueError> {
        self.settle(LeaseState::Completed, Settlement::Complete)
            .await
    }

    /// Alias of [`FetchedJob::remove_from_queue`]
    pub async fn complete(&self) -> Result<(), QueueError> {
        self.remove_from_queue().await
    }

    /// Release the lock so the job can be fetched again
    pub async fn requeue(&self) -> Result<(), QueueError> {
        self.settle(LeaseState::Abandoned, Settlement::Abandon)
            .await
    }

    /// Move the message to the dead-letter sub-queue.
    ///
    /// On a transport without dead-letter support this fails with
    /// [`QueueError::Unsupported`] and leaves the lease active. A receiver
    /// that reports `Unsupported` anyway gets the message abandoned instead.
    pub async fn dead_letter(&self, reason: &str) -> Result<(), QueueError> {
        let provider = self.receipt.provider_type();
        if !provider.supports_dead_letter() {
            return Err(QueueError::Unsupported {
                provider: provider.to_string(),
                operation: "dead_letter".to_string(),
            });
        }

        debug!(job_id = %self.job_id, queue = %self.queue, reason = reason, "Dead-lettering message");
        let result = self
            .settle(
                LeaseState::DeadLettered,
                Settlement::DeadLetter(reason.to_string()),
            )
            .await;
        if let Err(QueueError::Unsupported { .. }) = result {
            self.state
                .store(LeaseState::Abandoned.as_u8(), Ordering::Release);
        }
        result
    }

    /// Release the lease if no terminal operation ran yet
    pub async fn dispose(&self) -> Result<(), QueueError> {
        self.settle(LeaseState::Disposed, Settlement::Abandon).await
    }

    /// Claim the single terminal transition and run `settlement`.
    ///
    /// Once claimed, the transport call runs on its own task: it completes even
    /// if the caller stops polling this future.
    async fn settle(&self, next: LeaseState, settlement: Settlement) -> Result<(), QueueError> {
        if !self.claim(next) {
            return Ok(());
        }
        debug!(job_id = %self.job_id, queue = %self.queue, state = ?next, "Settling lease");

        match self.spawn_settlement(settlement).await {
            Ok(result) => result,
            Err(e) => Err(QueueError::ProviderError {
                provider: self.receipt.provider_type().to_string(),
                code: "SettlementAborted".to_string(),
                message: e.to_string(),
            }),
        }
    }

    /// Stop renewal, wait for it, then issue the transport call.
    fn spawn_settlement(&self, settlement: Settlement) -> JoinHandle<Result<(), QueueError>> {
        self.cancel.cancel();
        let renewal = self.take_renewal();
        let receiver = Arc::clone(&self.receiver);
        let receipt = self.receipt.clone();
        let job_id = self.job_id.clone();

        tokio::spawn(async move {
            if let Some(renewal) = renewal {
                if let Err(e) = renewal.await {
                    if e.is_panic() {
                        warn!(job_id = %job_id, "Lock renewal task panicked");
                    }
                }
            }
            settlement.apply(receiver.as_ref(), &receipt, &job_id).await
        })
    }

    fn claim(&self, next: LeaseState) -> bool {
        self.state
            .compare_exchange(
                LeaseState::Active.as_u8(),
                next.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn take_renewal(&self) -> Option<JoinHandle<()>> {
        match self.renewal.lock() {
            Ok(mut renewal) => renewal.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }
}

impl std::fmt::Debug for FetchedJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchedJob")
            .field("job_id", &self.job_id)
            .field("queue", &self.queue)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for FetchedJob {
    fn drop(&mut self) {
        if !self.claim(LeaseState::Disposed) {
            return;
        }

        if tokio::runtime::Handle::try_current().is_err() {
            self.cancel.cancel();
            warn!(
                job_id = %self.job_id,
                queue = %self.queue,
                "Lease dropped outside a runtime; lock will expire on its own"
            );
            return;
        }

        let job_id = self.job_id.clone();
        let settling = self.spawn_settlement(Settlement::Abandon);
        tokio::spawn(async move {
            if let Ok(Err(e)) = settling.await {
                warn!(job_id = %job_id, error = %e, "Failed to abandon dropped lease");
            }
        });
    }
}

/// Transport call that ends a lease
enum Settlement {
    Complete,
    Abandon,
    DeadLetter(String),
}

impl Settlement {
    async fn apply(
        self,
        receiver: &dyn MessageReceiver,
        receipt: &ReceiptHandle,
        job_id: &JobId,
    ) -> Result<(), QueueError> {
        match self {
            Self::Complete => receiver.complete_message(receipt).await,
            Self::Abandon => receiver.abandon_message(receipt).await,
            Self::DeadLetter(reason) => {
                match receiver.dead_letter_message(receipt, &reason).await {
                    Err(e @ QueueError::Unsupported { .. }) => {
                        warn!(
                            job_id = %job_id,
                            error = %e,
                            "Dead-letter rejected by transport, abandoning message"
                        );
                        receiver.abandon_message(receipt).await?;
                        Err(e)
                    }
                    other => other,
                }
            }
        }
    }
}

/// State moved into the background renewal task
struct RenewalTask {
    job_id: JobId,
    queue: String,
    receiver: Arc<dyn MessageReceiver>,
    receipt: ReceiptHandle,
    locked_until: Arc<Mutex<Timestamp>>,
    schedule: RenewalSchedule,
    observer: Arc<dyn LeaseObserver>,
    cancel: CancellationToken,
}

impl RenewalTask {
    async fn run(mut self) {
        loop {
            let wait = self.schedule.next_wait(self.receipt.locked_until());

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }

            match self.receiver.renew_message_lock(&self.receipt).await {
                Ok(renewed) => {
                    self.receipt.set_locked_until(renewed);
                    if let Ok(mut locked_until) = self.locked_until.lock() {
                        *locked_until = renewed;
                    }
                    self.observer
                        .lock_renewed(&self.job_id, &self.queue, renewed);
                }
                Err(e) => self.observer.renewal_failed(&self.job_id, &self.queue, &e),
            }
        }
    }
}
