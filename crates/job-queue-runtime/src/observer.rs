//! Observability hook for lease renewal.
//!
//! Renewal failures never reach the job host; they are reported here instead
//! so that chronic failures can be detected.

use crate::error::QueueError;
use crate::message::{JobId, Timestamp};
use tracing::{debug, warn};

/// Receives the outcome of every lock renewal attempt
pub trait LeaseObserver: Send + Sync {
    /// The lock for `job_id` now expires at `locked_until`
    fn lock_renewed(&self, job_id: &JobId, queue: &str, locked_until: Timestamp);

    /// Renewing the lock for `job_id` failed; the lease stays active
    fn renewal_failed(&self, job_id: &JobId, queue: &str, error: &QueueError);
}

/// Default observer: logs through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLeaseObserver;

impl LeaseObserver for TracingLeaseObserver {
    fn lock_renewed(&self, job_id: &JobId, queue: &str, locked_until: Timestamp) {
        debug!(
            job_id = %job_id,
            queue = queue,
            locked_until = %locked_until,
            "Renewed message lock"
        );
    }

    fn renewal_failed(&self, job_id: &JobId, queue: &str, error: &QueueError) {
        warn!(
            job_id = %job_id,
            queue = queue,
            error = %error,
            "Failed to renew message lock"
        );
    }
}
