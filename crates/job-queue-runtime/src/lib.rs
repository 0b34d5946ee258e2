//! # Job Queue Runtime
//!
//! Persistent background-job queue over a peek-lock message transport.
//!
//! A job host stores its jobs elsewhere; this crate only carries job ids. It
//! provides:
//! - A round-robin fetch loop over several queues with mixed receive timeouts
//! - Fetched-job leases that keep the message lock alive until settled
//! - A send path that retries timeouts and escapes the ambient transaction
//! - Lazy, shared queue handles with optional check-and-create
//! - A read-only monitoring surface
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all queue operations
//! - [`message`] - Job ids, queue names, messages and receipt handles
//! - [`provider`] - Provider types and configuration
//! - [`client`] - Transport traits
//! - [`providers`] - In-memory and service bus transports
//! - [`registry`] - Logical-name to queue-handle registry
//! - [`fetch`] - Round-robin fetch loop
//! - [`lease`] - Fetched-job lease and lock renewal
//! - [`send`] - Retrying enqueue path
//! - [`job_queue`] - Job host contract and wiring

// Module declarations
pub mod client;
pub mod error;
pub mod fetch;
pub mod job_queue;
pub mod lease;
pub mod message;
pub mod monitoring;
pub mod observer;
pub mod options;
pub mod provider;
pub mod providers;
pub mod registry;
pub mod retry;
pub mod send;
pub mod transaction;

// Re-export commonly used types at crate root for convenience
pub use client::{MessageReceiver, QueueAdministrator, QueueHandle, QueueProvider};
pub use error::{ConfigurationError, QueueError, SerializationError, ValidationError};
pub use fetch::{FetchLoop, ReceiveTimeoutPolicy};
pub use job_queue::{JobQueueProvider, PersistentJobQueue, ServiceBusJobQueue};
pub use lease::{FetchedJob, LeaseState, RenewalSchedule};
pub use message::{
    JobId, LockToken, Message, MessageId, PeekedMessage, QueueName, ReceiptHandle,
    ReceivedMessage, Timestamp,
};
pub use monitoring::{MonitoringApi, QueueCounts};
pub use observer::{LeaseObserver, TracingLeaseObserver};
pub use options::{JobQueueOptions, RetryOptions};
pub use provider::{
    InMemoryConfig, ProviderType, QueueDescription, QueueDescriptionOptions, QueueRuntimeInfo,
    ServiceBusConfig,
};
pub use providers::{InMemoryProvider, ServiceBusError, ServiceBusProvider};
pub use registry::QueueClientRegistry;
pub use retry::RetryPolicy;
pub use send::SendPath;
pub use transaction::{AmbientTransaction, TransactionState};

// Re-exported so hosts need not depend on tokio-util directly
pub use tokio_util::sync::CancellationToken;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
