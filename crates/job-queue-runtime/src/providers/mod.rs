//! Queue provider implementations.
//!
//! This module contains concrete implementations of the transport traits in
//! [`crate::client`] for the supported backends.

pub mod memory;
pub mod servicebus;

pub use memory::InMemoryProvider;
pub use servicebus::{ServiceBusError, ServiceBusProvider};
