//! Broker client boundary
//!
//! Capability traits the engine consumes, the broker error taxonomy and an
//! in-process broker implementation.

pub mod client;
/// Broker error codes and their recovery classes
pub mod error;
pub mod in_memory;

pub use client::{
	BrokerClient, BrokerNotification, BrokerSubscription, MessageReceiver,
	MessageSender,
};
pub use error::{
	BrokerError, BrokerErrorCode, ErrorClass, ErrorSource, ProcessErrorArgs,
};
pub use in_memory::{BrokerStats, InMemoryBroker};
