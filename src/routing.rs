//! Event routing and subscription management module
//!
//! This module owns the subscription registry, the event bus that fans
//! received events out to per-subscriber routes, and the actor that keeps
//! the broker-level subscription alive exactly while subscribers exist.

/// Routing and subscription error types
pub mod error;
pub mod event_bus;
/// Event-name filters
pub mod event_filter;
mod message_pump;
pub(crate) mod registry;
pub mod subscription_manager;

// Re-export commonly used types for convenience
pub use error::SubscriptionError;
pub use event_bus::{EventBus, EventHandler, Route};
pub use event_filter::{EventFilter, WILDCARD};
pub use registry::SubscriptionId;
pub use subscription_manager::EngineStatus;

// Re-export for internal crate usage only
pub(crate) use subscription_manager::{
	SubscriptionManagerActor, SubscriptionManagerController,
	SubscriptionManagerHandler,
};
