//! # ServiceBus PubSub
//!
//! A publish/subscribe engine that multiplexes any number of logical,
//! event-name-filtered subscribers over a single broker topic subscription.
//!
//! ## Features
//!
//! - **One broker subscription**: Opened for the first subscriber, closed
//!   after the last one leaves, shared by everyone in between
//! - **Event-name routing**: Subscribe to one event name, or to all of them
//!   with `""` / `"*"`
//! - **Message enrichment**: Every published message carries its event name
//!   in the `sub.eventName` application property
//! - **Error classification**: Broker errors are sorted into fatal,
//!   recoverable, transient and unknown, each handled accordingly
//! - **Streams**: Subscriptions can be consumed as `futures::Stream`s
//! - **Graceful Shutdown**: Proper resource cleanup via [`PubSubConnection`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use servicebus_pubsub::{InMemoryBroker, PubSub, PubSubConfig, PubSubOptions};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let broker = InMemoryBroker::new();
//!     let config = PubSubConfig::new(PubSubOptions::new(
//!         "Endpoint=sb://local/;SharedAccessKeyName=k;SharedAccessKey=s",
//!         "events",
//!         "my-service",
//!     ));
//!     let (pubsub, connection) = PubSub::connect(config, &broker).await?;
//!
//!     // Subscribe to one event name
//!     let id = pubsub
//!         .subscribe("ConfigUpdate", |payload| println!("update: {payload:?}"))
//!         .await?;
//!
//!     // Publish; the handler above receives `{"a": 1}`
//!     pubsub.publish("ConfigUpdate", &json!({ "a": 1 })).await;
//!
//!     // Or consume as a stream, unsubscribed when dropped
//!     let mut stream = pubsub.stream("*").await?;
//!     pubsub.publish("Other", &json!("hello")).await;
//!     if let Some(payload) = stream.recv().await {
//!         println!("any event: {payload:?}");
//!     }
//!
//!     pubsub.unsubscribe(id).await?;
//!     connection.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Broker Clients
//!
//! The engine talks to the broker through the [`BrokerClient`] family of
//! traits. [`InMemoryBroker`] implements them in-process and is what the
//! test suite runs against.

#![warn(missing_docs)]

// Core modules
pub mod broker;
pub mod client;
pub mod connection;
pub mod enrichment;
pub mod event;
pub mod processor;
pub mod routing;

// === Core Public API ===
// Engine types
pub use client::{
	EngineSettings, EventStream, PubSub, PubSubConfig, PubSubEngine,
	PubSubError, PubSubOptions, SubscribeOptions,
};
pub use connection::PubSubConnection;

// Messages
pub use enrichment::{EVENT_NAME_KEY, enrich_message};
pub use event::{Event, EventBody, PropertyValue, ReceivedMessage};

// Routing
pub use routing::{EngineStatus, EventHandler, SubscriptionId};

// Broker boundary
pub use broker::{
	BrokerClient, BrokerError, BrokerErrorCode, ErrorClass, InMemoryBroker,
};
pub use processor::{DefaultMessageProcessor, MessageProcessor};

/// Result type alias for operations that may fail with PubSubError
pub type Result<T> = std::result::Result<T, PubSubError>;

/// Prelude module for convenient imports
///
/// ```rust
/// use servicebus_pubsub::prelude::*;
/// ```
pub mod prelude {
	//! Essential types for most applications

	pub use crate::{
		EngineStatus, PubSub, PubSubConfig, PubSubConnection, PubSubEngine,
		PubSubError, PubSubOptions, Result, SubscriptionId,
	};
}

/// Error types used throughout the library
///
/// ```rust
/// use servicebus_pubsub::errors::*;
/// ```
pub mod errors {
	//! All error types used in the library

	pub use crate::{
		PubSubError,
		broker::{BrokerError, BrokerErrorCode, ErrorClass},
		routing::SubscriptionError,
	};
}
