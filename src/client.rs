//! Engine client module
//!
//! This module provides the public publish/subscribe engine, its
//! configuration, errors and payload streams.

pub mod config;
/// Client error types
pub mod error;
/// Payload streams over a subscription
pub mod event_stream;
/// The publish/subscribe engine
pub mod pubsub;

// Re-export commonly used types for convenience
pub use config::{
	EngineSettings, ErrorHook, PubSubConfig, PubSubOptions, SubscribeOptions,
};
pub use error::PubSubError;
pub use event_stream::EventStream;
pub use pubsub::{PubSub, PubSubEngine};
