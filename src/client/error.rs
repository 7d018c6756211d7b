use crate::{broker::BrokerError, routing::SubscriptionError};

/// Errors that can occur in engine operations
#[derive(Debug, thiserror::Error)]
pub enum PubSubError {
	/// Broker client refused an operation
	#[error("Broker operation failed: {0}")]
	Broker(#[from] BrokerError),

	/// Subscription management errors
	#[error("Subscription error: {0}")]
	Subscription(#[from] SubscriptionError),

	/// Payload could not be converted to or from JSON
	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	/// Invalid configuration parameter values
	#[error("Invalid configuration value: {0}")]
	ConfigurationValue(String),

	/// Required environment variable is not set
	#[error("Environment variable {variable} is not set")]
	MissingEnvironment {
		/// Name of the missing variable
		variable: &'static str,
	},
}
