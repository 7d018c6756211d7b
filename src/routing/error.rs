use thiserror::Error;

use crate::broker::BrokerError;

/// Errors during subscription operations
#[derive(Debug, Error)]
pub enum SubscriptionError {
	/// Communication channel closed
	#[error("Communication channel closed")]
	ChannelClosed,
	/// Response from subscription manager was lost
	#[error("Response from subscription manager was lost")]
	ResponseLost,
	/// Broker refused to open the broker-level subscription
	#[error("Failed to open broker subscription: {0}")]
	SubscribeFailed(#[source] BrokerError),
}
