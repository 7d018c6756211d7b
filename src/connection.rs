//! Engine lifecycle management
//!
//! Shutdown lives on its own handle so the cloneable [`PubSub`] can be
//! handed out freely.
//!
//! [`PubSub`]: crate::PubSub

use tracing::{error, warn};

use crate::{client::PubSubError, routing::SubscriptionManagerController};

/// Engine lifecycle handle
///
/// Keep it alive for as long as the engine is in use and call
/// [`shutdown`](Self::shutdown) when done.
pub struct PubSubConnection {
	subscription_manager_controller: Option<SubscriptionManagerController>,
}

impl PubSubConnection {
	pub(crate) fn new(
		subscription_manager_controller: SubscriptionManagerController,
	) -> Self {
		Self {
			subscription_manager_controller: Some(
				subscription_manager_controller,
			),
		}
	}

	/// Gracefully shutdown the engine:
	/// 1. Closes the broker subscription, if one is open
	/// 2. Cancels every route, which ends all event streams
	/// 3. Waits for the subscription manager to exit
	///
	/// Later calls on any `PubSub` clone fail with a closed channel error.
	pub async fn shutdown(mut self) -> Result<(), PubSubError> {
		if let Some(controller) = self.subscription_manager_controller.take() {
			if let Err(e) = controller.shutdown().await {
				warn!(error = %e, "Failed to shutdown subscription manager");
			}
		} else {
			warn!("No subscription manager controller available for shutdown");
		}
		Ok(())
	}
}

impl Drop for PubSubConnection {
	fn drop(&mut self) {
		if self.subscription_manager_controller.is_some() {
			error!(
				"PubSubConnection dropped without calling shutdown(). Please \
				 call shutdown() and await its completion before dropping."
			);
		}
	}
}
