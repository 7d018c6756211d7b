use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::{Receiver, Sender};
use tracing::{debug, trace, warn};

use super::{event_bus::EventBus, subscription_manager::Command};
use crate::{
	broker::{BrokerError, BrokerErrorCode, BrokerNotification, ErrorClass},
	client::config::ErrorHook,
	processor::{ErrorReporter, MessageProcessor},
};

/// Drains the notifications of one broker subscription.
///
/// Lives exactly as long as the broker subscription it was spawned for.
pub(crate) struct MessagePump {
	pub bus: EventBus,
	pub processor: Arc<dyn MessageProcessor>,
	pub reporter: EngineErrorReporter,
}

impl MessagePump {
	pub async fn run(self, mut notifications: Receiver<BrokerNotification>) {
		while let Some(notification) = notifications.recv().await {
			match notification {
				| BrokerNotification::Message(message) => {
					self.processor.process(&self.bus, message);
				}
				| BrokerNotification::Error(args) => {
					let class =
						self.processor.on_error(args, &self.reporter).await;
					trace!(class = %class, "Broker error handled");
				}
			}
		}
		debug!("Broker notification channel closed");
	}
}

/// Engine side of the processor's error reports.
///
/// Unauthorized access closes the broker subscription the error came from;
/// every report is forwarded to the caller's hook.
pub(crate) struct EngineErrorReporter {
	pub command_tx: Sender<Command>,
	pub hook: Option<ErrorHook>,
	/// Generation of the broker subscription this pump drains
	pub generation: u64,
}

#[async_trait]
impl ErrorReporter for EngineErrorReporter {
	async fn report(&self, error: &BrokerError, class: ErrorClass) {
		if error.code == BrokerErrorCode::UnauthorizedAccess {
			let close = Command::CloseBrokerSubscription {
				error: error.clone(),
				generation: self.generation,
			};
			if self.command_tx.send(close).await.is_err() {
				warn!(
					error = %error,
					"Subscription manager gone, cannot close broker subscription"
				);
			}
		}
		if let Some(hook) = &self.hook {
			hook(error, class);
		}
	}
}
