//! Message processing and broker error classification
//!
//! The processor sits between the broker subscription and the event bus:
//! received messages become events on the bus, broker errors are classified
//! and turned into the matching recovery step.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::{
	broker::{BrokerError, ErrorClass, ProcessErrorArgs},
	event::ReceivedMessage,
	routing::EventBus,
};

/// Default pause before continuing after a transient broker error.
pub const DEFAULT_TRANSIENT_BACKOFF: Duration = Duration::from_secs(1);

/// Receives the errors a processor decided to surface.
#[async_trait]
pub trait ErrorReporter: Send + Sync {
	/// Called once per surfaced error. For transient errors this is the
	/// retry signal and fires after the backoff.
	async fn report(&self, error: &BrokerError, class: ErrorClass);
}

/// Turns broker notifications into event bus traffic and recovery actions.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
	/// Forwards a received message onto the bus.
	fn process(&self, bus: &EventBus, message: ReceivedMessage);

	/// Classifies a broker error, performs its recovery step and returns
	/// the class.
	async fn on_error(
		&self,
		args: ProcessErrorArgs,
		reporter: &dyn ErrorReporter,
	) -> ErrorClass;
}

/// Processor used when the caller does not supply one.
#[derive(Debug, Clone)]
pub struct DefaultMessageProcessor {
	transient_backoff: Duration,
}

impl Default for DefaultMessageProcessor {
	fn default() -> Self {
		Self::new(DEFAULT_TRANSIENT_BACKOFF)
	}
}

impl DefaultMessageProcessor {
	/// Creates a processor that waits `transient_backoff` on busy errors.
	pub fn new(transient_backoff: Duration) -> Self {
		Self { transient_backoff }
	}

	/// Configured transient backoff.
	pub fn transient_backoff(&self) -> Duration {
		self.transient_backoff
	}
}

#[async_trait]
impl MessageProcessor for DefaultMessageProcessor {
	fn process(&self, bus: &EventBus, message: ReceivedMessage) {
		let sequence_number = message.sequence_number;
		let routes = bus.publish(message.into_event());
		debug!(sequence_number, routes, "Received message forwarded");
	}

	async fn on_error(
		&self,
		args: ProcessErrorArgs,
		reporter: &dyn ErrorReporter,
	) -> ErrorClass {
		error!(
			error_source = %args.error_source,
			entity_path = %args.entity_path,
			error = %args.error,
			"Error from broker occurred"
		);

		let class = args.error.class();
		match class {
			| ErrorClass::Fatal => {
				error!(
					code = %args.error.code,
					"An unrecoverable error occurred. Stopping processing"
				);
				reporter.report(&args.error, class).await;
			}
			| ErrorClass::Recoverable => {
				error!(
					code = %args.error.code,
					"Message lock lost, broker will redeliver"
				);
				reporter.report(&args.error, class).await;
			}
			| ErrorClass::Transient => {
				debug!(
					code = %args.error.code,
					backoff_ms = self.transient_backoff.as_millis() as u64,
					"Broker busy, backing off"
				);
				tokio::time::sleep(self.transient_backoff).await;
				reporter.report(&args.error, class).await;
			}
			| ErrorClass::Unknown => {
				warn!(
					code = %args.error.code,
					"Unclassified broker error ignored"
				);
			}
		}
		class
	}
}
