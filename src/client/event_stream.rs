use std::{
	pin::Pin,
	task::{Context, Poll},
};

use futures::Stream;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc::Receiver;
use tracing::{debug, warn};

use super::error::PubSubError;
use crate::routing::{SubscriptionId, SubscriptionManagerHandler};

/// Stream of payloads for one event name.
///
/// Created via `PubSub::stream()`. Dropping the stream unsubscribes it.
pub struct EventStream {
	receiver: Receiver<Option<Value>>,
	manager: Option<SubscriptionManagerHandler>,
	id: SubscriptionId,
}

impl EventStream {
	pub(crate) fn new(
		receiver: Receiver<Option<Value>>,
		manager: SubscriptionManagerHandler,
		id: SubscriptionId,
	) -> Self {
		Self {
			receiver,
			manager: Some(manager),
			id,
		}
	}

	/// Identifier of the underlying subscription.
	pub fn id(&self) -> SubscriptionId {
		self.id
	}

	/// Receives the next payload.
	///
	/// Returns `None` once the engine shut down or the stream was cancelled.
	pub async fn recv(&mut self) -> Option<Option<Value>> {
		self.receiver.recv().await
	}

	/// Receives the next payload and deserializes it into `T`.
	///
	/// Events without payload deserialize from JSON `null`.
	pub async fn next_as<T>(&mut self) -> Option<Result<T, PubSubError>>
	where T: DeserializeOwned {
		let payload = self.recv().await?;
		let result = serde_json::from_value(payload.unwrap_or(Value::Null))
			.map_err(PubSubError::from);
		if let Err(err) = &result {
			warn!(
				subscription_id = %self.id,
				error = %err,
				"Failed to deserialize event payload"
			);
		}
		Some(result)
	}

	/// Unsubscribes and reports whether the subscription was still live.
	pub async fn cancel(mut self) -> Result<bool, PubSubError> {
		match self.manager.take() {
			| Some(manager) => Ok(manager.unsubscribe(self.id).await?),
			| None => {
				warn!(subscription_id = %self.id, "Subscription already canceled");
				Ok(false)
			}
		}
	}
}

impl Stream for EventStream {
	type Item = Option<Value>;

	fn poll_next(
		mut self: Pin<&mut Self>,
		cx: &mut Context<'_>,
	) -> Poll<Option<Self::Item>> {
		self.receiver.poll_recv(cx)
	}
}

impl Drop for EventStream {
	fn drop(&mut self) {
		if let Some(manager) = self.manager.take() {
			match manager.unsubscribe_detached(self.id) {
				| Ok(()) => {
					debug!(
						subscription_id = %self.id,
						"Subscription unsubscribed in Drop"
					);
				}
				| Err(err) => {
					// The engine is already gone and took the route with it.
					debug!(
						subscription_id = %self.id,
						error = %err,
						"Unsubscribe in Drop skipped"
					);
				}
			}
		}
	}
}
