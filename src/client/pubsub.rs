use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};

use super::{
	config::{PubSubConfig, PubSubOptions, SubscribeOptions},
	error::PubSubError,
	event_stream::EventStream,
};
use crate::{
	broker::{BrokerClient, MessageSender},
	connection::PubSubConnection,
	enrichment::{enrich_message, routing_attributes},
	event::Event,
	processor::{DefaultMessageProcessor, MessageProcessor},
	routing::{
		EngineStatus, EventFilter, EventHandler, SubscriptionId,
		SubscriptionManagerActor, SubscriptionManagerHandler,
	},
};

/// The publish/subscribe capability, independent of the broker behind it.
#[async_trait]
pub trait PubSubEngine: Send + Sync {
	/// Publishes `payload` under `event_name`. Failures are not reported.
	async fn publish(&self, event_name: &str, payload: Value);

	/// Registers `handler` for events named `event_name` (`""` or `"*"`
	/// for all events).
	async fn subscribe(
		&self,
		event_name: &str,
		handler: EventHandler,
		options: SubscribeOptions,
	) -> Result<SubscriptionId, PubSubError>;

	/// Removes a subscription; `false` when `id` is not live.
	async fn unsubscribe(&self, id: SubscriptionId)
	-> Result<bool, PubSubError>;
}

/// Publish/subscribe engine multiplexing one broker subscription.
///
/// All logical subscribers share a single broker-level subscription, opened
/// when the first one subscribes and closed when the last one leaves.
/// Cheap to clone. The connection lifecycle is managed separately via
/// [`PubSubConnection`].
#[derive(Clone)]
pub struct PubSub {
	sender: Arc<dyn MessageSender>,
	manager: SubscriptionManagerHandler,
	options: Arc<PubSubOptions>,
	stream_buffer_capacity: usize,
}

impl fmt::Debug for PubSub {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PubSub")
			.field("options", &self.options)
			.finish_non_exhaustive()
	}
}

impl PubSub {
	/// Creates the engine with the default message processor.
	///
	/// Creates one sender and one receiver on `client`. Must be called
	/// from within a tokio runtime.
	pub async fn connect(
		config: PubSubConfig,
		client: &dyn BrokerClient,
	) -> Result<(Self, PubSubConnection), PubSubError> {
		let processor =
			DefaultMessageProcessor::new(config.settings.transient_backoff);
		Self::connect_with_processor(config, client, Arc::new(processor)).await
	}

	/// Creates the engine with a custom message processor.
	pub async fn connect_with_processor(
		config: PubSubConfig,
		client: &dyn BrokerClient,
		processor: Arc<dyn MessageProcessor>,
	) -> Result<(Self, PubSubConnection), PubSubError> {
		config.settings.validate()?;
		let options = &config.options;
		let sender = client.create_sender(&options.topic_name)?;
		let receiver = client
			.create_receiver(&options.topic_name, &options.subscription_name)?;

		let (controller, manager) = SubscriptionManagerActor::spawn(
			receiver,
			processor,
			config.error_hook(),
			&config.settings,
		);
		info!(
			topic = %options.topic_name,
			subscription = %options.subscription_name,
			"PubSub engine connected"
		);

		let pubsub = Self {
			sender,
			manager,
			options: Arc::new(config.options.clone()),
			stream_buffer_capacity: config.settings.stream_buffer_capacity,
		};
		Ok((pubsub, PubSubConnection::new(controller)))
	}

	/// Options the engine was created with.
	pub fn options(&self) -> &PubSubOptions {
		&self.options
	}

	/// Publishes `payload` under `event_name`, fire-and-forget.
	///
	/// Send and serialization failures are logged and swallowed; use
	/// [`try_publish`](Self::try_publish) to observe them.
	pub async fn publish<P>(&self, event_name: &str, payload: &P)
	where P: Serialize + ?Sized {
		if let Err(err) = self.try_publish(event_name, payload).await {
			error!(event_name, error = %err, "Failed to publish event");
		}
	}

	/// Publishes `payload` under `event_name` and returns any failure.
	///
	/// The message carries the event name in the `sub.eventName`
	/// application property. A JSON `null` payload is sent as no payload.
	pub async fn try_publish<P>(
		&self,
		event_name: &str,
		payload: &P,
	) -> Result<(), PubSubError>
	where
		P: Serialize + ?Sized,
	{
		let payload = match serde_json::to_value(payload)? {
			| Value::Null => None,
			| value => Some(value),
		};
		let event = enrich_message(
			routing_attributes(event_name),
			&Event::new(event_name, payload),
		);
		self.sender.send(event).await?;
		debug!(event_name, "Event published");
		Ok(())
	}

	/// Calls `handler` with the payload of every event named `event_name`.
	///
	/// `""` and `"*"` subscribe to every event. Returns the id to pass to
	/// [`unsubscribe`](Self::unsubscribe).
	pub async fn subscribe<F>(
		&self,
		event_name: &str,
		handler: F,
	) -> Result<SubscriptionId, PubSubError>
	where
		F: Fn(Option<Value>) + Send + Sync + 'static,
	{
		self.subscribe_with_options(event_name, handler, SubscribeOptions::new())
			.await
	}

	/// Same as [`subscribe`](Self::subscribe), with caller options.
	pub async fn subscribe_with_options<F>(
		&self,
		event_name: &str,
		handler: F,
		options: SubscribeOptions,
	) -> Result<SubscriptionId, PubSubError>
	where
		F: Fn(Option<Value>) + Send + Sync + 'static,
	{
		self.subscribe_handler(event_name, Arc::new(handler), options)
			.await
	}

	async fn subscribe_handler(
		&self,
		event_name: &str,
		handler: EventHandler,
		options: SubscribeOptions,
	) -> Result<SubscriptionId, PubSubError> {
		debug!(event_name, options = ?options, "Subscribing");
		let id = self
			.manager
			.subscribe(EventFilter::new(event_name), handler)
			.await?;
		Ok(id)
	}

	/// Removes a subscription.
	///
	/// Returns `false`, without side effects, when `id` is unknown or was
	/// already removed.
	pub async fn unsubscribe(
		&self,
		id: SubscriptionId,
	) -> Result<bool, PubSubError> {
		Ok(self.manager.unsubscribe(id).await?)
	}

	/// Subscribes to `event_name` and returns the payloads as a stream.
	///
	/// Each stream buffers up to `EngineSettings::stream_buffer_capacity`
	/// payloads; further payloads are dropped until it is polled again.
	pub async fn stream(
		&self,
		event_name: &str,
	) -> Result<EventStream, PubSubError> {
		let (payload_tx, payload_rx) = mpsc::channel(self.stream_buffer_capacity);
		let stream_name = event_name.to_string();
		let handler: EventHandler =
			Arc::new(move |payload| match payload_tx.try_send(payload) {
				| Ok(()) | Err(TrySendError::Closed(_)) => {}
				| Err(TrySendError::Full(_)) => {
					warn!(
						event_name = %stream_name,
						"Event stream buffer full, payload dropped"
					);
				}
			});
		let id = self
			.subscribe_handler(event_name, handler, SubscribeOptions::new())
			.await?;
		Ok(EventStream::new(payload_rx, self.manager.clone(), id))
	}

	/// Current subscriber count and broker subscription state.
	pub async fn status(&self) -> Result<EngineStatus, PubSubError> {
		Ok(self.manager.status().await?)
	}
}

#[async_trait]
impl PubSubEngine for PubSub {
	async fn publish(&self, event_name: &str, payload: Value) {
		PubSub::publish(self, event_name, &payload).await
	}

	async fn subscribe(
		&self,
		event_name: &str,
		handler: EventHandler,
		options: SubscribeOptions,
	) -> Result<SubscriptionId, PubSubError> {
		self.subscribe_handler(event_name, handler, options).await
	}

	async fn unsubscribe(
		&self,
		id: SubscriptionId,
	) -> Result<bool, PubSubError> {
		PubSub::unsubscribe(self, id).await
	}
}
