//! Configuration for engine initialization

use std::{env, fmt, sync::Arc, time::Duration};

use serde_json::{Map, Value};

use super::error::PubSubError;
use crate::{
	broker::{BrokerError, ErrorClass},
	processor::DEFAULT_TRANSIENT_BACKOFF,
};

/// Environment variable holding the broker connection string
pub const CONNECTION_STRING_ENV: &str = "SERVICEBUS_CONNECTION_STRING";
/// Environment variable holding the topic name
pub const TOPIC_ENV: &str = "SERVICEBUS_TOPIC";
/// Environment variable holding the subscription name
pub const SUBSCRIPTION_NAME_ENV: &str = "SERVICEBUS_SUBSCRIPTION_NAME";

/// Callback receiving every broker error the processor surfaces.
pub type ErrorHook = Arc<dyn Fn(&BrokerError, ErrorClass) + Send + Sync>;

/// Where the engine publishes and which durable subscription it reads.
///
/// All three values are passed through to the broker client unchecked.
#[derive(Clone, PartialEq, Eq)]
pub struct PubSubOptions {
	/// Shared access connection string of the broker namespace
	pub connection_string: String,
	/// Topic every event is published to
	pub topic_name: String,
	/// Durable subscription on the topic the engine receives from
	pub subscription_name: String,
}

impl PubSubOptions {
	/// Creates options from the three required values.
	pub fn new(
		connection_string: impl Into<String>,
		topic_name: impl Into<String>,
		subscription_name: impl Into<String>,
	) -> Self {
		Self {
			connection_string: connection_string.into(),
			topic_name: topic_name.into(),
			subscription_name: subscription_name.into(),
		}
	}

	/// Reads `SERVICEBUS_CONNECTION_STRING`, `SERVICEBUS_TOPIC` and
	/// `SERVICEBUS_SUBSCRIPTION_NAME`.
	pub fn from_env() -> Result<Self, PubSubError> {
		let read = |variable: &'static str| {
			env::var(variable)
				.map_err(|_| PubSubError::MissingEnvironment { variable })
		};
		Ok(Self {
			connection_string: read(CONNECTION_STRING_ENV)?,
			topic_name: read(TOPIC_ENV)?,
			subscription_name: read(SUBSCRIPTION_NAME_ENV)?,
		})
	}
}

// The connection string carries the access key.
impl fmt::Debug for PubSubOptions {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PubSubOptions")
			.field("connection_string", &"<redacted>")
			.field("topic_name", &self.topic_name)
			.field("subscription_name", &self.subscription_name)
			.finish()
	}
}

/// Engine-level performance and behavior settings
#[derive(Debug, Clone)]
pub struct EngineSettings {
	/// Capacity of the command channel for the subscription manager
	pub command_channel_capacity: usize,
	/// Capacity of the channel the broker pushes notifications into
	pub notification_channel_capacity: usize,
	/// Events buffered per route before a slow route starts skipping
	pub event_bus_capacity: usize,
	/// Payloads buffered per [`EventStream`](super::EventStream)
	pub stream_buffer_capacity: usize,
	/// Pause after a transient broker error before signalling retry
	pub transient_backoff: Duration,
}

impl Default for EngineSettings {
	fn default() -> Self {
		Self {
			command_channel_capacity: 100,
			notification_channel_capacity: 100,
			event_bus_capacity: 1024,
			stream_buffer_capacity: 256,
			transient_backoff: DEFAULT_TRANSIENT_BACKOFF,
		}
	}
}

impl EngineSettings {
	/// Rejects zero capacities.
	pub fn validate(&self) -> Result<(), PubSubError> {
		let capacities = [
			("command_channel_capacity", self.command_channel_capacity),
			(
				"notification_channel_capacity",
				self.notification_channel_capacity,
			),
			("event_bus_capacity", self.event_bus_capacity),
			("stream_buffer_capacity", self.stream_buffer_capacity),
		];
		for (name, value) in capacities {
			if value == 0 {
				return Err(PubSubError::ConfigurationValue(format!(
					"{name} must be greater than 0"
				)));
			}
		}
		Ok(())
	}
}

/// Configuration for engine creation
#[derive(Clone)]
pub struct PubSubConfig {
	/// Broker options
	pub options: PubSubOptions,
	/// Engine-level settings
	pub settings: EngineSettings,
	error_hook: Option<ErrorHook>,
}

impl fmt::Debug for PubSubConfig {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PubSubConfig")
			.field("options", &self.options)
			.field("settings", &self.settings)
			.field("error_hook", &self.error_hook.is_some())
			.finish()
	}
}

impl PubSubConfig {
	/// Config with default settings
	pub fn new(options: PubSubOptions) -> Self {
		Self {
			options,
			settings: EngineSettings::default(),
			error_hook: None,
		}
	}

	/// Config read from the environment, see [`PubSubOptions::from_env`].
	pub fn from_env() -> Result<Self, PubSubError> {
		PubSubOptions::from_env().map(Self::new)
	}

	/// Replaces the engine settings.
	pub fn with_settings(mut self, settings: EngineSettings) -> Self {
		self.settings = settings;
		self
	}

	/// Registers the callback notified of surfaced broker errors.
	///
	/// Fatal errors and lock losses are reported right away, transient
	/// errors after the backoff. Unclassified codes are not reported.
	pub fn with_error_hook<F>(mut self, hook: F) -> Self
	where F: Fn(&BrokerError, ErrorClass) + Send + Sync + 'static {
		self.error_hook = Some(Arc::new(hook));
		self
	}

	pub(crate) fn error_hook(&self) -> Option<ErrorHook> {
		self.error_hook.clone()
	}
}

/// Open-ended per-subscription options.
///
/// Values are accepted as-is and logged; none of them currently changes
/// delivery.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscribeOptions {
	values: Map<String, Value>,
}

impl SubscribeOptions {
	/// Empty options.
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds or replaces one option.
	pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
		self.values.insert(key.into(), value.into());
		self
	}

	/// Looks up one option.
	pub fn get(&self, key: &str) -> Option<&Value> {
		self.values.get(key)
	}

	/// Whether no option was set.
	pub fn is_empty(&self) -> bool {
		self.values.is_empty()
	}
}

impl From<Map<String, Value>> for SubscribeOptions {
	fn from(values: Map<String, Value>) -> Self {
		Self { values }
	}
}
