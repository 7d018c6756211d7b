//! Event data model shared by the publish and receive paths.

use std::{collections::BTreeMap, time::SystemTime};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Routing metadata attached to a broker message.
pub type ApplicationProperties = BTreeMap<String, PropertyValue>;

/// Scalar value allowed in [`ApplicationProperties`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
	/// Explicit null
	Null,
	/// Boolean flag
	Bool(bool),
	/// Signed integer
	Int(i64),
	/// Floating point number
	Float(f64),
	/// UTF-8 string
	String(String),
	/// Point in time
	Timestamp(SystemTime),
}

impl From<&str> for PropertyValue {
	fn from(value: &str) -> Self {
		PropertyValue::String(value.to_string())
	}
}

impl From<String> for PropertyValue {
	fn from(value: String) -> Self {
		PropertyValue::String(value)
	}
}

impl From<bool> for PropertyValue {
	fn from(value: bool) -> Self {
		PropertyValue::Bool(value)
	}
}

impl From<i64> for PropertyValue {
	fn from(value: i64) -> Self {
		PropertyValue::Int(value)
	}
}

impl From<f64> for PropertyValue {
	fn from(value: f64) -> Self {
		PropertyValue::Float(value)
	}
}

impl From<SystemTime> for PropertyValue {
	fn from(value: SystemTime) -> Self {
		PropertyValue::Timestamp(value)
	}
}

/// Body of every message sent through the topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBody {
	/// Event name used for routing
	pub name: String,
	/// Optional structured payload
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub payload: Option<Value>,
}

/// Event as it travels between publishers, the broker and subscribers.
///
/// This is also the message shape handed to the broker sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
	/// Message body
	pub body: EventBody,
	/// Application specific properties, `None` until enriched
	#[serde(
		default,
		rename = "applicationProperties",
		skip_serializing_if = "Option::is_none"
	)]
	pub application_properties: Option<ApplicationProperties>,
}

impl Event {
	/// Creates an event without application properties.
	pub fn new(name: impl Into<String>, payload: Option<Value>) -> Self {
		Self {
			body: EventBody {
				name: name.into(),
				payload,
			},
			application_properties: None,
		}
	}

	/// Event name.
	pub fn name(&self) -> &str {
		&self.body.name
	}

	/// Event payload, if any.
	pub fn payload(&self) -> Option<&Value> {
		self.body.payload.as_ref()
	}

	/// Looks up a single application property.
	pub fn property(&self, key: &str) -> Option<&PropertyValue> {
		self.application_properties
			.as_ref()
			.and_then(|props| props.get(key))
	}
}

/// Message delivered by the broker, with its delivery metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceivedMessage {
	/// Event carried by the message
	#[serde(flatten)]
	pub event: Event,
	/// Broker assigned message identifier
	#[serde(default, rename = "messageId")]
	pub message_id: Option<String>,
	/// Position of the message in the topic
	#[serde(rename = "sequenceNumber")]
	pub sequence_number: i64,
	/// Number of delivery attempts so far
	#[serde(rename = "deliveryCount")]
	pub delivery_count: u32,
}

impl ReceivedMessage {
	/// Drops the broker metadata and keeps the event.
	pub fn into_event(self) -> Event {
		self.event
	}
}
