//! Capabilities the engine needs from a topic broker client.
//!
//! The engine never talks to a transport directly: it asks a
//! [`BrokerClient`] for one sender and one receiver at construction, sends
//! enriched events through the sender and opens at most one
//! [`BrokerSubscription`] on the receiver at a time.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::error::{BrokerError, ProcessErrorArgs};
use crate::event::{Event, ReceivedMessage};

/// Notification pushed by an open broker subscription.
#[derive(Debug, Clone)]
pub enum BrokerNotification {
	/// A message was received
	Message(ReceivedMessage),
	/// The broker reported an error while receiving
	Error(ProcessErrorArgs),
}

/// Factory for topic senders and receivers.
pub trait BrokerClient: Send + Sync {
	/// Creates a sender bound to `topic`.
	fn create_sender(
		&self,
		topic: &str,
	) -> Result<Arc<dyn MessageSender>, BrokerError>;

	/// Creates a receiver bound to the `topic` + `subscription_name` pair.
	fn create_receiver(
		&self,
		topic: &str,
		subscription_name: &str,
	) -> Result<Arc<dyn MessageReceiver>, BrokerError>;
}

/// Sends events to a topic.
#[async_trait]
pub trait MessageSender: Send + Sync {
	/// Sends one message.
	async fn send(&self, message: Event) -> Result<(), BrokerError>;
}

/// Opens broker-level subscriptions.
pub trait MessageReceiver: Send + Sync {
	/// Starts delivering messages and errors into `notifications`.
	///
	/// Delivery stops once the returned subscription is closed. The
	/// receiver drops its end of the channel on close.
	fn subscribe(
		&self,
		notifications: mpsc::Sender<BrokerNotification>,
	) -> Result<Box<dyn BrokerSubscription>, BrokerError>;
}

/// Open broker-level subscription.
#[async_trait]
pub trait BrokerSubscription: Send + Sync {
	/// Stops delivery.
	async fn close(&mut self) -> Result<(), BrokerError>;
}
