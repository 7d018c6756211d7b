#![allow(missing_docs)]
use std::sync::Arc;

use tokio::{
	sync::{
		mpsc::{
			self as tokio_mpsc, Receiver, Sender, channel, error::TrySendError,
		},
		oneshot,
	},
	task::{JoinError, JoinHandle},
};
use tracing::{debug, error, info, warn};

use super::{
	error::SubscriptionError,
	event_bus::{EventBus, EventHandler},
	event_filter::EventFilter,
	message_pump::{EngineErrorReporter, MessagePump},
	registry::{Subscription, SubscriptionId, SubscriptionRegistry},
};
use crate::{
	broker::{BrokerError, BrokerSubscription, MessageReceiver},
	client::config::{EngineSettings, ErrorHook},
	processor::MessageProcessor,
};

/// Snapshot of the engine's reference-counted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStatus {
	/// Live logical subscribers
	pub active_subscriptions: usize,
	/// Whether a broker-level subscription is open
	pub broker_subscribed: bool,
}

pub(crate) enum Command {
	Subscribe {
		filter: EventFilter,
		handler: EventHandler,
		response_tx: oneshot::Sender<Result<SubscriptionId, SubscriptionError>>,
	},
	Unsubscribe {
		id: SubscriptionId,
		response_tx: Option<oneshot::Sender<bool>>,
	},
	CloseBrokerSubscription {
		error: BrokerError,
		generation: u64,
	},
	Status(oneshot::Sender<EngineStatus>),
}

struct ActiveBrokerSubscription {
	handle: Box<dyn BrokerSubscription>,
	pump: JoinHandle<()>,
	generation: u64,
}

/// Owns the registry and the broker subscription.
///
/// Every registry mutation runs on this actor's task, so the empty/non-empty
/// transitions that open and close the broker subscription never race.
pub(crate) struct SubscriptionManagerActor {
	registry: SubscriptionRegistry,
	bus: EventBus,
	receiver: Arc<dyn MessageReceiver>,
	processor: Arc<dyn MessageProcessor>,
	error_hook: Option<ErrorHook>,
	broker_subscription: Option<ActiveBrokerSubscription>,
	/// Bumped on every broker subscription open
	generation: u64,
	notification_capacity: usize,
	command_rx: Receiver<Command>,
	command_tx: Sender<Command>, //For fatal error reports
	shutdown_rx: oneshot::Receiver<()>,
}

impl SubscriptionManagerActor {
	pub(crate) fn spawn(
		receiver: Arc<dyn MessageReceiver>,
		processor: Arc<dyn MessageProcessor>,
		error_hook: Option<ErrorHook>,
		settings: &EngineSettings,
	) -> (SubscriptionManagerController, SubscriptionManagerHandler) {
		let (command_tx, command_rx) =
			channel(settings.command_channel_capacity);
		let (shutdown_tx, shutdown_rx) = oneshot::channel();
		let actor = Self {
			registry: SubscriptionRegistry::new(),
			bus: EventBus::new(settings.event_bus_capacity),
			receiver,
			processor,
			error_hook,
			broker_subscription: None,
			generation: 0,
			notification_capacity: settings.notification_channel_capacity,
			command_rx,
			command_tx: command_tx.clone(),
			shutdown_rx,
		};
		let join_handler = tokio::spawn(async move { actor.run().await });

		let controller = SubscriptionManagerController {
			shutdown_tx,
			join_handler,
		};
		let handler = SubscriptionManagerHandler { command_tx };

		(controller, handler)
	}

	async fn run(mut self) {
		info!("SubscriptionManagerActor: started");
		loop {
			tokio::select! {
				_ = &mut self.shutdown_rx => {
					info!("SubscriptionManagerActor: Shutdown signal received");
					break;
				}
				cmd = self.command_rx.recv() => {
					let Some(cmd) = cmd else {
						info!("SubscriptionManagerActor: Command channel closed, exiting");
						break;
					};
					match cmd {
						| Command::Subscribe { filter, handler, response_tx } => {
							self.handle_subscribe(filter, handler, response_tx).await
						}
						| Command::Unsubscribe { id, response_tx } => {
							let found = self.handle_unsubscribe(&id).await;
							if let Some(response_tx) = response_tx {
								let _ = response_tx.send(found);
							}
						}
						| Command::CloseBrokerSubscription {
							error,
							generation,
						} => self.handle_fatal(error, generation).await,
						| Command::Status(response_tx) => {
							let _ = response_tx.send(self.status());
						}
					}
				}
			}
		}
		info!("SubscriptionManagerActor: Exiting run loop");
		self.cleanup_active_subscriptions().await
	}

	fn status(&self) -> EngineStatus {
		EngineStatus {
			active_subscriptions: self.registry.len(),
			broker_subscribed: self.broker_subscription.is_some(),
		}
	}

	/// Shutdown cleanup. The broker subscription goes first so nothing new
	/// reaches the bus, then every route is cancelled.
	async fn cleanup_active_subscriptions(&mut self) {
		self.close_broker_subscription("shutdown").await;
		let dropped = self.registry.drain().count();
		debug!(subscriptions = dropped, "Routes cancelled on shutdown");
	}

	async fn handle_subscribe(
		&mut self,
		filter: EventFilter,
		handler: EventHandler,
		response_tx: oneshot::Sender<Result<SubscriptionId, SubscriptionError>>,
	) {
		let first_subscriber = self.registry.is_empty();
		let id = self.registry.next_id();
		// The route has to exist before the broker subscription opens, so a
		// backlog flushed on open reaches it.
		let route = self.bus.route(id, filter, handler);

		if first_subscriber {
			if let Err(err) = self.open_broker_subscription() {
				error!(
					subscription_id = %id,
					error = %err,
					"Failed to open broker subscription"
				);
				drop(route);
				if response_tx
					.send(Err(SubscriptionError::SubscribeFailed(err)))
					.is_err()
				{
					warn!(
						subscription_id = %id,
						"Could not send subscribe error response (channel closed)"
					);
				}
				return;
			}
		}

		debug!(
			subscription_id = %id,
			filter = %route.filter(),
			active = self.registry.len() + 1,
			"Subscription registered"
		);
		self.registry.insert(Subscription { id, route });

		if response_tx.send(Ok(id)).is_err() {
			warn!(
				subscription_id = %id,
				"Could not send successful subscribe response (channel closed)"
			);
			self.handle_unsubscribe(&id).await;
		}
	}

	async fn handle_unsubscribe(&mut self, id: &SubscriptionId) -> bool {
		let Some(subscription) = self.registry.remove(id) else {
			debug!(subscription_id = %id, "Unsubscribe for unknown subscription");
			return false;
		};
		if !subscription.route.is_closed() {
			subscription.route.cancel();
		}
		debug!(
			subscription_id = %id,
			active = self.registry.len(),
			"Subscription removed"
		);

		if self.registry.is_empty() {
			self.close_broker_subscription("last subscriber left").await;
		}
		true
	}

	async fn handle_fatal(&mut self, error: BrokerError, generation: u64) {
		let current = self.broker_subscription.as_ref().map(|a| a.generation);
		if current != Some(generation) {
			debug!(
				error = %error,
				generation,
				current = ?current,
				"Ignoring fatal error from a broker subscription already closed"
			);
			return;
		}
		warn!(
			generation,
			error = %error,
			active = self.registry.len(),
			"Closing broker subscription after fatal broker error"
		);
		self.close_broker_subscription("fatal broker error").await;
	}

	fn open_broker_subscription(&mut self) -> Result<(), BrokerError> {
		let (notifications_tx, notifications_rx) =
			tokio_mpsc::channel(self.notification_capacity);
		let handle = self.receiver.subscribe(notifications_tx)?;
		self.generation += 1;
		let generation = self.generation;

		let pump = MessagePump {
			bus: self.bus.clone(),
			processor: Arc::clone(&self.processor),
			reporter: EngineErrorReporter {
				command_tx: self.command_tx.clone(),
				hook: self.error_hook.clone(),
				generation,
			},
		};
		let pump = tokio::spawn(pump.run(notifications_rx));
		self.broker_subscription = Some(ActiveBrokerSubscription {
			handle,
			pump,
			generation,
		});
		info!(generation, "Broker subscription opened");
		Ok(())
	}

	async fn close_broker_subscription(&mut self, reason: &'static str) {
		let Some(mut active) = self.broker_subscription.take() else {
			return;
		};
		if let Err(err) = active.handle.close().await {
			error!(error = %err, reason, "Failed to close broker subscription");
		}
		active.pump.abort();
		info!(
			generation = active.generation,
			reason,
			"Broker subscription closed"
		);
	}
}

pub(crate) struct SubscriptionManagerController {
	shutdown_tx: oneshot::Sender<()>,
	join_handler: JoinHandle<()>,
}

impl SubscriptionManagerController {
	pub async fn shutdown(self) -> Result<(), JoinError> {
		let _ = self.shutdown_tx.send(()).inspect_err(|_| {
			warn!(
				"SubscriptionManagerController: Shutdown signal already sent"
			);
		});
		self.join_handler.await.inspect_err(|e| {
			warn!(
				error = ?e,
				"SubscriptionManagerController: Actor run failed"
			);
		})
	}
}

#[derive(Clone, Debug)]
pub(crate) struct SubscriptionManagerHandler {
	command_tx: Sender<Command>,
}

impl SubscriptionManagerHandler {
	pub async fn subscribe(
		&self,
		filter: EventFilter,
		handler: EventHandler,
	) -> Result<SubscriptionId, SubscriptionError> {
		let (response_tx, response_rx) = oneshot::channel();
		self.command_tx
			.send(Command::Subscribe {
				filter,
				handler,
				response_tx,
			})
			.await
			.map_err(|_| SubscriptionError::ChannelClosed)?;
		response_rx
			.await
			.map_err(|_| SubscriptionError::ResponseLost)?
	}

	pub async fn unsubscribe(
		&self,
		id: SubscriptionId,
	) -> Result<bool, SubscriptionError> {
		let (response_tx, response_rx) = oneshot::channel();
		self.command_tx
			.send(Command::Unsubscribe {
				id,
				response_tx: Some(response_tx),
			})
			.await
			.map_err(|_| SubscriptionError::ChannelClosed)?;
		response_rx.await.map_err(|_| SubscriptionError::ResponseLost)
	}

	/// Queues an unsubscribe without waiting for the outcome.
	pub fn unsubscribe_detached(
		&self,
		id: SubscriptionId,
	) -> Result<(), SubscriptionError> {
		match self.command_tx.try_send(Command::Unsubscribe {
			id,
			response_tx: None,
		}) {
			| Ok(()) => Ok(()),
			| Err(TrySendError::Closed(_)) => Err(SubscriptionError::ChannelClosed),
			| Err(TrySendError::Full(command)) => {
				// Drop paths cannot wait; hand the command to a task instead.
				let runtime = tokio::runtime::Handle::try_current()
					.map_err(|_| SubscriptionError::ChannelClosed)?;
				let command_tx = self.command_tx.clone();
				runtime.spawn(async move {
					if command_tx.send(command).await.is_err() {
						debug!(
							subscription_id = %id,
							"Subscription manager gone before detached unsubscribe"
						);
					}
				});
				Ok(())
			}
		}
	}

	pub async fn status(&self) -> Result<EngineStatus, SubscriptionError> {
		let (response_tx, response_rx) = oneshot::channel();
		self.command_tx
			.send(Command::Status(response_tx))
			.await
			.map_err(|_| SubscriptionError::ChannelClosed)?;
		response_rx.await.map_err(|_| SubscriptionError::ResponseLost)
	}
}
