//! Single multicast stream of received events.
//!
//! Every route owns its own broadcast receiver and task. Routes observe
//! events in the order they were pushed, and a slow handler only holds up
//! its own route. A route that falls more than the bus capacity behind
//! skips the oldest events and keeps going.

use std::{fmt, sync::Arc};

use serde_json::Value;
use tokio::{
	sync::broadcast::{self, error::RecvError},
	task::JoinHandle,
};
use tracing::{debug, trace, warn};

use super::{event_filter::EventFilter, registry::SubscriptionId};
use crate::event::Event;

/// Caller callback receiving the payload of each matching event.
pub type EventHandler = Arc<dyn Fn(Option<Value>) + Send + Sync>;

/// Multicast stream shared by all routes.
#[derive(Clone)]
pub struct EventBus {
	sender: broadcast::Sender<Arc<Event>>,
}

impl fmt::Debug for EventBus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("EventBus")
			.field("routes", &self.sender.receiver_count())
			.finish()
	}
}

impl EventBus {
	/// Creates a bus buffering up to `capacity` events per route.
	///
	/// `capacity` must be greater than zero.
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	/// Pushes an event to every live route and returns how many routes
	/// will see it.
	pub fn publish(&self, event: Event) -> usize {
		match self.sender.send(Arc::new(event)) {
			| Ok(routes) => routes,
			| Err(broadcast::error::SendError(event)) => {
				trace!(event_name = %event.name(), "No routes, event dropped");
				0
			}
		}
	}

	/// Number of live routes.
	pub fn route_count(&self) -> usize {
		self.sender.receiver_count()
	}

	/// Opens a filtered route that hands matching payloads to `handler`.
	///
	/// The route sees every event published after this call returns.
	pub fn route(
		&self,
		id: SubscriptionId,
		filter: EventFilter,
		handler: EventHandler,
	) -> Route {
		let receiver = self.sender.subscribe();
		let task = tokio::spawn(run_route(id, receiver, filter.clone(), handler));
		Route { filter, task }
	}
}

async fn run_route(
	id: SubscriptionId,
	mut receiver: broadcast::Receiver<Arc<Event>>,
	filter: EventFilter,
	handler: EventHandler,
) {
	loop {
		match receiver.recv().await {
			| Ok(event) => {
				if filter.matches(&event) {
					trace!(
						subscription_id = %id,
						event_name = %event.name(),
						"Delivering event"
					);
					handler(event.body.payload.clone());
				}
			}
			| Err(RecvError::Lagged(skipped)) => {
				warn!(
					subscription_id = %id,
					skipped,
					"Route fell behind the event bus, events dropped"
				);
			}
			| Err(RecvError::Closed) => {
				debug!(subscription_id = %id, "Event bus closed");
				break;
			}
		}
	}
}

/// Handle to one filtered view over the [`EventBus`].
///
/// Dropping the route cancels it.
#[derive(Debug)]
pub struct Route {
	filter: EventFilter,
	task: JoinHandle<()>,
}

impl Route {
	/// Filter applied by this route.
	pub fn filter(&self) -> &EventFilter {
		&self.filter
	}

	/// Whether the route stopped delivering.
	pub fn is_closed(&self) -> bool {
		self.task.is_finished()
	}

	/// Stops delivery to the handler.
	pub fn cancel(&self) {
		self.task.abort();
	}
}

impl Drop for Route {
	fn drop(&mut self) {
		self.task.abort();
	}
}
