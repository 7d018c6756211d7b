//! In-process broker implementing the [`BrokerClient`] capabilities.
//!
//! Every subscription name on a topic gets its own copy of each message.
//! Messages sent while a subscription name has no open receiver wait in a
//! per-subscription backlog and are delivered, in order, once a receiver
//! subscribes.

use std::{
	collections::{HashMap, VecDeque},
	sync::{
		Arc, Mutex, MutexGuard, PoisonError,
		atomic::{AtomicUsize, Ordering},
	},
};

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use super::{
	client::{
		BrokerClient, BrokerNotification, BrokerSubscription, MessageReceiver,
		MessageSender,
	},
	error::{BrokerError, BrokerErrorCode, ProcessErrorArgs},
};
use crate::event::{Event, ReceivedMessage};

const DEFAULT_NAMESPACE: &str = "in-memory.servicebus.local";
/// Sent messages kept per topic for inspection.
pub const DEFAULT_HISTORY_LIMIT: usize = 1024;

/// Call counters of an [`InMemoryBroker`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BrokerStats {
	/// `create_sender` calls
	pub senders_created: usize,
	/// `create_receiver` calls
	pub receivers_created: usize,
	/// Successful `subscribe` calls on receivers
	pub subscriptions_opened: usize,
	/// Broker subscriptions closed
	pub subscriptions_closed: usize,
	/// Messages accepted by senders
	pub messages_sent: usize,
}

#[derive(Debug, Default)]
struct Counters {
	senders_created: AtomicUsize,
	receivers_created: AtomicUsize,
	subscriptions_opened: AtomicUsize,
	subscriptions_closed: AtomicUsize,
	messages_sent: AtomicUsize,
}

#[derive(Debug)]
struct ActiveReceiver {
	handle: u64,
	notifications: mpsc::Sender<BrokerNotification>,
	/// A refill task is waiting for room in `notifications`
	refill_pending: bool,
}

/// Receiver channel that filled up before the backlog was empty.
type Refill = (u64, mpsc::Sender<BrokerNotification>);

#[derive(Debug, Default)]
struct SubscriptionState {
	active: Option<ActiveReceiver>,
	backlog: VecDeque<ReceivedMessage>,
}

impl SubscriptionState {
	/// Pushes as much of the backlog as the active receiver accepts.
	///
	/// Returns the receiver's channel when it is full and nobody waits for
	/// room in it yet. The caller must hand it to `refill_backlog`.
	fn drain_backlog(&mut self) -> Option<Refill> {
		while let Some(message) = self.backlog.pop_front() {
			let Some(active) = self.active.as_mut() else {
				self.backlog.push_front(message);
				return None;
			};
			match active
				.notifications
				.try_send(BrokerNotification::Message(message))
			{
				| Ok(()) => {}
				| Err(TrySendError::Full(notification)) => {
					requeue(&mut self.backlog, notification);
					if active.refill_pending {
						return None;
					}
					active.refill_pending = true;
					return Some((active.handle, active.notifications.clone()));
				}
				| Err(TrySendError::Closed(notification)) => {
					requeue(&mut self.backlog, notification);
					self.active = None;
					return None;
				}
			}
		}
		None
	}

	fn is_active(&self, handle: u64) -> bool {
		self.active
			.as_ref()
			.is_some_and(|active| active.handle == handle)
	}
}

fn requeue(
	backlog: &mut VecDeque<ReceivedMessage>,
	notification: BrokerNotification,
) {
	if let BrokerNotification::Message(message) = notification {
		backlog.push_front(message);
	}
}

#[derive(Debug, Default)]
struct TopicState {
	sent: VecDeque<Event>,
	subscriptions: HashMap<String, SubscriptionState>,
}

#[derive(Debug)]
struct BrokerState {
	topics: HashMap<String, TopicState>,
	send_failure: Option<BrokerError>,
	history_limit: usize,
	next_sequence: i64,
	next_handle: u64,
}

impl Default for BrokerState {
	fn default() -> Self {
		Self {
			topics: HashMap::new(),
			send_failure: None,
			history_limit: DEFAULT_HISTORY_LIMIT,
			next_sequence: 0,
			next_handle: 0,
		}
	}
}

impl BrokerState {
	fn subscription_mut(
		&mut self,
		topic: &str,
		subscription_name: &str,
	) -> Option<&mut SubscriptionState> {
		self.topics
			.get_mut(topic)
			.and_then(|topic| topic.subscriptions.get_mut(subscription_name))
	}
}

#[derive(Debug)]
struct Inner {
	namespace: String,
	state: Mutex<BrokerState>,
	counters: Counters,
}

impl Inner {
	fn state(&self) -> MutexGuard<'_, BrokerState> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

/// In-process topic broker.
///
/// Cheap to clone; clones share the same topics.
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
	inner: Arc<Inner>,
}

impl Default for InMemoryBroker {
	fn default() -> Self {
		Self::new()
	}
}

impl InMemoryBroker {
	/// Creates an empty broker.
	pub fn new() -> Self {
		Self::with_namespace(DEFAULT_NAMESPACE)
	}

	/// Creates a broker from a `Endpoint=sb://<namespace>/;...` connection
	/// string.
	pub fn connect(connection_string: &str) -> Result<Self, BrokerError> {
		let endpoint = connection_string
			.split(';')
			.filter_map(|part| part.split_once('='))
			.find(|(key, _)| key.trim().eq_ignore_ascii_case("Endpoint"))
			.map(|(_, value)| value.trim())
			.ok_or_else(|| {
				BrokerError::new(
					"InvalidConnectionString",
					"connection string has no Endpoint",
				)
			})?;
		let namespace = endpoint
			.trim_start_matches("sb://")
			.trim_end_matches('/');
		if namespace.is_empty() {
			return Err(BrokerError::new(
				"InvalidConnectionString",
				"connection string Endpoint is empty",
			));
		}
		Ok(Self::with_namespace(namespace))
	}

	fn with_namespace(namespace: &str) -> Self {
		Self {
			inner: Arc::new(Inner {
				namespace: namespace.to_string(),
				state: Mutex::new(BrokerState::default()),
				counters: Counters::default(),
			}),
		}
	}

	/// Namespace this broker was created for.
	pub fn namespace(&self) -> &str {
		&self.inner.namespace
	}

	/// Snapshot of the call counters.
	pub fn stats(&self) -> BrokerStats {
		let counters = &self.inner.counters;
		BrokerStats {
			senders_created: counters.senders_created.load(Ordering::SeqCst),
			receivers_created: counters
				.receivers_created
				.load(Ordering::SeqCst),
			subscriptions_opened: counters
				.subscriptions_opened
				.load(Ordering::SeqCst),
			subscriptions_closed: counters
				.subscriptions_closed
				.load(Ordering::SeqCst),
			messages_sent: counters.messages_sent.load(Ordering::SeqCst),
		}
	}

	/// Most recent messages sent to `topic`, oldest first.
	///
	/// At most the history limit is kept, see
	/// [`set_history_limit`](Self::set_history_limit).
	pub fn sent_messages(&self, topic: &str) -> Vec<Event> {
		self.inner
			.state()
			.topics
			.get(topic)
			.map(|topic| topic.sent.iter().cloned().collect())
			.unwrap_or_default()
	}

	/// Changes how many sent messages are kept per topic. `0` disables the
	/// history.
	pub fn set_history_limit(&self, limit: usize) {
		let mut state = self.inner.state();
		state.history_limit = limit;
		for topic in state.topics.values_mut() {
			let excess = topic.sent.len().saturating_sub(limit);
			topic.sent.drain(..excess);
		}
	}

	/// Last message sent to `topic`.
	pub fn last_message(&self, topic: &str) -> Option<Event> {
		self.inner
			.state()
			.topics
			.get(topic)
			.and_then(|topic| topic.sent.back().cloned())
	}

	/// Messages waiting for a receiver on `topic`/`subscription_name`.
	pub fn backlog_len(&self, topic: &str, subscription_name: &str) -> usize {
		self.inner
			.state()
			.topics
			.get(topic)
			.and_then(|topic| topic.subscriptions.get(subscription_name))
			.map_or(0, |subscription| subscription.backlog.len())
	}

	/// Whether a receiver is currently subscribed on the pair.
	pub fn is_subscribed(&self, topic: &str, subscription_name: &str) -> bool {
		self.inner
			.state()
			.topics
			.get(topic)
			.and_then(|topic| topic.subscriptions.get(subscription_name))
			.is_some_and(|subscription| subscription.active.is_some())
	}

	/// Makes every following send fail with `error`; `None` restores normal
	/// sending.
	pub fn fail_sends(&self, error: Option<BrokerError>) {
		self.inner.state().send_failure = error;
	}

	/// Reports `code` to the receiver subscribed on the pair.
	///
	/// Returns `false` when no receiver is subscribed.
	pub fn inject_error(
		&self,
		topic: &str,
		subscription_name: &str,
		code: impl Into<BrokerErrorCode>,
	) -> bool {
		let code = code.into();
		let state = self.inner.state();
		let Some(active) = state
			.topics
			.get(topic)
			.and_then(|topic| topic.subscriptions.get(subscription_name))
			.and_then(|subscription| subscription.active.as_ref())
		else {
			return false;
		};

		let mut args = ProcessErrorArgs::new(
			BrokerError::new(code.clone(), format!("injected {code}")),
			entity_path(topic, subscription_name),
		);
		args.fully_qualified_namespace = self.inner.namespace.clone();
		match active.notifications.try_send(BrokerNotification::Error(args)) {
			| Ok(()) => true,
			| Err(err) => {
				warn!(
					topic,
					subscription_name,
					error = %err,
					"Failed to deliver injected broker error"
				);
				false
			}
		}
	}

	fn send_event(&self, topic: &str, event: Event) -> Result<(), BrokerError> {
		let mut state = self.inner.state();
		if let Some(err) = &state.send_failure {
			return Err(err.clone());
		}

		state.next_sequence += 1;
		let sequence_number = state.next_sequence;
		let history_limit = state.history_limit;
		let topic_state = state.topics.entry(topic.to_string()).or_default();
		if history_limit > 0 {
			while topic_state.sent.len() >= history_limit {
				topic_state.sent.pop_front();
			}
			topic_state.sent.push_back(event.clone());
		}

		let mut refills = Vec::new();
		for (name, subscription) in &mut topic_state.subscriptions {
			subscription.backlog.push_back(ReceivedMessage {
				event: event.clone(),
				message_id: Some(format!("{topic}-{sequence_number}")),
				sequence_number,
				delivery_count: 1,
			});
			if let Some(refill) = subscription.drain_backlog() {
				refills.push((name.clone(), refill));
			}
		}
		drop(state);

		for (name, refill) in refills {
			self.spawn_refill(topic, &name, refill);
		}
		self.inner
			.counters
			.messages_sent
			.fetch_add(1, Ordering::SeqCst);
		debug!(topic, sequence_number, event_name = %event.name(), "Message accepted");
		Ok(())
	}

	/// Resumes backlog delivery once the receiver makes room.
	fn spawn_refill(&self, topic: &str, subscription_name: &str, refill: Refill) {
		let (handle, notifications) = refill;
		match tokio::runtime::Handle::try_current() {
			| Ok(runtime) => {
				runtime.spawn(refill_backlog(
					self.clone(),
					topic.to_string(),
					subscription_name.to_string(),
					handle,
					notifications,
				));
			}
			| Err(_) => {
				warn!(
					topic,
					subscription_name,
					"No runtime to resume delivery, messages stay in the backlog"
				);
				let mut state = self.inner.state();
				if let Some(active) = state
					.subscription_mut(topic, subscription_name)
					.and_then(|subscription| subscription.active.as_mut())
				{
					active.refill_pending = false;
				}
			}
		}
	}

	fn open_subscription(
		&self,
		topic: &str,
		subscription_name: &str,
		notifications: mpsc::Sender<BrokerNotification>,
	) -> Result<u64, BrokerError> {
		let mut state = self.inner.state();
		state.next_handle += 1;
		let handle = state.next_handle;
		let subscription = state
			.topics
			.entry(topic.to_string())
			.or_default()
			.subscriptions
			.entry(subscription_name.to_string())
			.or_default();
		if subscription
			.active
			.as_ref()
			.is_some_and(|active| !active.notifications.is_closed())
		{
			return Err(BrokerError::new(
				"ReceiverAlreadySubscribed",
				format!(
					"{} already has an open subscription",
					entity_path(topic, subscription_name)
				),
			));
		}
		subscription.active = Some(ActiveReceiver {
			handle,
			notifications,
			refill_pending: false,
		});
		let refill = subscription.drain_backlog();
		drop(state);

		if let Some(refill) = refill {
			self.spawn_refill(topic, subscription_name, refill);
		}
		self.inner
			.counters
			.subscriptions_opened
			.fetch_add(1, Ordering::SeqCst);
		Ok(handle)
	}

	fn close_subscription(
		&self,
		topic: &str,
		subscription_name: &str,
		handle: u64,
	) {
		let mut state = self.inner.state();
		if let Some(subscription) =
			state.subscription_mut(topic, subscription_name)
		{
			if subscription.is_active(handle) {
				subscription.active = None;
			}
		}
		self.inner
			.counters
			.subscriptions_closed
			.fetch_add(1, Ordering::SeqCst);
	}
}

/// Moves the backlog into `notifications` as the receiver frees up room.
///
/// Ends when the backlog is empty or the receiver was closed or replaced.
async fn refill_backlog(
	broker: InMemoryBroker,
	topic: String,
	subscription_name: String,
	handle: u64,
	notifications: mpsc::Sender<BrokerNotification>,
) {
	loop {
		let Ok(permit) = notifications.reserve().await else {
			return;
		};
		let mut state = broker.inner.state();
		let Some(subscription) =
			state.subscription_mut(&topic, &subscription_name)
		else {
			return;
		};
		let Some(active) = subscription
			.active
			.as_mut()
			.filter(|active| active.handle == handle)
		else {
			return;
		};
		active.refill_pending = false;
		match subscription.backlog.pop_front() {
			| Some(message) => permit.send(BrokerNotification::Message(message)),
			| None => return,
		}
		if subscription.drain_backlog().is_none() {
			return;
		}
	}
}

fn entity_path(topic: &str, subscription_name: &str) -> String {
	format!("{topic}/Subscriptions/{subscription_name}")
}

impl BrokerClient for InMemoryBroker {
	fn create_sender(
		&self,
		topic: &str,
	) -> Result<Arc<dyn MessageSender>, BrokerError> {
		self.inner
			.counters
			.senders_created
			.fetch_add(1, Ordering::SeqCst);
		Ok(Arc::new(InMemorySender {
			broker: self.clone(),
			topic: topic.to_string(),
		}))
	}

	fn create_receiver(
		&self,
		topic: &str,
		subscription_name: &str,
	) -> Result<Arc<dyn MessageReceiver>, BrokerError> {
		self.inner
			.state()
			.topics
			.entry(topic.to_string())
			.or_default()
			.subscriptions
			.entry(subscription_name.to_string())
			.or_default();
		self.inner
			.counters
			.receivers_created
			.fetch_add(1, Ordering::SeqCst);
		Ok(Arc::new(InMemoryReceiver {
			broker: self.clone(),
			topic: topic.to_string(),
			subscription_name: subscription_name.to_string(),
		}))
	}
}

struct InMemorySender {
	broker: InMemoryBroker,
	topic: String,
}

#[async_trait]
impl MessageSender for InMemorySender {
	async fn send(&self, message: Event) -> Result<(), BrokerError> {
		self.broker.send_event(&self.topic, message)
	}
}

struct InMemoryReceiver {
	broker: InMemoryBroker,
	topic: String,
	subscription_name: String,
}

impl MessageReceiver for InMemoryReceiver {
	fn subscribe(
		&self,
		notifications: mpsc::Sender<BrokerNotification>,
	) -> Result<Box<dyn BrokerSubscription>, BrokerError> {
		let handle = self.broker.open_subscription(
			&self.topic,
			&self.subscription_name,
			notifications,
		)?;
		Ok(Box::new(InMemorySubscription {
			broker: self.broker.clone(),
			topic: self.topic.clone(),
			subscription_name: self.subscription_name.clone(),
			handle,
			closed: false,
		}))
	}
}

struct InMemorySubscription {
	broker: InMemoryBroker,
	topic: String,
	subscription_name: String,
	handle: u64,
	closed: bool,
}

#[async_trait]
impl BrokerSubscription for InMemorySubscription {
	async fn close(&mut self) -> Result<(), BrokerError> {
		if !self.closed {
			self.closed = true;
			self.broker.close_subscription(
				&self.topic,
				&self.subscription_name,
				self.handle,
			);
		}
		Ok(())
	}
}
