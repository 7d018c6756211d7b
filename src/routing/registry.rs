use std::{collections::HashMap, fmt::Display};

use super::event_bus::Route;

/// A subscription identifier.
///
/// Unique among the subscriptions of one engine for its whole lifetime.
#[derive(Debug, Eq, PartialEq, Hash, Copy, Clone, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
	pub(crate) fn new(raw: u64) -> Self {
		Self(raw)
	}

	/// Raw numeric value.
	pub fn as_u64(&self) -> u64 {
		self.0
	}
}

impl Display for SubscriptionId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "SubscriptionId({})", self.0)
	}
}

/// A live logical subscriber.
#[derive(Debug)]
pub struct Subscription {
	pub id: SubscriptionId,
	pub route: Route,
}

/// Live subscriptions keyed by id.
///
/// The registry size is the reference count that decides whether a broker
/// subscription must exist.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
	subscriptions: HashMap<SubscriptionId, Subscription>,
	next_id: u64,
}

impl SubscriptionRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Reserves the id for the next subscription.
	///
	/// Ids come from a monotonically increasing counter and are never
	/// reused, even after the subscription is gone.
	pub fn next_id(&mut self) -> SubscriptionId {
		self.next_id += 1;
		SubscriptionId::new(self.next_id)
	}

	pub fn insert(&mut self, subscription: Subscription) {
		self.subscriptions.insert(subscription.id, subscription);
	}

	pub fn remove(&mut self, id: &SubscriptionId) -> Option<Subscription> {
		self.subscriptions.remove(id)
	}

	pub fn len(&self) -> usize {
		self.subscriptions.len()
	}

	pub fn is_empty(&self) -> bool {
		self.subscriptions.is_empty()
	}

	/// Removes every subscription. Dropping them cancels their routes.
	pub fn drain(&mut self) -> impl Iterator<Item = Subscription> + '_ {
		self.subscriptions.drain().map(|(_, subscription)| subscription)
	}
}
