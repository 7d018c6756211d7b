use std::fmt::{self, Display};

use arcstr::ArcStr;

use crate::event::Event;

/// Wildcard event name matching every event.
pub const WILDCARD: &str = "*";

/// Event-name filter of a single subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventFilter {
	/// Matches every event (`""` or `"*"`)
	All,
	/// Matches events with exactly this name
	Name(ArcStr),
}

impl EventFilter {
	/// Builds the filter for a subscription to `event_name`.
	pub fn new(event_name: &str) -> Self {
		if event_name.is_empty() || event_name == WILDCARD {
			EventFilter::All
		} else {
			EventFilter::Name(ArcStr::from(event_name))
		}
	}

	/// Whether an event with this name passes the filter.
	pub fn matches_name(&self, name: &str) -> bool {
		match self {
			| EventFilter::All => true,
			| EventFilter::Name(expected) => expected.as_str() == name,
		}
	}

	/// Whether `event` passes the filter.
	pub fn matches(&self, event: &Event) -> bool {
		self.matches_name(event.name())
	}
}

impl From<&str> for EventFilter {
	fn from(event_name: &str) -> Self {
		EventFilter::new(event_name)
	}
}

impl Display for EventFilter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			| EventFilter::All => f.write_str(WILDCARD),
			| EventFilter::Name(name) => f.write_str(name),
		}
	}
}
