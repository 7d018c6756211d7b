//! Routing metadata injection for outgoing events.

use crate::event::{ApplicationProperties, Event, PropertyValue};

/// Application property that carries the event name on every published
/// message.
pub const EVENT_NAME_KEY: &str = "sub.eventName";

/// Returns a copy of `message` with `attributes` merged into its
/// application properties.
///
/// Keys already present on the message are left untouched, so enriching a
/// message twice (or a message the caller pre-filled) is a no-op for those
/// keys.
pub fn enrich_message<'a, I>(attributes: I, message: &Event) -> Event
where I: IntoIterator<Item = (&'a str, PropertyValue)> {
	let mut enriched = message.clone();
	let properties = enriched
		.application_properties
		.get_or_insert_with(ApplicationProperties::new);

	for (key, value) in attributes {
		if !properties.contains_key(key) {
			properties.insert(key.to_string(), value);
		}
	}
	enriched
}

/// Attributes the engine injects on publish.
pub(crate) fn routing_attributes(
	event_name: &str,
) -> [(&'static str, PropertyValue); 1] {
	[(EVENT_NAME_KEY, PropertyValue::from(event_name))]
}
