//! # Config Updates
//!
//! Services publish configuration changes as named events; a client listens
//! for one event name and only cares about its own user id.
//!
//! - `ConfigUpdate1` events are consumed as a typed stream
//! - `ConfigUpdate2` events are observed with a callback
//! - Everything is logged through a wildcard subscription

mod shared;

use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use servicebus_pubsub::PubSub;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigChanged {
	update: String,
	user_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigUpdate {
	config_changed: ConfigChanged,
}

impl ConfigUpdate {
	fn new(update: &str, user_id: &str) -> Self {
		Self {
			config_changed: ConfigChanged {
				update: update.to_string(),
				user_id: user_id.to_string(),
			},
		}
	}
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	shared::tracing::setup(None);

	// === 1. CONNECTION ===
	let config = shared::config::pubsub_config("config-updates");
	let broker = shared::config::broker(&config);
	println!("Connecting to {:?}", config.options);
	let (pubsub, connection) = PubSub::connect(config, &broker).await?;

	// === 2. SUBSCRIPTIONS ===
	let mut updates = pubsub.stream("ConfigUpdate1").await?;
	let mut audit = pubsub.stream("*").await?;
	let callback = pubsub
		.subscribe("ConfigUpdate2", |payload| {
			println!("ConfigUpdate2 callback: {payload:?}");
		})
		.await?;
	println!("Engine status: {:?}", pubsub.status().await?);

	// === 3. PUBLISHING ===
	pubsub
		.publish("ConfigUpdate1", &ConfigUpdate::new("Hello I'm a message", "1234"))
		.await;
	pubsub
		.publish("ConfigUpdate2", &ConfigUpdate::new("Hello I'm a message2", "1235"))
		.await;
	pubsub
		.publish("ConfigUpdate1", &ConfigUpdate::new("Hello I'm a message3", "1236"))
		.await;

	// === 4. RECEIVING ===
	// Only user 1234 is interesting, the other ConfigUpdate1 is skipped
	let wanted_user = "1234";
	for _ in 0..2 {
		match updates.next_as::<ConfigUpdate>().await {
			| Some(Ok(update))
				if update.config_changed.user_id == wanted_user =>
			{
				println!("Config changed for {wanted_user}: {update:?}");
			}
			| Some(Ok(update)) => {
				println!("Skipping update for {}", update.config_changed.user_id)
			}
			| Some(Err(e)) => eprintln!("Bad payload: {e}"),
			| None => break,
		}
	}

	for _ in 0..3 {
		match tokio::time::timeout(Duration::from_secs(1), audit.next()).await {
			| Ok(Some(payload)) => println!("Audit: {payload:?}"),
			| _ => break,
		}
	}

	// === 5. CLEANUP ===
	pubsub.unsubscribe(callback).await?;
	updates.cancel().await?;
	drop(audit);
	println!("Engine status: {:?}", pubsub.status().await?);

	connection.shutdown().await?;
	println!("Broker stats: {:?}", broker.stats());
	Ok(())
}
