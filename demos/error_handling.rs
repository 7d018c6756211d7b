//! # Error Handling
//!
//! Shows how broker errors surface:
//! - `publish` logs failures, `try_publish` returns them
//! - the error hook sees every classified broker error
//! - unauthorized access closes the shared broker subscription

mod shared;

use std::time::Duration;

use servicebus_pubsub::{
	BrokerError, BrokerErrorCode, EngineSettings, ErrorClass, PubSub,
};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	shared::tracing::setup(Some("servicebus_pubsub=info"));

	let (errors_tx, mut errors_rx) = mpsc::unbounded_channel();
	let config = shared::config::pubsub_config("error-handling")
		.with_settings(EngineSettings {
			transient_backoff: Duration::from_millis(200),
			..EngineSettings::default()
		})
		.with_error_hook(move |err: &BrokerError, class: ErrorClass| {
			let _ = errors_tx.send(format!("{class} error {}", err.code));
		});
	let topic = config.options.topic_name.clone();
	let subscription = config.options.subscription_name.clone();
	let broker = shared::config::broker(&config);
	let (pubsub, connection) = PubSub::connect(config, &broker).await?;

	// === 1. PUBLISH FAILURES ===
	broker.fail_sends(Some(BrokerError::new(
		BrokerErrorCode::ServiceBusy,
		"namespace throttled",
	)));
	pubsub.publish("Ping", &"dropped").await;
	if let Err(e) = pubsub.try_publish("Ping", &"rejected").await {
		println!("try_publish failed: {e}");
	}
	broker.fail_sends(None);

	// === 2. RECEIVER ERRORS ===
	pubsub
		.subscribe("Ping", |payload| println!("Ping: {payload:?}"))
		.await?;

	for code in [
		BrokerErrorCode::from_code("SomethingNew"),
		BrokerErrorCode::MessageLockLost,
		BrokerErrorCode::ServiceBusy,
		BrokerErrorCode::UnauthorizedAccess,
	] {
		println!("Injecting {code}");
		broker.inject_error(&topic, &subscription, code);
	}

	// The unknown code is only logged, the other three reach the hook
	for _ in 0..3 {
		match tokio::time::timeout(Duration::from_secs(2), errors_rx.recv())
			.await
		{
			| Ok(Some(report)) => println!("Hook: {report}"),
			| _ => break,
		}
	}

	// Subscribers are still registered, but nothing is delivered any more
	println!("Engine status: {:?}", pubsub.status().await?);
	pubsub.publish("Ping", &"after close").await;
	println!(
		"Backlog waiting on the broker: {}",
		broker.backlog_len(&topic, &subscription)
	);

	connection.shutdown().await?;
	Ok(())
}
