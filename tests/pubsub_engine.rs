//! Integration tests for the publish/subscribe engine
//!
//! Every test runs the engine against an `InMemoryBroker` and observes both
//! the delivered payloads and the broker-side call counters.

use std::{sync::Arc, time::Duration};

use futures::{StreamExt, future::join_all};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use servicebus_pubsub::{
	BrokerClient, BrokerError, BrokerErrorCode, EVENT_NAME_KEY, EngineSettings,
	EngineStatus, ErrorClass, InMemoryBroker, PropertyValue, PubSub, PubSubConfig,
	PubSubConnection, PubSubEngine, PubSubError, PubSubOptions,
	SubscribeOptions,
	broker::{BrokerNotification, MessageReceiver},
	errors::SubscriptionError,
};
use tokio::{
	sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
	time::{Instant, timeout},
};

const TOPIC: &str = "events";
const SUBSCRIPTION: &str = "unit-tests";

fn options() -> PubSubOptions {
	PubSubOptions::new(
		"Endpoint=sb://tests.local/;SharedAccessKeyName=k;SharedAccessKey=s",
		TOPIC,
		SUBSCRIPTION,
	)
}

async fn setup_with(
	config: PubSubConfig,
) -> (InMemoryBroker, PubSub, PubSubConnection) {
	let broker = InMemoryBroker::new();
	let (pubsub, connection) = PubSub::connect(config, &broker)
		.await
		.expect("engine should connect");
	(broker, pubsub, connection)
}

async fn setup() -> (InMemoryBroker, PubSub, PubSubConnection) {
	setup_with(PubSubConfig::new(options())).await
}

fn collector() -> (
	impl Fn(Option<Value>) + Send + Sync + 'static,
	UnboundedReceiver<Option<Value>>,
) {
	let (tx, rx) = mpsc::unbounded_channel();
	(move |payload: Option<Value>| drop(tx.send(payload)), rx)
}

async fn next<T>(rx: &mut UnboundedReceiver<T>) -> T {
	timeout(Duration::from_secs(5), rx.recv())
		.await
		.expect("timed out waiting for delivery")
		.expect("channel closed")
}

async fn assert_silent<T: std::fmt::Debug>(rx: &mut UnboundedReceiver<T>) {
	if let Ok(received) = timeout(Duration::from_millis(100), rx.recv()).await
	{
		panic!("unexpected delivery: {received:?}");
	}
}

#[tokio::test]
async fn subscriber_receives_matching_event_once() {
	let (_broker, pubsub, connection) = setup().await;
	let (handler, mut rx) = collector();

	pubsub.subscribe("X", handler).await.unwrap();
	pubsub.publish("X", &json!({ "a": 1 })).await;

	assert_eq!(next(&mut rx).await, Some(json!({ "a": 1 })));
	assert_silent(&mut rx).await;
	connection.shutdown().await.unwrap();
}

#[tokio::test]
async fn subscriber_ignores_other_event_names() {
	let (_broker, pubsub, connection) = setup().await;
	let (handler, mut rx) = collector();

	pubsub.subscribe("Y", handler).await.unwrap();
	pubsub.publish("X", &json!({ "a": 1 })).await;

	assert_silent(&mut rx).await;
	connection.shutdown().await.unwrap();
}

#[tokio::test]
async fn wildcard_and_empty_filters_receive_everything() {
	let (_broker, pubsub, connection) = setup().await;
	let (star, mut star_rx) = collector();
	let (empty, mut empty_rx) = collector();

	pubsub.subscribe("*", star).await.unwrap();
	pubsub.subscribe("", empty).await.unwrap();
	pubsub.publish("A", &1).await;
	pubsub.publish("B", &2).await;

	for rx in [&mut star_rx, &mut empty_rx] {
		assert_eq!(next(rx).await, Some(json!(1)));
		assert_eq!(next(rx).await, Some(json!(2)));
	}
	connection.shutdown().await.unwrap();
}

#[tokio::test]
async fn subscribers_share_one_broker_subscription() {
	let (broker, pubsub, connection) = setup().await;
	let (first, mut first_rx) = collector();
	let (second, mut second_rx) = collector();

	pubsub.subscribe("X", first).await.unwrap();
	pubsub.subscribe("X", second).await.unwrap();
	pubsub.publish("X", &"hello").await;

	assert_eq!(next(&mut first_rx).await, Some(json!("hello")));
	assert_eq!(next(&mut second_rx).await, Some(json!("hello")));

	let stats = broker.stats();
	assert_eq!(stats.receivers_created, 1);
	assert_eq!(stats.subscriptions_opened, 1);
	assert_eq!(stats.senders_created, 1);
	connection.shutdown().await.unwrap();
}

#[tokio::test]
async fn concurrent_subscribes_open_a_single_broker_subscription() {
	let (broker, pubsub, connection) = setup().await;

	let subscribes = (0..16).map(|i| {
		let pubsub = pubsub.clone();
		async move {
			let name = format!("event-{}", i % 4);
			pubsub.subscribe(&name, |_| {}).await
		}
	});
	let ids: Vec<_> = join_all(subscribes)
		.await
		.into_iter()
		.collect::<Result<_, _>>()
		.unwrap();

	assert_eq!(ids.len(), 16);
	assert_eq!(broker.stats().subscriptions_opened, 1);
	assert_eq!(
		pubsub.status().await.unwrap(),
		EngineStatus {
			active_subscriptions: 16,
			broker_subscribed: true,
		}
	);
	connection.shutdown().await.unwrap();
}

#[tokio::test]
async fn broker_subscription_closes_on_last_unsubscribe_only() {
	let (broker, pubsub, connection) = setup().await;
	let a = pubsub.subscribe("X", |_| {}).await.unwrap();
	let b = pubsub.subscribe("Y", |_| {}).await.unwrap();

	assert!(pubsub.unsubscribe(a).await.unwrap());
	assert_eq!(broker.stats().subscriptions_closed, 0);
	assert!(broker.is_subscribed(TOPIC, SUBSCRIPTION));

	assert!(pubsub.unsubscribe(b).await.unwrap());
	assert_eq!(broker.stats().subscriptions_closed, 1);
	assert!(!broker.is_subscribed(TOPIC, SUBSCRIPTION));

	// A new first subscriber opens a fresh broker subscription
	pubsub.subscribe("X", |_| {}).await.unwrap();
	assert_eq!(broker.stats().subscriptions_opened, 2);
	connection.shutdown().await.unwrap();
}

#[tokio::test]
async fn repeated_unsubscribe_reports_not_found_without_side_effects() {
	let (broker, pubsub, connection) = setup().await;
	let a = pubsub.subscribe("X", |_| {}).await.unwrap();
	pubsub.subscribe("X", |_| {}).await.unwrap();

	assert!(pubsub.unsubscribe(a).await.unwrap());
	let before = pubsub.status().await.unwrap();
	assert!(!pubsub.unsubscribe(a).await.unwrap());

	assert_eq!(pubsub.status().await.unwrap(), before);
	assert_eq!(before.active_subscriptions, 1);
	assert_eq!(broker.stats().subscriptions_closed, 0);
	connection.shutdown().await.unwrap();
}

#[tokio::test]
async fn unsubscribed_handler_stops_receiving() {
	let (_broker, pubsub, connection) = setup().await;
	let (kept, mut kept_rx) = collector();
	let (removed, mut removed_rx) = collector();

	pubsub.subscribe("X", kept).await.unwrap();
	let id = pubsub.subscribe("X", removed).await.unwrap();
	pubsub.unsubscribe(id).await.unwrap();
	pubsub.publish("X", &true).await;

	assert_eq!(next(&mut kept_rx).await, Some(json!(true)));
	assert_silent(&mut removed_rx).await;
	connection.shutdown().await.unwrap();
}

#[tokio::test]
async fn published_message_carries_event_name_property() {
	let (broker, pubsub, connection) = setup().await;

	pubsub.publish("ConfigUpdate1", &json!({ "userId": "42" })).await;
	pubsub.publish("ConfigUpdate2", &json!(null)).await;

	let sent = broker.sent_messages(TOPIC);
	assert_eq!(sent.len(), 2);
	assert_eq!(
		sent[0].property(EVENT_NAME_KEY),
		Some(&PropertyValue::from("ConfigUpdate1"))
	);
	assert_eq!(sent[0].payload(), Some(&json!({ "userId": "42" })));
	assert_eq!(sent[1].name(), "ConfigUpdate2");
	assert_eq!(sent[1].payload(), None);
	assert_eq!(broker.stats().senders_created, 1);
	connection.shutdown().await.unwrap();
}

#[tokio::test]
async fn publish_swallows_send_failures() {
	let (broker, pubsub, connection) = setup().await;
	broker.fail_sends(Some(BrokerError::new(
		BrokerErrorCode::MessagingEntityNotFound,
		"topic deleted",
	)));

	pubsub.publish("X", &1).await;
	match pubsub.try_publish("X", &1).await {
		| Err(PubSubError::Broker(err)) => {
			assert_eq!(err.code, BrokerErrorCode::MessagingEntityNotFound)
		}
		| other => panic!("unexpected {other:?}"),
	}

	broker.fail_sends(None);
	pubsub.try_publish("X", &1).await.unwrap();
	assert_eq!(broker.sent_messages(TOPIC).len(), 1);
	connection.shutdown().await.unwrap();
}

#[tokio::test]
async fn failed_broker_subscribe_leaves_registry_empty() {
	let (broker, pubsub, connection) = setup().await;
	let competitor = broker.create_receiver(TOPIC, SUBSCRIPTION).unwrap();
	let (notifications, _keep) = mpsc::channel::<BrokerNotification>(1);
	let _held = competitor.subscribe(notifications).unwrap();

	match pubsub.subscribe("X", |_| {}).await {
		| Err(PubSubError::Subscription(
			SubscriptionError::SubscribeFailed(_),
		)) => {}
		| other => panic!("unexpected {other:?}"),
	}
	assert_eq!(
		pubsub.status().await.unwrap(),
		EngineStatus {
			active_subscriptions: 0,
			broker_subscribed: false,
		}
	);
	connection.shutdown().await.unwrap();
}

fn hook_channel() -> (PubSubConfig, UnboundedReceiver<(BrokerErrorCode, ErrorClass)>)
{
	let (tx, rx): (UnboundedSender<_>, _) = mpsc::unbounded_channel();
	let config = PubSubConfig::new(options()).with_error_hook(move |err, class| {
		let _ = tx.send((err.code.clone(), class));
	});
	(config, rx)
}

#[tokio::test]
async fn unauthorized_access_closes_broker_subscription() {
	let (config, mut errors) = hook_channel();
	let (broker, pubsub, connection) = setup_with(config).await;
	let (handler, mut rx) = collector();
	pubsub.subscribe("X", handler).await.unwrap();

	assert!(broker.inject_error(
		TOPIC,
		SUBSCRIPTION,
		BrokerErrorCode::UnauthorizedAccess
	));
	assert_eq!(
		next(&mut errors).await,
		(BrokerErrorCode::UnauthorizedAccess, ErrorClass::Fatal)
	);

	let status = pubsub.status().await.unwrap();
	assert!(!status.broker_subscribed);
	assert_eq!(status.active_subscriptions, 1);
	assert_eq!(broker.stats().subscriptions_closed, 1);

	// Nothing is delivered any more, but the message waits in the backlog
	pubsub.publish("X", &1).await;
	assert_silent(&mut rx).await;
	assert_eq!(broker.backlog_len(TOPIC, SUBSCRIPTION), 1);
	connection.shutdown().await.unwrap();
	assert_eq!(broker.stats().subscriptions_closed, 1);
}

#[tokio::test]
async fn other_fatal_errors_are_reported_without_closing() {
	let (config, mut errors) = hook_channel();
	let (broker, pubsub, connection) = setup_with(config).await;
	pubsub.subscribe("X", |_| {}).await.unwrap();

	broker.inject_error(
		TOPIC,
		SUBSCRIPTION,
		BrokerErrorCode::MessagingEntityDisabled,
	);
	assert_eq!(
		next(&mut errors).await,
		(BrokerErrorCode::MessagingEntityDisabled, ErrorClass::Fatal)
	);
	assert!(pubsub.status().await.unwrap().broker_subscribed);
	connection.shutdown().await.unwrap();
}

#[tokio::test]
async fn unknown_error_codes_are_not_reported() {
	let (config, mut errors) = hook_channel();
	let (broker, pubsub, connection) = setup_with(config).await;
	pubsub.subscribe("X", |_| {}).await.unwrap();

	broker.inject_error(TOPIC, SUBSCRIPTION, "QuotaExceeded");
	broker.inject_error(TOPIC, SUBSCRIPTION, BrokerErrorCode::MessageLockLost);

	// Errors are handled in order, so the first report is the lock loss
	assert_eq!(
		next(&mut errors).await,
		(BrokerErrorCode::MessageLockLost, ErrorClass::Recoverable)
	);
	assert!(pubsub.status().await.unwrap().broker_subscribed);
	connection.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn service_busy_is_reported_after_backoff() {
	let (config, mut errors) = hook_channel();
	let (broker, pubsub, connection) = setup_with(config).await;
	pubsub.subscribe("X", |_| {}).await.unwrap();

	let started = Instant::now();
	broker.inject_error(TOPIC, SUBSCRIPTION, BrokerErrorCode::ServiceBusy);
	assert_eq!(
		next(&mut errors).await,
		(BrokerErrorCode::ServiceBusy, ErrorClass::Transient)
	);
	assert!(started.elapsed() >= Duration::from_secs(1));
	assert!(pubsub.status().await.unwrap().broker_subscribed);
	connection.shutdown().await.unwrap();
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct ConfigUpdate {
	user_id: String,
	version: u32,
}

#[tokio::test]
async fn stream_yields_payloads_and_unsubscribes_on_drop() {
	let (broker, pubsub, connection) = setup().await;
	let mut stream = pubsub.stream("ConfigUpdate1").await.unwrap();

	pubsub.publish("ConfigUpdate2", &json!({ "ignored": true })).await;
	pubsub.publish("ConfigUpdate1", &json!({ "userId": "7" })).await;

	let payload = timeout(Duration::from_secs(5), stream.next())
		.await
		.unwrap()
		.unwrap();
	assert_eq!(payload, Some(json!({ "userId": "7" })));

	drop(stream);
	assert_eq!(
		pubsub.status().await.unwrap(),
		EngineStatus {
			active_subscriptions: 0,
			broker_subscribed: false,
		}
	);
	assert_eq!(broker.stats().subscriptions_closed, 1);
	connection.shutdown().await.unwrap();
}

#[tokio::test]
async fn stream_deserializes_typed_payloads() {
	let (_broker, pubsub, connection) = setup().await;
	let mut stream = pubsub.stream("ConfigUpdate1").await.unwrap();

	pubsub.publish("ConfigUpdate1", &json!({ "wrong": "shape" })).await;
	pubsub
		.publish("ConfigUpdate1", &ConfigUpdate {
			user_id: "1234".into(),
			version: 2,
		})
		.await;

	assert!(matches!(
		stream.next_as::<ConfigUpdate>().await,
		Some(Err(PubSubError::Serialization(_)))
	));
	assert_eq!(
		stream.next_as::<ConfigUpdate>().await.unwrap().unwrap(),
		ConfigUpdate {
			user_id: "1234".into(),
			version: 2,
		}
	);

	assert!(stream.cancel().await.unwrap());
	assert_eq!(pubsub.status().await.unwrap().active_subscriptions, 0);
	connection.shutdown().await.unwrap();
}

#[tokio::test]
async fn engine_is_usable_as_trait_object() {
	let (_broker, pubsub, connection) = setup().await;
	let engine: Arc<dyn PubSubEngine> = Arc::new(pubsub);
	let (handler, mut rx) = collector();

	let id = engine
		.subscribe(
			"X",
			Arc::new(handler),
			SubscribeOptions::new().with("userId", "1234"),
		)
		.await
		.unwrap();
	engine.publish("X", json!([1, 2, 3])).await;

	assert_eq!(next(&mut rx).await, Some(json!([1, 2, 3])));
	assert!(engine.unsubscribe(id).await.unwrap());
	assert!(!engine.unsubscribe(id).await.unwrap());
	connection.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_closes_broker_subscription_and_ends_streams() {
	let (broker, pubsub, connection) = setup().await;
	let mut stream = pubsub.stream("*").await.unwrap();
	pubsub.subscribe("X", |_| {}).await.unwrap();

	connection.shutdown().await.unwrap();

	assert_eq!(broker.stats().subscriptions_closed, 1);
	assert!(!broker.is_subscribed(TOPIC, SUBSCRIPTION));
	assert_eq!(
		timeout(Duration::from_secs(5), stream.recv()).await.unwrap(),
		None
	);
	assert!(matches!(
		pubsub.subscribe("X", |_| {}).await,
		Err(PubSubError::Subscription(SubscriptionError::ChannelClosed))
	));
}

#[tokio::test]
async fn zero_capacity_settings_are_rejected() {
	let broker = InMemoryBroker::new();
	let config =
		PubSubConfig::new(options()).with_settings(EngineSettings {
			event_bus_capacity: 0,
			..Default::default()
		});

	assert!(matches!(
		PubSub::connect(config, &broker).await,
		Err(PubSubError::ConfigurationValue(_))
	));
	assert_eq!(broker.stats().senders_created, 0);
}

fn assert_refcount_in_step(status: EngineStatus) {
	assert_eq!(
		status.broker_subscribed,
		status.active_subscriptions > 0,
		"broker subscription out of step with subscribers: {status:?}"
	);
}

#[tokio::test]
async fn stale_fatal_error_leaves_reopened_subscription_alone() {
	let (broker, pubsub, connection) = setup().await;
	let first = pubsub.subscribe("X", |_| {}).await.unwrap();

	// Both commands are queued before the old subscription's error is
	// handled, so its close request arrives after the reopen.
	let unsubscribe = tokio::spawn({
		let pubsub = pubsub.clone();
		async move { pubsub.unsubscribe(first).await }
	});
	let (handler, mut rx) = collector();
	let resubscribe = tokio::spawn({
		let pubsub = pubsub.clone();
		async move { pubsub.subscribe("X", handler).await }
	});
	assert!(broker.inject_error(
		TOPIC,
		SUBSCRIPTION,
		BrokerErrorCode::UnauthorizedAccess
	));
	assert!(unsubscribe.await.unwrap().unwrap());
	resubscribe.await.unwrap().unwrap();

	let status = pubsub.status().await.unwrap();
	assert_eq!(
		status,
		EngineStatus {
			active_subscriptions: 1,
			broker_subscribed: true,
		}
	);
	let stats = broker.stats();
	assert_eq!(stats.subscriptions_opened, 2);
	assert_eq!(stats.subscriptions_closed, 1);

	pubsub.publish("X", &"still delivered").await;
	assert_eq!(next(&mut rx).await, Some(json!("still delivered")));
	connection.shutdown().await.unwrap();
}

#[tokio::test]
async fn refcount_transitions_race_with_fatal_errors() {
	let (config, _errors) = hook_channel();
	let (broker, pubsub, connection) = setup_with(config).await;
	let mut live = vec![pubsub.subscribe("X", |_| {}).await.unwrap()];

	for round in 0..20 {
		let unsubscribes: Vec<_> = live
			.drain(..)
			.map(|id| {
				let pubsub = pubsub.clone();
				tokio::spawn(async move { pubsub.unsubscribe(id).await })
			})
			.collect();
		let subscribes: Vec<_> = (0..(round % 3) + 1)
			.map(|_| {
				let pubsub = pubsub.clone();
				tokio::spawn(async move { pubsub.subscribe("X", |_| {}).await })
			})
			.collect();
		broker.inject_error(
			TOPIC,
			SUBSCRIPTION,
			BrokerErrorCode::UnauthorizedAccess,
		);

		for removed in join_all(unsubscribes).await {
			assert!(removed.unwrap().unwrap());
		}
		for added in join_all(subscribes).await {
			live.push(added.unwrap().unwrap());
		}

		let status = pubsub.status().await.unwrap();
		assert_eq!(status.active_subscriptions, live.len());
		assert_refcount_in_step(status);
	}

	for id in live {
		assert!(pubsub.unsubscribe(id).await.unwrap());
	}
	assert_refcount_in_step(pubsub.status().await.unwrap());
	let stats = broker.stats();
	assert_eq!(stats.subscriptions_opened, stats.subscriptions_closed);
	connection.shutdown().await.unwrap();
}

#[tokio::test]
async fn burst_larger_than_notification_channel_is_fully_delivered() {
	let (broker, pubsub, connection) = setup().await;
	let (handler, mut rx) = collector();
	pubsub.subscribe("X", handler).await.unwrap();

	let burst = EngineSettings::default().notification_channel_capacity + 50;
	for i in 0..burst {
		pubsub.publish("X", &i).await;
	}

	for i in 0..burst {
		assert_eq!(next(&mut rx).await, Some(json!(i)));
	}
	assert_eq!(broker.backlog_len(TOPIC, SUBSCRIPTION), 0);
	connection.shutdown().await.unwrap();
}
