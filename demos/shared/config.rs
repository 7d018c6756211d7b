use servicebus_pubsub::{InMemoryBroker, PubSubConfig, PubSubOptions};

const DEFAULT_CONNECTION_STRING: &str =
	"Endpoint=sb://localhost/;SharedAccessKeyName=demo;SharedAccessKey=demo";
const DEFAULT_TOPIC: &str = "events";

/// Load .env files
///
/// `demos/.env.local` (ignored by git) overrides `demos/.env`, which
/// overrides nothing already set in the environment.
pub fn load_env_files() {
	if std::path::Path::new("demos/.env.local").exists() {
		dotenv::from_filename("demos/.env.local").ok();
	}
	dotenv::from_filename("demos/.env").ok();
}

/// Engine config from `SERVICEBUS_*` variables, or local defaults when they
/// are not set.
pub fn pubsub_config(subscription_name: &str) -> PubSubConfig {
	load_env_files();
	PubSubConfig::from_env().unwrap_or_else(|err| {
		println!("{err}, using local defaults");
		PubSubConfig::new(PubSubOptions::new(
			DEFAULT_CONNECTION_STRING,
			DEFAULT_TOPIC,
			subscription_name,
		))
	})
}

/// In-process broker for the namespace named in `config`.
pub fn broker(config: &PubSubConfig) -> InMemoryBroker {
	InMemoryBroker::connect(&config.options.connection_string)
		.unwrap_or_else(|err| {
			println!("{err}, using an anonymous in-memory namespace");
			InMemoryBroker::new()
		})
}
