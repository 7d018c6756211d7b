//! Log output for the demos.

use tracing_subscriber::{EnvFilter, fmt};

/// Installs a compact stderr logger.
///
/// `RUST_LOG` wins over `default_directive`; with neither set the demo
/// runs silently and only prints its own output.
pub fn setup(default_directive: Option<&str>) {
	super::config::load_env_files();

	let filter = match (EnvFilter::try_from_default_env(), default_directive) {
		| (Ok(filter), _) => filter,
		| (Err(_), Some(directive)) => EnvFilter::new(directive),
		| (Err(_), None) => return,
	};

	fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.with_target(true)
		.compact()
		.init();
}
