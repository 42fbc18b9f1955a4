use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Installs the global subscriber. Output always goes to stderr; stdout
/// carries protocol traffic only.
pub fn init_logging(verbosity: u8) {
	// 0 = warnings only (failed closes, dropped notifications)
	// 1 (-v) = lifecycle events from the tree and transport
	// 2+ (-vv) = every dispatched request
	let filter = match verbosity {
		0 => "warn",
		1 => "info",
		_ => "debug",
	};

	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

	let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(stderr)
		.with_target(true)
		.with_level(true)
		.compact()
		.init();
}
