use tracing_subscriber::EnvFilter;

/// Installs the global subscriber, writing to stderr. `RUST_LOG` wins over `verbosity`.
pub fn init_logging(verbosity: u8) {
	// 0 = relay lifecycle at info, HTTP plumbing quiet
	// 1 (-v) = debug for everything but the HTTP/WebSocket libraries
	// 2+ (-vv) = trace for everything
	let filter = match verbosity {
		0 => "info,tower_http=warn,hyper=warn,reqwest=warn,tungstenite=warn",
		1 => "debug,hyper=info,hyper_util=info,reqwest=info,tungstenite=info,tokio_tungstenite=info",
		_ => "trace",
	};

	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(std::io::stderr)
		.with_target(true)
		.with_level(true)
		.compact()
		.init();
}
