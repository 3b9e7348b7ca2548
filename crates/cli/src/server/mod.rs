//! HTTP surface of `serve`.
//!
//! One listener carries three things:
//!
//! - `/json`, `/json/list`, `/json/devices`, `/json/sessions`: discovery and
//!   session listings as JSON.
//! - `/devtools/page/{target}`: WebSocket endpoint relayed to the target's
//!   page socket on `ios_webkit_debug_proxy`.
//! - everything else: the inspector frontend, served from the input directory.

mod bridge;
mod handlers;

use std::future::{Future, IntoFuture};
use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use srd_runtime::{Discovery, Relay};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::Instant;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::ServeConfig;
use crate::error::{Result, ServeError};

#[derive(Clone)]
pub struct AppState {
	pub relay: Relay,
}

/// Builds the router for `frontend` (the inspector build directory).
pub fn router(state: AppState, frontend: &Path) -> Router {
	let assets = ServeDir::new(frontend).append_index_html_on_directories(true);

	Router::new()
		.route("/json", get(handlers::list_targets))
		.route("/json/list", get(handlers::list_targets))
		.route("/json/devices", get(handlers::list_devices))
		.route("/json/sessions", get(handlers::list_sessions))
		.route("/devtools/page/{target}", get(handlers::devtools_socket))
		.fallback_service(assets)
		.layer(TraceLayer::new_for_http())
		.with_state(state)
}

/// A bound but not yet running server.
pub struct Server {
	listener: TcpListener,
	router: Router,
	relay: Relay,
	shutdown: watch::Sender<bool>,
	grace: Duration,
}

impl Server {
	pub async fn bind(config: ServeConfig) -> Result<Self> {
		let (shutdown, shutdown_rx) = watch::channel(false);
		let discovery = Discovery::new(config.upstream.clone(), config.discovery_timeout)?;
		let relay = Relay::new(discovery, config.relay, shutdown_rx);
		let router = router(AppState { relay: relay.clone() }, &config.input);

		let listener = TcpListener::bind(&config.listen).await.map_err(|source| ServeError::Bind {
			addr: config.listen.clone(),
			source,
		})?;

		info!(
			target = "srd.server",
			addr = %listener.local_addr()?,
			input = %config.input.display(),
			proxy = %config.upstream,
			"serving inspector"
		);

		Ok(Self {
			listener,
			router,
			relay,
			shutdown,
			grace: config.shutdown_grace,
		})
	}

	pub fn local_addr(&self) -> io::Result<SocketAddr> {
		self.listener.local_addr()
	}

	pub fn relay(&self) -> &Relay {
		&self.relay
	}

	/// Serves until `signal` resolves, then ends every session. Open
	/// connections and sessions get the shutdown grace to finish; whatever is
	/// left after that is dropped.
	pub async fn run(self, signal: impl Future<Output = ()> + Send) -> Result<()> {
		let Self {
			listener,
			router,
			relay,
			shutdown,
			grace,
		} = self;

		let serve = axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
			.with_graceful_shutdown(stopped(shutdown.subscribe()))
			.into_future();
		tokio::pin!(serve);

		tokio::select! {
			result = &mut serve => return result.map_err(ServeError::from),
			() = signal => {}
		}

		let registry = relay.registry();
		info!(target = "srd.server", sessions = registry.len(), "shutting down");
		shutdown.send_replace(true);
		let deadline = Instant::now() + grace;

		match tokio::time::timeout_at(deadline, &mut serve).await {
			Ok(result) => result?,
			Err(_) => warn!(
				target = "srd.server",
				grace_ms = grace.as_millis() as u64,
				"connections still open after shutdown grace, dropping them"
			),
		}

		if !registry.wait_until_empty(deadline.saturating_duration_since(Instant::now())).await {
			warn!(
				target = "srd.server",
				remaining = registry.len(),
				grace_ms = grace.as_millis() as u64,
				"sessions still open after shutdown grace, dropping them"
			);
		}
		info!(target = "srd.server", "stopped");
		Ok(())
	}
}

async fn stopped(mut shutdown: watch::Receiver<bool>) {
	let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
pub async fn shutdown_signal() {
	let ctrl_c = async {
		if let Err(err) = tokio::signal::ctrl_c().await {
			warn!(target = "srd.server", error = %err, "cannot listen for Ctrl-C");
			std::future::pending::<()>().await;
		}
	};

	#[cfg(unix)]
	let terminate = async {
		match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
			Ok(mut sigterm) => {
				sigterm.recv().await;
			}
			Err(err) => {
				warn!(target = "srd.server", error = %err, "cannot listen for SIGTERM");
				std::future::pending::<()>().await;
			}
		}
	};

	#[cfg(not(unix))]
	let terminate = std::future::pending::<()>();

	tokio::select! {
		() = ctrl_c => {}
		() = terminate => {}
	}
}
