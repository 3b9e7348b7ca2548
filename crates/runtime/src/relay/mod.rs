//! Bidirectional relay between inspector clients and page sockets.
//!
//! # Session lifecycle
//!
//! 1. [`Relay::open_session`] registers the session (`Opening`), re-resolves
//!    the target through discovery and opens the upstream page socket.
//! 2. [`PendingSession::run`] marks it `Active` and pumps both directions
//!    concurrently, alongside an idle watchdog and the shutdown signal.
//! 3. The first of those to finish wins: the session goes `Closing`, both
//!    sides get a close frame within the teardown window, and dropping the
//!    [`SessionGuard`] takes it out of the live set.
//!
//! Text and binary messages are forwarded one-for-one and in order. Ping and
//! pong stay on their own hop; they only count as activity.

#[cfg(test)]
mod tests;

use std::fmt;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use srd_protocol::{DeviceEntry, DeviceTarget, SessionInfo, SessionState, TargetId};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite};
use tracing::{debug, info, warn};

pub use tokio_tungstenite::tungstenite::Message;
pub use tokio_tungstenite::tungstenite::protocol::CloseFrame;

use crate::discovery::Discovery;
use crate::error::{Error, Result};
use crate::session::{Activity, SessionGuard, SessionId, SessionRegistry};

/// Upstream page socket.
pub type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOptions {
	/// A session with no traffic in either direction for this long is closed.
	pub idle_timeout: Duration,
	/// Upper bound for sending close frames to both sides at teardown.
	pub teardown_timeout: Duration,
}

impl Default for RelayOptions {
	fn default() -> Self {
		Self {
			idle_timeout: Duration::from_secs(300),
			teardown_timeout: Duration::from_secs(2),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
	Client,
	Upstream,
}

impl Side {
	fn closed(self, frame: Option<CloseFrame<'static>>) -> SessionEnd {
		match self {
			Side::Client => SessionEnd::ClientClosed(frame),
			Side::Upstream => SessionEnd::UpstreamClosed(frame),
		}
	}

	fn other(self) -> Side {
		match self {
			Side::Client => Side::Upstream,
			Side::Upstream => Side::Client,
		}
	}
}

impl fmt::Display for Side {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Side::Client => "client",
			Side::Upstream => "upstream",
		})
	}
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEnd {
	ClientClosed(Option<CloseFrame<'static>>),
	UpstreamClosed(Option<CloseFrame<'static>>),
	IdleTimeout,
	Shutdown,
	/// Read or write failure on one side.
	Failed { side: Side, reason: String },
}

impl SessionEnd {
	/// Message to send to `to` during teardown. `None` means the side is
	/// already closing or broken and only needs flushing.
	fn close_message(&self, to: Side) -> Option<Message> {
		match self {
			SessionEnd::ClientClosed(frame) if to == Side::Upstream => Some(Message::Close(frame.clone())),
			SessionEnd::UpstreamClosed(frame) if to == Side::Client => Some(Message::Close(frame.clone())),
			SessionEnd::ClientClosed(_) | SessionEnd::UpstreamClosed(_) => None,
			SessionEnd::IdleTimeout => Some(close_with(CloseCode::Away, "idle timeout")),
			SessionEnd::Shutdown => Some(close_with(CloseCode::Away, "server shutting down")),
			SessionEnd::Failed { side, .. } if *side == to => None,
			SessionEnd::Failed { side, .. } => Some(close_with(CloseCode::Error, &format!("{side} connection lost"))),
		}
	}
}

impl fmt::Display for SessionEnd {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SessionEnd::ClientClosed(_) => f.write_str("client closed"),
			SessionEnd::UpstreamClosed(_) => f.write_str("upstream closed"),
			SessionEnd::IdleTimeout => f.write_str("idle timeout"),
			SessionEnd::Shutdown => f.write_str("server shutdown"),
			SessionEnd::Failed { side, reason } => write!(f, "{side} failed: {reason}"),
		}
	}
}

fn close_with(code: CloseCode, reason: &str) -> Message {
	Message::Close(Some(CloseFrame {
		code,
		reason: reason.to_owned().into(),
	}))
}

/// Entry point for discovery and sessions. Cheap to clone.
#[derive(Clone)]
pub struct Relay {
	discovery: Discovery,
	registry: SessionRegistry,
	options: RelayOptions,
	shutdown: watch::Receiver<bool>,
}

impl Relay {
	/// `shutdown` flipping to `true` ends every running session.
	pub fn new(discovery: Discovery, options: RelayOptions, shutdown: watch::Receiver<bool>) -> Self {
		Self {
			discovery,
			registry: SessionRegistry::new(),
			options,
			shutdown,
		}
	}

	pub fn discovery(&self) -> &Discovery {
		&self.discovery
	}

	pub fn registry(&self) -> &SessionRegistry {
		&self.registry
	}

	pub fn options(&self) -> RelayOptions {
		self.options
	}

	pub async fn list_targets(&self) -> Result<Vec<DeviceTarget>> {
		self.discovery.list_targets().await
	}

	pub async fn list_devices(&self) -> Result<Vec<DeviceEntry>> {
		self.discovery.list_devices().await
	}

	pub fn sessions(&self) -> Vec<SessionInfo> {
		self.registry.snapshot()
	}

	/// Resolves `target` and connects to its page socket, all within the
	/// discovery timeout.
	///
	/// The session is live (as `Opening`) from here on; dropping the returned
	/// [`PendingSession`] without running it removes it again.
	pub async fn open_session(&self, target: &TargetId, client: impl Into<String>) -> Result<PendingSession> {
		let timeout = self.discovery.timeout();
		let deadline = tokio::time::Instant::now() + timeout;
		let guard = self.registry.register(target.clone(), client);
		let found = self.discovery.resolve(target).await?;

		// Discovery and handshake share one timeout.
		let upstream = match tokio::time::timeout_at(deadline, connect_async(found.upstream.as_str())).await {
			Ok(Ok((socket, _))) => socket,
			Ok(Err(tungstenite::Error::Http(response))) if response.status().as_u16() == 404 => {
				return Err(Error::TargetNotFound(target.clone()));
			}
			Ok(Err(err)) => return Err(Error::unavailable(&found.upstream, err)),
			Err(_) => {
				return Err(Error::unavailable(&found.upstream, format!("no handshake within {}ms", timeout.as_millis())));
			}
		};

		info!(target = "srd.relay", session = %guard.id(), %target, upstream = %found.upstream, "session opened");
		Ok(PendingSession {
			guard,
			target: target.clone(),
			upstream,
			options: self.options,
			shutdown: self.shutdown.clone(),
		})
	}
}

/// A session whose upstream side is connected, waiting for its client.
pub struct PendingSession {
	guard: SessionGuard,
	target: TargetId,
	upstream: UpstreamSocket,
	options: RelayOptions,
	shutdown: watch::Receiver<bool>,
}

impl PendingSession {
	pub fn id(&self) -> SessionId {
		self.guard.id()
	}

	pub fn target(&self) -> &TargetId {
		&self.target
	}

	/// Relays between `client` and the upstream page until either side ends.
	///
	/// Both sides are closed and the session is gone from the live set by the
	/// time this returns.
	pub async fn run<C, E>(self, client: C) -> SessionEnd
	where
		C: Stream<Item = std::result::Result<Message, E>> + Sink<Message> + Unpin,
		E: fmt::Display,
		<C as Sink<Message>>::Error: fmt::Display,
	{
		let PendingSession {
			guard,
			target,
			upstream,
			options,
			mut shutdown,
		} = self;
		let session = guard.id();
		guard.set_state(SessionState::Active);
		let activity = guard.activity().clone();
		activity.touch();

		let (mut client_tx, mut client_rx) = client.split();
		let (mut upstream_tx, mut upstream_rx) = upstream.split();

		let end = tokio::select! {
			end = forward(&mut client_rx, &mut upstream_tx, &activity, Side::Client) => end,
			end = forward(&mut upstream_rx, &mut client_tx, &activity, Side::Upstream) => end,
			() = idle_expired(&activity, options.idle_timeout) => SessionEnd::IdleTimeout,
			() = shutdown_requested(&mut shutdown) => SessionEnd::Shutdown,
		};
		guard.set_state(SessionState::Closing);

		match &end {
			SessionEnd::Failed { .. } => warn!(target = "srd.relay", %session, %target, %end, "session failed"),
			_ => info!(target = "srd.relay", %session, %target, %end, "session ending"),
		}

		let teardown = async {
			tokio::join!(
				close_side(&mut client_tx, end.close_message(Side::Client), Side::Client),
				close_side(&mut upstream_tx, end.close_message(Side::Upstream), Side::Upstream),
			)
		};
		if tokio::time::timeout(options.teardown_timeout, teardown).await.is_err() {
			debug!(target = "srd.relay", %session, "teardown window elapsed, dropping connections");
		}

		drop((client_tx, client_rx, upstream_tx, upstream_rx));
		drop(guard);
		end
	}
}

/// Pumps `from` into `to` until `from` closes or either side errors.
async fn forward<R, RE, W>(from: &mut R, to: &mut W, activity: &Activity, source: Side) -> SessionEnd
where
	R: Stream<Item = std::result::Result<Message, RE>> + Unpin,
	RE: fmt::Display,
	W: Sink<Message> + Unpin,
	<W as Sink<Message>>::Error: fmt::Display,
{
	while let Some(next) = from.next().await {
		let message = match next {
			Ok(message) => message,
			Err(err) => {
				return SessionEnd::Failed {
					side: source,
					reason: err.to_string(),
				};
			}
		};
		activity.touch();

		match message {
			Message::Text(_) | Message::Binary(_) => {
				if let Err(err) = to.send(message).await {
					return SessionEnd::Failed {
						side: source.other(),
						reason: err.to_string(),
					};
				}
			}
			Message::Close(frame) => return source.closed(frame),
			Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
		}
	}
	source.closed(None)
}

async fn idle_expired(activity: &Activity, window: Duration) {
	loop {
		let idle = activity.idle_for();
		if idle >= window {
			return;
		}
		tokio::time::sleep(window - idle).await;
	}
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
	let signalled = shutdown.wait_for(|stop| *stop).await.is_ok();
	if !signalled {
		// Sender gone without signalling: nothing will ever ask us to stop.
		std::future::pending::<()>().await;
	}
}

async fn close_side<W>(sink: &mut W, message: Option<Message>, side: Side)
where
	W: Sink<Message> + Unpin,
	<W as Sink<Message>>::Error: fmt::Display,
{
	if let Some(message) = message {
		if let Err(err) = sink.send(message).await {
			debug!(target = "srd.relay", %side, error = %err, "close frame not delivered");
		}
	}
	if let Err(err) = sink.close().await {
		debug!(target = "srd.relay", %side, error = %err, "close failed");
	}
}
