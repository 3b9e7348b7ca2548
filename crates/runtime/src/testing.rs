//! In-process stand-in for `ios_webkit_debug_proxy`.
//!
//! [`FakeProxy`] serves the device listing on its own port and one
//! [`FakeDevice`] server per device, each with a page listing and a WebSocket
//! endpoint per page. Page sockets echo every text and binary message back
//! unchanged, can receive server-initiated pushes, and are counted so tests
//! can assert that no upstream connection outlives its session.
//!
//! Test support only: panics on setup failures instead of returning errors.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use parking_lot::Mutex;
use srd_protocol::{DeviceEntry, PageEntry, TargetId};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Fake proxy: device listing on [`addr`](Self::addr).
pub struct FakeProxy {
	addr: SocketAddr,
	state: Arc<ProxyState>,
}

#[derive(Default)]
struct ProxyState {
	listing: Mutex<Vec<DeviceEntry>>,
	devices: Mutex<Vec<FakeDevice>>,
	task: Mutex<Option<JoinHandle<()>>>,
}

impl FakeProxy {
	/// Starts on an ephemeral loopback port.
	pub async fn start() -> Self {
		Self::start_at(SocketAddr::from(([127, 0, 0, 1], 0))).await
	}

	/// Starts on `addr`, e.g. to come back on the port of a stopped proxy.
	pub async fn start_at(addr: SocketAddr) -> Self {
		let listener = TcpListener::bind(addr).await.expect("bind fake proxy");
		let addr = listener.local_addr().expect("fake proxy address");
		let state = Arc::new(ProxyState::default());

		let app = Router::new().route("/json", get(device_listing)).with_state(state.clone());
		let task = tokio::spawn(async move {
			let _ = axum::serve(listener, app).await;
		});
		*state.task.lock() = Some(task);

		Self { addr, state }
	}

	pub fn addr(&self) -> SocketAddr {
		self.addr
	}

	/// `host:port` as passed to `--proxy-host`.
	pub fn host_port(&self) -> String {
		self.addr.to_string()
	}

	/// Adds a device with its own listing server.
	pub async fn add_device(&self, device_id: &str, device_name: &str) -> FakeDevice {
		let device = FakeDevice::start().await;
		self.state.listing.lock().push(DeviceEntry {
			device_id: device_id.to_string(),
			device_name: device_name.to_string(),
			device_os_version: Some("17.4".to_string()),
			url: format!("localhost:{}", device.port()),
		});
		*device.inner.device_id.lock() = device_id.to_string();
		self.state.devices.lock().push(device.clone());
		device
	}

	/// Lists a device whose port has nothing listening.
	pub fn add_dead_device(&self, device_id: &str, port: u16) {
		self.state.listing.lock().push(DeviceEntry {
			device_id: device_id.to_string(),
			device_name: "Unplugged".to_string(),
			device_os_version: None,
			url: format!("localhost:{port}"),
		});
	}

	/// Removes a device from the listing and shuts its server down.
	pub fn unplug(&self, device: &FakeDevice) {
		let device_id = device.inner.device_id.lock().clone();
		self.state.listing.lock().retain(|entry| entry.device_id != device_id);
		self.state.devices.lock().retain(|d| d.port() != device.port());
		device.shutdown();
	}

	/// Simulates the proxy crashing: listing and device servers go away and
	/// every page connection is dropped without a close frame.
	pub fn stop(&self) {
		if let Some(task) = self.state.task.lock().take() {
			task.abort();
		}
		for device in self.state.devices.lock().drain(..) {
			device.shutdown();
		}
	}
}

impl Drop for FakeProxy {
	fn drop(&mut self) {
		self.stop();
	}
}

async fn device_listing(State(state): State<Arc<ProxyState>>) -> Json<Vec<DeviceEntry>> {
	Json(state.listing.lock().clone())
}

/// One fake device: page listing plus page sockets.
#[derive(Clone)]
pub struct FakeDevice {
	inner: Arc<DeviceInner>,
}

struct DeviceInner {
	port: u16,
	device_id: Mutex<String>,
	pages: Mutex<Vec<FakePage>>,
	next_page: AtomicU64,
	connections: AtomicUsize,
	kill: watch::Sender<u64>,
	push: broadcast::Sender<(String, Message)>,
	task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
struct FakePage {
	id: String,
	title: String,
	url: String,
	attachable: bool,
}

impl FakeDevice {
	async fn start() -> Self {
		let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake device");
		let port = listener.local_addr().expect("fake device address").port();
		let inner = Arc::new(DeviceInner {
			port,
			device_id: Mutex::new(String::new()),
			pages: Mutex::new(Vec::new()),
			next_page: AtomicU64::new(1),
			connections: AtomicUsize::new(0),
			kill: watch::channel(0).0,
			push: broadcast::channel(64).0,
			task: Mutex::new(None),
		});

		let app = Router::new()
			.route("/json", get(page_listing))
			.route("/devtools/page/{page}", get(page_socket))
			.with_state(inner.clone());
		let task = tokio::spawn(async move {
			let _ = axum::serve(listener, app).await;
		});
		*inner.task.lock() = Some(task);

		Self { inner }
	}

	pub fn port(&self) -> u16 {
		self.inner.port
	}

	/// Adds a page and returns its page id (`"1"`, `"2"`, …).
	pub fn add_page(&self, title: &str, url: &str) -> String {
		let id = self.inner.next_page.fetch_add(1, Ordering::SeqCst).to_string();
		self.inner.pages.lock().push(FakePage {
			id: id.clone(),
			title: title.to_string(),
			url: url.to_string(),
			attachable: true,
		});
		id
	}

	pub fn remove_page(&self, page_id: &str) {
		self.inner.pages.lock().retain(|page| page.id != page_id);
	}

	/// A page that is not attachable is listed without a debugger url.
	pub fn set_attachable(&self, page_id: &str, attachable: bool) {
		if let Some(page) = self.inner.pages.lock().iter_mut().find(|page| page.id == page_id) {
			page.attachable = attachable;
		}
	}

	pub fn target_id(&self, page_id: &str) -> TargetId {
		TargetId::new(self.inner.device_id.lock().clone(), page_id)
	}

	/// Sends `message` to every open socket of `page_id`.
	pub fn push(&self, page_id: &str, message: Message) {
		let _ = self.inner.push.send((page_id.to_string(), message));
	}

	/// Page sockets currently open on this device.
	pub fn open_connections(&self) -> usize {
		self.inner.connections.load(Ordering::SeqCst)
	}

	/// Polls until [`open_connections`](Self::open_connections) equals `expected`.
	pub async fn wait_for_connections(&self, expected: usize, within: Duration) -> bool {
		let deadline = tokio::time::Instant::now() + within;
		loop {
			if self.open_connections() == expected {
				return true;
			}
			if tokio::time::Instant::now() >= deadline {
				return false;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
	}

	/// Drops every page socket without a close frame, as on a device unplug.
	pub fn drop_connections(&self) {
		self.inner.kill.send_modify(|generation| *generation += 1);
	}

	fn shutdown(&self) {
		if let Some(task) = self.inner.task.lock().take() {
			task.abort();
		}
		self.drop_connections();
	}
}

async fn page_listing(State(device): State<Arc<DeviceInner>>) -> Json<Vec<PageEntry>> {
	let pages = device.pages.lock().clone();
	let entries = pages
		.into_iter()
		.map(|page| PageEntry {
			web_socket_debugger_url: page
				.attachable
				.then(|| format!("ws://localhost:{}/devtools/page/{}", device.port, page.id)),
			devtools_frontend_url: Some(format!("/devtools/inspector.html?ws=localhost:{}/devtools/page/{}", device.port, page.id)),
			title: page.title,
			url: page.url,
			app_id: Some("PID:4242".to_string()),
			favicon_url: None,
			thumbnail_url: None,
		})
		.collect();
	Json(entries)
}

async fn page_socket(State(device): State<Arc<DeviceInner>>, Path(page): Path<String>, ws: WebSocketUpgrade) -> Response {
	let known = device.pages.lock().iter().any(|p| p.id == page && p.attachable);
	if !known {
		return StatusCode::NOT_FOUND.into_response();
	}
	ws.on_upgrade(move |socket| serve_page(device, page, socket))
}

struct Live<'a>(&'a AtomicUsize);

impl<'a> Live<'a> {
	fn enter(counter: &'a AtomicUsize) -> Self {
		counter.fetch_add(1, Ordering::SeqCst);
		Self(counter)
	}
}

impl Drop for Live<'_> {
	fn drop(&mut self) {
		self.0.fetch_sub(1, Ordering::SeqCst);
	}
}

async fn serve_page(device: Arc<DeviceInner>, page: String, mut socket: WebSocket) {
	let _live = Live::enter(&device.connections);
	let mut kill = device.kill.subscribe();
	let mut pushes = device.push.subscribe();

	loop {
		tokio::select! {
			incoming = socket.recv() => match incoming {
				Some(Ok(message @ (Message::Text(_) | Message::Binary(_)))) => {
					if socket.send(message).await.is_err() {
						break;
					}
				}
				Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
				Some(Ok(_)) => {}
			},
			pushed = pushes.recv() => match pushed {
				Ok((target, message)) if target == page => {
					if socket.send(message).await.is_err() {
						break;
					}
				}
				Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
				Err(broadcast::error::RecvError::Closed) => break,
			},
			_ = kill.changed() => break,
		}
	}
}
