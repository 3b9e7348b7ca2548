use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::Message as PageMessage;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, connect_async};

use super::*;
use crate::endpoint::UpstreamEndpoint;
use crate::testing::{FakeDevice, FakeProxy};

const WAIT: Duration = Duration::from_secs(3);

type Inspector = WebSocketStream<MaybeTlsStream<TcpStream>>;
type ClientSide = WebSocketStream<TcpStream>;

struct Harness {
	relay: Relay,
	shutdown: watch::Sender<bool>,
}

fn harness(addr: SocketAddr, options: RelayOptions) -> Harness {
	let endpoint = UpstreamEndpoint::new(addr.ip().to_string(), addr.port());
	let discovery = Discovery::new(endpoint, Duration::from_secs(2)).unwrap();
	let (shutdown, shutdown_rx) = watch::channel(false);
	Harness {
		relay: Relay::new(discovery, options, shutdown_rx),
		shutdown,
	}
}

/// Connected WebSocket pair: the inspector end and the server end the relay drives.
async fn inspector_pair() -> (Inspector, ClientSide) {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	let accept = tokio::spawn(async move {
		let (stream, _) = listener.accept().await.unwrap();
		accept_async(stream).await.unwrap()
	});
	let (inspector, _) = connect_async(format!("ws://{addr}/")).await.unwrap();
	(inspector, accept.await.unwrap())
}

async fn start_session(relay: &Relay, target: &TargetId) -> (Inspector, JoinHandle<SessionEnd>) {
	let pending = relay.open_session(target, "test-client").await.unwrap();
	let (inspector, client) = inspector_pair().await;
	(inspector, tokio::spawn(pending.run(client)))
}

async fn recv(inspector: &mut Inspector) -> Message {
	tokio::time::timeout(WAIT, inspector.next())
		.await
		.expect("timed out waiting for message")
		.expect("stream ended")
		.expect("read failed")
}

async fn one_page() -> (FakeProxy, FakeDevice, TargetId) {
	let proxy = FakeProxy::start().await;
	let device = proxy.add_device("phone", "iPhone").await;
	let page = device.add_page("Example", "https://example.com/");
	let target = device.target_id(&page);
	(proxy, device, target)
}

#[tokio::test]
async fn forwards_messages_in_order() {
	let (proxy, _device, target) = one_page().await;
	let h = harness(proxy.addr(), RelayOptions::default());
	let (mut inspector, _task) = start_session(&h.relay, &target).await;

	for i in 0..50 {
		inspector.send(Message::Text(format!(r#"{{"id":{i},"method":"Runtime.evaluate"}}"#))).await.unwrap();
	}
	inspector.send(Message::Binary(vec![0, 159, 146, 150])).await.unwrap();

	for i in 0..50 {
		assert_eq!(recv(&mut inspector).await, Message::Text(format!(r#"{{"id":{i},"method":"Runtime.evaluate"}}"#)));
	}
	assert_eq!(recv(&mut inspector).await, Message::Binary(vec![0, 159, 146, 150]));
	assert_eq!(h.relay.sessions()[0].state, SessionState::Active);
}

#[tokio::test]
async fn every_listed_target_can_be_opened() {
	let proxy = FakeProxy::start().await;
	let phone = proxy.add_device("phone", "iPhone").await;
	let tablet = proxy.add_device("tablet", "iPad").await;
	phone.add_page("A", "https://a.test/");
	phone.add_page("B", "https://b.test/");
	tablet.add_page("C", "https://c.test/");
	let h = harness(proxy.addr(), RelayOptions::default());

	let targets = h.relay.list_targets().await.unwrap();
	assert_eq!(targets.len(), 3);

	let mut pending = Vec::new();
	for target in &targets {
		pending.push(h.relay.open_session(&target.id, "test-client").await.unwrap());
	}
	assert_eq!(h.relay.registry().len(), 3);
	assert!(h.relay.sessions().iter().all(|s| s.state == SessionState::Opening));

	drop(pending);
	assert!(h.relay.registry().is_empty());
	assert!(phone.wait_for_connections(0, WAIT).await);
	assert!(tablet.wait_for_connections(0, WAIT).await);
}

#[tokio::test]
async fn client_close_releases_upstream() {
	let (proxy, device, target) = one_page().await;
	let h = harness(proxy.addr(), RelayOptions::default());
	let (mut inspector, task) = start_session(&h.relay, &target).await;
	assert!(device.wait_for_connections(1, WAIT).await);

	inspector.close(None).await.unwrap();

	let end = tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
	assert!(matches!(end, SessionEnd::ClientClosed(_)), "unexpected end: {end}");
	assert!(h.relay.registry().is_empty());
	assert!(device.wait_for_connections(0, WAIT).await, "upstream connection leaked");
}

#[tokio::test]
async fn abrupt_client_disconnect_releases_upstream() {
	let (proxy, device, target) = one_page().await;
	let h = harness(proxy.addr(), RelayOptions::default());
	let (inspector, task) = start_session(&h.relay, &target).await;
	assert!(device.wait_for_connections(1, WAIT).await);

	drop(inspector);

	let end = tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
	assert!(
		matches!(end, SessionEnd::ClientClosed(_) | SessionEnd::Failed { side: Side::Client, .. }),
		"unexpected end: {end}"
	);
	assert!(h.relay.registry().is_empty());
	assert!(device.wait_for_connections(0, WAIT).await, "upstream connection leaked");
}

#[tokio::test]
async fn sessions_do_not_cross_talk() {
	let proxy = FakeProxy::start().await;
	let device = proxy.add_device("phone", "iPhone").await;
	let page_a = device.add_page("A", "https://a.test/");
	let page_b = device.add_page("B", "https://b.test/");
	let h = harness(proxy.addr(), RelayOptions::default());

	let (mut a, _task_a) = start_session(&h.relay, &device.target_id(&page_a)).await;
	let (mut b, _task_b) = start_session(&h.relay, &device.target_id(&page_b)).await;
	assert!(device.wait_for_connections(2, WAIT).await);

	device.push(&page_a, PageMessage::Text("only-for-a".into()));
	a.send(Message::Text("from-a".into())).await.unwrap();
	b.send(Message::Text("from-b".into())).await.unwrap();

	let mut seen_by_a = vec![recv(&mut a).await, recv(&mut a).await];
	seen_by_a.sort_by_key(|m| m.to_string());
	assert_eq!(seen_by_a, [Message::Text("from-a".into()), Message::Text("only-for-a".into())]);

	assert_eq!(recv(&mut b).await, Message::Text("from-b".into()));
	let extra = tokio::time::timeout(Duration::from_millis(200), b.next()).await;
	assert!(extra.is_err(), "session B received traffic meant for A: {extra:?}");
}

#[tokio::test]
async fn upstream_loss_closes_client() {
	let (proxy, device, target) = one_page().await;
	let h = harness(proxy.addr(), RelayOptions::default());
	let (mut inspector, task) = start_session(&h.relay, &target).await;
	assert!(device.wait_for_connections(1, WAIT).await);

	device.drop_connections();

	match recv(&mut inspector).await {
		Message::Close(Some(frame)) => assert!(
			matches!(frame.code, CloseCode::Error | CloseCode::Normal),
			"unexpected close code {:?}",
			frame.code
		),
		Message::Close(None) => {}
		other => panic!("expected close, got {other:?}"),
	}
	let end = tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
	assert!(
		matches!(end, SessionEnd::Failed { side: Side::Upstream, .. } | SessionEnd::UpstreamClosed(_)),
		"unexpected end: {end}"
	);
	assert!(h.relay.registry().is_empty());
}

#[tokio::test]
async fn idle_session_is_closed() {
	let (proxy, device, target) = one_page().await;
	let options = RelayOptions {
		idle_timeout: Duration::from_millis(200),
		..RelayOptions::default()
	};
	let h = harness(proxy.addr(), options);
	let (mut inspector, task) = start_session(&h.relay, &target).await;

	match recv(&mut inspector).await {
		Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Away),
		other => panic!("expected close, got {other:?}"),
	}
	assert_eq!(tokio::time::timeout(WAIT, task).await.unwrap().unwrap(), SessionEnd::IdleTimeout);
	assert!(device.wait_for_connections(0, WAIT).await);
}

#[tokio::test]
async fn traffic_keeps_session_alive() {
	let (proxy, _device, target) = one_page().await;
	let options = RelayOptions {
		idle_timeout: Duration::from_millis(300),
		..RelayOptions::default()
	};
	let h = harness(proxy.addr(), options);
	let (mut inspector, task) = start_session(&h.relay, &target).await;

	for _ in 0..6 {
		tokio::time::sleep(Duration::from_millis(100)).await;
		inspector.send(Message::Text("tick".into())).await.unwrap();
		assert_eq!(recv(&mut inspector).await, Message::Text("tick".into()));
	}
	assert!(!task.is_finished());
}

#[tokio::test]
async fn shutdown_closes_sessions() {
	let (proxy, device, target) = one_page().await;
	let h = harness(proxy.addr(), RelayOptions::default());
	let (mut inspector, task) = start_session(&h.relay, &target).await;

	h.shutdown.send(true).unwrap();

	match recv(&mut inspector).await {
		Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Away),
		other => panic!("expected close, got {other:?}"),
	}
	assert_eq!(tokio::time::timeout(WAIT, task).await.unwrap().unwrap(), SessionEnd::Shutdown);
	assert!(h.relay.registry().wait_until_empty(WAIT).await);
	assert!(device.wait_for_connections(0, WAIT).await);
}

#[tokio::test]
async fn stale_target_is_not_found() {
	let (proxy, device, target) = one_page().await;
	let h = harness(proxy.addr(), RelayOptions::default());

	let listed = h.relay.list_targets().await.unwrap();
	assert_eq!(listed[0].id, target);
	device.remove_page(target.page_id());

	let err = h.relay.open_session(&target, "test-client").await.err().unwrap();
	assert!(err.is_target_not_found(), "unexpected error: {err}");
	assert!(h.relay.registry().is_empty());
}

#[tokio::test]
async fn unplugged_device_is_not_found() {
	let (proxy, device, target) = one_page().await;
	let h = harness(proxy.addr(), RelayOptions::default());
	proxy.unplug(&device);

	let err = h.relay.open_session(&target, "test-client").await.err().unwrap();
	assert!(err.is_target_not_found(), "unexpected error: {err}");
}

#[tokio::test]
async fn proxy_restart_recovers_without_new_relay() {
	let (proxy, device, target) = one_page().await;
	let addr = proxy.addr();
	let h = harness(addr, RelayOptions::default());
	let (mut inspector, task) = start_session(&h.relay, &target).await;
	assert!(device.wait_for_connections(1, WAIT).await);

	proxy.stop();
	drop(proxy);

	assert!(matches!(recv(&mut inspector).await, Message::Close(_)));
	tokio::time::timeout(WAIT, task).await.unwrap().unwrap();
	let err = h.relay.list_targets().await.unwrap_err();
	assert!(err.is_upstream_unavailable(), "unexpected error: {err}");
	let err = h.relay.open_session(&target, "test-client").await.err().unwrap();
	assert!(err.is_upstream_unavailable(), "unexpected error: {err}");

	let restarted = FakeProxy::start_at(addr).await;
	let device = restarted.add_device("phone", "iPhone").await;
	let page = device.add_page("Back", "https://back.test/");

	let targets = h.relay.list_targets().await.unwrap();
	assert_eq!(targets.len(), 1);
	let (mut inspector, _task) = start_session(&h.relay, &device.target_id(&page)).await;
	inspector.send(Message::Text("again".into())).await.unwrap();
	assert_eq!(recv(&mut inspector).await, Message::Text("again".into()));
}

#[tokio::test]
async fn open_session_is_bounded_by_discovery_timeout() {
	let proxy = FakeProxy::start().await;
	// Device port that accepts but never answers.
	let stalled = TcpListener::bind("127.0.0.1:0").await.unwrap();
	proxy.add_dead_device("stalled", stalled.local_addr().unwrap().port());
	let _hold = tokio::spawn(async move {
		let mut held = Vec::new();
		while let Ok((stream, _)) = stalled.accept().await {
			held.push(stream);
		}
	});

	let timeout = Duration::from_millis(400);
	let endpoint = UpstreamEndpoint::new("127.0.0.1", proxy.addr().port());
	let (_shutdown, shutdown_rx) = watch::channel(false);
	let relay = Relay::new(Discovery::new(endpoint, timeout).unwrap(), RelayOptions::default(), shutdown_rx);

	let started = std::time::Instant::now();
	let err = relay.open_session(&TargetId::new("stalled", "1"), "test-client").await.err().unwrap();
	assert!(err.is_target_not_found(), "unexpected error: {err}");
	assert!(started.elapsed() < timeout + Duration::from_millis(300), "took {:?}", started.elapsed());
	assert!(relay.registry().is_empty());
}
