//! Live session bookkeeping.
//!
//! Every relay session is registered here from the moment it starts opening
//! until its [`SessionGuard`] is dropped. Dropping the guard is the only way
//! to leave the live set, so a relay task that is cancelled or panics still
//! cleans up after itself.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use srd_protocol::{SessionInfo, SessionState, TargetId};
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
	pub fn get(self) -> u64 {
		self.0
	}
}

impl fmt::Display for SessionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// Last time traffic was seen on a session, in either direction.
#[derive(Debug)]
pub struct Activity {
	origin: Instant,
	last_ms: AtomicU64,
}

impl Activity {
	fn new() -> Self {
		Self {
			origin: Instant::now(),
			last_ms: AtomicU64::new(0),
		}
	}

	pub fn touch(&self) {
		let now = self.origin.elapsed().as_millis() as u64;
		self.last_ms.fetch_max(now, Ordering::Relaxed);
	}

	pub fn idle_for(&self) -> Duration {
		let now = self.origin.elapsed();
		now.saturating_sub(Duration::from_millis(self.last_ms.load(Ordering::Relaxed)))
	}

	pub fn age(&self) -> Duration {
		self.origin.elapsed()
	}
}

struct SessionRecord {
	target: TargetId,
	client: String,
	state: SessionState,
	activity: Arc<Activity>,
}

struct RegistryInner {
	sessions: Mutex<HashMap<SessionId, SessionRecord>>,
	next_id: AtomicU64,
	live: watch::Sender<usize>,
}

/// Set of live sessions, shared between the relay and the HTTP layer.
#[derive(Clone)]
pub struct SessionRegistry {
	inner: Arc<RegistryInner>,
}

impl Default for SessionRegistry {
	fn default() -> Self {
		Self::new()
	}
}

impl SessionRegistry {
	pub fn new() -> Self {
		Self {
			inner: Arc::new(RegistryInner {
				sessions: Mutex::new(HashMap::new()),
				next_id: AtomicU64::new(1),
				live: watch::channel(0).0,
			}),
		}
	}

	/// Adds a session in the `Opening` state.
	pub fn register(&self, target: TargetId, client: impl Into<String>) -> SessionGuard {
		let id = SessionId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
		let activity = Arc::new(Activity::new());
		let record = SessionRecord {
			target,
			client: client.into(),
			state: SessionState::Opening,
			activity: activity.clone(),
		};

		let live = {
			let mut sessions = self.inner.sessions.lock();
			sessions.insert(id, record);
			sessions.len()
		};
		self.inner.live.send_replace(live);
		debug!(target = "srd.session", session = %id, live, "session registered");

		SessionGuard {
			registry: self.clone(),
			id,
			activity,
		}
	}

	pub fn len(&self) -> usize {
		self.inner.sessions.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn state(&self, id: SessionId) -> Option<SessionState> {
		self.inner.sessions.lock().get(&id).map(|record| record.state)
	}

	/// Snapshot of live sessions ordered by id.
	pub fn snapshot(&self) -> Vec<SessionInfo> {
		let sessions = self.inner.sessions.lock();
		let mut infos: Vec<SessionInfo> = sessions
			.iter()
			.map(|(id, record)| SessionInfo {
				id: id.get(),
				target: record.target.clone(),
				client: record.client.clone(),
				state: record.state,
				age_ms: record.activity.age().as_millis() as u64,
				idle_ms: record.activity.idle_for().as_millis() as u64,
			})
			.collect();
		infos.sort_by_key(|info| info.id);
		infos
	}

	/// Waits until no session is live. Returns `false` if `within` elapsed first.
	pub async fn wait_until_empty(&self, within: Duration) -> bool {
		let mut live = self.inner.live.subscribe();
		tokio::time::timeout(within, live.wait_for(|count| *count == 0)).await.is_ok_and(|res| res.is_ok())
	}

	fn transition(&self, id: SessionId, next: SessionState) {
		let mut sessions = self.inner.sessions.lock();
		let Some(record) = sessions.get_mut(&id) else {
			return;
		};
		if record.state.can_transition_to(next) {
			debug!(target = "srd.session", session = %id, from = %record.state, to = %next, "session state");
			record.state = next;
		} else if record.state != next {
			warn!(target = "srd.session", session = %id, from = %record.state, to = %next, "ignoring illegal session transition");
		}
	}

	fn remove(&self, id: SessionId) {
		let live = {
			let mut sessions = self.inner.sessions.lock();
			sessions.remove(&id);
			sessions.len()
		};
		self.inner.live.send_replace(live);
		debug!(target = "srd.session", session = %id, live, "session closed");
	}
}

/// Membership of one session in the live set; removes it on drop.
pub struct SessionGuard {
	registry: SessionRegistry,
	id: SessionId,
	activity: Arc<Activity>,
}

impl SessionGuard {
	pub fn id(&self) -> SessionId {
		self.id
	}

	pub fn activity(&self) -> &Arc<Activity> {
		&self.activity
	}

	pub fn set_state(&self, next: SessionState) {
		self.registry.transition(self.id, next);
	}

	pub fn state(&self) -> Option<SessionState> {
		self.registry.state(self.id)
	}
}

impl Drop for SessionGuard {
	fn drop(&mut self) {
		self.registry.remove(self.id);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn guard_drop_removes_session() {
		let registry = SessionRegistry::new();
		let guard = registry.register(TargetId::new("dev", "1"), "127.0.0.1:5000");
		assert_eq!(registry.len(), 1);
		assert_eq!(guard.state(), Some(SessionState::Opening));

		drop(guard);
		assert!(registry.is_empty());
	}

	#[test]
	fn ids_are_unique_and_increasing() {
		let registry = SessionRegistry::new();
		let a = registry.register(TargetId::new("dev", "1"), "a");
		let b = registry.register(TargetId::new("dev", "1"), "b");
		assert!(b.id() > a.id());

		let snapshot = registry.snapshot();
		assert_eq!(snapshot.iter().map(|s| s.client.as_str()).collect::<Vec<_>>(), ["a", "b"]);
	}

	#[test]
	fn closing_does_not_return_to_active() {
		let registry = SessionRegistry::new();
		let guard = registry.register(TargetId::new("dev", "1"), "a");
		guard.set_state(SessionState::Active);
		guard.set_state(SessionState::Closing);
		guard.set_state(SessionState::Active);
		assert_eq!(guard.state(), Some(SessionState::Closing));
	}

	#[test]
	fn activity_resets_idle_time() {
		let activity = Activity::new();
		std::thread::sleep(Duration::from_millis(30));
		assert!(activity.idle_for() >= Duration::from_millis(30));
		activity.touch();
		assert!(activity.idle_for() < Duration::from_millis(30));
	}

	#[tokio::test]
	async fn wait_until_empty_sees_last_removal() {
		let registry = SessionRegistry::new();
		let guard = registry.register(TargetId::new("dev", "1"), "a");

		assert!(!registry.wait_until_empty(Duration::from_millis(50)).await);

		let waiter = {
			let registry = registry.clone();
			tokio::spawn(async move { registry.wait_until_empty(Duration::from_secs(2)).await })
		};
		tokio::time::sleep(Duration::from_millis(20)).await;
		drop(guard);
		assert!(waiter.await.unwrap());
	}
}
