//! Session snapshots exposed on `/json/sessions`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::target::TargetId;

/// Lifecycle of one relay session.
///
/// `Opening → Active → Closing → Closed`; `Closed` is terminal and nothing
/// goes back to `Active` once closing started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
	Opening,
	Active,
	Closing,
	Closed,
}

impl SessionState {
	pub fn can_transition_to(self, next: SessionState) -> bool {
		use SessionState::*;
		matches!(
			(self, next),
			(Opening, Active) | (Opening, Closing) | (Opening, Closed) | (Active, Closing) | (Active, Closed) | (Closing, Closed)
		)
	}
}

impl fmt::Display for SessionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			SessionState::Opening => "opening",
			SessionState::Active => "active",
			SessionState::Closing => "closing",
			SessionState::Closed => "closed",
		};
		f.write_str(name)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
	pub id: u64,
	pub target: TargetId,
	/// Peer address of the inspector client.
	pub client: String,
	pub state: SessionState,
	pub age_ms: u64,
	pub idle_ms: u64,
}
