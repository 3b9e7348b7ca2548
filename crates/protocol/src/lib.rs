//! Wire types for the iOS Safari inspector relay.
//!
//! Two families of types live here:
//!
//! - [`upstream`]: the discovery listings served by `ios_webkit_debug_proxy`
//!   (device list on the proxy port, page list on each device port). These are
//!   parsed leniently since the proxy owns their schema.
//! - [`target`] and [`session`]: what the relay server reports to the inspector
//!   frontend (`/json`, `/json/sessions`).

pub mod session;
pub mod target;
pub mod upstream;

use serde::{Deserialize, Serialize};

pub use session::{SessionInfo, SessionState};
pub use target::{DeviceTarget, ParseTargetIdError, TargetId};
pub use upstream::{DeviceEntry, PageEntry};

/// JSON body returned alongside non-2xx relay responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
	pub error: String,
}

impl ErrorBody {
	pub fn new(error: impl Into<String>) -> Self {
		Self { error: error.into() }
	}
}
