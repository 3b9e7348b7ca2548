//! Discovery listings served by `ios_webkit_debug_proxy`.
//!
//! The proxy answers `GET /json` on its main port with one [`DeviceEntry`] per
//! attached device, and `GET /json` on each device port with one [`PageEntry`]
//! per inspectable page:
//!
//! ```text
//! [{"deviceId":"00008030-…","deviceName":"iPhone","deviceOSVersion":"17.4","url":"localhost:9222"}]
//! [{"title":"Example","url":"https://example.com/","appId":"PID:1234",
//!   "webSocketDebuggerUrl":"ws://localhost:9222/devtools/page/1", …}]
//! ```
//!
//! Every field is optional on the wire; unknown fields are ignored.

use serde::{Deserialize, Serialize};

/// One device entry from the proxy's device listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceEntry {
	pub device_id: String,
	pub device_name: String,
	#[serde(rename = "deviceOSVersion", skip_serializing_if = "Option::is_none")]
	pub device_os_version: Option<String>,
	/// `host:port` of the per-device listing, as the proxy sees it.
	pub url: String,
}

impl DeviceEntry {
	/// Port of the per-device endpoint, taken from [`url`](Self::url).
	///
	/// Accepts both `localhost:9222` and `http://localhost:9222/` forms.
	pub fn port(&self) -> Option<u16> {
		let authority = self.url.split_once("://").map_or(self.url.as_str(), |(_, rest)| rest);
		let authority = authority.split('/').next().unwrap_or(authority);
		let (_, port) = authority.rsplit_once(':')?;
		port.parse().ok()
	}

	/// Identifier used in target ids; falls back to the listing url when the
	/// proxy omits `deviceId`.
	pub fn key(&self) -> &str {
		if self.device_id.is_empty() { &self.url } else { &self.device_id }
	}
}

/// One inspectable page from a device listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageEntry {
	pub title: String,
	pub url: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub app_id: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub favicon_url: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub thumbnail_url: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub devtools_frontend_url: Option<String>,
	/// Absent while another client is attached to the page.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub web_socket_debugger_url: Option<String>,
}

impl PageEntry {
	/// Last path segment of the page's debugger url (`…/devtools/page/3` → `3`).
	pub fn page_id(&self) -> Option<&str> {
		let url = self.web_socket_debugger_url.as_deref()?;
		let path = url.split(['?', '#']).next().unwrap_or(url);
		path.trim_end_matches('/').rsplit('/').next().filter(|id| !id.is_empty() && !id.contains(':'))
	}
}
