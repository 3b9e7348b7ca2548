//! Address of the external `ios_webkit_debug_proxy`.

use std::fmt;
use std::str::FromStr;

use url::Url;

use crate::error::Error;

/// `host:port` of the proxy's device listing.
///
/// The proxy describes device endpoints from its own point of view
/// (`localhost:9222`). When it runs elsewhere (WSL, another machine) those
/// addresses are rewritten onto this endpoint's host, keeping the port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamEndpoint {
	host: String,
	port: u16,
}

impl UpstreamEndpoint {
	pub fn new(host: impl Into<String>, port: u16) -> Self {
		Self { host: host.into(), port }
	}

	pub fn host(&self) -> &str {
		&self.host
	}

	pub fn port(&self) -> u16 {
		self.port
	}

	/// Device listing url, `http://host:port/json`.
	pub fn listing_url(&self) -> String {
		format!("http://{}/json", self.authority(self.port))
	}

	/// Page listing url for a device reachable on `port`.
	pub fn device_listing_url(&self, port: u16) -> String {
		format!("http://{}/json", self.authority(port))
	}

	/// Points a proxy-reported WebSocket url at this endpoint's host.
	pub fn rewrite(&self, reported: &str) -> Option<Url> {
		let mut url = Url::parse(reported).ok()?;
		if !matches!(url.scheme(), "ws" | "wss") {
			return None;
		}
		let host = if self.host.contains(':') { format!("[{}]", self.host) } else { self.host.clone() };
		url.set_host(Some(&host)).ok()?;
		Some(url)
	}

	fn authority(&self, port: u16) -> String {
		if self.host.contains(':') {
			format!("[{}]:{}", self.host, port)
		} else {
			format!("{}:{}", self.host, port)
		}
	}
}

impl fmt::Display for UpstreamEndpoint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.authority(self.port))
	}
}

impl FromStr for UpstreamEndpoint {
	type Err = Error;

	/// Parses `host:port` or `[v6]:port`. An empty host means loopback.
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let invalid = || Error::InvalidEndpoint(s.to_string());
		let (host, port) = s.trim().rsplit_once(':').ok_or_else(invalid)?;
		let port: u16 = port.parse().map_err(|_| invalid())?;
		if port == 0 {
			return Err(invalid());
		}
		let host = host.trim_start_matches('[').trim_end_matches(']');
		let host = if host.is_empty() { "127.0.0.1" } else { host };
		if host.contains(char::is_whitespace) || host.contains('/') {
			return Err(invalid());
		}
		Ok(Self::new(host, port))
	}
}
