//! Targets reported to the inspector frontend.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Identifies one page on one device: `"<device_id>:<page_id>"`.
///
/// The page id never contains `:`, so parsing splits on the last one and
/// device ids are free to contain colons.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId {
	device_id: String,
	page_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid target id '{0}', expected <device>:<page>")]
pub struct ParseTargetIdError(String);

impl TargetId {
	pub fn new(device_id: impl Into<String>, page_id: impl Into<String>) -> Self {
		Self {
			device_id: device_id.into(),
			page_id: page_id.into(),
		}
	}

	pub fn device_id(&self) -> &str {
		&self.device_id
	}

	pub fn page_id(&self) -> &str {
		&self.page_id
	}
}

impl fmt::Display for TargetId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.device_id, self.page_id)
	}
}

impl FromStr for TargetId {
	type Err = ParseTargetIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.rsplit_once(':') {
			Some((device, page)) if !device.is_empty() && !page.is_empty() => Ok(Self::new(device, page)),
			_ => Err(ParseTargetIdError(s.to_string())),
		}
	}
}

impl Serialize for TargetId {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.collect_str(self)
	}
}

impl<'de> Deserialize<'de> for TargetId {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let raw = String::deserialize(deserializer)?;
		raw.parse().map_err(serde::de::Error::custom)
	}
}

/// A debuggable page as listed by `GET /json` on the relay server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTarget {
	pub id: TargetId,
	/// Page title; what the frontend shows in its picker.
	pub title: String,
	pub url: String,
	pub device_id: String,
	pub device_name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub app_id: Option<String>,
	/// Relay endpoint for this target, set by the HTTP layer.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub web_socket_debugger_url: Option<String>,
	/// Inspector frontend entry point pre-wired to the relay endpoint.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub devtools_frontend_url: Option<String>,
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn target_id_display_and_parse() {
		let id = TargetId::new("00008030-001A2C", "4");
		assert_eq!(id.to_string(), "00008030-001A2C:4");
		assert_eq!("00008030-001A2C:4".parse::<TargetId>().unwrap(), id);
	}

	#[test]
	fn target_id_device_may_contain_colons() {
		let id: TargetId = "localhost:9222:1".parse().unwrap();
		assert_eq!(id.device_id(), "localhost:9222");
		assert_eq!(id.page_id(), "1");
	}

	#[test]
	fn target_id_rejects_malformed() {
		for raw in ["", "nocolon", ":1", "device:"] {
			assert!(raw.parse::<TargetId>().is_err(), "{raw} should not parse");
		}
	}

	#[test]
	fn device_target_serializes_camel_case() {
		let target = DeviceTarget {
			id: TargetId::new("dev", "1"),
			title: "Example".into(),
			url: "https://example.com/".into(),
			device_id: "dev".into(),
			device_name: "iPhone".into(),
			app_id: None,
			web_socket_debugger_url: Some("ws://relay/devtools/page/dev:1".into()),
			devtools_frontend_url: None,
		};

		assert_eq!(
			serde_json::to_value(&target).unwrap(),
			json!({
				"id": "dev:1",
				"title": "Example",
				"url": "https://example.com/",
				"deviceId": "dev",
				"deviceName": "iPhone",
				"webSocketDebuggerUrl": "ws://relay/devtools/page/dev:1"
			})
		);
	}
}
