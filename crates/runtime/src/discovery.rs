//! Device and page discovery against `ios_webkit_debug_proxy`.
//!
//! Discovery is two-level: the proxy's own port lists devices, and each
//! device port lists its pages. Only the first level is required to succeed;
//! a device that drops off between the two queries is skipped.

use std::error::Error as _;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use serde::de::DeserializeOwned;
use srd_protocol::{DeviceEntry, DeviceTarget, PageEntry, TargetId};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};
use url::Url;

use crate::endpoint::UpstreamEndpoint;
use crate::error::{Error, Result};

/// A target together with the upstream WebSocket url that serves it.
#[derive(Debug, Clone)]
pub struct Discovered {
	pub target: DeviceTarget,
	pub upstream: Url,
}

/// Queries the proxy for devices and pages. Cheap to clone.
///
/// Every request is bounded by the configured timeout and never retried; the
/// inspector frontend polls, so a fast failure is more useful than a retry.
#[derive(Debug, Clone)]
pub struct Discovery {
	endpoint: Arc<UpstreamEndpoint>,
	client: reqwest::Client,
	timeout: Duration,
}

impl Discovery {
	pub fn new(endpoint: UpstreamEndpoint, timeout: Duration) -> Result<Self> {
		let client = reqwest::Client::builder()
			.connect_timeout(timeout)
			.timeout(timeout)
			.no_proxy()
			.build()
			.map_err(Error::ClientInit)?;
		Ok(Self {
			endpoint: Arc::new(endpoint),
			client,
			timeout,
		})
	}

	pub fn endpoint(&self) -> &UpstreamEndpoint {
		&self.endpoint
	}

	pub fn timeout(&self) -> Duration {
		self.timeout
	}

	/// Raw device listing from the proxy's main port.
	pub async fn list_devices(&self) -> Result<Vec<DeviceEntry>> {
		let url = self.endpoint.listing_url();
		self.fetch(&url).await.map_err(|reason| Error::unavailable(&self.endpoint, reason))
	}

	/// Every attachable page on every device, in listing order.
	pub async fn list_targets(&self) -> Result<Vec<DeviceTarget>> {
		Ok(self.discover().await?.into_iter().map(|found| found.target).collect())
	}

	/// Fresh lookup of a single target.
	pub async fn resolve(&self, id: &TargetId) -> Result<Discovered> {
		self.discover()
			.await?
			.into_iter()
			.find(|found| &found.target.id == id)
			.ok_or_else(|| Error::TargetNotFound(id.clone()))
	}

	/// Device listing plus page listings, all within one timeout. A device
	/// whose pages are not in by the deadline is skipped.
	pub async fn discover(&self) -> Result<Vec<Discovered>> {
		let deadline = Instant::now() + self.timeout;
		let devices = self.list_devices().await?;
		let listings = join_all(devices.iter().map(|device| self.device_pages(device, deadline))).await;

		let mut found = Vec::new();
		for (device, pages) in devices.iter().zip(listings) {
			for page in pages.into_iter().flatten() {
				if let Some(discovered) = self.discovered(device, page) {
					found.push(discovered);
				}
			}
		}
		debug!(target = "srd.discovery", devices = devices.len(), targets = found.len(), "discovery complete");
		Ok(found)
	}

	async fn device_pages(&self, device: &DeviceEntry, deadline: Instant) -> Option<Vec<PageEntry>> {
		let Some(port) = device.port() else {
			warn!(target = "srd.discovery", device = device.key(), url = %device.url, "device listing has no port");
			return None;
		};
		let url = self.endpoint.device_listing_url(port);
		match timeout_at(deadline, self.fetch(&url)).await {
			Ok(Ok(pages)) => Some(pages),
			Ok(Err(reason)) => {
				warn!(target = "srd.discovery", device = device.key(), %reason, "skipping device");
				None
			}
			Err(_) => {
				warn!(target = "srd.discovery", device = device.key(), "skipping device, no page listing before the deadline");
				None
			}
		}
	}

	fn discovered(&self, device: &DeviceEntry, page: PageEntry) -> Option<Discovered> {
		let Some(id) = page.page_id().map(|page_id| TargetId::new(device.key(), page_id)) else {
			debug!(target = "srd.discovery", device = device.key(), title = %page.title, "page not attachable");
			return None;
		};
		let reported = page.web_socket_debugger_url.as_deref()?;
		let Some(upstream) = self.endpoint.rewrite(reported) else {
			warn!(target = "srd.discovery", url = reported, "unusable debugger url");
			return None;
		};

		let target = DeviceTarget {
			id,
			title: page.title,
			url: page.url,
			device_id: device.key().to_string(),
			device_name: device.device_name.clone(),
			app_id: page.app_id,
			web_socket_debugger_url: None,
			devtools_frontend_url: None,
		};
		Some(Discovered { target, upstream })
	}

	async fn fetch<T: DeserializeOwned>(&self, url: &str) -> std::result::Result<T, String> {
		let response = self.client.get(url).send().await.map_err(|err| self.describe(&err))?;
		let status = response.status();
		if !status.is_success() {
			return Err(format!("{url} answered {status}"));
		}
		response.json::<T>().await.map_err(|err| self.describe(&err))
	}

	fn describe(&self, err: &reqwest::Error) -> String {
		if err.is_timeout() {
			return format!("no answer within {}ms", self.timeout.as_millis());
		}
		let mut message = err.to_string();
		let mut source = err.source();
		while let Some(cause) = source {
			message.push_str(": ");
			message.push_str(&cause.to_string());
			source = cause.source();
		}
		message
	}
}
