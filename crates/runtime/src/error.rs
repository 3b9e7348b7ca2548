//! Error types for discovery and session setup.

use srd_protocol::TargetId;
use thiserror::Error;

/// Result type alias for relay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of [`Relay`](crate::Relay).
///
/// Failures inside an established session never show up here; they end that
/// session and are reported as [`SessionEnd::Failed`](crate::SessionEnd::Failed).
#[derive(Debug, Error)]
pub enum Error {
	/// The proxy could not be reached, timed out, or answered with something
	/// that is not a device listing.
	#[error("ios_webkit_debug_proxy unavailable at {endpoint}: {reason}")]
	UpstreamUnavailable { endpoint: String, reason: String },

	/// The target is not (or no longer) listed by the proxy.
	#[error("target not found: {0}")]
	TargetNotFound(TargetId),

	/// The HTTP client used for discovery could not be built.
	#[error("failed to initialise discovery client: {0}")]
	ClientInit(#[source] reqwest::Error),

	/// The configured proxy address is not a usable `host:port`.
	#[error("invalid proxy endpoint '{0}', expected host:port")]
	InvalidEndpoint(String),
}

impl Error {
	pub(crate) fn unavailable(endpoint: impl ToString, reason: impl ToString) -> Self {
		Error::UpstreamUnavailable {
			endpoint: endpoint.to_string(),
			reason: reason.to_string(),
		}
	}

	pub fn is_upstream_unavailable(&self) -> bool {
		matches!(self, Error::UpstreamUnavailable { .. })
	}

	pub fn is_target_not_found(&self) -> bool {
		matches!(self, Error::TargetNotFound(_))
	}
}
