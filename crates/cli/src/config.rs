//! Resolved `serve` configuration.
//!
//! Everything the server needs is validated here, before anything binds, so
//! a bad flag fails startup instead of the first request.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use srd_runtime::{RelayOptions, UpstreamEndpoint};

use crate::cli::ServeArgs;
use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct ServeConfig {
	/// Canonical path of the frontend build.
	pub input: PathBuf,
	/// `host:port` to bind.
	pub listen: String,
	pub upstream: UpstreamEndpoint,
	pub discovery_timeout: Duration,
	pub relay: RelayOptions,
	pub shutdown_grace: Duration,
}

impl ServeConfig {
	pub fn from_args(args: &ServeArgs) -> Result<Self, ConfigError> {
		let input = frontend_dir(&args.input)?;
		let listen = listen_address(&args.address)?;
		let upstream = args.proxy_host.parse().map_err(ConfigError::ProxyHost)?;

		let discovery_timeout = non_zero(Duration::from_millis(args.discovery_timeout), "discovery-timeout")?;
		let idle_timeout = non_zero(Duration::from_secs(args.idle_timeout), "idle-timeout")?;

		Ok(Self {
			input,
			listen,
			upstream,
			discovery_timeout,
			relay: RelayOptions {
				idle_timeout,
				..RelayOptions::default()
			},
			shutdown_grace: Duration::from_secs(args.shutdown_grace),
		})
	}
}

/// Normalizes a listen address. `:8924` listens on every IPv4 interface.
pub fn listen_address(raw: &str) -> Result<String, ConfigError> {
	let invalid = || ConfigError::InvalidAddress(raw.to_string());
	let (host, port) = raw.trim().rsplit_once(':').ok_or_else(invalid)?;
	port.parse::<u16>().map_err(|_| invalid())?;

	if host.contains(char::is_whitespace) || host.contains('/') {
		return Err(invalid());
	}
	let host = if host.is_empty() { "0.0.0.0" } else { host };
	Ok(format!("{host}:{port}"))
}

/// Checks that `path` is a readable directory and returns it canonicalized.
pub fn frontend_dir(path: &Path) -> Result<PathBuf, ConfigError> {
	let metadata = match fs::metadata(path) {
		Ok(metadata) => metadata,
		Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
			return Err(ConfigError::MissingInput(path.to_path_buf()));
		}
		Err(source) => {
			return Err(ConfigError::UnreadableInput {
				path: path.to_path_buf(),
				source,
			});
		}
	};
	if !metadata.is_dir() {
		return Err(ConfigError::NotADirectory(path.to_path_buf()));
	}

	let unreadable = |source| ConfigError::UnreadableInput {
		path: path.to_path_buf(),
		source,
	};
	fs::read_dir(path).map_err(unreadable)?;
	path.canonicalize().map_err(unreadable)
}

fn non_zero(value: Duration, flag: &'static str) -> Result<Duration, ConfigError> {
	if value.is_zero() {
		return Err(ConfigError::ZeroDuration { flag });
	}
	Ok(value)
}
