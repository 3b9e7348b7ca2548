use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServeError>;

/// Startup configuration problems. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("input directory {} does not exist (run the build step first?)", .0.display())]
	MissingInput(PathBuf),

	#[error("input path {} is not a directory", .0.display())]
	NotADirectory(PathBuf),

	#[error("input directory {} is not readable", path.display())]
	UnreadableInput {
		path: PathBuf,
		#[source]
		source: io::Error,
	},

	#[error("invalid listen address '{0}', expected HOST:PORT or :PORT")]
	InvalidAddress(String),

	#[error("invalid --proxy-host")]
	ProxyHost(#[source] srd_runtime::Error),

	#[error("--{flag} must be greater than zero")]
	ZeroDuration { flag: &'static str },
}

#[derive(Debug, Error)]
pub enum ServeError {
	#[error(transparent)]
	Config(#[from] ConfigError),

	#[error("failed to bind {addr}")]
	Bind {
		addr: String,
		#[source]
		source: io::Error,
	},

	#[error("relay setup failed")]
	Relay(#[from] srd_runtime::Error),

	#[error(transparent)]
	Io(#[from] io::Error),
}
