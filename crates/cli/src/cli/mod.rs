
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Root CLI.
#[derive(Parser, Debug)]
#[command(name = "ios-safari-remote-debug")]
#[command(about = "A tool for remotely debugging iOS Safari")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v debug, -vv trace)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Serve the iOS Safari remote debugging tool once it's built.
	Serve(ServeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
	/// Serve the built iOS Safari debugger from DIR.
	#[arg(short, long, value_name = "DIR", default_value = "dist")]
	pub input: PathBuf,

	/// Address to listen on. An empty host listens on all interfaces.
	#[arg(long, value_name = "HOST:PORT", default_value = ":8924")]
	pub address: String,

	/// host:port of ios_webkit_debug_proxy. Use this if the proxy is running in WSL or on a remote machine.
	#[arg(long, value_name = "HOST:PORT", default_value = "127.0.0.1:9221")]
	pub proxy_host: String,

	/// Upper bound for one target listing, or for discovering and connecting one page.
	#[arg(long, value_name = "MS", default_value_t = 2000)]
	pub discovery_timeout: u64,

	/// Close sessions after this long without traffic.
	#[arg(long, value_name = "SECS", default_value_t = 300)]
	pub idle_timeout: u64,

	/// How long shutdown waits for open sessions to close.
	#[arg(long, value_name = "SECS", default_value_t = 5)]
	pub shutdown_grace: u64,
}
