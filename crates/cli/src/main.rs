use anyhow::Context;
use clap::Parser;
use srd_cli::cli::{Cli, Commands, ServeArgs};
use srd_cli::config::ServeConfig;
use srd_cli::logging;
use srd_cli::server::{self, Server};
use tracing::error;

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	let result = match cli.command {
		Commands::Serve(args) => serve(args).await,
	};

	if let Err(err) = result {
		error!(target = "srd", "{err:#}");
		std::process::exit(1);
	}
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
	let config = ServeConfig::from_args(&args).context("invalid serve options")?;
	let server = Server::bind(config).await?;
	server.run(server::shutdown_signal()).await?;
	Ok(())
}
