use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tether_cli::{cli::Cli, logging};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	tether_cli::run(cli).await.context("tether exited with an error")
}
