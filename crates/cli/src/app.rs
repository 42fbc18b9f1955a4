//! Wires configuration, driver, session tree and transport together.

use std::process::ExitCode;

use tether_runtime::{Driver, MemoryDriver, SessionTree};
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::adapters::TmuxDriver;
use crate::cli::{Cli, Commands};
use crate::config::{Config, DriverKind};
use crate::dispatch::Dispatcher;
use crate::error::{CliError, Result};
use crate::shutdown::ShutdownSignals;
use crate::transport::{self, StopReason};

pub async fn run(cli: Cli) -> Result<ExitCode> {
	let config = Config::resolve(&cli)?;
	let command = cli.command.unwrap_or(Commands::Serve);

	match config.driver {
		DriverKind::Memory => {
			let driver = MemoryDriver::new(config.levels.clone());
			execute(command, driver, &config).await
		}
		DriverKind::Tmux => {
			let driver = match (command, TmuxDriver::locate(config.tmux_binary.as_deref())) {
				(_, Ok(driver)) => driver,
				// The catalog does not need a working binary.
				(Commands::Methods, Err(_)) => TmuxDriver::new("tmux"),
				(Commands::Serve, Err(source)) => {
					return Err(CliError::BinaryNotFound {
						binary: "tmux".into(),
						source,
					});
				}
			};
			execute(command, driver, &config).await
		}
	}
}

async fn execute<D: Driver>(command: Commands, driver: D, config: &Config) -> Result<ExitCode> {
	let tree = SessionTree::new(driver, config.tree_options())?;
	let dispatcher = Dispatcher::new(tree);

	match command {
		Commands::Methods => {
			let mut out = serde_json::to_vec_pretty(&dispatcher.listing())?;
			out.push(b'\n');
			let mut stdout = tokio::io::stdout();
			stdout.write_all(&out).await.map_err(transport::TransportError::Write)?;
			stdout.flush().await.map_err(transport::TransportError::Write)?;
			Ok(ExitCode::SUCCESS)
		}
		Commands::Serve => {
			let signals = ShutdownSignals::install().map_err(CliError::Signals)?;
			info!(
				target: transport::TRANSPORT_TARGET,
				driver = dispatcher.tree().driver().name(),
				levels = ?dispatcher.tree().levels(),
				"serving on stdio"
			);

			let summary = transport::serve(
				dispatcher,
				tokio::io::stdin(),
				tokio::io::stdout(),
				config.serve_options(),
				signals.recv(),
			)
			.await?;

			if let StopReason::Signal(name) = summary.reason {
				info!(target: transport::TRANSPORT_TARGET, signal = name, "stopped by signal");
			}
			Ok(if summary.clean() {
				ExitCode::SUCCESS
			} else {
				ExitCode::FAILURE
			})
		}
	}
}
