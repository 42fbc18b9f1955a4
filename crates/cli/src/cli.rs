use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::DriverKind;

#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(about = "Serve hierarchical program sessions over newline-delimited JSON")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug). Logs go to stderr.
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Config file (default: <config dir>/tether/config.json when present)
	#[arg(long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Driver controlling the external program
	#[arg(long, global = true, value_enum)]
	pub driver: Option<DriverKind>,

	/// Upper bound for each driver call, in milliseconds
	#[arg(long, global = true, value_name = "MS")]
	pub timeout_ms: Option<u64>,

	/// Requests allowed to run at once before reading pauses
	#[arg(long, global = true, value_name = "N")]
	pub max_in_flight: Option<usize>,

	#[command(subcommand)]
	pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
	/// Serve requests on stdin, answer on stdout (default)
	Serve,
	/// Print the method catalog for the configured driver
	Methods,
}
