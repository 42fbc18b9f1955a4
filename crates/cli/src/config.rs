//! Server configuration: JSON file overlaid with CLI flags.
//!
//! ```json
//! {
//!   "driver": "tmux",
//!   "operationTimeoutMs": 5000,
//!   "maxInFlight": 16
//! }
//! ```
//!
//! Every field is optional. The file is read from `--config`, otherwise from
//! `<config dir>/tether/config.json` if that exists.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tether_runtime::TreeOptions;

use crate::cli::Cli;
use crate::error::{CliError, Result};
use crate::transport::ServeOptions;

pub const CONFIG_DIR: &str = "tether";
pub const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
	/// In-process text buffers; no external program
	#[default]
	Memory,
	/// tmux sessions, windows and panes
	Tmux,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct Config {
	pub driver: DriverKind,
	/// Level names for the memory driver, top first.
	pub levels: Vec<String>,
	/// tmux executable; looked up on `PATH` when unset.
	pub tmux_binary: Option<PathBuf>,
	pub operation_timeout_ms: Option<u64>,
	pub max_message_bytes: usize,
	pub max_in_flight: usize,
	pub shutdown_grace_ms: u64,
}

impl Default for Config {
	fn default() -> Self {
		let serve = ServeOptions::default();
		Self {
			driver: DriverKind::default(),
			levels: vec!["instance".into(), "context".into(), "surface".into()],
			tmux_binary: None,
			operation_timeout_ms: None,
			max_message_bytes: serve.max_message_bytes,
			max_in_flight: serve.max_in_flight,
			shutdown_grace_ms: serve.shutdown_grace.as_millis() as u64,
		}
	}
}

impl Config {
	pub fn default_path() -> Option<PathBuf> {
		dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
	}

	pub fn from_file(path: &Path) -> Result<Self> {
		let raw = std::fs::read_to_string(path).map_err(|source| CliError::ConfigRead {
			path: path.to_path_buf(),
			source,
		})?;
		serde_json::from_str(&raw).map_err(|source| CliError::ConfigParse {
			path: path.to_path_buf(),
			source,
		})
	}

	/// Reads `explicit`, or the default file when it exists, or falls back
	/// to defaults.
	pub fn load(explicit: Option<&Path>) -> Result<Self> {
		match explicit {
			Some(path) => Self::from_file(path),
			None => match Self::default_path() {
				Some(path) if path.is_file() => Self::from_file(&path),
				_ => Ok(Self::default()),
			},
		}
	}

	/// Loads, overlays CLI flags and validates.
	pub fn resolve(cli: &Cli) -> Result<Self> {
		let mut config = Self::load(cli.config.as_deref())?;
		config.apply_cli(cli);
		config.validate()?;
		Ok(config)
	}

	pub fn apply_cli(&mut self, cli: &Cli) {
		if let Some(driver) = cli.driver {
			self.driver = driver;
		}
		if let Some(ms) = cli.timeout_ms {
			self.operation_timeout_ms = Some(ms);
		}
		if let Some(n) = cli.max_in_flight {
			self.max_in_flight = n;
		}
	}

	pub fn validate(&self) -> Result<()> {
		if self.max_in_flight == 0 {
			return Err(CliError::ConfigInvalid("maxInFlight must be at least 1".into()));
		}
		if self.max_message_bytes == 0 {
			return Err(CliError::ConfigInvalid("maxMessageBytes must be at least 1".into()));
		}
		if self.operation_timeout_ms == Some(0) {
			return Err(CliError::ConfigInvalid("operationTimeoutMs must be positive".into()));
		}
		Ok(())
	}

	pub fn tree_options(&self) -> TreeOptions {
		TreeOptions {
			operation_timeout: self.operation_timeout_ms.map(Duration::from_millis),
		}
	}

	pub fn serve_options(&self) -> ServeOptions {
		ServeOptions {
			max_message_bytes: self.max_message_bytes,
			max_in_flight: self.max_in_flight,
			shutdown_grace: Duration::from_millis(self.shutdown_grace_ms),
		}
	}
}
