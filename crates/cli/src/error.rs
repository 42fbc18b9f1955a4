use std::path::PathBuf;

use thiserror::Error;

use crate::transport::TransportError;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
	#[error("failed to read config {path}")]
	ConfigRead {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("invalid config {path}")]
	ConfigParse {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},

	#[error("invalid config: {0}")]
	ConfigInvalid(String),

	#[error("{binary} not found on PATH")]
	BinaryNotFound {
		binary: String,
		#[source]
		source: which::Error,
	},

	#[error("failed to install signal handlers")]
	Signals(#[source] std::io::Error),

	#[error(transparent)]
	Runtime(#[from] tether_runtime::Error),

	#[error(transparent)]
	Transport(#[from] TransportError),

	#[error(transparent)]
	Json(#[from] serde_json::Error),
}
