//! Driver seam between the session tree and a controlled program.
//!
//! A driver owns the program-specific protocol (tmux argv, a browser
//! connection, an editor socket). The tree only ever holds the opaque
//! [`Driver::Handle`] values it returns and passes them back by reference.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::registry::Metadata;

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Failures reported by a driver.
#[derive(Debug, Error)]
pub enum DriverError {
	/// The program returned an error or its process/connection died.
	#[error("{0}")]
	Failure(String),

	/// The program did not answer in time.
	#[error("timed out after {}ms", .after.as_millis())]
	Timeout { after: Duration },

	#[error("unsupported operation: {op}")]
	Unsupported { op: String },

	/// Arguments the driver rejected before talking to the program.
	#[error("{0}")]
	InvalidArgs(String),

	/// The handle was already torn down, usually by a closed ancestor.
	#[error("handle already closed")]
	Closed,

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}

impl DriverError {
	pub fn failure(message: impl Into<String>) -> Self {
		Self::Failure(message.into())
	}

	pub fn unsupported(op: impl Into<String>) -> Self {
		Self::Unsupported { op: op.into() }
	}
}

/// A freshly started resource.
pub struct Spawned<H> {
	pub handle: H,
	/// Initial metadata recorded on the entry (socket path, pid, ...).
	pub metadata: Metadata,
}

impl<H> Spawned<H> {
	pub fn new(handle: H) -> Self {
		Self {
			handle,
			metadata: Metadata::new(),
		}
	}

	pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.metadata.insert(key.into(), value.into());
		self
	}
}

/// Result of [`Driver::invoke`].
#[derive(Debug, Default)]
pub struct Outcome {
	pub value: Value,
	/// Merged into the entry's metadata on success.
	pub metadata: Metadata,
}

impl Outcome {
	pub fn value(value: Value) -> Self {
		Self {
			value,
			metadata: Metadata::new(),
		}
	}

	pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.metadata.insert(key.into(), value.into());
		self
	}
}

/// Capability surface of a controlled program.
///
/// `depth` counts levels from the top: a top-level resource is depth 0, so
/// `spawn_child` is called with depth 1 or 2.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
	type Handle: Send + Sync + 'static;

	/// Short name used in logs and the method catalog.
	fn name(&self) -> &str;

	/// Level names from the top down, for example `["session", "window", "pane"]`.
	fn levels(&self) -> Vec<String>;

	/// Operation names accepted by [`Driver::invoke`] at `depth`.
	fn operations(&self, _depth: usize) -> &'static [&'static str] {
		&[]
	}

	/// Program-wide queries that need no handle, such as listing what
	/// already runs outside the tree.
	fn queries(&self) -> &'static [&'static str] {
		&[]
	}

	async fn query(&self, op: &str, _args: Value) -> DriverResult<Value> {
		Err(DriverError::unsupported(op))
	}

	async fn spawn_top(&self, options: &Value) -> DriverResult<Spawned<Self::Handle>>;

	async fn spawn_child(
		&self,
		_parent: &Self::Handle,
		_depth: usize,
		_options: &Value,
	) -> DriverResult<Spawned<Self::Handle>> {
		Err(DriverError::unsupported("create"))
	}

	async fn invoke(&self, handle: &Self::Handle, op: &str, args: Value) -> DriverResult<Outcome>;

	async fn close(&self, handle: &Self::Handle) -> DriverResult<()>;
}
