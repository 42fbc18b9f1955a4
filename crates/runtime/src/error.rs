//! Error types for the session tree.

use std::time::Duration;

use tether_protocol::{ErrorCode, ErrorObject};
use thiserror::Error;

use crate::driver::DriverError;
use crate::registry::RegistryError;

/// Result type alias for tree operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by [`SessionTree`](crate::SessionTree) operations.
#[derive(Debug, Error)]
pub enum Error {
	/// The target id does not resolve to a live entry.
	#[error("{id} not found")]
	NotFound { id: String },

	/// The parent id given to a create does not resolve.
	#[error("parent {id} not found")]
	ParentNotFound { id: String },

	/// Create was aimed at a leaf level.
	#[error("{kind} resources cannot have children")]
	NoChildLevel { kind: String },

	/// Level names handed to the tree are unusable.
	#[error("invalid hierarchy: {0}")]
	InvalidHierarchy(String),

	/// Arguments rejected before reaching the controlled program.
	#[error("invalid params: {0}")]
	InvalidParams(String),

	/// The driver does not implement the named operation.
	#[error("unsupported operation: {op}")]
	Unsupported { op: String },

	/// The controlled program reported an error or went away.
	#[error("driver failure: {0}")]
	Driver(DriverError),

	/// A driver call did not settle in time.
	#[error("operation timed out after {}ms", .0.as_millis())]
	Timeout(Duration),

	/// Bookkeeping fault inside the tree itself.
	#[error("internal error: {0}")]
	Internal(String),
}

impl Error {
	pub fn not_found(id: impl Into<String>) -> Self {
		Self::NotFound { id: id.into() }
	}

	pub fn is_not_found(&self) -> bool {
		matches!(self, Self::NotFound { .. } | Self::ParentNotFound { .. })
	}

	pub fn is_timeout(&self) -> bool {
		matches!(self, Self::Timeout(_))
	}

	/// Stable wire code for this error.
	pub fn code(&self) -> ErrorCode {
		match self {
			Self::NotFound { .. } | Self::ParentNotFound { .. } => ErrorCode::NotFound,
			Self::NoChildLevel { .. } | Self::InvalidParams(_) => ErrorCode::InvalidParams,
			Self::Unsupported { .. } => ErrorCode::MethodNotFound,
			Self::Driver(_) => ErrorCode::DriverFailure,
			Self::Timeout(_) => ErrorCode::Timeout,
			Self::InvalidHierarchy(_) | Self::Internal(_) => ErrorCode::Internal,
		}
	}

	pub fn to_error_object(&self) -> ErrorObject {
		ErrorObject::new(self.code(), self.to_string())
	}
}

impl From<DriverError> for Error {
	fn from(err: DriverError) -> Self {
		match err {
			DriverError::Timeout { after } => Self::Timeout(after),
			DriverError::Unsupported { op } => Self::Unsupported { op },
			DriverError::InvalidArgs(message) => Self::InvalidParams(message),
			other => Self::Driver(other),
		}
	}
}

impl From<RegistryError> for Error {
	fn from(err: RegistryError) -> Self {
		match err {
			RegistryError::NotFound { id } => Self::NotFound { id },
			RegistryError::InvalidParent { id } => Self::ParentNotFound { id },
		}
	}
}
