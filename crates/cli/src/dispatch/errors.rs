//! Errors surfaced while routing a request.
//!
//! Every failure a handler can produce ends up here and is encoded into an
//! [`ErrorObject`] before it leaves the dispatcher; drivers never write to
//! the wire directly.

use serde_json::json;
use tether_protocol::{ErrorCode, ErrorObject};
use thiserror::Error;

pub type DispatchResult<T> = std::result::Result<T, DispatchError>;

#[derive(Debug, Error)]
pub enum DispatchError {
	#[error("method not found: {method}")]
	MethodNotFound { method: String },

	#[error("invalid params: {message}")]
	InvalidParams { message: String },

	/// The id exists but belongs to another level, or does not exist at all.
	#[error("{id} is not a live {kind}")]
	NotFound { kind: String, id: String },

	#[error(transparent)]
	Tree(#[from] tether_runtime::Error),

	#[error("internal error: {message}")]
	Internal { message: String },
}

impl DispatchError {
	pub fn method_not_found(method: impl Into<String>) -> Self {
		Self::MethodNotFound {
			method: method.into(),
		}
	}

	pub fn invalid_params(message: impl Into<String>) -> Self {
		Self::InvalidParams {
			message: message.into(),
		}
	}

	pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
		Self::NotFound {
			kind: kind.into(),
			id: id.into(),
		}
	}

	pub fn internal(err: impl std::fmt::Display) -> Self {
		Self::Internal {
			message: err.to_string(),
		}
	}

	pub fn code(&self) -> ErrorCode {
		match self {
			Self::MethodNotFound { .. } => ErrorCode::MethodNotFound,
			Self::InvalidParams { .. } => ErrorCode::InvalidParams,
			Self::NotFound { .. } => ErrorCode::NotFound,
			Self::Tree(err) => err.code(),
			Self::Internal { .. } => ErrorCode::Internal,
		}
	}

	pub fn to_error_object(&self) -> ErrorObject {
		let object = ErrorObject::new(self.code(), self.to_string());
		match self {
			Self::NotFound { id, .. }
			| Self::Tree(tether_runtime::Error::NotFound { id })
			| Self::Tree(tether_runtime::Error::ParentNotFound { id }) => {
				object.with_data(json!({ "id": id }))
			}
			_ => object,
		}
	}
}
