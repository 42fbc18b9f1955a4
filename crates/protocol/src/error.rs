//! Error codes and the error payload carried by failed responses.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::message::RequestId;

/// Stable machine-readable error codes.
///
/// The JSON-RPC reserved range covers malformed traffic; the `-3200x` range
/// covers failures of the session tree and its drivers.
///
/// | Code | Meaning |
/// |------|---------|
/// | `-32700` | Line is not valid JSON |
/// | `-32600` | JSON is not a valid request object |
/// | `-32601` | Unknown method or driver operation |
/// | `-32602` | Missing or ill-typed parameters |
/// | `-32603` | Unexpected fault inside the server |
/// | `-32001` | Resource id (or parent id) does not resolve |
/// | `-32002` | Controlled program reported an error or died |
/// | `-32003` | Controlled program did not answer in time |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
	ParseError,
	InvalidRequest,
	MethodNotFound,
	InvalidParams,
	Internal,
	NotFound,
	DriverFailure,
	Timeout,
}

impl ErrorCode {
	pub const fn code(self) -> i64 {
		match self {
			Self::ParseError => -32700,
			Self::InvalidRequest => -32600,
			Self::MethodNotFound => -32601,
			Self::InvalidParams => -32602,
			Self::Internal => -32603,
			Self::NotFound => -32001,
			Self::DriverFailure => -32002,
			Self::Timeout => -32003,
		}
	}

	pub fn from_code(code: i64) -> Option<Self> {
		[
			Self::ParseError,
			Self::InvalidRequest,
			Self::MethodNotFound,
			Self::InvalidParams,
			Self::Internal,
			Self::NotFound,
			Self::DriverFailure,
			Self::Timeout,
		]
		.into_iter()
		.find(|candidate| candidate.code() == code)
	}
}

impl std::fmt::Display for ErrorCode {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let name = match self {
			Self::ParseError => "parse_error",
			Self::InvalidRequest => "invalid_request",
			Self::MethodNotFound => "method_not_found",
			Self::InvalidParams => "invalid_params",
			Self::Internal => "internal",
			Self::NotFound => "not_found",
			Self::DriverFailure => "driver_failure",
			Self::Timeout => "timeout",
		};
		f.write_str(name)
	}
}

/// Error payload of a failed [`Response`](crate::Response).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
	/// Numeric code from [`ErrorCode`].
	pub code: i64,
	/// Human-readable description.
	pub message: String,
	/// Optional structured context (offending id, driver name, ...).
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<Value>,
}

impl ErrorObject {
	pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
		Self {
			code: code.code(),
			message: message.into(),
			data: None,
		}
	}

	pub fn with_data(mut self, data: Value) -> Self {
		self.data = Some(data);
		self
	}

	/// Returns the typed code, if it is one of ours.
	pub fn kind(&self) -> Option<ErrorCode> {
		ErrorCode::from_code(self.code)
	}
}

/// A line that could not be turned into a [`Request`](crate::Request).
///
/// Carries whatever correlation id could be recovered so the caller can still
/// answer the sender; `RequestId::Null` when the line was not JSON at all.
#[derive(Debug, Error)]
pub enum DecodeError {
	#[error("parse error: {message}")]
	Parse { message: String },

	#[error("invalid request: {message}")]
	InvalidRequest { id: RequestId, message: String },

	#[error("invalid params: {message}")]
	InvalidParams { id: RequestId, message: String },
}

impl DecodeError {
	/// Correlation id to echo in the error response.
	pub fn id(&self) -> RequestId {
		match self {
			Self::Parse { .. } => RequestId::Null,
			Self::InvalidRequest { id, .. } | Self::InvalidParams { id, .. } => id.clone(),
		}
	}

	pub fn code(&self) -> ErrorCode {
		match self {
			Self::Parse { .. } => ErrorCode::ParseError,
			Self::InvalidRequest { .. } => ErrorCode::InvalidRequest,
			Self::InvalidParams { .. } => ErrorCode::InvalidParams,
		}
	}

	pub fn to_error_object(&self) -> ErrorObject {
		ErrorObject::new(self.code(), self.to_string())
	}
}
