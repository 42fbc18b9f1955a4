//! Request and response envelopes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::{DecodeError, ErrorObject};

/// Protocol marker written on every response.
pub const JSONRPC_VERSION: &str = "2.0";

/// Named request parameters.
pub type Params = Map<String, Value>;

/// Client-chosen correlation id. Echoed verbatim, never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
	Number(Number),
	String(String),
	Null,
}

impl From<i64> for RequestId {
	fn from(value: i64) -> Self {
		Self::Number(value.into())
	}
}

impl From<&str> for RequestId {
	fn from(value: &str) -> Self {
		Self::String(value.to_owned())
	}
}

impl std::fmt::Display for RequestId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Number(n) => write!(f, "{n}"),
			Self::String(s) => write!(f, "{s:?}"),
			Self::Null => f.write_str("null"),
		}
	}
}

/// A decoded inbound message.
///
/// `id == None` marks a notification: it is executed but never answered.
/// An explicit `"id": null` is a request and does get a response.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
	pub id: Option<RequestId>,
	pub method: String,
	pub params: Params,
}

impl Request {
	pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Params) -> Self {
		Self {
			id: Some(id.into()),
			method: method.into(),
			params,
		}
	}

	pub fn notification(method: impl Into<String>, params: Params) -> Self {
		Self {
			id: None,
			method: method.into(),
			params,
		}
	}

	pub fn is_notification(&self) -> bool {
		self.id.is_none()
	}

	/// Decodes one line (without or with its trailing newline).
	///
	/// Trailing whitespace, including a `\r` left by CRLF senders, is ignored.
	/// Missing or `null` params decode as an empty map; any other non-object
	/// params value is rejected.
	pub fn decode(line: &[u8]) -> Result<Self, DecodeError> {
		let line = line.trim_ascii_end();
		let value: Value = serde_json::from_slice(line).map_err(|err| DecodeError::Parse {
			message: err.to_string(),
		})?;

		let Value::Object(mut object) = value else {
			return Err(DecodeError::InvalidRequest {
				id: RequestId::Null,
				message: "message must be a JSON object".into(),
			});
		};

		let id = match object.remove("id") {
			None => None,
			Some(Value::Null) => Some(RequestId::Null),
			Some(Value::Number(n)) => Some(RequestId::Number(n)),
			Some(Value::String(s)) => Some(RequestId::String(s)),
			Some(_) => {
				return Err(DecodeError::InvalidRequest {
					id: RequestId::Null,
					message: "id must be a string, number or null".into(),
				});
			}
		};
		let reply_id = id.clone().unwrap_or(RequestId::Null);

		let method = match object.remove("method") {
			Some(Value::String(method)) if !method.is_empty() => method,
			Some(Value::String(_)) => {
				return Err(DecodeError::InvalidRequest {
					id: reply_id,
					message: "method must not be empty".into(),
				});
			}
			Some(_) => {
				return Err(DecodeError::InvalidRequest {
					id: reply_id,
					message: "method must be a string".into(),
				});
			}
			None => {
				return Err(DecodeError::InvalidRequest {
					id: reply_id,
					message: "missing method".into(),
				});
			}
		};

		let params = match object.remove("params") {
			None | Some(Value::Null) => Params::new(),
			Some(Value::Object(params)) => params,
			Some(_) => {
				return Err(DecodeError::InvalidParams {
					id: reply_id,
					message: "params must be an object".into(),
				});
			}
		};

		Ok(Self { id, method, params })
	}

	/// Encodes the request as a single wire line, newline included.
	pub fn to_line(&self) -> serde_json::Result<Vec<u8>> {
		let mut object = Map::new();
		if let Some(id) = &self.id {
			object.insert("id".into(), serde_json::to_value(id)?);
		}
		object.insert("method".into(), Value::String(self.method.clone()));
		if !self.params.is_empty() {
			object.insert("params".into(), Value::Object(self.params.clone()));
		}
		let mut line = serde_json::to_vec(&object)?;
		line.push(b'\n');
		Ok(line)
	}
}

/// Reply to one request. Exactly one of `result` / `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
	pub jsonrpc: String,
	pub id: RequestId,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorObject>,
}

impl Response {
	pub fn success(id: RequestId, result: Value) -> Self {
		Self {
			jsonrpc: JSONRPC_VERSION.to_owned(),
			id,
			result: Some(result),
			error: None,
		}
	}

	pub fn failure(id: RequestId, error: ErrorObject) -> Self {
		Self {
			jsonrpc: JSONRPC_VERSION.to_owned(),
			id,
			result: None,
			error: Some(error),
		}
	}

	pub fn is_error(&self) -> bool {
		self.error.is_some()
	}

	/// Encodes the response as a single wire line, newline included.
	pub fn to_line(&self) -> serde_json::Result<Vec<u8>> {
		let mut line = serde_json::to_vec(self)?;
		line.push(b'\n');
		Ok(line)
	}
}
