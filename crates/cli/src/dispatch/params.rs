//! Parameter extraction shared by the handlers.

use serde_json::Value;
use tether_protocol::Params;

use super::errors::{DispatchError, DispatchResult};

/// Removes the first of `keys` present in `params` and returns it as an id.
///
/// All `keys` are removed so aliases never leak into driver arguments.
pub fn take_id(params: &mut Params, keys: &[&str]) -> DispatchResult<String> {
	let mut found = None;
	for key in keys {
		if let Some(value) = params.remove(*key) {
			if found.is_none() {
				found = Some((*key, value));
			}
		}
	}

	match found {
		Some((_, Value::String(id))) if !id.is_empty() => Ok(id),
		Some((key, _)) => Err(DispatchError::invalid_params(format!(
			"{key} must be a non-empty string"
		))),
		None => Err(DispatchError::invalid_params(format!("missing {}", keys[0]))),
	}
}

/// Creation options: the `options` object when given, otherwise whatever
/// params remain after ids were taken.
pub fn take_options(params: &mut Params) -> DispatchResult<Value> {
	match params.remove("options") {
		Some(Value::Object(options)) => Ok(Value::Object(options)),
		Some(Value::Null) | None => Ok(Value::Object(std::mem::take(params))),
		Some(_) => Err(DispatchError::invalid_params("options must be an object")),
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn params(value: Value) -> Params {
		match value {
			Value::Object(map) => map,
			_ => unreachable!(),
		}
	}

	#[test]
	fn test_take_id_prefers_first_key_and_strips_aliases() {
		let mut p = params(json!({ "surfaceId": "surface-3", "id": "x", "text": "hi" }));
		assert_eq!(take_id(&mut p, &["surfaceId", "id"]).unwrap(), "surface-3");
		assert_eq!(p, params(json!({ "text": "hi" })));
	}

	#[test]
	fn test_take_id_falls_back_to_alias() {
		let mut p = params(json!({ "id": "surface-3" }));
		assert_eq!(take_id(&mut p, &["surfaceId", "id"]).unwrap(), "surface-3");
	}

	#[test]
	fn test_take_id_rejects_missing_and_mistyped() {
		let err = take_id(&mut Params::new(), &["contextId", "parentId"]).unwrap_err();
		assert_eq!(err.to_string(), "invalid params: missing contextId");

		let mut p = params(json!({ "contextId": 7 }));
		assert!(matches!(
			take_id(&mut p, &["contextId"]),
			Err(DispatchError::InvalidParams { .. })
		));
	}

	#[test]
	fn test_options_default_to_remaining_params() {
		let mut p = params(json!({ "name": "dev" }));
		assert_eq!(take_options(&mut p).unwrap(), json!({ "name": "dev" }));

		let mut p = params(json!({ "options": { "label": "a" }, "ignored": 1 }));
		assert_eq!(take_options(&mut p).unwrap(), json!({ "label": "a" }));

		let mut p = params(json!({ "options": [1] }));
		assert!(take_options(&mut p).is_err());
	}
}
