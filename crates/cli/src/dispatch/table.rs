//! Method name to handler lookup.

use std::collections::HashMap;

use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use tether_protocol::Params;

use super::errors::DispatchResult;

/// A registered capability. Runs its synchronous part (validation, turn
/// reservation) when called and returns the remaining work as a future.
pub type Handler = Box<dyn Fn(Params) -> BoxFuture<'static, DispatchResult<Value>> + Send + Sync>;

/// Catalog entry describing one method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodInfo {
	pub name: String,
	pub params: String,
	pub summary: String,
}

#[derive(Default)]
pub struct MethodTable {
	handlers: HashMap<String, Handler>,
	catalog: Vec<MethodInfo>,
}

impl MethodTable {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register<F>(&mut self, name: impl Into<String>, params: &str, summary: impl Into<String>, handler: F)
	where
		F: Fn(Params) -> BoxFuture<'static, DispatchResult<Value>> + Send + Sync + 'static,
	{
		let name = name.into();
		self.catalog.push(MethodInfo {
			name: name.clone(),
			params: params.to_owned(),
			summary: summary.into(),
		});
		self.handlers.insert(name, Box::new(handler));
	}

	pub fn get(&self, name: &str) -> Option<&Handler> {
		self.handlers.get(name)
	}

	pub fn contains(&self, name: &str) -> bool {
		self.handlers.contains_key(name)
	}

	/// Entries in registration order.
	pub fn catalog(&self) -> &[MethodInfo] {
		&self.catalog
	}

	pub fn len(&self) -> usize {
		self.handlers.len()
	}

	pub fn is_empty(&self) -> bool {
		self.handlers.is_empty()
	}
}
