//! Request dispatcher.
//!
//! Maps a method name to a handler closure. The table is derived from the
//! driver's hierarchy: every level `K` gets `K.create`, `K.close` and one
//! `K.<op>` entry per advertised driver operation; `K.<anything else>` still
//! reaches the driver, which answers unsupported operations itself.
//!
//! | Method | Params | Result |
//! |--------|--------|--------|
//! | `K.create` (top) | `options?` | `{id, kind, parentId}` |
//! | `K.create` (child) | `PId` or `parentId`, `options?` | `{id, kind, parentId}` |
//! | `K.close` | `KId` or `id` | `{closedIds, failures?}` |
//! | `K.<op>` | `KId` or `id`, op arguments | driver value |
//! | `<driver>.<query>` | query arguments | driver value |
//! | `tree.list` | | nested tree |
//! | `tree.get` | `id` | entry snapshot |
//! | `tree.close` | `id` | `{closedIds, failures?}` |
//! | `ping` | | `"pong"` |
//! | `methods` | | catalog |
//! | `shutdown` | | `{shuttingDown: true}` |
//!
//! Ids are resolved before anything is handed to the tree, so an unknown id
//! never reaches the driver.

mod errors;
mod params;
mod table;

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use serde_json::{Value, json};
use tether_protocol::{Params, Request, Response};
use tether_runtime::{CloseReport, Driver, ResourceInfo, SessionTree};
use tokio::sync::watch;
use tracing::{debug, warn};

pub use errors::{DispatchError, DispatchResult};
pub use params::{take_id, take_options};
pub use table::{Handler, MethodInfo, MethodTable};

pub const DISPATCH_TARGET: &str = "tether.dispatch";

pub struct Dispatcher<D: Driver> {
	tree: SessionTree<D>,
	table: MethodTable,
	shutdown: watch::Sender<bool>,
}

impl<D: Driver> Dispatcher<D> {
	pub fn new(tree: SessionTree<D>) -> Self {
		let (shutdown, _) = watch::channel(false);
		let table = build_table(&tree, &shutdown);
		Self {
			tree,
			table,
			shutdown,
		}
	}

	pub fn tree(&self) -> &SessionTree<D> {
		&self.tree
	}

	/// Flips to `true` once a `shutdown` request has been dispatched.
	pub fn shutdown_requested(&self) -> watch::Receiver<bool> {
		self.shutdown.subscribe()
	}

	pub fn catalog(&self) -> &[MethodInfo] {
		self.table.catalog()
	}

	/// Payload of the `methods` request.
	pub fn listing(&self) -> Value {
		listing(&self.tree, self.table.catalog())
	}

	/// Routes one method call. Validation and turn reservation happen before
	/// this returns.
	pub fn call(&self, method: &str, params: Params) -> BoxFuture<'static, DispatchResult<Value>> {
		if let Some(handler) = self.table.get(method) {
			return handler(params);
		}

		let invoke = method
			.split_once('.')
			.filter(|(kind, op)| !op.is_empty() && self.tree.hierarchy().depth_of(kind).is_some());
		match invoke {
			Some((kind, op)) => invoke_op(&self.tree, kind, op, params),
			None => future::ready(Err(DispatchError::method_not_found(method))).boxed(),
		}
	}

	/// Routes a decoded request and shapes its response. Notifications yield
	/// `None`; their failures are logged instead.
	pub fn dispatch(&self, request: Request) -> BoxFuture<'static, Option<Response>> {
		let Request { id, method, params } = request;
		debug!(target: DISPATCH_TARGET, %method, id = ?id, "dispatch");
		let call = self.call(&method, params);

		async move {
			let result = call.await;
			match id {
				Some(id) => Some(match result {
					Ok(value) => Response::success(id, value),
					Err(err) => {
						debug!(target: DISPATCH_TARGET, %method, error = %err, "request failed");
						Response::failure(id, err.to_error_object())
					}
				}),
				None => {
					if let Err(err) = result {
						warn!(target: DISPATCH_TARGET, %method, error = %err, "notification failed");
					}
					None
				}
			}
		}
		.boxed()
	}
}

fn fail<T: Send + 'static>(err: DispatchError) -> BoxFuture<'static, DispatchResult<T>> {
	future::ready(Err(err)).boxed()
}

/// Confirms `id` is a live entry of `kind`.
fn resolve<D: Driver>(tree: &SessionTree<D>, kind: &str, id: &str) -> DispatchResult<()> {
	match tree.get(id) {
		Ok(info) if info.kind == kind => Ok(()),
		_ => Err(DispatchError::not_found(kind, id)),
	}
}

fn listing<D: Driver>(tree: &SessionTree<D>, catalog: &[MethodInfo]) -> Value {
	json!({
		"driver": tree.driver().name(),
		"levels": tree.levels(),
		"methods": catalog,
	})
}

fn created(info: ResourceInfo) -> Value {
	json!({
		"id": info.id,
		"kind": info.kind,
		"parentId": info.parent_id,
	})
}

fn closed(report: CloseReport) -> DispatchResult<Value> {
	serde_json::to_value(report).map_err(DispatchError::internal)
}

fn invoke_op<D: Driver>(
	tree: &SessionTree<D>,
	kind: &str,
	op: &str,
	mut params: Params,
) -> BoxFuture<'static, DispatchResult<Value>> {
	let id_key = format!("{kind}Id");
	let id = match take_id(&mut params, &[&id_key, "id"]) {
		Ok(id) => id,
		Err(err) => return fail(err),
	};
	if let Err(err) = resolve(tree, kind, &id) {
		return fail(err);
	}
	tree.invoke(&id, op, Value::Object(params))
		.map(|result| result.map_err(DispatchError::from))
		.boxed()
}

fn build_table<D: Driver>(tree: &SessionTree<D>, shutdown: &watch::Sender<bool>) -> MethodTable {
	let mut table = MethodTable::new();
	let hierarchy = tree.hierarchy().clone();

	for (depth, kind) in hierarchy.iter().enumerate() {
		let kind = kind.to_owned();
		let id_key = format!("{kind}Id");

		match hierarchy.parent_kind(depth).map(str::to_owned) {
			None => {
				let t = tree.clone();
				table.register(
					format!("{kind}.create"),
					"options?",
					format!("Start a new {kind}"),
					move |mut params| match take_options(&mut params) {
						Ok(options) => t
							.create_top(options)
							.map(|r| r.map(created).map_err(DispatchError::from))
							.boxed(),
						Err(err) => fail(err),
					},
				);
			}
			Some(parent) => {
				let t = tree.clone();
				let parent_key = format!("{parent}Id");
				table.register(
					format!("{kind}.create"),
					&format!("{parent_key}, options?"),
					format!("Open a new {kind} inside a {parent}"),
					move |mut params| {
						let parent_id = match take_id(&mut params, &[&parent_key, "parentId"]) {
							Ok(id) => id,
							Err(err) => return fail(err),
						};
						if resolve(&t, &parent, &parent_id).is_err() {
							return fail(tether_runtime::Error::ParentNotFound { id: parent_id }.into());
						}
						match take_options(&mut params) {
							Ok(options) => t
								.create_child(&parent_id, options)
								.map(|r| r.map(created).map_err(DispatchError::from))
								.boxed(),
							Err(err) => fail(err),
						}
					},
				);
			}
		}

		{
			let t = tree.clone();
			let kind = kind.clone();
			let id_key = id_key.clone();
			table.register(
				format!("{kind}.close"),
				&format!("{kind}Id"),
				format!("Close a {kind} and everything inside it"),
				move |mut params| {
					let id = match take_id(&mut params, &[&id_key, "id"]) {
						Ok(id) => id,
						Err(err) => return fail(err),
					};
					if let Err(err) = resolve(&t, &kind, &id) {
						return fail(err);
					}
					t.close(&id)
						.map(|r| r.map_err(DispatchError::from).and_then(closed))
						.boxed()
				},
			);
		}

		for op in tree.driver().operations(depth) {
			let t = tree.clone();
			let kind = kind.clone();
			let name = format!("{kind}.{op}");
			if table.contains(&name) {
				continue;
			}
			table.register(
				name,
				&format!("{id_key}, ..."),
				format!("Run {op} on a {kind}"),
				move |params| invoke_op(&t, &kind, op, params),
			);
		}
	}

	let driver = tree.driver().name().to_owned();
	for query in tree.driver().queries() {
		let t = tree.clone();
		let name = format!("{driver}.{query}");
		if table.contains(&name) {
			continue;
		}
		table.register(name, "...", format!("Ask the {driver} driver for {query}"), move |params| {
			t.query(query, Value::Object(params))
				.map(|result| result.map_err(DispatchError::from))
				.boxed()
		});
	}

	let t = tree.clone();
	table.register("tree.list", "", "Nested view of every live resource", move |_| {
		let forest = t.list();
		async move { serde_json::to_value(forest).map_err(DispatchError::internal) }.boxed()
	});

	let t = tree.clone();
	table.register("tree.get", "id", "Snapshot of one resource", move |mut params| {
		let result = take_id(&mut params, &["id"]).and_then(|id| {
			let info = t.get(&id)?;
			serde_json::to_value(info).map_err(DispatchError::internal)
		});
		future::ready(result).boxed()
	});

	let t = tree.clone();
	table.register("tree.close", "id", "Close any resource by id", move |mut params| {
		match take_id(&mut params, &["id"]) {
			Ok(id) => t
				.close(&id)
				.map(|r| r.map_err(DispatchError::from).and_then(closed))
				.boxed(),
			Err(err) => fail(err),
		}
	});

	table.register("ping", "", "Liveness check", |_| future::ready(Ok(json!("pong"))).boxed());

	let tx = shutdown.clone();
	table.register("shutdown", "", "Close everything and exit", move |_| {
		tx.send_replace(true);
		future::ready(Ok(json!({ "shuttingDown": true }))).boxed()
	});

	let mut catalog = table.catalog().to_vec();
	catalog.push(MethodInfo {
		name: "methods".into(),
		params: String::new(),
		summary: "List available methods".into(),
	});
	let listing = listing(tree, &catalog);
	table.register("methods", "", "List available methods", move |_| {
		future::ready(Ok(listing.clone())).boxed()
	});

	table
}
