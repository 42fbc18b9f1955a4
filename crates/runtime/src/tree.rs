//! Session tree: registries stacked into a strict parent/child hierarchy.
//!
//! Every operation reserves its turn(s) synchronously when called and only
//! then returns a future, so for any single id the execution order equals
//! the call order even when many futures are polled concurrently. Work on
//! unrelated ids never waits on each other.
//!
//! Closing is cascading: the whole subtree is reserved, driver-closed
//! deepest first (failures are logged and collected, never abort the
//! cascade), then removed from bookkeeping in one locked step.
//!
//! A cascade marks every entry it reserves as closing. New work aimed at a
//! closing entry fails with `NotFound` instead of queueing, so each subtree
//! is only ever reserved by one cascade. Children created by work queued
//! before the close inherit the mark and are swept by the same cascade.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::driver::{Driver, DriverError, DriverResult};
use crate::error::{Error, Result};
use crate::hierarchy::Hierarchy;
use crate::registry::{IdGenerator, Registry, ResourceInfo};
use crate::turn::Ticket;

const TREE_TARGET: &str = "tether.tree";

#[derive(Debug, Clone, Default)]
pub struct TreeOptions {
	/// Upper bound for every driver call. `None` leaves timing to the driver.
	pub operation_timeout: Option<Duration>,
}

/// One node of [`SessionTree::list`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreeNode {
	#[serde(flatten)]
	pub info: ResourceInfo,
	pub children: Vec<TreeNode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloseFailure {
	pub id: String,
	pub message: String,
}

/// Outcome of a cascade close.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseReport {
	/// Every id removed from bookkeeping, deepest first.
	pub closed_ids: Vec<String>,
	/// Driver close calls that failed. The ids are still removed.
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub failures: Vec<CloseFailure>,
}

/// Outcome of [`SessionTree::close_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShutdownReport {
	pub closed_ids: Vec<String>,
	/// Top-level resources whose own close failed.
	pub failed: Vec<CloseFailure>,
}

impl ShutdownReport {
	pub fn clean(&self) -> bool {
		self.failed.is_empty()
	}
}

struct Inner<D: Driver> {
	driver: D,
	hierarchy: Hierarchy,
	levels: Mutex<Vec<Registry<D::Handle>>>,
	options: TreeOptions,
	cascades: AtomicU64,
}

/// Cheaply cloneable handle to a shared tree.
pub struct SessionTree<D: Driver> {
	inner: Arc<Inner<D>>,
}

impl<D: Driver> Clone for SessionTree<D> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<D: Driver> SessionTree<D> {
	/// Builds a tree whose levels come from [`Driver::levels`].
	pub fn new(driver: D, options: TreeOptions) -> Result<Self> {
		let hierarchy = Hierarchy::new(driver.levels())?;
		let ids = Arc::new(IdGenerator::new());
		let levels = hierarchy
			.iter()
			.map(|kind| Registry::new(kind, ids.clone()))
			.collect();

		Ok(Self {
			inner: Arc::new(Inner {
				driver,
				hierarchy,
				levels: Mutex::new(levels),
				options,
				cascades: AtomicU64::new(0),
			}),
		})
	}

	pub fn driver(&self) -> &D {
		&self.inner.driver
	}

	pub fn hierarchy(&self) -> &Hierarchy {
		&self.inner.hierarchy
	}

	pub fn levels(&self) -> Vec<String> {
		self.inner.hierarchy.iter().map(str::to_owned).collect()
	}

	/// Number of live entries across all levels.
	pub fn len(&self) -> usize {
		self.inner.levels.lock().iter().map(Registry::len).sum()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Starts a top-level resource.
	pub fn create_top(&self, options: Value) -> BoxFuture<'static, Result<ResourceInfo>> {
		let inner = Arc::clone(&self.inner);
		async move {
			let spawned = inner.guarded(inner.driver.spawn_top(&options)).await?;
			let info = {
				let mut levels = inner.levels.lock();
				let top = &mut levels[0];
				let id = top.create(None, None, spawned.handle, spawned.metadata)?;
				top.get(&id)?.info()
			};
			info!(target: TREE_TARGET, id = %info.id, "created");
			Ok(info)
		}
		.boxed()
	}

	/// Starts a child under `parent_id`, serialized behind other work on the parent.
	pub fn create_child(
		&self,
		parent_id: &str,
		options: Value,
	) -> BoxFuture<'static, Result<ResourceInfo>> {
		let parent_id = parent_id.to_owned();
		let reserved = {
			let mut levels = self.inner.levels.lock();
			match locate(&levels, &parent_id) {
				None => Err(Error::ParentNotFound { id: parent_id.clone() }),
				Some(depth) if depth + 1 >= levels.len() => Err(Error::NoChildLevel {
					kind: levels[depth].kind().to_owned(),
				}),
				Some(depth) => levels[depth]
					.get_mut(&parent_id)
					.filter(|entry| !entry.is_closing())
					.map(|entry| (depth, entry.reserve()))
					.ok_or_else(|| Error::ParentNotFound { id: parent_id.clone() }),
			}
		};
		let (depth, mut ticket) = match reserved {
			Ok(reserved) => reserved,
			Err(err) => return future::ready(Err(err)).boxed(),
		};

		let inner = Arc::clone(&self.inner);
		async move {
			ticket.ready().await;
			let parent = {
				let levels = inner.levels.lock();
				levels[depth]
					.get(&parent_id)
					.map(|entry| Arc::clone(&entry.handle))
					.map_err(|_| Error::ParentNotFound { id: parent_id.clone() })?
			};

			let spawned = inner
				.guarded(inner.driver.spawn_child(&parent, depth + 1, &options))
				.await?;

			let created = {
				let mut levels = inner.levels.lock();
				let (upper, lower) = levels.split_at_mut(depth + 1);
				let parents = &upper[depth];
				let children = &mut lower[0];
				let closing = parents.get(&parent_id).ok().and_then(|entry| entry.closing());
				children
					.create(Some(&parent_id), Some(parents), spawned.handle, spawned.metadata)
					.and_then(|id| {
						// Born into a subtree that is already closing.
						if let Some(entry) = children.get_mut(&id) {
							entry.set_closing(closing);
						}
						children.get(&id).map(|entry| entry.info())
					})
			};

			match created {
				Ok(info) => {
					info!(target: TREE_TARGET, id = %info.id, parent = %parent_id, "created");
					drop(ticket);
					Ok(info)
				}
				Err(err) => Err(err.into()),
			}
		}
		.boxed()
	}

	/// Runs a driver operation on `id`.
	pub fn invoke(&self, id: &str, op: &str, args: Value) -> BoxFuture<'static, Result<Value>> {
		let id = id.to_owned();
		let op = op.to_owned();
		let reserved = {
			let mut levels = self.inner.levels.lock();
			locate(&levels, &id).and_then(|depth| {
				levels[depth]
					.get_mut(&id)
					.filter(|entry| !entry.is_closing())
					.map(|entry| (depth, entry.reserve()))
			})
		};
		let Some((depth, mut ticket)) = reserved else {
			return future::ready(Err(Error::not_found(id))).boxed();
		};

		let inner = Arc::clone(&self.inner);
		async move {
			ticket.ready().await;
			let handle = {
				let levels = inner.levels.lock();
				levels[depth]
					.get(&id)
					.map(|entry| Arc::clone(&entry.handle))
					.map_err(|_| Error::not_found(id.clone()))?
			};

			debug!(target: TREE_TARGET, %id, %op, "invoke");
			let outcome = inner.guarded(inner.driver.invoke(&handle, &op, args)).await?;

			if !outcome.metadata.is_empty() {
				let mut levels = inner.levels.lock();
				if let Some(entry) = levels[depth].get_mut(&id) {
					entry.metadata_mut().extend(outcome.metadata);
				}
			}
			drop(ticket);
			Ok(outcome.value)
		}
		.boxed()
	}

	/// Runs a driver-wide query. No entry is involved, so nothing queues.
	pub fn query(&self, op: &str, args: Value) -> BoxFuture<'static, Result<Value>> {
		let op = op.to_owned();
		let inner = Arc::clone(&self.inner);
		async move {
			debug!(target: TREE_TARGET, %op, "query");
			inner.guarded(inner.driver.query(&op, args)).await
		}
		.boxed()
	}

	/// Closes `id` and everything beneath it.
	///
	/// An entry already claimed by another close is reported as `NotFound`.
	pub fn close(&self, id: &str) -> BoxFuture<'static, Result<CloseReport>> {
		self.cascade(id, false)
	}

	/// Runs one cascade close. With `wait_if_closing`, an entry claimed by
	/// another cascade is waited for and taken over if that cascade was
	/// dropped before finishing.
	fn cascade(&self, id: &str, wait_if_closing: bool) -> BoxFuture<'static, Result<CloseReport>> {
		let id = id.to_owned();
		let token = self.inner.cascades.fetch_add(1, Ordering::Relaxed) + 1;
		let first = {
			let mut levels = self.inner.levels.lock();
			match locate(&levels, &id) {
				Some(depth) if wait_if_closing || !levels[depth].get(&id).is_ok_and(|e| e.is_closing()) => {
					Some((depth, reserve_subtree(&mut levels, depth, &id, token, &HashSet::new())))
				}
				_ => None,
			}
		};
		let Some((depth, first)) = first else {
			return future::ready(Err(Error::not_found(id))).boxed();
		};

		let mut held: HashSet<String> = first.iter().map(|(id, _)| id.clone()).collect();
		let mut cascade = Cascade {
			inner: Arc::clone(&self.inner),
			token,
			tickets: first.into_iter().map(|(_, ticket)| ticket).collect(),
		};

		let inner = Arc::clone(&self.inner);
		async move {
			let mut pending = cascade.tickets.len();

			// Children created by work queued ahead of us need turns too.
			loop {
				let start = cascade.tickets.len() - pending;
				for ticket in &mut cascade.tickets[start..] {
					ticket.ready().await;
				}

				let extra = {
					let mut levels = inner.levels.lock();
					if !levels[depth].contains(&id) {
						return Err(Error::not_found(id));
					}
					reserve_subtree(&mut levels, depth, &id, token, &held)
				};
				if extra.is_empty() {
					break;
				}
				pending = extra.len();
				for (id, ticket) in extra {
					held.insert(id);
					cascade.tickets.push(ticket);
				}
			}

			let targets = {
				let levels = inner.levels.lock();
				let mut order = Vec::new();
				collect_subtree(&levels, depth, &id, &mut order);
				order
					.into_iter()
					.filter_map(|(depth, id)| {
						levels[depth]
							.get(&id)
							.ok()
							.map(|entry| (depth, id, Arc::clone(&entry.handle)))
					})
					.collect::<Vec<_>>()
			};

			let mut report = CloseReport::default();
			for (_, target, handle) in &targets {
				if let Err(err) = inner.guarded(inner.driver.close(handle)).await {
					warn!(target: TREE_TARGET, id = %target, error = %err, "close failed");
					report.failures.push(CloseFailure {
						id: target.clone(),
						message: err.to_string(),
					});
				}
			}

			{
				let mut levels = inner.levels.lock();
				for (depth, target, _) in &targets {
					report.closed_ids.extend(levels[*depth].delete(target));
				}
			}
			drop(cascade);

			info!(
				target: TREE_TARGET,
				%id,
				closed = report.closed_ids.len(),
				failures = report.failures.len(),
				"closed"
			);
			Ok(report)
		}
		.boxed()
	}

	/// Snapshot of one entry.
	pub fn get(&self, id: &str) -> Result<ResourceInfo> {
		let levels = self.inner.levels.lock();
		locate(&levels, id)
			.and_then(|depth| levels[depth].get(id).ok())
			.map(|entry| entry.info())
			.ok_or_else(|| Error::not_found(id))
	}

	/// Current forest, top-level entries in creation order.
	pub fn list(&self) -> Vec<TreeNode> {
		let levels = self.inner.levels.lock();
		levels[0]
			.list_by_parent(None)
			.into_iter()
			.map(|entry| build_node(&levels, 0, entry.info()))
			.collect()
	}

	/// Cascade-closes every top-level resource.
	pub fn close_all(&self) -> impl Future<Output = ShutdownReport> + Send + 'static {
		let tops: Vec<String> = {
			let levels = self.inner.levels.lock();
			levels[0]
				.list_by_parent(None)
				.into_iter()
				.map(|entry| entry.id().to_owned())
				.collect()
		};
		let closes: Vec<_> = tops.iter().map(|id| self.cascade(id, true)).collect();

		async move {
			let mut report = ShutdownReport::default();
			for (id, result) in tops.into_iter().zip(future::join_all(closes).await) {
				match result {
					Ok(closed) => {
						if let Some(failure) = closed.failures.iter().find(|f| f.id == id) {
							report.failed.push(failure.clone());
						}
						report.closed_ids.extend(closed.closed_ids);
					}
					Err(Error::NotFound { .. }) => {}
					Err(err) => report.failed.push(CloseFailure {
						id,
						message: err.to_string(),
					}),
				}
			}
			report
		}
	}
}

impl<D: Driver> Inner<D> {
	async fn guarded<T>(&self, call: impl Future<Output = DriverResult<T>>) -> Result<T> {
		let result = match self.options.operation_timeout {
			Some(limit) => match tokio::time::timeout(limit, call).await {
				Ok(result) => result,
				Err(_) => Err(DriverError::Timeout { after: limit }),
			},
			None => call.await,
		};
		result.map_err(Error::from)
	}
}

fn locate<H>(levels: &[Registry<H>], id: &str) -> Option<usize> {
	levels.iter().position(|level| level.contains(id))
}

/// Post-order walk: children (in creation order) before their parent.
fn collect_subtree<H>(levels: &[Registry<H>], depth: usize, id: &str, out: &mut Vec<(usize, String)>) {
	if let Some(children) = levels.get(depth + 1) {
		for child in children.list_by_parent(Some(id)) {
			collect_subtree(levels, depth + 1, child.id(), out);
		}
	}
	out.push((depth, id.to_owned()));
}

/// Turns and closing marks held by one cascade. Dropping it, finished or
/// not, clears the marks before the turns are released.
struct Cascade<D: Driver> {
	inner: Arc<Inner<D>>,
	token: u64,
	tickets: Vec<Ticket>,
}

impl<D: Driver> Drop for Cascade<D> {
	fn drop(&mut self) {
		let mut levels = self.inner.levels.lock();
		for level in levels.iter_mut() {
			level.release_closing(self.token);
		}
	}
}

/// Pre-order walk of the entries a cascade owns or still has to wait for.
///
/// An entry claimed by another cascade is visited, so this cascade queues
/// behind it, but its subtree is left to that owner.
fn cascade_walk<H>(levels: &[Registry<H>], depth: usize, id: &str, token: u64, out: &mut Vec<(usize, String)>) {
	let Ok(entry) = levels[depth].get(id) else {
		return;
	};
	out.push((depth, id.to_owned()));
	if entry.closing().is_some_and(|owner| owner != token) {
		return;
	}
	if let Some(children) = levels.get(depth + 1) {
		for child in children.list_by_parent(Some(id)) {
			cascade_walk(levels, depth + 1, child.id(), token, out);
		}
	}
}

/// Claims every unclaimed entry of the walk for `token` and reserves a turn
/// on each one not already in `held`, parents first.
fn reserve_subtree<H>(
	levels: &mut [Registry<H>],
	depth: usize,
	id: &str,
	token: u64,
	held: &HashSet<String>,
) -> Vec<(String, Ticket)> {
	let mut order = Vec::new();
	cascade_walk(levels, depth, id, token, &mut order);

	let mut tickets = Vec::new();
	for (depth, id) in order {
		let Some(entry) = levels[depth].get_mut(&id) else {
			continue;
		};
		if entry.closing().is_none() {
			entry.set_closing(Some(token));
		}
		if !held.contains(&id) {
			tickets.push((id, entry.reserve()));
		}
	}
	tickets
}

fn build_node<H>(levels: &[Registry<H>], depth: usize, info: ResourceInfo) -> TreeNode {
	let children = levels
		.get(depth + 1)
		.map(|children| {
			children
				.list_by_parent(Some(&info.id))
				.into_iter()
				.map(|child| build_node(levels, depth + 1, child.info()))
				.collect()
		})
		.unwrap_or_default();
	TreeNode { info, children }
}

#[cfg(test)]
mod tests;
