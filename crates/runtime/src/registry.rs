//! Id-keyed store for one level of the session tree.
//!
//! A [`Registry`] owns its entries and their driver handles. Callers outside
//! this crate only ever see [`ResourceInfo`] snapshots; handles stay behind
//! id lookup. Deletion never cascades here: only the tree knows which
//! registries sit below this one.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use thiserror::Error;

use crate::turn::{Ticket, Turn};

/// Free-form string attributes attached to an entry.
pub type Metadata = BTreeMap<String, String>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
	#[error("{id} not found")]
	NotFound { id: String },

	#[error("parent {id} not found")]
	InvalidParent { id: String },
}

/// Process-wide monotonic id source.
///
/// Shared by every registry of a tree so ids are unique across levels and
/// never reused after deletion.
#[derive(Debug, Default)]
pub struct IdGenerator {
	last: AtomicU64,
}

impl IdGenerator {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the next sequence number, starting at 1.
	pub fn next_seq(&self) -> u64 {
		self.last.fetch_add(1, Ordering::Relaxed) + 1
	}

	pub fn next_id(&self, kind: &str) -> (String, u64) {
		let seq = self.next_seq();
		(format!("{kind}-{seq}"), seq)
	}
}

/// Public snapshot of an entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
	pub id: String,
	pub kind: String,
	pub parent_id: Option<String>,
	/// Unix seconds.
	pub created_at: u64,
	pub metadata: Metadata,
}

/// One live resource.
#[derive(Debug)]
pub struct ResourceEntry<H> {
	id: String,
	kind: String,
	parent_id: Option<String>,
	seq: u64,
	created_at: u64,
	metadata: Metadata,
	pub(crate) handle: Arc<H>,
	turn: Turn,
	/// Token of the cascade close that owns this entry, if any.
	closing: Option<u64>,
}

impl<H> ResourceEntry<H> {
	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn kind(&self) -> &str {
		&self.kind
	}

	pub fn parent_id(&self) -> Option<&str> {
		self.parent_id.as_deref()
	}

	pub fn created_at(&self) -> u64 {
		self.created_at
	}

	pub fn metadata(&self) -> &Metadata {
		&self.metadata
	}

	pub(crate) fn metadata_mut(&mut self) -> &mut Metadata {
		&mut self.metadata
	}

	pub(crate) fn reserve(&mut self) -> Ticket {
		self.turn.reserve()
	}

	/// True once a cascade close has claimed this entry.
	pub fn is_closing(&self) -> bool {
		self.closing.is_some()
	}

	pub(crate) fn closing(&self) -> Option<u64> {
		self.closing
	}

	pub(crate) fn set_closing(&mut self, token: Option<u64>) {
		self.closing = token;
	}

	pub fn info(&self) -> ResourceInfo {
		ResourceInfo {
			id: self.id.clone(),
			kind: self.kind.clone(),
			parent_id: self.parent_id.clone(),
			created_at: self.created_at,
			metadata: self.metadata.clone(),
		}
	}
}

/// Entries of a single kind.
#[derive(Debug)]
pub struct Registry<H> {
	kind: String,
	ids: Arc<IdGenerator>,
	entries: HashMap<String, ResourceEntry<H>>,
}

impl<H> Registry<H> {
	pub fn new(kind: impl Into<String>, ids: Arc<IdGenerator>) -> Self {
		Self {
			kind: kind.into(),
			ids,
			entries: HashMap::new(),
		}
	}

	pub fn kind(&self) -> &str {
		&self.kind
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn contains(&self, id: &str) -> bool {
		self.entries.contains_key(id)
	}

	/// Registers a handle and returns its new id.
	///
	/// `parent_id` must resolve in `parents`; a top-level registry passes
	/// `None` for both.
	pub fn create(
		&mut self,
		parent_id: Option<&str>,
		parents: Option<&Registry<H>>,
		handle: H,
		metadata: Metadata,
	) -> Result<String, RegistryError> {
		if let Some(parent_id) = parent_id {
			let known = parents.is_some_and(|parents| parents.contains(parent_id));
			if !known {
				return Err(RegistryError::InvalidParent {
					id: parent_id.to_owned(),
				});
			}
		}

		let (id, seq) = self.ids.next_id(&self.kind);
		let entry = ResourceEntry {
			id: id.clone(),
			kind: self.kind.clone(),
			parent_id: parent_id.map(str::to_owned),
			seq,
			created_at: now_ts(),
			metadata,
			handle: Arc::new(handle),
			turn: Turn::new(),
			closing: None,
		};
		self.entries.insert(id.clone(), entry);
		Ok(id)
	}

	pub fn get(&self, id: &str) -> Result<&ResourceEntry<H>, RegistryError> {
		self.entries
			.get(id)
			.ok_or_else(|| RegistryError::NotFound { id: id.to_owned() })
	}

	pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut ResourceEntry<H>> {
		self.entries.get_mut(id)
	}

	/// Removes one entry. Unknown ids are a no-op reporting nothing deleted.
	pub fn delete(&mut self, id: &str) -> Vec<String> {
		self.entries.remove(id).map(|entry| entry.id).into_iter().collect()
	}

	/// Entries whose parent is `parent_id`, in insertion order.
	pub fn list_by_parent(&self, parent_id: Option<&str>) -> Vec<&ResourceEntry<H>> {
		let mut children: Vec<_> = self
			.entries
			.values()
			.filter(|entry| entry.parent_id.as_deref() == parent_id)
			.collect();
		children.sort_by_key(|entry| entry.seq);
		children
	}

	/// Clears the closing mark of every entry claimed by `token`.
	pub(crate) fn release_closing(&mut self, token: u64) {
		for entry in self.entries.values_mut() {
			if entry.closing == Some(token) {
				entry.closing = None;
			}
		}
	}

	/// All entries in insertion order.
	pub fn iter(&self) -> impl Iterator<Item = &ResourceEntry<H>> {
		let mut all: Vec<_> = self.entries.values().collect();
		all.sort_by_key(|entry| entry.seq);
		all.into_iter()
	}
}

fn now_ts() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or(0)
}
