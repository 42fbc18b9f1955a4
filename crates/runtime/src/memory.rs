//! In-process driver with no external program behind it.
//!
//! Each handle is a text buffer. It stands in for the browser and editor
//! adapters when running the server without a real program, and backs the
//! test suites.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::driver::{Driver, DriverError, DriverResult, Outcome, Spawned};

const OPERATIONS: &[&str] = &["write", "read", "clear", "echo", "navigate", "sleep", "fail"];

/// Live state of one memory resource.
#[derive(Debug)]
pub struct MemoryHandle {
	buffer: Mutex<String>,
	alive: Arc<AtomicBool>,
	/// Liveness flags of every ancestor, top first.
	lineage: Vec<Arc<AtomicBool>>,
	fail_on_close: bool,
}

impl MemoryHandle {
	fn new(lineage: Vec<Arc<AtomicBool>>, fail_on_close: bool) -> Self {
		Self {
			buffer: Mutex::new(String::new()),
			alive: Arc::new(AtomicBool::new(true)),
			lineage,
			fail_on_close,
		}
	}

	/// False once this handle or any ancestor has been closed.
	pub fn is_live(&self) -> bool {
		self.alive.load(Ordering::SeqCst) && self.lineage.iter().all(|a| a.load(Ordering::SeqCst))
	}

	pub fn contents(&self) -> String {
		self.buffer.lock().clone()
	}
}

#[derive(Debug, Clone)]
pub struct MemoryDriver {
	levels: Vec<String>,
}

impl Default for MemoryDriver {
	fn default() -> Self {
		Self::new(["instance", "context", "surface"])
	}
}

impl MemoryDriver {
	pub fn new<I, S>(levels: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			levels: levels.into_iter().map(Into::into).collect(),
		}
	}

	fn spawn(&self, lineage: Vec<Arc<AtomicBool>>, options: &Value) -> DriverResult<Spawned<MemoryHandle>> {
		if let Some(message) = options.get("fail").and_then(Value::as_str) {
			return Err(DriverError::failure(message));
		}
		let fail_on_close = options
			.get("failOnClose")
			.and_then(Value::as_bool)
			.unwrap_or(false);

		let mut spawned = Spawned::new(MemoryHandle::new(lineage, fail_on_close));
		if let Some(label) = options.get("label").and_then(Value::as_str) {
			spawned = spawned.with_meta("label", label);
		}
		Ok(spawned)
	}
}

fn str_arg<'a>(args: &'a Value, key: &str) -> DriverResult<&'a str> {
	args.get(key)
		.and_then(Value::as_str)
		.ok_or_else(|| DriverError::InvalidArgs(format!("missing string argument '{key}'")))
}

#[async_trait]
impl Driver for MemoryDriver {
	type Handle = MemoryHandle;

	fn name(&self) -> &str {
		"memory"
	}

	fn levels(&self) -> Vec<String> {
		self.levels.clone()
	}

	fn operations(&self, _depth: usize) -> &'static [&'static str] {
		OPERATIONS
	}

	fn queries(&self) -> &'static [&'static str] {
		&["status"]
	}

	async fn query(&self, op: &str, _args: Value) -> DriverResult<Value> {
		match op {
			"status" => Ok(json!({ "driver": "memory", "levels": self.levels })),
			other => Err(DriverError::unsupported(other)),
		}
	}

	async fn spawn_top(&self, options: &Value) -> DriverResult<Spawned<MemoryHandle>> {
		self.spawn(Vec::new(), options)
	}

	async fn spawn_child(
		&self,
		parent: &MemoryHandle,
		_depth: usize,
		options: &Value,
	) -> DriverResult<Spawned<MemoryHandle>> {
		if !parent.is_live() {
			return Err(DriverError::Closed);
		}
		let mut lineage = parent.lineage.clone();
		lineage.push(parent.alive.clone());
		self.spawn(lineage, options)
	}

	async fn invoke(&self, handle: &MemoryHandle, op: &str, args: Value) -> DriverResult<Outcome> {
		if !handle.is_live() {
			return Err(DriverError::Closed);
		}

		match op {
			"write" => {
				let text = str_arg(&args, "text")?;
				handle.buffer.lock().push_str(text);
				Ok(Outcome::value(json!({ "written": text.len() })))
			}
			"read" => Ok(Outcome::value(json!({ "text": handle.contents() }))),
			"clear" => {
				let cleared = std::mem::take(&mut *handle.buffer.lock()).len();
				Ok(Outcome::value(json!({ "cleared": cleared })))
			}
			"echo" => Ok(Outcome::value(args)),
			"navigate" => {
				let url = str_arg(&args, "url")?;
				Ok(Outcome::value(json!({ "url": url })).with_meta("url", url))
			}
			"sleep" => {
				let ms = args.get("ms").and_then(Value::as_u64).unwrap_or(0);
				tokio::time::sleep(Duration::from_millis(ms)).await;
				Ok(Outcome::value(json!({ "slept": ms })))
			}
			"fail" => {
				let message = args
					.get("message")
					.and_then(Value::as_str)
					.unwrap_or("requested failure");
				Err(DriverError::failure(message))
			}
			other => Err(DriverError::unsupported(other)),
		}
	}

	async fn close(&self, handle: &MemoryHandle) -> DriverResult<()> {
		if !handle.is_live() {
			return Err(DriverError::Closed);
		}
		handle.alive.store(false, Ordering::SeqCst);
		if handle.fail_on_close {
			return Err(DriverError::failure("close refused"));
		}
		Ok(())
	}
}
