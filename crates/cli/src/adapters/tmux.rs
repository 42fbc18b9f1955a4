//! tmux driver: sessions contain windows, windows contain panes.
//!
//! Every call shells out to the `tmux` binary with an argv vector; nothing is
//! ever passed through a shell. Resources are addressed by tmux's own unique
//! ids (`$3`, `@7`, `%12`), captured at creation with `-P -F`.
//!
//! A create with an `attach` option adopts a target that already exists
//! instead of starting one. Closing an adopted resource only forgets it; the
//! tmux object is left running.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{Value, json};
use tether_runtime::{Driver, DriverError, DriverResult, Outcome, Spawned};
use tokio::process::Command;
use tracing::{debug, info};

const OPERATIONS: &[&str] = &["send", "read", "info"];
const DEFAULT_READ_LINES: u64 = 100;
const PANE_FORMAT: &str = "#{pane_id}:#{pane_index}:#{pane_current_command}:#{pane_pid}:#{pane_width}:#{pane_height}:#{pane_active}:#{pane_current_path}";
/// Session name goes last so it may contain colons.
const SESSION_FORMAT: &str = "#{session_id}:#{session_created}:#{session_attached}:#{session_windows}:#{session_name}";
const LOCATE_FORMAT: &str = "#{session_id}:#{window_id}:#{pane_id}";
/// Create options that only make sense when starting something new.
const SPAWN_ONLY: &[&str] = &["name", "directory", "command", "direction", "percentage"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TmuxLevel {
	Session,
	Window,
	Pane,
}

impl TmuxLevel {
	pub fn from_depth(depth: usize) -> Option<Self> {
		match depth {
			0 => Some(Self::Session),
			1 => Some(Self::Window),
			2 => Some(Self::Pane),
			_ => None,
		}
	}

	fn kill_command(self) -> &'static str {
		match self {
			Self::Session => "kill-session",
			Self::Window => "kill-window",
			Self::Pane => "kill-pane",
		}
	}

	fn id_format(self) -> &'static str {
		match self {
			Self::Session => "#{session_id}",
			Self::Window => "#{window_id}",
			Self::Pane => "#{pane_id}",
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TmuxHandle {
	pub level: TmuxLevel,
	/// tmux unique id usable as `-t` target.
	pub target: String,
	/// Existed before it was attached; closing leaves it running.
	pub adopted: bool,
}

#[derive(Debug, Clone)]
pub struct TmuxDriver {
	binary: PathBuf,
}

impl TmuxDriver {
	pub fn new(binary: impl Into<PathBuf>) -> Self {
		Self {
			binary: binary.into(),
		}
	}

	/// Resolves the binary through `PATH` (or checks an explicit path).
	pub fn locate(explicit: Option<&Path>) -> Result<Self, which::Error> {
		let binary = match explicit {
			Some(path) => which::which(path)?,
			None => which::which("tmux")?,
		};
		Ok(Self::new(binary))
	}

	pub fn binary(&self) -> &Path {
		&self.binary
	}

	async fn tmux(&self, args: &[String]) -> DriverResult<String> {
		debug!(target: "tether.tmux", ?args, "exec");
		let output = Command::new(&self.binary)
			.args(args)
			.stdin(Stdio::null())
			.kill_on_drop(true)
			.output()
			.await?;

		if !output.status.success() {
			let stderr = String::from_utf8_lossy(&output.stderr);
			let verb = args.first().map(String::as_str).unwrap_or("tmux");
			return Err(DriverError::failure(format!("tmux {verb}: {}", stderr.trim())));
		}
		Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_owned())
	}

	async fn spawn(&self, level: TmuxLevel, parent: Option<&str>, options: &Value) -> DriverResult<Spawned<TmuxHandle>> {
		if let Some(args) = attach_args(level, parent, options)? {
			let located = self.tmux(&args).await?;
			let target = adopted_target(level, parent, &located)?;
			info!(target: "tether.tmux", tmux_id = %target, "adopted existing target");
			let handle = TmuxHandle {
				level,
				target: target.clone(),
				adopted: true,
			};
			return Ok(Spawned::new(handle)
				.with_meta("target", target)
				.with_meta("adopted", "true"));
		}

		let args = spawn_args(level, parent, options)?;
		let target = self.tmux(&args).await?;
		if target.is_empty() {
			return Err(DriverError::failure("tmux did not report the new target"));
		}

		let mut spawned = Spawned::new(TmuxHandle {
			level,
			target: target.clone(),
			adopted: false,
		})
		.with_meta("target", target);
		if let Some(name) = options.get("name").and_then(Value::as_str) {
			spawned = spawned.with_meta("name", name);
		}
		Ok(spawned)
	}
}

fn str_option<'a>(options: &'a Value, key: &str) -> DriverResult<Option<&'a str>> {
	match options.get(key) {
		None | Some(Value::Null) => Ok(None),
		Some(Value::String(s)) => Ok(Some(s)),
		Some(_) => Err(DriverError::InvalidArgs(format!("{key} must be a string"))),
	}
}

/// argv resolving the existing target named by the `attach` option, or
/// `None` when a new resource should be started.
///
/// Relative names are qualified by the parent (`$3:2`, `@7.1`); unique ids
/// are used as given and checked against the parent afterwards.
pub fn attach_args(level: TmuxLevel, parent: Option<&str>, options: &Value) -> DriverResult<Option<Vec<String>>> {
	let Some(attach) = str_option(options, "attach")? else {
		return Ok(None);
	};
	if let Some(key) = SPAWN_ONLY.iter().find(|key| !options[**key].is_null()) {
		return Err(DriverError::InvalidArgs(format!("attach cannot be combined with {key}")));
	}

	let target = match (level, parent) {
		(TmuxLevel::Session, _) => attach.to_owned(),
		(TmuxLevel::Window, Some(parent)) if !attach.starts_with('@') => format!("{parent}:{attach}"),
		(TmuxLevel::Pane, Some(parent)) if !attach.starts_with('%') => format!("{parent}.{attach}"),
		(_, Some(_)) => attach.to_owned(),
		(_, None) => return Err(DriverError::InvalidArgs("missing parent target".into())),
	};
	Ok(Some(vec![
		"display-message".into(),
		"-p".into(),
		"-t".into(),
		target,
		LOCATE_FORMAT.into(),
	]))
}

/// Picks the unique id for `level` out of a [`LOCATE_FORMAT`] line and makes
/// sure it sits under `parent`.
pub fn adopted_target(level: TmuxLevel, parent: Option<&str>, line: &str) -> DriverResult<String> {
	let ids: Vec<&str> = line.trim().split(':').collect();
	let [session, window, pane] = ids.as_slice() else {
		return Err(DriverError::failure(format!("unexpected target info: {line:?}")));
	};
	let (own, owner) = match level {
		TmuxLevel::Session => (*session, None),
		TmuxLevel::Window => (*window, Some(*session)),
		TmuxLevel::Pane => (*pane, Some(*window)),
	};
	match (parent, owner) {
		(Some(parent), Some(owner)) if parent != owner => Err(DriverError::InvalidArgs(format!(
			"{own} belongs to {owner}, not {parent}"
		))),
		_ => Ok(own.to_owned()),
	}
}

/// argv for creating a resource at `level` under `parent`.
pub fn spawn_args(level: TmuxLevel, parent: Option<&str>, options: &Value) -> DriverResult<Vec<String>> {
	let mut args: Vec<String> = match level {
		TmuxLevel::Session => vec!["new-session".into(), "-d".into()],
		TmuxLevel::Window => vec!["new-window".into()],
		TmuxLevel::Pane => vec!["split-window".into()],
	};

	match (level, parent) {
		(TmuxLevel::Session, _) => {}
		// A bare session target would be read as a window index.
		(TmuxLevel::Window, Some(parent)) => args.extend(["-t".into(), format!("{parent}:")]),
		(TmuxLevel::Pane, Some(parent)) => args.extend(["-t".into(), parent.to_owned()]),
		(_, None) => return Err(DriverError::InvalidArgs("missing parent target".into())),
	}
	args.extend(["-P".into(), "-F".into(), level.id_format().into()]);

	if level != TmuxLevel::Pane {
		if let Some(name) = str_option(options, "name")? {
			let flag = if level == TmuxLevel::Session { "-s" } else { "-n" };
			args.extend([flag.into(), name.to_owned()]);
		}
	}

	if let Some(directory) = str_option(options, "directory")? {
		args.extend(["-c".into(), directory.to_owned()]);
	}

	if level == TmuxLevel::Pane {
		let split = match str_option(options, "direction")? {
			None | Some("horizontal") => "-v",
			Some("vertical") => "-h",
			Some(other) => {
				return Err(DriverError::InvalidArgs(format!(
					"direction must be horizontal or vertical, got {other:?}"
				)));
			}
		};
		args.push(split.into());

		if let Some(pct) = options.get("percentage") {
			match pct.as_u64() {
				Some(pct @ 1..=99) => args.extend(["-p".into(), pct.to_string()]),
				_ => return Err(DriverError::InvalidArgs("percentage must be between 1 and 99".into())),
			}
		}
	}

	if let Some(command) = str_option(options, "command")? {
		args.push(command.to_owned());
	}
	Ok(args)
}

/// argv for an operation against `target`.
pub fn op_args(op: &str, target: &str, args: &Value) -> DriverResult<Vec<String>> {
	match op {
		"send" => {
			let keys = str_option(args, "keys")?
				.ok_or_else(|| DriverError::InvalidArgs("missing string argument 'keys'".into()))?;
			let enter = args.get("enter").and_then(Value::as_bool).unwrap_or(true);
			// Keys starting with `-` must not be read as flags.
			let mut argv = vec![
				"send-keys".into(),
				"-t".into(),
				target.to_owned(),
				"--".into(),
				keys.to_owned(),
			];
			if enter {
				argv.push("Enter".into());
			}
			Ok(argv)
		}
		"read" => {
			let lines = args.get("lines").and_then(Value::as_u64).unwrap_or(DEFAULT_READ_LINES);
			let mut argv = vec!["capture-pane".into(), "-p".into(), "-t".into(), target.to_owned()];
			match args.get("startLine") {
				None | Some(Value::Null) => argv.extend(["-S".into(), format!("-{lines}")]),
				Some(start) => {
					let start = start.as_u64().ok_or_else(|| {
						DriverError::InvalidArgs("startLine must be a non-negative integer".into())
					})?;
					if lines == 0 {
						return Err(DriverError::InvalidArgs("lines must be positive with startLine".into()));
					}
					let end = start.saturating_add(lines - 1);
					argv.extend(["-S".into(), start.to_string(), "-E".into(), end.to_string()]);
				}
			}
			Ok(argv)
		}
		"info" => Ok(vec![
			"display-message".into(),
			"-p".into(),
			"-t".into(),
			target.to_owned(),
			PANE_FORMAT.into(),
		]),
		other => Err(DriverError::unsupported(other)),
	}
}

pub fn list_sessions_args() -> Vec<String> {
	vec!["list-sessions".into(), "-F".into(), SESSION_FORMAT.into()]
}

/// Every pane on the server, prefixed with its session and window ids.
pub fn list_panes_args() -> Vec<String> {
	vec![
		"list-panes".into(),
		"-a".into(),
		"-F".into(),
		format!("#{{session_id}}:#{{window_id}}:{PANE_FORMAT}"),
	]
}

/// Builds the `list` answer from [`list_sessions_args`] output and, when
/// detailed, [`list_panes_args`] output grouped into windows.
pub fn parse_listing(sessions: &str, panes: Option<&str>) -> DriverResult<Value> {
	let mut listed = Vec::new();
	for line in sessions.lines().filter(|line| !line.is_empty()) {
		let fields: Vec<&str> = line.splitn(5, ':').collect();
		let [id, created, attached, windows, name] = fields.as_slice() else {
			return Err(DriverError::failure(format!("unexpected session info: {line:?}")));
		};
		let mut session = json!({
			"id": id,
			"name": name,
			"created": created.parse::<u64>().ok(),
			"attached": *attached != "0",
			"windowCount": windows.parse::<u64>().ok(),
		});
		if panes.is_some() {
			session["windows"] = json!([]);
		}
		listed.push(session);
	}

	for line in panes.unwrap_or_default().lines().filter(|line| !line.is_empty()) {
		let Some((session_id, rest)) = line.split_once(':') else {
			return Err(DriverError::failure(format!("unexpected pane listing: {line:?}")));
		};
		let Some((window_id, pane)) = rest.split_once(':') else {
			return Err(DriverError::failure(format!("unexpected pane listing: {line:?}")));
		};
		let pane = parse_pane_info(pane)?;

		let windows = listed
			.iter_mut()
			.find(|session| session["id"] == session_id)
			.and_then(|session| session["windows"].as_array_mut());
		// Session opened between the two listings.
		let Some(windows) = windows else {
			continue;
		};
		match windows.iter_mut().find(|window| window["id"] == window_id) {
			Some(window) => {
				if let Some(panes) = window["panes"].as_array_mut() {
					panes.push(pane);
				}
			}
			None => windows.push(json!({ "id": window_id, "panes": [pane] })),
		}
	}

	Ok(json!({ "sessions": listed }))
}

/// Parses a line produced by [`PANE_FORMAT`].
pub fn parse_pane_info(line: &str) -> DriverResult<Value> {
	let fields: Vec<&str> = line.splitn(8, ':').collect();
	let [id, index, command, pid, width, height, active, path] = fields.as_slice() else {
		return Err(DriverError::failure(format!("unexpected pane info: {line:?}")));
	};
	let number = |s: &str| s.parse::<u64>().ok();
	Ok(json!({
		"id": id,
		"index": number(*index),
		"command": command,
		"pid": number(*pid),
		"width": number(*width),
		"height": number(*height),
		"active": *active == "1",
		"currentPath": path,
	}))
}

#[async_trait]
impl Driver for TmuxDriver {
	type Handle = TmuxHandle;

	fn name(&self) -> &str {
		"tmux"
	}

	fn levels(&self) -> Vec<String> {
		vec!["session".into(), "window".into(), "pane".into()]
	}

	fn operations(&self, _depth: usize) -> &'static [&'static str] {
		OPERATIONS
	}

	fn queries(&self) -> &'static [&'static str] {
		&["list"]
	}

	async fn query(&self, op: &str, args: Value) -> DriverResult<Value> {
		if op != "list" {
			return Err(DriverError::unsupported(op));
		}
		let detailed = args.get("detailed").and_then(Value::as_bool).unwrap_or(false);
		let sessions = match self.tmux(&list_sessions_args()).await {
			Ok(out) => out,
			Err(DriverError::Failure(message)) if message.contains("no server running") => {
				return Ok(json!({ "sessions": [] }));
			}
			Err(err) => return Err(err),
		};
		let panes = if detailed {
			Some(self.tmux(&list_panes_args()).await?)
		} else {
			None
		};
		parse_listing(&sessions, panes.as_deref())
	}

	async fn spawn_top(&self, options: &Value) -> DriverResult<Spawned<TmuxHandle>> {
		self.spawn(TmuxLevel::Session, None, options).await
	}

	async fn spawn_child(&self, parent: &TmuxHandle, depth: usize, options: &Value) -> DriverResult<Spawned<TmuxHandle>> {
		let level = TmuxLevel::from_depth(depth).ok_or_else(|| DriverError::unsupported("create"))?;
		self.spawn(level, Some(&parent.target), options).await
	}

	async fn invoke(&self, handle: &TmuxHandle, op: &str, args: Value) -> DriverResult<Outcome> {
		let argv = op_args(op, &handle.target, &args)?;
		let out = self.tmux(&argv).await?;
		let value = match op {
			"send" => json!({ "sent": true, "target": handle.target }),
			"read" => json!({ "content": out, "lines": out.lines().count() }),
			_ => parse_pane_info(&out)?,
		};
		Ok(Outcome::value(value))
	}

	async fn close(&self, handle: &TmuxHandle) -> DriverResult<()> {
		if handle.adopted {
			debug!(target: "tether.tmux", tmux_id = %handle.target, "releasing adopted target");
			return Ok(());
		}
		let argv = vec![
			handle.level.kill_command().to_owned(),
			"-t".into(),
			handle.target.clone(),
		];
		self.tmux(&argv).await.map(|_| ())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_session_args() {
		let args = spawn_args(
			TmuxLevel::Session,
			None,
			&json!({ "name": "dev", "directory": "/tmp", "command": "htop" }),
		)
		.unwrap();
		assert_eq!(
			args,
			["new-session", "-d", "-P", "-F", "#{session_id}", "-s", "dev", "-c", "/tmp", "htop"]
		);
	}

	#[test]
	fn test_window_targets_session() {
		let args = spawn_args(TmuxLevel::Window, Some("$3"), &json!({ "name": "logs" })).unwrap();
		assert_eq!(args, ["new-window", "-t", "$3:", "-P", "-F", "#{window_id}", "-n", "logs"]);
	}

	#[test]
	fn test_split_direction_and_percentage() {
		let args = spawn_args(
			TmuxLevel::Pane,
			Some("@7"),
			&json!({ "direction": "vertical", "percentage": 30 }),
		)
		.unwrap();
		assert_eq!(args, ["split-window", "-t", "@7", "-P", "-F", "#{pane_id}", "-h", "-p", "30"]);

		let args = spawn_args(TmuxLevel::Pane, Some("@7"), &json!({})).unwrap();
		assert!(args.contains(&"-v".to_owned()));
	}

	#[test]
	fn test_spawn_arg_validation() {
		assert!(spawn_args(TmuxLevel::Pane, Some("@1"), &json!({ "percentage": 100 })).is_err());
		assert!(spawn_args(TmuxLevel::Pane, Some("@1"), &json!({ "direction": "diagonal" })).is_err());
		assert!(spawn_args(TmuxLevel::Session, None, &json!({ "name": 5 })).is_err());
		assert!(spawn_args(TmuxLevel::Window, None, &json!({})).is_err());
	}

	#[test]
	fn test_send_keys_keeps_text_as_one_argument() {
		let args = op_args("send", "%4", &json!({ "keys": "echo \"hi\"; ls" })).unwrap();
		assert_eq!(args, ["send-keys", "-t", "%4", "--", "echo \"hi\"; ls", "Enter"]);

		let args = op_args("send", "%4", &json!({ "keys": "q", "enter": false })).unwrap();
		assert_eq!(args.last().map(String::as_str), Some("q"));
	}

	#[test]
	fn test_read_defaults_to_hundred_lines() {
		let args = op_args("read", "%4", &json!({})).unwrap();
		assert_eq!(args, ["capture-pane", "-p", "-t", "%4", "-S", "-100"]);
	}

	#[test]
	fn test_keys_starting_with_dash_follow_option_terminator() {
		let args = op_args("send", "%4", &json!({ "keys": "-h", "enter": false })).unwrap();
		assert_eq!(args, ["send-keys", "-t", "%4", "--", "-h"]);
	}

	#[test]
	fn test_read_from_start_line() {
		let args = op_args("read", "%4", &json!({ "startLine": 20, "lines": 10 })).unwrap();
		assert_eq!(args, ["capture-pane", "-p", "-t", "%4", "-S", "20", "-E", "29"]);

		let args = op_args("read", "%4", &json!({ "startLine": 0 })).unwrap();
		assert_eq!(&args[4..], ["-S", "0", "-E", "99"]);

		assert!(op_args("read", "%4", &json!({ "startLine": -1 })).is_err());
		assert!(op_args("read", "%4", &json!({ "startLine": 5, "lines": 0 })).is_err());
	}

	#[test]
	fn test_list_args() {
		assert_eq!(list_sessions_args(), ["list-sessions", "-F", SESSION_FORMAT]);
		let panes = list_panes_args();
		assert_eq!(&panes[..3], ["list-panes", "-a", "-F"]);
		assert_eq!(panes[3], format!("#{{session_id}}:#{{window_id}}:{PANE_FORMAT}"));
	}

	#[test]
	fn test_parse_listing_groups_panes_by_window() {
		let sessions = "$0:1700000000:1:2:main\n$1:1700000100:0:1:work:ing";
		let brief = parse_listing(sessions, None).unwrap();
		assert_eq!(brief["sessions"][1]["name"], "work:ing");
		assert_eq!(brief["sessions"][0]["attached"], true);
		assert_eq!(brief["sessions"][0]["windowCount"], 2);
		assert!(brief["sessions"][0].get("windows").is_none());

		let panes = "$0:@0:%0:0:zsh:10:80:24:1:/home\n$0:@0:%1:1:vim:11:80:24:0:/home\n$0:@1:%2:0:top:12:80:24:1:/\n$9:@9:%9:0:sh:1:1:1:1:/";
		let detailed = parse_listing(sessions, Some(panes)).unwrap();
		let windows = &detailed["sessions"][0]["windows"];
		assert_eq!(windows.as_array().map(Vec::len), Some(2));
		assert_eq!(windows[0]["id"], "@0");
		assert_eq!(windows[0]["panes"][1]["command"], "vim");
		assert_eq!(windows[1]["panes"][0]["id"], "%2");
		assert_eq!(detailed["sessions"][1]["windows"], json!([]));

		assert!(parse_listing("garbage", None).is_err());
	}

	#[test]
	fn test_attach_qualifies_relative_targets() {
		let args = attach_args(TmuxLevel::Session, None, &json!({ "attach": "main" })).unwrap();
		assert_eq!(
			args,
			Some(vec![
				"display-message".to_owned(),
				"-p".into(),
				"-t".into(),
				"main".into(),
				LOCATE_FORMAT.into(),
			])
		);

		let window = attach_args(TmuxLevel::Window, Some("$3"), &json!({ "attach": "2" })).unwrap();
		assert_eq!(window.unwrap()[3], "$3:2");
		let pane = attach_args(TmuxLevel::Pane, Some("@7"), &json!({ "attach": "1" })).unwrap();
		assert_eq!(pane.unwrap()[3], "@7.1");
		let unique = attach_args(TmuxLevel::Pane, Some("@7"), &json!({ "attach": "%12" })).unwrap();
		assert_eq!(unique.unwrap()[3], "%12");

		assert_eq!(attach_args(TmuxLevel::Pane, Some("@7"), &json!({})).unwrap(), None);
		assert!(attach_args(TmuxLevel::Session, None, &json!({ "attach": "main", "name": "x" })).is_err());
	}

	#[test]
	fn test_adopted_target_must_sit_under_parent() {
		assert_eq!(adopted_target(TmuxLevel::Session, None, "$3:@7:%12\n").unwrap(), "$3");
		assert_eq!(adopted_target(TmuxLevel::Pane, Some("@7"), "$3:@7:%12").unwrap(), "%12");
		assert!(matches!(
			adopted_target(TmuxLevel::Window, Some("$1"), "$3:@7:%12"),
			Err(DriverError::InvalidArgs(_))
		));
		assert!(adopted_target(TmuxLevel::Pane, Some("@7"), "%12").is_err());
	}

	#[tokio::test]
	async fn test_closing_adopted_target_runs_nothing() {
		let driver = TmuxDriver::new("/nonexistent/tmux");
		let handle = TmuxHandle {
			level: TmuxLevel::Session,
			target: "$3".into(),
			adopted: true,
		};
		assert!(driver.close(&handle).await.is_ok());
	}

	#[test]
	fn test_unknown_op_is_unsupported() {
		assert!(matches!(
			op_args("resize", "%4", &json!({})),
			Err(DriverError::Unsupported { .. })
		));
	}

	#[test]
	fn test_parse_pane_info_keeps_colons_in_path() {
		let info = parse_pane_info("%4:0:zsh:4242:80:24:1:/home/me/a:b").unwrap();
		assert_eq!(info["id"], "%4");
		assert_eq!(info["pid"], 4242);
		assert_eq!(info["active"], true);
		assert_eq!(info["currentPath"], "/home/me/a:b");
		assert!(parse_pane_info("garbage").is_err());
	}

	#[test]
	fn test_levels_match_depths() {
		let driver = TmuxDriver::new("tmux");
		assert_eq!(driver.levels(), ["session", "window", "pane"]);
		assert_eq!(TmuxLevel::from_depth(2), Some(TmuxLevel::Pane));
		assert_eq!(TmuxLevel::from_depth(3), None);
	}
}
