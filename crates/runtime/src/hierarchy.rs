//! Fixed level names of a session tree.

use crate::error::{Error, Result};

/// Deepest supported tree.
pub const MAX_LEVELS: usize = 3;

/// Ordered level names, top first. Between one and [`MAX_LEVELS`] entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hierarchy {
	levels: Vec<String>,
}

impl Hierarchy {
	pub fn new<I, S>(levels: I) -> Result<Self>
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let levels: Vec<String> = levels.into_iter().map(Into::into).collect();

		if levels.is_empty() || levels.len() > MAX_LEVELS {
			return Err(Error::InvalidHierarchy(format!(
				"expected 1 to {MAX_LEVELS} levels, got {}",
				levels.len()
			)));
		}

		for (i, name) in levels.iter().enumerate() {
			let valid = !name.is_empty()
				&& name
					.chars()
					.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
			if !valid {
				return Err(Error::InvalidHierarchy(format!("invalid level name {name:?}")));
			}
			if levels[..i].contains(name) {
				return Err(Error::InvalidHierarchy(format!("duplicate level name {name:?}")));
			}
		}

		Ok(Self { levels })
	}

	pub fn len(&self) -> usize {
		self.levels.len()
	}

	pub fn is_empty(&self) -> bool {
		self.levels.is_empty()
	}

	pub fn kind(&self, depth: usize) -> Option<&str> {
		self.levels.get(depth).map(String::as_str)
	}

	pub fn depth_of(&self, kind: &str) -> Option<usize> {
		self.levels.iter().position(|level| level == kind)
	}

	pub fn parent_kind(&self, depth: usize) -> Option<&str> {
		depth.checked_sub(1).and_then(|d| self.kind(d))
	}

	pub fn child_kind(&self, depth: usize) -> Option<&str> {
		self.kind(depth + 1)
	}

	pub fn iter(&self) -> impl Iterator<Item = &str> {
		self.levels.iter().map(String::as_str)
	}
}
