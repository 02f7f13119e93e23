use std::borrow::Cow;

use serde::Serialize;
use strum::{AsRefStr, Display, EnumString};

use super::handle::WatchHandle;

#[derive(
	Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, AsRefStr, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum EventKind {
	/// Content or attributes of the watched path changed
	Change,
	/// The watched path was deleted
	Delete,
	/// The watched path itself moved away
	Rename,
	ChildCreate,
	ChildChange,
	ChildDelete,
	/// An entry was renamed inside (or moved into) the watched directory
	ChildRename,
	/// Raw records that match no known kind. Backends drop these, they never reach a consumer.
	Unknown,
}

/// Platform independent description of one filesystem change.
///
/// Paths are kept as the raw bytes the OS reported, they are usually entry names relative to the
/// watched directory and are empty when the change concerns the watched path itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CanonicalEvent {
	kind: EventKind,
	handle: WatchHandle,
	new_path: Vec<u8>,
	old_path: Vec<u8>,
}

impl CanonicalEvent {
	#[must_use]
	pub const fn new(kind: EventKind, handle: WatchHandle) -> Self {
		Self {
			kind,
			handle,
			new_path: Vec::new(),
			old_path: Vec::new(),
		}
	}

	#[must_use]
	pub fn with_new_path(mut self, new_path: impl Into<Vec<u8>>) -> Self {
		self.new_path = new_path.into();
		self
	}

	#[must_use]
	pub fn with_old_path(mut self, old_path: impl Into<Vec<u8>>) -> Self {
		self.old_path = old_path.into();
		self
	}

	#[must_use]
	pub const fn kind(&self) -> EventKind {
		self.kind
	}

	#[must_use]
	pub const fn handle(&self) -> WatchHandle {
		self.handle
	}

	#[must_use]
	pub fn new_path(&self) -> &[u8] {
		&self.new_path
	}

	#[must_use]
	pub fn old_path(&self) -> &[u8] {
		&self.old_path
	}

	#[must_use]
	pub fn new_path_lossy(&self) -> Cow<'_, str> {
		String::from_utf8_lossy(&self.new_path)
	}

	#[must_use]
	pub fn old_path_lossy(&self) -> Cow<'_, str> {
		String::from_utf8_lossy(&self.old_path)
	}
}

#[cfg(test)]
mod tests {
	use std::str::FromStr;

	use super::*;

	use crate::handle::Platform;

	#[test]
	fn kinds_use_kebab_case_names() {
		assert_eq!(EventKind::Change.to_string(), "change");
		assert_eq!(EventKind::ChildRename.as_ref(), "child-rename");
		assert_eq!(
			EventKind::from_str("child-delete").ok(),
			Some(EventKind::ChildDelete)
		);
		assert!(EventKind::from_str("moved").is_err());
	}

	#[test]
	fn paths_default_to_empty() {
		let event = CanonicalEvent::new(EventKind::Change, WatchHandle::new(Platform::Inotify, 7));

		assert!(event.new_path().is_empty());
		assert!(event.old_path().is_empty());

		let event = event.with_new_path("b.txt");
		assert_eq!(event.new_path_lossy(), "b.txt");
		assert_eq!(event.old_path_lossy(), "");
	}
}
