use std::collections::{btree_map, BTreeMap};

use super::{
	error::{Error, Result},
	handle::WatchHandle,
};

/// Associates each live [`WatchHandle`] with the consumer's own identity for it.
///
/// Only ever touched from the consumer context, so it carries no synchronization. A handle is
/// registered at most once: adding it again is refused instead of replacing the first owner.
#[derive(Debug)]
pub struct HandleRegistry<I> {
	entries: BTreeMap<WatchHandle, I>,
}

impl<I> Default for HandleRegistry<I> {
	fn default() -> Self {
		Self {
			entries: BTreeMap::new(),
		}
	}
}

impl<I> HandleRegistry<I> {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub fn add(&mut self, handle: WatchHandle, identity: I) -> Result<()> {
		match self.entries.entry(handle) {
			btree_map::Entry::Occupied(_) => Err(Error::DuplicateHandle(handle)),
			btree_map::Entry::Vacant(entry) => {
				entry.insert(identity);
				Ok(())
			}
		}
	}

	pub fn get(&self, handle: WatchHandle) -> Result<&I> {
		self.entries
			.get(&handle)
			.ok_or(Error::UnknownHandle(handle))
	}

	pub fn get_mut(&mut self, handle: WatchHandle) -> Result<&mut I> {
		self.entries
			.get_mut(&handle)
			.ok_or(Error::UnknownHandle(handle))
	}

	#[must_use]
	pub fn has(&self, handle: WatchHandle) -> bool {
		self.entries.contains_key(&handle)
	}

	/// Removes the entry and hands ownership of its identity back to the caller.
	pub fn remove(&mut self, handle: WatchHandle) -> Result<I> {
		self.entries
			.remove(&handle)
			.ok_or(Error::UnknownHandle(handle))
	}

	/// Identities in handle order.
	pub fn values(&self) -> impl Iterator<Item = &I> + '_ {
		self.entries.values()
	}

	pub fn iter(&self) -> impl Iterator<Item = (WatchHandle, &I)> + '_ {
		self.entries.iter().map(|(handle, identity)| (*handle, identity))
	}

	pub fn handles(&self) -> impl Iterator<Item = WatchHandle> + '_ {
		self.entries.keys().copied()
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn clear(&mut self) {
		self.entries.clear();
	}
}
