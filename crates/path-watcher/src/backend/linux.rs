//! Linux inotify backend
//!
//! One inotify instance serves the whole process. The consumer side keeps a [`Watches`] handle to
//! add and remove watch descriptors, the watcher thread owns the instance itself and blocks on it.

use std::{collections::HashMap, ffi::OsStr, io, os::unix::ffi::OsStrExt, path::Path};

use inotify::{EventMask, Inotify, WatchDescriptor, WatchMask, Watches};
use tracing::{debug, warn};

use super::{Backend, EventSource, Termination};
use crate::{
	config::WatcherConfig,
	error::{Error, Result},
	event::{CanonicalEvent, EventKind},
	handle::{Platform, WatchHandle},
	rendezvous::Producer,
};

fn watch_mask() -> WatchMask {
	WatchMask::ATTRIB
		| WatchMask::CREATE
		| WatchMask::DELETE
		| WatchMask::MODIFY
		| WatchMask::MOVED_TO
		| WatchMask::MOVE_SELF
		| WatchMask::DELETE_SELF
}

#[derive(Debug)]
pub struct InotifyBackend {
	watches: Watches,
	descriptors: HashMap<i32, WatchDescriptor>,
}

#[derive(Debug)]
pub struct InotifySource {
	inotify: Inotify,
	buffer: Vec<u8>,
}

impl Backend for InotifyBackend {
	type Source = InotifySource;

	const PLATFORM: Platform = Platform::Inotify;

	fn init(config: &WatcherConfig) -> Result<(Self, Self::Source)> {
		let inotify = Inotify::init().map_err(Error::BackendUnavailable)?;

		Ok((
			Self {
				watches: inotify.watches(),
				descriptors: HashMap::new(),
			},
			InotifySource {
				inotify,
				buffer: vec![0; config.read_buffer_size],
			},
		))
	}

	fn watch(&mut self, path: &Path) -> Result<WatchHandle> {
		let wd = self
			.watches
			.add(path, watch_mask())
			.map_err(|e| classify_watch_error(path, e))?;

		let id = wd.get_watch_descriptor_id();
		self.descriptors.insert(id, wd);

		Ok(to_handle(id))
	}

	fn unwatch(&mut self, handle: WatchHandle) -> io::Result<()> {
		let Some(wd) = i32::try_from(handle.raw())
			.ok()
			.and_then(|id| self.descriptors.remove(&id))
		else {
			return Err(io::Error::new(
				io::ErrorKind::NotFound,
				format!("no inotify watch descriptor for <handle='{handle}'>"),
			));
		};

		match self.watches.remove(wd) {
			// The kernel drops the descriptor by itself after the watched path is deleted
			Err(e) if e.raw_os_error() == Some(libc::EINVAL) => {
				warn!(%handle, "Watch descriptor was already released by the kernel;");
				Ok(())
			}
			res => res,
		}
	}
}

impl EventSource for InotifySource {
	fn run(mut self, producer: Producer) -> Termination {
		loop {
			let events = match self.inotify.read_events_blocking(&mut self.buffer) {
				Ok(events) => events,
				Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
				Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
					return Termination::EndOfStream
				}
				Err(e) => return Termination::ReadFailed(e),
			};

			for event in events {
				let handle = to_handle(event.wd.get_watch_descriptor_id());

				for canonical in normalize(handle, event.mask, event.name) {
					if producer.post(canonical).is_err() {
						debug!("Consumer dropped, stopping inotify read loop;");
						return Termination::ConsumerGone;
					}
				}
			}
		}
	}
}

fn to_handle(id: i32) -> WatchHandle {
	WatchHandle::new(Platform::Inotify, i64::from(id))
}

fn classify_watch_error(path: &Path, e: io::Error) -> Error {
	match e.raw_os_error() {
		Some(libc::EMFILE | libc::ENFILE | libc::ENOSPC) => Error::resource_exhausted(path),
		_ => Error::invalid_path(path, e),
	}
}

/// Turns one inotify record into the events to deliver, in delivery order.
///
/// A move into the watched directory is reported on its own first, then the remaining bits
/// decide a single outward kind: moving the watched path away wins over deletion, which wins
/// over attribute, creation or content changes. Records with none of those bits produce
/// nothing more.
pub(crate) fn normalize(
	handle: WatchHandle,
	mask: EventMask,
	name: Option<&OsStr>,
) -> Vec<CanonicalEvent> {
	let mut events = Vec::with_capacity(2);

	if mask.contains(EventMask::MOVED_TO) {
		events.push(
			CanonicalEvent::new(EventKind::ChildRename, handle)
				.with_new_path(name.map(OsStrExt::as_bytes).unwrap_or_default()),
		);
	}

	let kind = if mask.contains(EventMask::MOVE_SELF) {
		EventKind::Rename
	} else if mask.intersects(EventMask::DELETE | EventMask::DELETE_SELF) {
		EventKind::Delete
	} else if mask.intersects(EventMask::ATTRIB | EventMask::CREATE | EventMask::MODIFY) {
		EventKind::Change
	} else {
		EventKind::Unknown
	};

	if kind != EventKind::Unknown {
		events.push(CanonicalEvent::new(kind, handle));
	}

	events
}
