//! Stat polling backend
//!
//! Works anywhere `std::fs` does, at the cost of latency: every `poll_interval` the watcher
//! thread stats each watched path and compares it to the previous snapshot. Directories also
//! diff their entry names so child creation and deletion can be reported.

use std::{
	collections::{BTreeMap, BTreeSet},
	ffi::OsString,
	fs, io,
	path::{Path, PathBuf},
	sync::{Arc, Mutex, MutexGuard, PoisonError},
	thread,
	time::{Duration, SystemTime},
};

use tracing::{debug, trace};

use super::{Backend, EventSource, Termination};
use crate::{
	config::WatcherConfig,
	error::{Error, Result},
	event::{CanonicalEvent, EventKind},
	handle::{Platform, WatchHandle},
	rendezvous::Producer,
};

type Polled = Arc<Mutex<BTreeMap<i64, PolledPath>>>;

#[derive(Debug)]
pub struct PollBackend {
	polled: Polled,
	next_id: i64,
	max_watches: usize,
}

#[derive(Debug)]
pub struct PollSource {
	polled: Polled,
	interval: Duration,
}

#[derive(Debug)]
struct PolledPath {
	path: PathBuf,
	/// `None` once the path was reported deleted, nothing else is reported for it afterwards
	last: Option<Snapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Snapshot {
	is_dir: bool,
	len: u64,
	modified: Option<SystemTime>,
	readonly: bool,
	children: BTreeSet<OsString>,
}

impl Snapshot {
	fn take(path: &Path) -> io::Result<Self> {
		let metadata = fs::metadata(path)?;

		let children = if metadata.is_dir() {
			fs::read_dir(path)?
				.map(|entry| entry.map(|entry| entry.file_name()))
				.collect::<io::Result<_>>()?
		} else {
			BTreeSet::new()
		};

		Ok(Self {
			is_dir: metadata.is_dir(),
			len: metadata.len(),
			modified: metadata.modified().ok(),
			readonly: metadata.permissions().readonly(),
			children,
		})
	}

	/// Events that turn `self` into `current`, children in name order.
	fn diff(&self, current: &Self, handle: WatchHandle) -> Vec<CanonicalEvent> {
		let mut events = Vec::new();

		let changed = if current.is_dir && self.is_dir {
			// Directory timestamps move with their entries, which are reported on their own
			self.readonly != current.readonly
		} else {
			self.is_dir != current.is_dir
				|| self.len != current.len
				|| self.modified != current.modified
				|| self.readonly != current.readonly
		};

		if changed {
			events.push(CanonicalEvent::new(EventKind::Change, handle));
		}

		events.extend(current.children.difference(&self.children).map(|name| {
			CanonicalEvent::new(EventKind::ChildCreate, handle)
				.with_new_path(name.as_encoded_bytes())
		}));

		events.extend(self.children.difference(&current.children).map(|name| {
			CanonicalEvent::new(EventKind::ChildDelete, handle)
				.with_new_path(name.as_encoded_bytes())
		}));

		events
	}
}

fn lock(polled: &Polled) -> MutexGuard<'_, BTreeMap<i64, PolledPath>> {
	polled.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Backend for PollBackend {
	type Source = PollSource;

	const PLATFORM: Platform = Platform::Poll;

	fn init(config: &WatcherConfig) -> Result<(Self, Self::Source)> {
		let polled = Polled::default();

		Ok((
			Self {
				polled: Arc::clone(&polled),
				next_id: 1,
				max_watches: config.max_poll_watches,
			},
			PollSource {
				polled,
				interval: config.poll_interval(),
			},
		))
	}

	fn watch(&mut self, path: &Path) -> Result<WatchHandle> {
		let mut polled = lock(&self.polled);

		if polled.len() >= self.max_watches {
			return Err(Error::resource_exhausted(path));
		}

		let snapshot = Snapshot::take(path).map_err(|e| Error::invalid_path(path, e))?;

		let id = self.next_id;
		self.next_id += 1;

		polled.insert(
			id,
			PolledPath {
				path: path.to_path_buf(),
				last: Some(snapshot),
			},
		);

		Ok(WatchHandle::new(Platform::Poll, id))
	}

	fn unwatch(&mut self, handle: WatchHandle) -> io::Result<()> {
		lock(&self.polled)
			.remove(&handle.raw())
			.map(|_| ())
			.ok_or_else(|| {
				io::Error::new(
					io::ErrorKind::NotFound,
					format!("path isn't polled <handle='{handle}'>"),
				)
			})
	}
}

impl PollSource {
	fn scan(&self) -> Vec<CanonicalEvent> {
		let mut polled = lock(&self.polled);
		let mut events = Vec::new();

		for (id, entry) in polled.iter_mut() {
			let Some(last) = &entry.last else {
				continue;
			};

			let handle = WatchHandle::new(Platform::Poll, *id);

			match Snapshot::take(&entry.path) {
				Ok(current) => {
					events.extend(last.diff(&current, handle));
					entry.last = Some(current);
				}
				Err(e) if e.kind() == io::ErrorKind::NotFound => {
					trace!(path = %entry.path.display(), "Polled path is gone;");
					events.push(CanonicalEvent::new(EventKind::Delete, handle));
					entry.last = None;
				}
				// Transient failures (permissions flipping, entries vanishing mid read_dir) are
				// retried on the next pass
				Err(e) => trace!(path = %entry.path.display(), ?e, "Failed to stat polled path;"),
			}
		}

		events
	}
}

impl EventSource for PollSource {
	fn run(self, producer: Producer) -> Termination {
		loop {
			thread::sleep(self.interval);

			if producer.is_consumer_gone() {
				debug!("Consumer dropped, stopping poll loop;");
				return Termination::ConsumerGone;
			}

			// Posting happens without the lock, the consumer may watch or unwatch while
			// dispatching
			for event in self.scan() {
				if producer.post(event).is_err() {
					return Termination::ConsumerGone;
				}
			}
		}
	}
}
