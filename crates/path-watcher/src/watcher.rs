//! Path level subscriptions on top of the engine.
//!
//! Several subscribers may watch the same path, they share one OS watch and each get their own
//! channel of [`PathEvent`]s. Events about entries inside a watched directory are folded into a
//! plain change of the directory.
//!
//! A renamed path is looked at again once [`RENAME_SETTLE`] passed: editors saving through a
//! backup move the old file away and write a new one in its place, which is reported as a change
//! of the same path on a fresh watch. Only a path that is still gone by then ends its
//! subscriptions with a rename.

use std::{
	collections::VecDeque,
	fmt, fs, mem,
	path::{Path, PathBuf, MAIN_SEPARATOR},
	sync::atomic::{AtomicU64, Ordering},
	time::Duration,
};

use serde::Serialize;
use strum::Display;
use tokio::{
	sync::mpsc,
	time::{self, Instant},
};
use tracing::{debug, instrument, trace, warn};

use super::{
	backend::Backend,
	config::WatcherConfig,
	engine::WatchEngine,
	error::{Error, Result},
	event::{CanonicalEvent, EventKind},
	handle::WatchHandle,
	liveness::LivenessGuard,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum PathEventKind {
	Change,
	Delete,
	Rename,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathEvent {
	pub kind: PathEventKind,
	pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// How long a renamed path gets to be replaced before its subscriptions end.
pub const RENAME_SETTLE: Duration = Duration::from_millis(100);

/// Unique for the whole process, so subscriptions from different watchers never collide.
static NEXT_SUBSCRIPTION: AtomicU64 = AtomicU64::new(0);

/// Receiving end of one [`PathWatcher::subscribe`] call. Yields `None` once its path is no
/// longer watched.
///
/// Events queue up without bound until they are received. A subscription nobody reads from
/// should be dropped or passed to [`PathWatcher::unsubscribe`].
#[derive(Debug)]
pub struct Subscription {
	id: SubscriptionId,
	path: PathBuf,
	events_rx: mpsc::UnboundedReceiver<PathEvent>,
}

impl Subscription {
	#[must_use]
	pub const fn id(&self) -> SubscriptionId {
		self.id
	}

	#[must_use]
	pub fn path(&self) -> &Path {
		&self.path
	}

	pub async fn recv(&mut self) -> Option<PathEvent> {
		self.events_rx.recv().await
	}

	pub fn try_recv(&mut self) -> Option<PathEvent> {
		self.events_rx.try_recv().ok()
	}
}

/// What the engine registry keeps for every watched path.
#[derive(Debug)]
pub struct WatchedPath {
	path: PathBuf,
	is_dir: bool,
	subscribers: Vec<(SubscriptionId, mpsc::UnboundedSender<PathEvent>)>,
}

impl WatchedPath {
	#[must_use]
	pub fn path(&self) -> &Path {
		&self.path
	}

	#[must_use]
	pub fn subscriber_count(&self) -> usize {
		self.subscribers.len()
	}

	/// Directories are listed with a trailing separator.
	fn marked_path(&self) -> PathBuf {
		if !self.is_dir || self.path.as_os_str().to_string_lossy().ends_with(MAIN_SEPARATOR) {
			return self.path.clone();
		}

		let mut marked = self.path.clone().into_os_string();
		marked.push(MAIN_SEPARATOR.to_string());
		marked.into()
	}

	/// Sends `event` to every live subscriber, forgetting those whose receiver is gone.
	fn fan_out(&mut self, event: &PathEvent) {
		self.subscribers.retain(|(id, events_tx)| {
			let alive = events_tx.send(event.clone()).is_ok();
			if !alive {
				trace!(subscription = %id, "Dropping closed subscription;");
			}
			alive
		});
	}
}

pub struct PathWatcher<B: Backend> {
	engine: WatchEngine<B, WatchedPath>,
	/// Renamed handles waiting to be looked at again, by deadline
	renamed: VecDeque<(WatchHandle, Instant)>,
}

impl<B: Backend> PathWatcher<B> {
	pub fn initialize(config: WatcherConfig) -> Result<Self> {
		WatchEngine::initialize(config).map(Self::new)
	}

	#[must_use]
	pub const fn new(engine: WatchEngine<B, WatchedPath>) -> Self {
		Self {
			engine,
			renamed: VecDeque::new(),
		}
	}

	#[must_use]
	pub const fn engine(&self) -> &WatchEngine<B, WatchedPath> {
		&self.engine
	}

	/// Subscribes to changes of `path`, reusing the OS watch if the path is already watched.
	#[instrument(skip(self, path), fields(path = %path.as_ref().display()), err)]
	pub fn subscribe(&mut self, path: impl AsRef<Path>) -> Result<Subscription> {
		let path = fs::canonicalize(path.as_ref())
			.map_err(|e| Error::invalid_path(path.as_ref(), e))?;

		let id = SubscriptionId(NEXT_SUBSCRIPTION.fetch_add(1, Ordering::Relaxed));
		let (events_tx, events_rx) = mpsc::unbounded_channel();

		if let Some(handle) = self.find(&path) {
			self.engine
				.get_mut(handle)?
				.subscribers
				.push((id, events_tx));

			debug!(%handle, subscription = %id, "Sharing existing watch;");
		} else {
			let is_dir = fs::metadata(&path).is_ok_and(|metadata| metadata.is_dir());

			let handle = self.engine.watch(
				&path,
				WatchedPath {
					path: path.clone(),
					is_dir,
					subscribers: vec![(id, events_tx)],
				},
			)?;

			debug!(%handle, subscription = %id, "Watching new path;");
		}

		Ok(Subscription {
			id,
			path,
			events_rx,
		})
	}

	/// Drops one subscription, the OS watch goes away with its last subscriber.
	///
	/// Returns `false` if no watched path had this subscription.
	pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
		let Some(handle) = self.engine.iter().find_map(|(handle, watched)| {
			watched
				.subscribers
				.iter()
				.any(|(subscriber, _)| *subscriber == id)
				.then_some(handle)
		}) else {
			return false;
		};

		if let Ok(watched) = self.engine.get_mut(handle) {
			watched.subscribers.retain(|(subscriber, _)| *subscriber != id);

			if watched.subscribers.is_empty() {
				self.release(handle);
			}
		}

		true
	}

	/// Stops watching `path` for every subscriber, `false` if it wasn't watched.
	pub fn close(&mut self, path: impl AsRef<Path>) -> bool {
		let path = path.as_ref();
		let path = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());

		let Some(handle) = self.find(&path) else {
			return false;
		};

		self.release(handle);

		true
	}

	pub fn close_all(&mut self) {
		self.renamed.clear();
		self.engine.close_all();
	}

	#[must_use]
	pub fn watched_paths(&self) -> Vec<PathBuf> {
		self.engine.values().map(WatchedPath::marked_path).collect()
	}

	#[must_use]
	pub fn liveness(&self) -> LivenessGuard {
		self.engine.liveness()
	}

	/// Waits for the next event and routes it to the subscribers of its path. A pending rename
	/// is settled first.
	///
	/// Returns `false` once the watcher thread is dead. Cancelling the returned future loses
	/// nothing.
	pub async fn dispatch_next(&mut self) -> bool {
		if let Some(&(handle, deadline)) = self.renamed.front() {
			time::sleep_until(deadline).await;

			self.renamed.pop_front();
			self.settle_rename(handle);

			return true;
		}

		let Some(delivery) = self.engine.next_delivery().await else {
			return false;
		};

		self.route(delivery.event());

		true
	}

	fn find(&self, path: &Path) -> Option<WatchHandle> {
		self.engine
			.iter()
			.find_map(|(handle, watched)| (watched.path == path).then_some(handle))
	}

	fn release(&mut self, handle: WatchHandle) {
		self.renamed.retain(|(renamed, _)| *renamed != handle);

		if let Err(e) = self.engine.unwatch(handle) {
			warn!(%handle, ?e, "Failed to release watched path;");
		}
	}

	fn route(&mut self, event: &CanonicalEvent) {
		let handle = event.handle();

		let Ok(watched) = self.engine.get(handle) else {
			// Unwatched while the event was in flight
			return;
		};

		match translate(event.kind(), &watched.path) {
			Some(PathEventKind::Rename) => {
				if !self.renamed.iter().any(|(renamed, _)| *renamed == handle) {
					trace!(%handle, "Path renamed, waiting for it to settle;");
					self.renamed.push_back((handle, Instant::now() + RENAME_SETTLE));
				}
			}
			Some(kind) => self.notify(handle, kind),
			None => {}
		}
	}

	/// Sends `kind` to the subscribers of `handle`, releasing it when the path went away or
	/// nobody listens anymore.
	fn notify(&mut self, handle: WatchHandle, kind: PathEventKind) {
		let Ok(watched) = self.engine.get_mut(handle) else {
			return;
		};

		let path_event = PathEvent {
			kind,
			path: watched.path.clone(),
		};
		watched.fan_out(&path_event);

		if matches!(kind, PathEventKind::Delete | PathEventKind::Rename)
			|| watched.subscribers.is_empty()
		{
			self.release(handle);
		}
	}

	/// Watches a renamed path again if something took its place, moving every subscriber over
	/// to the new handle.
	fn settle_rename(&mut self, handle: WatchHandle) {
		let Ok(watched) = self.engine.get(handle) else {
			return;
		};

		let path = watched.path.clone();

		if fs::symlink_metadata(&path).is_err() {
			debug!(%handle, path = %path.display(), "Renamed path is gone;");
			self.notify(handle, PathEventKind::Rename);
			return;
		}

		let replacement = WatchedPath {
			path: path.clone(),
			is_dir: fs::metadata(&path).is_ok_and(|metadata| metadata.is_dir()),
			subscribers: Vec::new(),
		};

		match self.engine.watch(&path, replacement) {
			Ok(new_handle) => {
				let subscribers = self
					.engine
					.get_mut(handle)
					.map(|watched| mem::take(&mut watched.subscribers))
					.unwrap_or_default();

				self.release(handle);

				if let Ok(watched) = self.engine.get_mut(new_handle) {
					watched.subscribers = subscribers;
				}

				debug!(%handle, %new_handle, path = %path.display(), "Renamed path was replaced;");

				self.notify(new_handle, PathEventKind::Change);
			}
			// Renamed back onto itself, the old watch still sees the right file
			Err(Error::DuplicateHandle(same)) if same == handle => {
				self.notify(handle, PathEventKind::Change);
			}
			Err(e) => {
				warn!(%handle, ?e, "Failed to watch replaced path again;");
				self.notify(handle, PathEventKind::Rename);
			}
		}
	}
}

impl<B: Backend> fmt::Debug for PathWatcher<B> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("PathWatcher")
			.field("engine", &self.engine)
			.field("renamed", &self.renamed.len())
			.finish()
	}
}

/// Folds a canonical event into what a subscriber of `path` gets to see.
fn translate(kind: EventKind, path: &Path) -> Option<PathEventKind> {
	match kind {
		// Unlinking a hard linked file only shows up as an attribute change
		EventKind::Change if fs::symlink_metadata(path).is_err() => Some(PathEventKind::Delete),
		EventKind::Change
		| EventKind::ChildCreate
		| EventKind::ChildDelete
		| EventKind::ChildRename => Some(PathEventKind::Change),
		EventKind::Delete => Some(PathEventKind::Delete),
		EventKind::Rename => Some(PathEventKind::Rename),
		EventKind::ChildChange | EventKind::Unknown => None,
	}
}
