//! Native watching with stat polling for whatever the native backend can't take.
//!
//! In [`WatchMode::Auto`] a path the native backend reports exhaustion for is handed to a poll
//! backend instead, started the first time it is needed. [`WatchMode::Watch`] surfaces the
//! exhaustion and [`WatchMode::Poll`] never touches the native backend.

use std::path::{Path, PathBuf};

use tracing::{info, instrument, warn};

use super::{
	backend::{Backend, PollBackend},
	config::{WatchMode, WatcherConfig},
	error::Result,
	watcher::{PathWatcher, Subscription, SubscriptionId},
};

pub struct FallbackWatcher<B: Backend> {
	config: WatcherConfig,
	native: Option<PathWatcher<B>>,
	polling: Option<PathWatcher<PollBackend>>,
}

impl<B: Backend> FallbackWatcher<B> {
	/// Starts the native backend unless the configured mode is [`WatchMode::Poll`].
	pub fn initialize(config: WatcherConfig) -> Result<Self> {
		let native = match config.mode {
			WatchMode::Auto | WatchMode::Watch => Some(PathWatcher::initialize(config.clone())?),
			WatchMode::Poll => None,
		};

		Ok(Self {
			config,
			native,
			polling: None,
		})
	}

	/// Uses an already running native watcher.
	#[must_use]
	pub const fn with_native(config: WatcherConfig, native: PathWatcher<B>) -> Self {
		Self {
			config,
			native: Some(native),
			polling: None,
		}
	}

	#[must_use]
	pub const fn mode(&self) -> WatchMode {
		self.config.mode
	}

	#[must_use]
	pub const fn native(&self) -> Option<&PathWatcher<B>> {
		self.native.as_ref()
	}

	#[must_use]
	pub const fn polling(&self) -> Option<&PathWatcher<PollBackend>> {
		self.polling.as_ref()
	}

	#[instrument(skip(self, path), fields(path = %path.as_ref().display(), mode = %self.config.mode), err)]
	pub fn subscribe(&mut self, path: impl AsRef<Path>) -> Result<Subscription> {
		let path = path.as_ref();

		let native = match self.native.as_mut() {
			Some(native) if self.config.mode != WatchMode::Poll => native,
			_ => return self.start_polling()?.subscribe(path),
		};

		match native.subscribe(path) {
			Err(e) if self.config.mode == WatchMode::Auto && e.is_recoverable() => {
				warn!(%e, "Out of native watches, falling back to stat polling;");
				self.start_polling()?.subscribe(path)
			}
			res => res,
		}
	}

	/// Returns `false` if neither watcher had this subscription.
	pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
		self.native
			.as_mut()
			.is_some_and(|native| native.unsubscribe(id))
			|| self
				.polling
				.as_mut()
				.is_some_and(|polling| polling.unsubscribe(id))
	}

	pub fn close(&mut self, path: impl AsRef<Path>) -> bool {
		let path = path.as_ref();

		let closed_native = self
			.native
			.as_mut()
			.is_some_and(|native| native.close(path));

		let closed_polled = self
			.polling
			.as_mut()
			.is_some_and(|polling| polling.close(path));

		closed_native || closed_polled
	}

	pub fn close_all(&mut self) {
		if let Some(native) = self.native.as_mut() {
			native.close_all();
		}

		if let Some(polling) = self.polling.as_mut() {
			polling.close_all();
		}
	}

	#[must_use]
	pub fn watched_paths(&self) -> Vec<PathBuf> {
		self.native
			.iter()
			.flat_map(PathWatcher::watched_paths)
			.chain(self.polling.iter().flat_map(PathWatcher::watched_paths))
			.collect()
	}

	#[must_use]
	pub fn active_watches(&self) -> usize {
		self.native
			.as_ref()
			.map_or(0, |native| native.engine().active_watches())
			+ self
				.polling
				.as_ref()
				.map_or(0, |polling| polling.engine().active_watches())
	}

	/// `true` while either watcher holds a watch.
	#[must_use]
	pub fn is_pinned(&self) -> bool {
		self.native
			.as_ref()
			.is_some_and(|native| native.engine().is_pinned())
			|| self
				.polling
				.as_ref()
				.is_some_and(|polling| polling.engine().is_pinned())
	}

	/// Routes the next event from whichever watcher has one.
	///
	/// Returns `false` once either watcher thread is dead, or when no watcher was ever started.
	pub async fn dispatch_next(&mut self) -> bool {
		match (self.native.as_mut(), self.polling.as_mut()) {
			(Some(native), Some(polling)) => tokio::select! {
				alive = native.dispatch_next() => alive,
				alive = polling.dispatch_next() => alive,
			},
			(Some(native), None) => native.dispatch_next().await,
			(None, Some(polling)) => polling.dispatch_next().await,
			(None, None) => false,
		}
	}

	fn start_polling(&mut self) -> Result<&mut PathWatcher<PollBackend>> {
		let polling = match self.polling.take() {
			Some(polling) => polling,
			None => {
				let config = WatcherConfig {
					thread_name: format!("{}-poll", self.config.thread_name),
					..self.config.clone()
				};

				info!(thread = %config.thread_name, "Starting stat polling;");

				PathWatcher::initialize(config)?
			}
		};

		Ok(self.polling.insert(polling))
	}
}

impl<B: Backend> std::fmt::Debug for FallbackWatcher<B> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FallbackWatcher")
			.field("mode", &self.config.mode)
			.field("native", &self.native)
			.field("polling", &self.polling)
			.finish()
	}
}
