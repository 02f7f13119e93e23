use std::{
	io,
	path::Path,
	thread::{self, JoinHandle},
};

use tracing::{debug, error, info, instrument, trace, warn};

use super::{
	backend::{Backend, EventSource, Termination},
	config::WatcherConfig,
	error::{Error, Result},
	event::CanonicalEvent,
	handle::WatchHandle,
	liveness::{LivenessController, LivenessGuard},
	registry::HandleRegistry,
	rendezvous::{self, Consumer, Delivery},
};

/// Sole recipient of dispatched events, along with the identity registered for the event's handle
/// (`None` if the handle was unwatched while the event was in flight).
pub type EventCallback<I> = Box<dyn FnMut(&CanonicalEvent, Option<&I>) + Send>;

/// Owns one watcher thread and everything the consumer context needs around it.
///
/// Meant to be created once per process and kept until exit. Every method runs on the consumer
/// context: registry mutation, watching and dispatch all happen through `&mut self`, only the
/// events themselves cross to and from the watcher thread.
///
/// Dropping the engine doesn't join the watcher thread. A thread blocked on the rendezvous
/// notices and exits, one blocked on the OS read lives on until the process ends.
pub struct WatchEngine<B: Backend, I> {
	backend: B,
	registry: HandleRegistry<I>,
	liveness: LivenessController,
	consumer: Consumer,
	callback: Option<EventCallback<I>>,
	watcher_thread: Option<JoinHandle<Termination>>,
	termination: Option<Termination>,
}

impl<B: Backend, I> WatchEngine<B, I> {
	/// Initializes the platform backend and starts the watcher thread.
	pub fn initialize(config: WatcherConfig) -> Result<Self> {
		config.validate()?;

		let (backend, source) = B::init(&config)?;

		Self::with_backend(&config, backend, source)
	}

	/// Starts the engine over an already initialized backend.
	pub fn with_backend(config: &WatcherConfig, backend: B, source: B::Source) -> Result<Self> {
		let (producer, consumer) = rendezvous::channel();

		let watcher_thread = thread::Builder::new()
			.name(config.thread_name.clone())
			.spawn(move || {
				let termination = source.run(producer);

				match &termination {
					Termination::ConsumerGone => debug!("Watcher thread exiting, consumer is gone;"),
					reason => error!(%reason, "Watch backend died, no more events will be delivered;"),
				}

				termination
			})
			.map_err(Error::BackendUnavailable)?;

		info!(platform = %B::PLATFORM, thread = %config.thread_name, "Path watcher started;");

		Ok(Self {
			backend,
			registry: HandleRegistry::new(),
			liveness: LivenessController::new(),
			consumer,
			callback: None,
			watcher_thread: Some(watcher_thread),
			termination: None,
		})
	}

	/// Installs the sole recipient of dispatched events, replacing any previous one.
	pub fn set_event_callback(
		&mut self,
		callback: impl FnMut(&CanonicalEvent, Option<&I>) + Send + 'static,
	) {
		self.callback = Some(Box::new(callback));
	}

	pub fn clear_event_callback(&mut self) {
		self.callback = None;
	}

	/// Watches `path` and registers `identity` for the returned handle.
	///
	/// If the backend hands back a handle that is already registered (inotify does so for a
	/// path watched twice), this fails with [`Error::DuplicateHandle`] and the OS watch is left
	/// untouched, it still belongs to the first registration.
	#[instrument(skip(self, path, identity), fields(path = %path.as_ref().display()), err)]
	pub fn watch(&mut self, path: impl AsRef<Path>, identity: I) -> Result<WatchHandle> {
		let path = path.as_ref();

		let handle = self.backend.watch(path)?;

		if !B::is_valid(handle) {
			if let Err(e) = self.backend.unwatch(handle) {
				warn!(%handle, ?e, "Failed to release OS watch behind an invalid handle;");
			}

			return Err(Error::invalid_path(
				path,
				io::Error::new(
					io::ErrorKind::InvalidData,
					format!("backend returned an invalid handle <handle='{handle}'>"),
				),
			));
		}

		self.registry.add(handle, identity)?;
		self.liveness.on_watch_added();

		debug!(%handle, "Watch registered;");

		Ok(handle)
	}

	/// Releases the watch behind `handle`, returning the identity it was registered with.
	#[instrument(skip(self), err)]
	pub fn unwatch(&mut self, handle: WatchHandle) -> Result<I> {
		let identity = self.registry.remove(handle)?;

		if let Err(e) = self.backend.unwatch(handle) {
			warn!(?e, "Failed to release OS watch;");
		}

		self.liveness.on_watch_removed();

		debug!("Watch released;");

		Ok(identity)
	}

	#[must_use]
	pub fn has(&self, handle: WatchHandle) -> bool {
		self.registry.has(handle)
	}

	pub fn get(&self, handle: WatchHandle) -> Result<&I> {
		self.registry.get(handle)
	}

	pub fn get_mut(&mut self, handle: WatchHandle) -> Result<&mut I> {
		self.registry.get_mut(handle)
	}

	pub fn values(&self) -> impl Iterator<Item = &I> + '_ {
		self.registry.values()
	}

	pub fn iter(&self) -> impl Iterator<Item = (WatchHandle, &I)> + '_ {
		self.registry.iter()
	}

	/// Same as [`WatchEngine::unwatch`], the registry entry can't outlive its OS watch.
	pub fn remove(&mut self, handle: WatchHandle) -> Result<I> {
		self.unwatch(handle)
	}

	/// Same as [`WatchEngine::close_all`].
	pub fn clear(&mut self) {
		self.close_all();
	}

	/// Releases every watch. Meant for full shutdown.
	#[instrument(skip(self), fields(watches = self.registry.len()))]
	pub fn close_all(&mut self) {
		for handle in self.registry.handles().collect::<Vec<_>>() {
			if let Err(e) = self.backend.unwatch(handle) {
				warn!(%handle, ?e, "Failed to release OS watch;");
			}

			self.liveness.on_watch_removed();
		}

		self.registry.clear();
	}

	#[must_use]
	pub fn active_watches(&self) -> usize {
		self.liveness.active_watches()
	}

	#[must_use]
	pub fn is_pinned(&self) -> bool {
		self.liveness.is_pinned()
	}

	#[must_use]
	pub fn liveness(&self) -> LivenessGuard {
		self.liveness.subscribe()
	}

	/// Waits for the next event and dispatches it to the callback.
	///
	/// Returns the dispatched event, or `None` once the watcher thread is dead.
	pub async fn dispatch_next(&mut self) -> Option<CanonicalEvent> {
		match self.consumer.recv().await {
			Some(delivery) => Some(self.dispatch(delivery)),
			None => {
				self.on_backend_terminated();
				None
			}
		}
	}

	pub fn dispatch_next_blocking(&mut self) -> Option<CanonicalEvent> {
		match self.consumer.recv_blocking() {
			Some(delivery) => Some(self.dispatch(delivery)),
			None => {
				self.on_backend_terminated();
				None
			}
		}
	}

	/// Dispatches the pending event if there is one, never blocks.
	pub fn try_dispatch(&mut self) -> Option<CanonicalEvent> {
		let delivery = self.consumer.try_recv();

		if delivery.is_none() && self.consumer.is_producer_gone() {
			self.on_backend_terminated();
		}

		delivery.map(|delivery| self.dispatch(delivery))
	}

	/// Waits for the next event without going through the callback.
	///
	/// The watcher thread stays blocked until the returned [`Delivery`] is dropped, so the caller
	/// can watch and unwatch in reaction to the event before letting the next one in.
	pub async fn next_delivery(&mut self) -> Option<Delivery> {
		let delivery = self.consumer.recv().await;

		if delivery.is_none() {
			self.on_backend_terminated();
		}

		delivery
	}

	/// `false` once the watcher thread stopped for good.
	#[must_use]
	pub fn is_backend_alive(&self) -> bool {
		self.termination.is_none()
			&& self
				.watcher_thread
				.as_ref()
				.is_some_and(|thread| !thread.is_finished())
	}

	/// Why the watcher thread stopped, available after a dispatch reported the end of events.
	#[must_use]
	pub const fn termination(&self) -> Option<&Termination> {
		self.termination.as_ref()
	}

	fn dispatch(&mut self, delivery: Delivery) -> CanonicalEvent {
		let event = delivery.event();
		let identity = self.registry.get(event.handle()).ok();

		trace!(kind = %event.kind(), handle = %event.handle(), known = identity.is_some(), "Dispatching event;");

		if let Some(callback) = self.callback.as_mut() {
			callback(event, identity);
		}

		let event = event.clone();
		delivery.ack();

		event
	}

	fn on_backend_terminated(&mut self) {
		let Some(thread) = self.watcher_thread.take() else {
			return;
		};

		// The producer is only dropped when the source returns, so this join is immediate
		self.termination = Some(thread.join().unwrap_or_else(|_| {
			Termination::ReadFailed(io::Error::new(
				io::ErrorKind::Other,
				"watcher thread panicked",
			))
		}));

		if let Some(termination) = &self.termination {
			error!(%termination, "Watch backend terminated;");
		}
	}
}

impl<B: Backend, I> std::fmt::Debug for WatchEngine<B, I> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("WatchEngine")
			.field("platform", &B::PLATFORM)
			.field("watches", &self.registry.len())
			.field("pinned", &self.liveness.is_pinned())
			.field("termination", &self.termination)
			.finish_non_exhaustive()
	}
}
