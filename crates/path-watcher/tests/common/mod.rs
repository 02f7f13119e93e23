#![allow(dead_code)]

use sd_path_watcher::{
	rendezvous::Producer, Backend, CanonicalEvent, Error, EventKind, EventSource, Platform,
	Result, Termination, WatchEngine, WatchHandle, WatcherConfig,
};

use std::{
	collections::VecDeque,
	io,
	path::Path,
	sync::{
		atomic::{AtomicUsize, Ordering},
		mpsc, Arc, Mutex,
	},
	time::Duration,
};

use tokio::time::timeout;

pub const FAKE_PLATFORM: Platform = Platform::Custom(7);

pub fn handle(raw: i64) -> WatchHandle {
	WatchHandle::new(FAKE_PLATFORM, raw)
}

pub fn event(kind: EventKind, raw: i64) -> CanonicalEvent {
	CanonicalEvent::new(kind, handle(raw))
}

/// What the next call to [`FakeBackend::watch`] answers.
#[derive(Debug, Clone, Copy)]
pub enum WatchOutcome {
	Handle(i64),
	Exhausted,
	Invalid,
}

enum Feed {
	Batch(Vec<CanonicalEvent>),
	Fail,
}

#[derive(Debug, Default)]
struct Shared {
	outcomes: Mutex<VecDeque<WatchOutcome>>,
	unwatched: Mutex<Vec<WatchHandle>>,
	posted: AtomicUsize,
	acked: AtomicUsize,
}

/// Backend that watches nothing, every event comes from its [`FakeControl`].
#[derive(Debug)]
pub struct FakeBackend {
	shared: Arc<Shared>,
	next_id: i64,
}

pub struct FakeSource {
	shared: Arc<Shared>,
	feed_rx: mpsc::Receiver<Feed>,
}

/// Test side of the fake backend. Dropping it ends the event stream.
pub struct FakeControl {
	shared: Arc<Shared>,
	feed_tx: mpsc::Sender<Feed>,
}

impl FakeBackend {
	pub fn new() -> (Self, FakeSource, FakeControl) {
		let shared = Arc::new(Shared::default());
		let (feed_tx, feed_rx) = mpsc::channel();

		(
			Self {
				shared: Arc::clone(&shared),
				next_id: 1,
			},
			FakeSource {
				shared: Arc::clone(&shared),
				feed_rx,
			},
			FakeControl { shared, feed_tx },
		)
	}
}

impl Backend for FakeBackend {
	type Source = FakeSource;

	const PLATFORM: Platform = FAKE_PLATFORM;

	fn init(_config: &WatcherConfig) -> Result<(Self, Self::Source)> {
		let (backend, source, _control) = Self::new();
		Ok((backend, source))
	}

	fn watch(&mut self, path: &Path) -> Result<WatchHandle> {
		let outcome = self.shared.outcomes.lock().unwrap().pop_front();

		match outcome {
			Some(WatchOutcome::Handle(raw)) => Ok(handle(raw)),
			Some(WatchOutcome::Exhausted) => Err(Error::ResourceExhausted { path: path.into() }),
			Some(WatchOutcome::Invalid) => Err(Error::InvalidPath {
				path: path.into(),
				source: io::Error::from(io::ErrorKind::NotFound),
			}),
			None => {
				let raw = self.next_id;
				self.next_id += 1;
				Ok(handle(raw))
			}
		}
	}

	fn unwatch(&mut self, handle: WatchHandle) -> io::Result<()> {
		self.shared.unwatched.lock().unwrap().push(handle);
		Ok(())
	}
}

impl EventSource for FakeSource {
	fn run(self, producer: Producer) -> Termination {
		loop {
			match self.feed_rx.recv() {
				Ok(Feed::Batch(events)) => {
					for event in events {
						self.shared.posted.fetch_add(1, Ordering::SeqCst);

						if producer.post(event).is_err() {
							return Termination::ConsumerGone;
						}

						self.shared.acked.fetch_add(1, Ordering::SeqCst);
					}
				}
				Ok(Feed::Fail) => {
					return Termination::ReadFailed(io::Error::new(
						io::ErrorKind::Other,
						"scripted read failure",
					))
				}
				Err(_) => return Termination::EndOfStream,
			}
		}
	}
}

impl FakeControl {
	pub fn script(&self, outcomes: impl IntoIterator<Item = WatchOutcome>) {
		self.shared.outcomes.lock().unwrap().extend(outcomes);
	}

	pub fn feed(&self, events: impl IntoIterator<Item = CanonicalEvent>) {
		self.feed_tx
			.send(Feed::Batch(events.into_iter().collect()))
			.unwrap();
	}

	pub fn fail(&self) {
		self.feed_tx.send(Feed::Fail).unwrap();
	}

	pub fn unwatched(&self) -> Vec<WatchHandle> {
		self.shared.unwatched.lock().unwrap().clone()
	}

	pub fn posted(&self) -> usize {
		self.shared.posted.load(Ordering::SeqCst)
	}

	pub fn acked(&self) -> usize {
		self.shared.acked.load(Ordering::SeqCst)
	}

	/// Counter the event callback can read from the consumer side.
	pub fn acked_counter(&self) -> impl Fn() -> usize + Send + 'static {
		let shared = Arc::clone(&self.shared);
		move || shared.acked.load(Ordering::SeqCst)
	}
}

pub fn fake_engine<I>() -> (WatchEngine<FakeBackend, I>, FakeControl) {
	let (backend, source, control) = FakeBackend::new();

	let engine = WatchEngine::with_backend(&WatcherConfig::default(), backend, source).unwrap();

	(engine, control)
}

/// Dispatches the next event, failing the test instead of hanging forever.
pub async fn dispatch<I>(engine: &mut WatchEngine<FakeBackend, I>) -> Option<CanonicalEvent> {
	timeout(Duration::from_secs(5), engine.dispatch_next())
		.await
		.expect("no event dispatched in time")
}
