//! Platform watch backends.
//!
//! A backend is split in two halves when initialized: the [`Backend`] itself stays with the
//! consumer and opens/closes watches, while its [`EventSource`] moves to the watcher thread and
//! owns the blocking read for the rest of the process lifetime.

use std::{io, path::Path};

use thiserror::Error;

use super::{
	config::WatcherConfig,
	error::Result,
	handle::{Platform, WatchHandle},
	rendezvous::Producer,
};

#[cfg(any(target_os = "linux", target_os = "android"))]
mod linux;
mod poll;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub use linux::{InotifyBackend, InotifySource};
pub use poll::{PollBackend, PollSource};

#[cfg(any(target_os = "linux", target_os = "android"))]
pub type RecommendedBackend = InotifyBackend;

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub type RecommendedBackend = PollBackend;

pub trait Backend: Sized {
	type Source: EventSource;

	/// Tag carried by every handle this backend mints.
	const PLATFORM: Platform;

	/// Acquires the process-wide OS resource. Failing here is fatal for the engine.
	fn init(config: &WatcherConfig) -> Result<(Self, Self::Source)>;

	fn watch(&mut self, path: &Path) -> Result<WatchHandle>;

	/// Releases the OS watch behind `handle`. Callers must only pass handles they know are live.
	fn unwatch(&mut self, handle: WatchHandle) -> io::Result<()>;

	#[must_use]
	fn is_valid(handle: WatchHandle) -> bool {
		handle.platform() == Self::PLATFORM && handle.is_valid()
	}
}

/// The watcher thread half of a backend.
pub trait EventSource: Send + 'static {
	/// Reads raw changes until the source dies, posting every canonical event through `producer`
	/// and waiting for each to be acknowledged before looking at the next one.
	fn run(self, producer: Producer) -> Termination;
}

/// Why a watcher thread stopped. Once it did, no event will ever be delivered again.
#[derive(Debug, Error)]
pub enum Termination {
	#[error("failed to read from the watch backend: {0}")]
	ReadFailed(#[source] io::Error),
	#[error("watch backend reached end of stream")]
	EndOfStream,
	#[error("event consumer is gone")]
	ConsumerGone,
}
