use std::{io, path::Path};

use thiserror::Error;

use super::handle::WatchHandle;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
	/// The process-wide watch primitive could not be created, nothing can be watched.
	#[error("watch backend unavailable: {0}")]
	BackendUnavailable(#[source] io::Error),
	/// The OS ran out of watch resources; closing other watches and retrying may succeed.
	#[error("too many open watches, unable to watch <path='{}'>", .path.display())]
	ResourceExhausted { path: Box<Path> },
	#[error("unable to watch <path='{}'>: {source}", .path.display())]
	InvalidPath {
		path: Box<Path>,
		#[source]
		source: io::Error,
	},
	#[error("watch handle already registered <handle='{0}'>")]
	DuplicateHandle(WatchHandle),
	#[error("unknown watch handle <handle='{0}'>")]
	UnknownHandle(WatchHandle),

	#[error("invalid watcher config: {0}")]
	InvalidConfig(String),
	#[error("failed to read watcher config <path='{}'>: {source}", .path.display())]
	ConfigIO {
		path: Box<Path>,
		#[source]
		source: io::Error,
	},
	#[error("failed to parse watcher config: {0}")]
	ConfigParse(#[from] serde_json::Error),
}

impl Error {
	pub(crate) fn invalid_path(path: impl AsRef<Path>, source: io::Error) -> Self {
		Self::InvalidPath {
			path: path.as_ref().into(),
			source,
		}
	}

	pub(crate) fn resource_exhausted(path: impl AsRef<Path>) -> Self {
		Self::ResourceExhausted {
			path: path.as_ref().into(),
		}
	}

	/// Only exhaustion can go away by itself (or by the caller releasing other watches),
	/// every other error will happen again for the same input.
	#[must_use]
	pub const fn is_recoverable(&self) -> bool {
		matches!(self, Self::ResourceExhausted { .. })
	}
}
