use std::fmt;

use serde::Serialize;

/// Which backend minted a [`WatchHandle`].
///
/// Handles from different backends never compare equal, even when their raw values do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Platform {
	Inotify,
	Poll,
	/// Backends living outside this crate, tagged with a number of their choosing
	Custom(u16),
}

impl fmt::Display for Platform {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Inotify => write!(f, "inotify"),
			Self::Poll => write!(f, "poll"),
			Self::Custom(tag) => write!(f, "custom-{tag}"),
		}
	}
}

/// Opaque identifier of one active OS-level watch.
///
/// The raw value is whatever the backend uses to name the watch (an inotify watch descriptor,
/// a poll slot number). A negative raw value is never a live watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct WatchHandle {
	platform: Platform,
	raw: i64,
}

impl WatchHandle {
	/// Reserved sentinel, never returned for a successful watch.
	pub const INVALID: Self = Self {
		platform: Platform::Custom(u16::MAX),
		raw: -1,
	};

	#[must_use]
	pub const fn new(platform: Platform, raw: i64) -> Self {
		Self { platform, raw }
	}

	#[must_use]
	pub const fn platform(&self) -> Platform {
		self.platform
	}

	#[must_use]
	pub const fn raw(&self) -> i64 {
		self.raw
	}

	#[must_use]
	pub const fn is_valid(&self) -> bool {
		self.raw >= 0
	}
}

impl fmt::Display for WatchHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.platform, self.raw)
	}
}
