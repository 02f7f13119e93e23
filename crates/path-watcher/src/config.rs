use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::debug;

use super::error::{Error, Result};

/// `sizeof(struct inotify_event)` plus a maximal `NAME_MAX` entry name and its nul byte
const MIN_READ_BUFFER_SIZE: usize = 16 + 255 + 1;
const MIN_POLL_INTERVAL_MS: u64 = 50;

/// How paths get watched by a [`FallbackWatcher`](crate::FallbackWatcher).
#[derive(
	Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum WatchMode {
	/// Native backend, paths it has no room for are stat polled instead
	#[default]
	Auto,
	/// Native backend only, running out of watches is an error
	Watch,
	/// Stat polling only
	Poll,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
	pub mode: WatchMode,
	/// Bytes read from the kernel notification queue at once
	pub read_buffer_size: usize,
	/// Delay between two stat passes of the poll backend
	pub poll_interval_ms: u64,
	/// Maximum number of paths the poll backend tracks before reporting exhaustion
	pub max_poll_watches: usize,
	/// Name given to the watcher thread
	pub thread_name: String,
}

impl Default for WatcherConfig {
	fn default() -> Self {
		Self {
			mode: WatchMode::Auto,
			read_buffer_size: 4096,
			poll_interval_ms: 500,
			max_poll_watches: 8192,
			thread_name: "sd-path-watcher".to_string(),
		}
	}
}

impl WatcherConfig {
	pub fn validate(&self) -> Result<()> {
		if self.read_buffer_size < MIN_READ_BUFFER_SIZE {
			return Err(Error::InvalidConfig(format!(
				"read_buffer_size must be at least {MIN_READ_BUFFER_SIZE} bytes, got {}",
				self.read_buffer_size
			)));
		}

		if self.poll_interval_ms < MIN_POLL_INTERVAL_MS {
			return Err(Error::InvalidConfig(format!(
				"poll_interval_ms must be at least {MIN_POLL_INTERVAL_MS}, got {}",
				self.poll_interval_ms
			)));
		}

		if self.max_poll_watches == 0 {
			return Err(Error::InvalidConfig(
				"max_poll_watches must be greater than zero".to_string(),
			));
		}

		if self.thread_name.trim().is_empty() {
			return Err(Error::InvalidConfig(
				"thread_name must not be empty".to_string(),
			));
		}

		Ok(())
	}

	#[must_use]
	pub const fn poll_interval(&self) -> Duration {
		Duration::from_millis(self.poll_interval_ms)
	}

	/// Reads a JSON config file, missing fields take their default value.
	pub fn load(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();

		let contents = fs::read(path).map_err(|source| Error::ConfigIO {
			path: path.into(),
			source,
		})?;

		let config = serde_json::from_slice::<Self>(&contents)?;
		config.validate()?;

		debug!(path = %path.display(), ?config, "Loaded watcher config;");

		Ok(config)
	}

	pub fn load_or_default(maybe_path: Option<&Path>) -> Result<Self> {
		match maybe_path {
			Some(path) => Self::load(path),
			None => Ok(Self::default()),
		}
	}
}
