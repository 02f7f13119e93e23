//! Outstanding watches as a reason for the owning process to stay alive.
//!
//! The watcher thread is always blocked on something, so it can't tell the process whether
//! there is still work to wait for. Instead the consumer side counts active watches and
//! publishes a single "pinned" flag: raised on the first watch, lowered after the last one.

use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct LivenessController {
	active: usize,
	pinned_tx: watch::Sender<bool>,
}

impl Default for LivenessController {
	fn default() -> Self {
		Self::new()
	}
}

impl LivenessController {
	#[must_use]
	pub fn new() -> Self {
		let (pinned_tx, _) = watch::channel(false);

		Self {
			active: 0,
			pinned_tx,
		}
	}

	pub fn on_watch_added(&mut self) {
		self.active += 1;

		if self.active == 1 {
			self.pinned_tx.send_replace(true);
			debug!("First watch registered, pinning process alive;");
		}
	}

	pub fn on_watch_removed(&mut self) {
		if self.active == 0 {
			warn!("Tried to remove a watch while none are active;");
			return;
		}

		self.active -= 1;

		if self.active == 0 {
			self.pinned_tx.send_replace(false);
			debug!("Last watch removed, process is allowed to exit;");
		}
	}

	#[must_use]
	pub const fn active_watches(&self) -> usize {
		self.active
	}

	#[must_use]
	pub fn is_pinned(&self) -> bool {
		*self.pinned_tx.borrow()
	}

	#[must_use]
	pub fn subscribe(&self) -> LivenessGuard {
		LivenessGuard {
			pinned_rx: self.pinned_tx.subscribe(),
		}
	}
}

/// Read side of the liveness pin, meant for whatever decides when the process exits.
#[derive(Debug, Clone)]
pub struct LivenessGuard {
	pinned_rx: watch::Receiver<bool>,
}

impl LivenessGuard {
	#[must_use]
	pub fn is_pinned(&self) -> bool {
		*self.pinned_rx.borrow()
	}

	/// Resolves as soon as no watch is active, immediately if none is right now.
	///
	/// Also resolves when the controller itself is gone, as nothing can pin the process anymore.
	pub async fn wait_released(&mut self) {
		// An error here means the controller was dropped
		let _ = self.pinned_rx.wait_for(|pinned| !*pinned).await;
	}
}
