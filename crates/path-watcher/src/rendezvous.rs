//! Single slot handoff between the watcher thread and the consumer context.
//!
//! The producer posts one event and blocks until the consumer acknowledges it, so there is never
//! more than one event in flight and events reach the consumer in exactly the order they were
//! posted. Both directions are capacity-1 channels:
//!
//! ```text
//!  watcher thread                     consumer context
//!  ──────────────                     ────────────────
//!  post(event) ── events (cap 1) ──▶  recv() -> Delivery
//!      │                                  │ dispatch
//!      ▼                                  ▼
//!  (blocked)   ◀── acks (cap 1) ────  drop(Delivery) / ack()
//! ```
//!
//! The watcher thread uses the blocking halves, the consumer may be async or blocking.

use async_channel as chan;
use thiserror::Error;
use tracing::trace;

use super::event::{CanonicalEvent, EventKind};

/// The consumer side of the rendezvous is gone, no event will ever be acknowledged again.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("rendezvous consumer is gone")]
pub struct ConsumerGone;

#[must_use]
pub fn channel() -> (Producer, Consumer) {
	let (events_tx, events_rx) = chan::bounded(1);
	let (acks_tx, acks_rx) = chan::bounded(1);

	(
		Producer { events_tx, acks_rx },
		Consumer { events_rx, acks_tx },
	)
}

/// Watcher thread half. Dropping it is how the consumer learns the backend is dead.
#[derive(Debug)]
pub struct Producer {
	events_tx: chan::Sender<CanonicalEvent>,
	acks_rx: chan::Receiver<()>,
}

impl Producer {
	/// Hands `event` to the consumer and blocks until it was fully dispatched.
	///
	/// [`EventKind::Unknown`] events never cross, they return right away.
	pub fn post(&self, event: CanonicalEvent) -> Result<(), ConsumerGone> {
		if event.kind() == EventKind::Unknown {
			return Ok(());
		}

		trace!(kind = %event.kind(), handle = %event.handle(), "Posting event;");

		self.events_tx
			.send_blocking(event)
			.map_err(|_| ConsumerGone)?;

		self.acks_rx.recv_blocking().map_err(|_| ConsumerGone)
	}

	/// Lets sources that don't block on the OS notice an abandoned engine between reads.
	#[must_use]
	pub fn is_consumer_gone(&self) -> bool {
		self.events_tx.is_closed()
	}
}

/// Consumer context half.
#[derive(Debug)]
pub struct Consumer {
	events_rx: chan::Receiver<CanonicalEvent>,
	acks_tx: chan::Sender<()>,
}

impl Consumer {
	/// Waits for the next event, `None` once the producer is gone.
	pub async fn recv(&self) -> Option<Delivery> {
		self.events_rx.recv().await.ok().map(|event| self.deliver(event))
	}

	pub fn recv_blocking(&self) -> Option<Delivery> {
		self.events_rx.recv_blocking().ok().map(|event| self.deliver(event))
	}

	/// Never blocks, use [`Consumer::is_producer_gone`] to tell an empty slot from a dead producer.
	pub fn try_recv(&self) -> Option<Delivery> {
		self.events_rx.try_recv().ok().map(|event| self.deliver(event))
	}

	#[must_use]
	pub fn is_producer_gone(&self) -> bool {
		self.events_rx.is_closed() && self.events_rx.is_empty()
	}

	fn deliver(&self, event: CanonicalEvent) -> Delivery {
		Delivery {
			event,
			acks_tx: self.acks_tx.clone(),
		}
	}
}

/// One event occupying the slot. The producer stays blocked until this is acknowledged,
/// either explicitly with [`Delivery::ack`] or by dropping it.
#[derive(Debug)]
#[must_use = "the watcher thread resumes as soon as the delivery is dropped"]
pub struct Delivery {
	event: CanonicalEvent,
	acks_tx: chan::Sender<()>,
}

impl Delivery {
	pub const fn event(&self) -> &CanonicalEvent {
		&self.event
	}

	pub fn ack(self) {
		drop(self);
	}
}

impl Drop for Delivery {
	fn drop(&mut self) {
		// The producer reads every ack before posting again, so the slot is always free here.
		// A closed channel means the producer is already gone and nobody waits for us.
		let _ = self.acks_tx.try_send(());
	}
}
