//!
//! # Path Watcher
//!
//! Spacedrive's Path Watcher registers interest in paths and delivers a normalized stream of
//! change events, whatever primitive the platform offers underneath (inotify on Linux, stat
//! polling elsewhere).
//!
//! The engine is made of a few small pieces:
//! - A [`Backend`] that opens and closes OS watches, and its [`EventSource`] half that runs the
//!   blocking read loop on a dedicated watcher thread;
//! - A rendezvous channel that hands exactly one [`CanonicalEvent`] at a time from the watcher
//!   thread to the consumer and blocks until the consumer acknowledges it;
//! - A [`HandleRegistry`] mapping each [`WatchHandle`] to whatever the consumer uses to identify it;
//! - A [`LivenessController`] telling the owning process whether outstanding watches should keep
//!   it running.
//!
//! On top of the engine, [`PathWatcher`] hands out per path [`Subscription`]s and
//! [`FallbackWatcher`] moves paths the native backend has no room for to stat polling.
//!
//! Events are never dropped, reordered, batched or coalesced. Any debouncing is up to the consumer.
//!
//! ## Basic example
//!
//! ```no_run
//! use sd_path_watcher::{EventKind, RecommendedBackend, WatchEngine, WatcherConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), sd_path_watcher::Error> {
//!     let mut engine =
//!         WatchEngine::<RecommendedBackend, String>::initialize(WatcherConfig::default())?;
//!
//!     engine.set_event_callback(|event, identity| {
//!         println!("{} on {:?}", event.kind(), identity);
//!     });
//!
//!     let handle = engine.watch("/tmp/notes.txt", "notes".to_string())?;
//!
//!     while let Some(event) = engine.dispatch_next().await {
//!         if event.kind() == EventKind::Delete {
//!             engine.unwatch(handle)?;
//!             break;
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

pub mod backend;
mod config;
mod engine;
mod error;
mod event;
mod fallback;
mod handle;
mod liveness;
pub mod rendezvous;
mod registry;
mod watcher;

pub use backend::{Backend, EventSource, PollBackend, RecommendedBackend, Termination};
#[cfg(any(target_os = "linux", target_os = "android"))]
pub use backend::InotifyBackend;
pub use config::{WatchMode, WatcherConfig};
pub use engine::{EventCallback, WatchEngine};
pub use error::{Error, Result};
pub use event::{CanonicalEvent, EventKind};
pub use fallback::FallbackWatcher;
pub use handle::{Platform, WatchHandle};
pub use liveness::{LivenessController, LivenessGuard};
pub use registry::HandleRegistry;
pub use watcher::{
	PathEvent, PathEventKind, PathWatcher, Subscription, SubscriptionId, WatchedPath,
	RENAME_SETTLE,
};
