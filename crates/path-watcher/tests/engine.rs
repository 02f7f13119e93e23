use sd_path_watcher::{Error, EventKind, Termination, WatchHandle};

use std::{
	sync::{Arc, Mutex},
	time::Duration,
};

use tokio::time::timeout;
use tracing_test::traced_test;

mod common;

use common::{dispatch, event, fake_engine, handle, WatchOutcome};

#[tokio::test]
#[traced_test]
async fn events_are_dispatched_one_at_a_time_in_post_order() {
	let (mut engine, control) = fake_engine::<String>();
	let watched = engine.watch("/fake/a", "a".to_string()).unwrap();

	let seen = Arc::new(Mutex::new(Vec::new()));
	let acked = control.acked_counter();

	engine.set_event_callback({
		let seen = Arc::clone(&seen);
		move |event, identity| {
			seen.lock().unwrap().push((
				event.kind(),
				identity.cloned(),
				// Nothing after the event being dispatched may have been acknowledged yet
				acked(),
			));
		}
	});

	let kinds = [
		EventKind::Change,
		EventKind::ChildCreate,
		EventKind::ChildDelete,
		EventKind::Rename,
		EventKind::Delete,
	];

	control.feed(kinds.map(|kind| event(kind, watched.raw())));

	for kind in kinds {
		assert_eq!(dispatch(&mut engine).await.unwrap().kind(), kind);
	}

	let seen = seen.lock().unwrap().clone();
	assert_eq!(seen.len(), kinds.len());

	for (index, (kind, identity, acked)) in seen.into_iter().enumerate() {
		assert_eq!(kind, kinds[index]);
		assert_eq!(identity.as_deref(), Some("a"));
		assert_eq!(acked, index);
	}
}

#[tokio::test]
#[traced_test]
async fn unknown_events_are_never_dispatched() {
	let (mut engine, control) = fake_engine::<()>();
	let watched = engine.watch("/fake/a", ()).unwrap();

	control.feed([
		event(EventKind::Unknown, watched.raw()),
		event(EventKind::Change, watched.raw()),
	]);

	let dispatched = dispatch(&mut engine).await.unwrap();
	assert_eq!(dispatched.kind(), EventKind::Change);

	// The unknown one went through the source but never reached the consumer
	assert_eq!(control.posted(), 2);
}

#[tokio::test]
#[traced_test]
async fn events_for_unwatched_handles_carry_no_identity() {
	let (mut engine, control) = fake_engine::<String>();
	let watched = engine.watch("/fake/a", "a".to_string()).unwrap();

	let identities = Arc::new(Mutex::new(Vec::new()));
	engine.set_event_callback({
		let identities = Arc::clone(&identities);
		move |_, identity| identities.lock().unwrap().push(identity.cloned())
	});

	control.feed([event(EventKind::Change, watched.raw())]);

	assert_eq!(engine.unwatch(watched).unwrap(), "a");
	assert!(dispatch(&mut engine).await.is_some());

	assert_eq!(*identities.lock().unwrap(), vec![None]);
}

#[tokio::test]
#[traced_test]
async fn replacing_the_callback() {
	let (mut engine, control) = fake_engine::<()>();
	let watched = engine.watch("/fake/a", ()).unwrap();

	let calls = Arc::new(Mutex::new(Vec::new()));

	engine.set_event_callback({
		let calls = Arc::clone(&calls);
		move |_, _| calls.lock().unwrap().push("first")
	});
	control.feed([event(EventKind::Change, watched.raw())]);
	dispatch(&mut engine).await.unwrap();

	engine.set_event_callback({
		let calls = Arc::clone(&calls);
		move |_, _| calls.lock().unwrap().push("second")
	});
	control.feed([event(EventKind::Change, watched.raw())]);
	dispatch(&mut engine).await.unwrap();

	engine.clear_event_callback();
	control.feed([event(EventKind::Change, watched.raw())]);
	dispatch(&mut engine).await.unwrap();

	assert_eq!(*calls.lock().unwrap(), vec!["first", "second"]);
}

#[tokio::test]
#[traced_test]
async fn duplicate_handle_keeps_the_first_registration() {
	let (mut engine, control) = fake_engine::<&'static str>();
	control.script([WatchOutcome::Handle(3), WatchOutcome::Handle(3)]);

	let first = engine.watch("/fake/a", "first").unwrap();

	match engine.watch("/fake/a", "second") {
		Err(Error::DuplicateHandle(duplicate)) => assert_eq!(duplicate, first),
		other => panic!("expected a duplicate handle, got {other:?}"),
	}

	assert_eq!(*engine.get(first).unwrap(), "first");
	assert_eq!(engine.active_watches(), 1);
	// The OS watch still belongs to the first registration
	assert!(control.unwatched().is_empty());
}

#[tokio::test]
#[traced_test]
async fn exhaustion_leaves_everything_untouched() {
	let (mut engine, control) = fake_engine::<()>();
	control.script([WatchOutcome::Exhausted, WatchOutcome::Invalid]);

	let err = engine.watch("/fake/a", ()).unwrap_err();
	assert!(matches!(err, Error::ResourceExhausted { .. }));
	assert!(err.is_recoverable());

	let err = engine.watch("/fake/b", ()).unwrap_err();
	assert!(matches!(err, Error::InvalidPath { .. }));
	assert!(!err.is_recoverable());

	assert_eq!(engine.values().count(), 0);
	assert_eq!(engine.active_watches(), 0);
	assert!(!engine.is_pinned());
}

#[tokio::test]
#[traced_test]
async fn handles_from_the_backend_must_be_valid() {
	let (mut engine, control) = fake_engine::<()>();
	control.script([WatchOutcome::Handle(-1)]);

	assert!(matches!(
		engine.watch("/fake/a", ()),
		Err(Error::InvalidPath { .. })
	));
	assert_eq!(engine.active_watches(), 0);
	assert_eq!(engine.values().count(), 0);

	// Whatever the backend opened for it doesn't outlive the failed watch
	assert_eq!(control.unwatched(), vec![handle(-1)]);
}

#[tokio::test]
#[traced_test]
async fn unknown_handles_are_rejected() {
	let (mut engine, control) = fake_engine::<()>();
	let stranger = handle(42);

	assert!(matches!(
		engine.unwatch(stranger),
		Err(Error::UnknownHandle(h)) if h == stranger
	));
	assert!(matches!(engine.get(stranger), Err(Error::UnknownHandle(_))));
	assert!(matches!(engine.unwatch(WatchHandle::INVALID), Err(Error::UnknownHandle(_))));
	assert!(!engine.has(stranger));

	assert!(control.unwatched().is_empty());
	assert_eq!(engine.active_watches(), 0);
}

#[tokio::test]
#[traced_test]
async fn liveness_follows_the_number_of_watches() {
	let (mut engine, control) = fake_engine::<&'static str>();
	let mut guard = engine.liveness();

	assert!(!guard.is_pinned());

	let a = engine.watch("/fake/a", "a").unwrap();
	assert!(engine.is_pinned());
	assert!(guard.is_pinned());

	let b = engine.watch("/fake/b", "b").unwrap();
	assert_eq!(engine.active_watches(), 2);

	engine.unwatch(a).unwrap();
	assert!(engine.is_pinned());

	engine.unwatch(b).unwrap();
	assert!(!engine.is_pinned());
	assert_eq!(engine.active_watches(), 0);

	timeout(Duration::from_secs(1), guard.wait_released())
		.await
		.unwrap();

	assert_eq!(control.unwatched(), vec![a, b]);
}

#[tokio::test]
#[traced_test]
async fn registry_size_tracks_successful_adds_and_removes() {
	let (mut engine, _control) = fake_engine::<i64>();
	let mut live = Vec::new();

	for step in 0..40_i64 {
		if step % 3 == 2 {
			if let Some(handle) = live.pop() {
				engine.remove(handle).unwrap();
			}
		} else {
			live.push(engine.watch("/fake/a", step).unwrap());
		}

		// Removing something that isn't there changes nothing
		assert!(engine.remove(handle(1_000 + step)).is_err());

		assert_eq!(engine.values().count(), live.len());
		assert_eq!(engine.active_watches(), live.len());
	}
}

#[tokio::test]
#[traced_test]
async fn close_all_releases_every_watch() {
	let (mut engine, control) = fake_engine::<()>();

	let handles = (0..3)
		.map(|_| engine.watch("/fake/a", ()).unwrap())
		.collect::<Vec<_>>();
	assert!(engine.is_pinned());

	engine.close_all();

	assert_eq!(engine.iter().count(), 0);
	assert_eq!(engine.active_watches(), 0);
	assert!(!engine.is_pinned());
	assert_eq!(control.unwatched(), handles);

	// Nothing left to release, so the liveness count can't go below zero
	engine.clear();
	assert_eq!(engine.active_watches(), 0);
}

#[tokio::test]
#[traced_test]
async fn read_failure_is_terminal() {
	let (mut engine, control) = fake_engine::<()>();
	let watched = engine.watch("/fake/a", ()).unwrap();

	control.feed([event(EventKind::Change, watched.raw())]);
	control.fail();

	assert!(dispatch(&mut engine).await.is_some());
	assert!(dispatch(&mut engine).await.is_none());

	assert!(matches!(
		engine.termination(),
		Some(Termination::ReadFailed(_))
	));
	assert!(!engine.is_backend_alive());

	// Still dead, watches stay registered
	assert!(dispatch(&mut engine).await.is_none());
	assert!(engine.try_dispatch().is_none());
	assert!(engine.has(watched));
	assert!(logs_contain("Watch backend terminated;"));
}

#[tokio::test]
#[traced_test]
async fn dropped_control_ends_the_stream() {
	let (mut engine, control) = fake_engine::<()>();
	assert!(engine.is_backend_alive());

	drop(control);

	assert!(dispatch(&mut engine).await.is_none());
	assert!(matches!(engine.termination(), Some(Termination::EndOfStream)));
}

#[test]
fn blocking_dispatch() {
	let (mut engine, control) = fake_engine::<()>();
	let watched = engine.watch("/fake/a", ()).unwrap();

	assert!(engine.try_dispatch().is_none());

	control.feed([event(EventKind::ChildRename, watched.raw()).with_new_path("b.txt")]);

	let dispatched = engine.dispatch_next_blocking().unwrap();
	assert_eq!(dispatched.kind(), EventKind::ChildRename);
	assert_eq!(dispatched.new_path(), b"b.txt");

	drop(control);
	assert!(engine.dispatch_next_blocking().is_none());
	assert!(!engine.is_backend_alive());
}
