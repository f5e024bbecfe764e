use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use orbiton::autosave::{AutoSaveLoop, AutoSaveSchedule, TickOutcome};
use orbiton::sections::ExpandThreshold;
use orbiton::session::Session;
use orbiton::ErrorKind;
use serde_json::Map;
use session_store::{PersistenceStore, Role};

fn session_with_message() -> Arc<Session> {
    let session = Arc::new(Session::new("react", "mock-model", ExpandThreshold::default()));
    session.append_message(Role::User, "remember this", Map::new());
    session
}

fn snapshot_count(dir: &Path) -> usize {
    match fs::read_dir(dir) {
        Ok(entries) => entries.count(),
        Err(_) => 0,
    }
}

#[test]
fn manual_ticks_write_equal_loadable_snapshots() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(PersistenceStore::new(dir.path()));
    let session = session_with_message();
    let mut autosave = AutoSaveLoop::new(
        Arc::clone(&session),
        Arc::clone(&store),
        AutoSaveSchedule::Manual,
    );
    autosave.start().expect("start");

    let TickOutcome::Saved(first) = autosave.trigger().expect("tick") else {
        panic!("first tick should save");
    };
    let TickOutcome::Saved(second) = autosave.trigger().expect("tick") else {
        panic!("second tick should save");
    };

    assert_ne!(first, second);
    let first = store.load(&first).expect("load first");
    let second = store.load(&second).expect("load second");
    assert_eq!(first, second);
    assert_eq!(first, session.snapshot());

    let stats = autosave.stats();
    assert_eq!(stats.ticks, 2);
    assert_eq!(stats.saved, 2);
}

#[test]
fn stopping_twice_writes_one_final_snapshot() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(PersistenceStore::new(dir.path()));
    let mut autosave =
        AutoSaveLoop::new(session_with_message(), store, AutoSaveSchedule::Manual);
    autosave.start().expect("start");

    let final_path = autosave.stop().expect("stop").expect("final snapshot");
    assert!(final_path.is_file());
    assert_eq!(autosave.stop().expect("second stop"), None);
    assert!(!autosave.is_running());
    assert_eq!(snapshot_count(dir.path()), 1);
}

#[test]
fn final_save_happens_even_for_an_empty_session() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(PersistenceStore::new(dir.path()));
    let session = Arc::new(Session::new("react", "mock-model", ExpandThreshold::default()));
    let mut autosave = AutoSaveLoop::new(session, store, AutoSaveSchedule::Manual);
    autosave.start().expect("start");

    assert_eq!(autosave.trigger().expect("tick"), TickOutcome::Skipped);
    assert_eq!(snapshot_count(dir.path()), 0);
    assert_eq!(autosave.stats().skipped, 1);

    assert!(autosave.stop().expect("stop").is_some());
    assert_eq!(snapshot_count(dir.path()), 1);
}

#[test]
fn failed_tick_is_swallowed_and_the_loop_keeps_going() {
    let dir = tempfile::tempdir().expect("tempdir");
    let blocker = dir.path().join("not-a-directory");
    fs::write(&blocker, "occupied").expect("write blocker");
    let store = Arc::new(PersistenceStore::new(&blocker));
    let mut autosave =
        AutoSaveLoop::new(session_with_message(), store, AutoSaveSchedule::Manual);
    autosave.start().expect("start");

    assert!(matches!(autosave.trigger().expect("tick"), TickOutcome::Failed(_)));
    assert!(matches!(autosave.trigger().expect("tick"), TickOutcome::Failed(_)));
    assert!(autosave.is_running());

    let stats = autosave.stats();
    assert_eq!(stats.ticks, 2);
    assert_eq!(stats.failed, 2);

    let error = autosave.stop().expect_err("final save cannot succeed");
    assert_eq!(error.kind(), ErrorKind::IoFailure);
    assert_eq!(autosave.stop().expect("already stopped"), None);
}

#[test]
fn start_and_trigger_check_the_running_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(PersistenceStore::new(dir.path()));
    let mut autosave =
        AutoSaveLoop::new(session_with_message(), store, AutoSaveSchedule::Manual);

    let error = autosave.trigger().expect_err("not running");
    assert_eq!(error.kind(), ErrorKind::InvalidState);

    autosave.start().expect("start");
    let error = autosave.start().expect_err("already running");
    assert_eq!(error.kind(), ErrorKind::InvalidState);
}

#[test]
fn interval_schedule_saves_in_the_background() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(PersistenceStore::new(dir.path()));
    let mut autosave = AutoSaveLoop::new(
        session_with_message(),
        store,
        AutoSaveSchedule::Interval(Duration::from_millis(20)),
    );
    autosave.start().expect("start");

    let deadline = Instant::now() + Duration::from_secs(5);
    while autosave.stats().saved == 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert!(autosave.stats().saved >= 1);

    autosave.stop().expect("stop");
    assert!(snapshot_count(dir.path()) >= 2);
}
