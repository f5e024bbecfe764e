//! Background snapshotting of the live session.

use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use session_store::PersistenceStore;
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::session::{lock_unpoisoned, Session};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoSaveSchedule {
    Interval(Duration),
    /// Ticks happen only through [`AutoSaveLoop::trigger`].
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Saved(PathBuf),
    /// The session had no messages yet.
    Skipped,
    /// Logged and swallowed; the next tick tries again.
    Failed(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AutoSaveStats {
    pub ticks: u64,
    pub saved: u64,
    pub skipped: u64,
    pub failed: u64,
}

enum Signal {
    Tick(Sender<TickOutcome>),
    Stop,
}

struct Worker {
    signals: Sender<Signal>,
    handle: JoinHandle<()>,
}

/// Periodically writes a value snapshot of the session to the store.
///
/// The foreground never waits on a save except through [`trigger`] and
/// [`stop`].
///
/// [`trigger`]: AutoSaveLoop::trigger
/// [`stop`]: AutoSaveLoop::stop
pub struct AutoSaveLoop {
    session: Arc<Session>,
    store: Arc<PersistenceStore>,
    schedule: AutoSaveSchedule,
    stats: Arc<Mutex<AutoSaveStats>>,
    worker: Option<Worker>,
}

impl AutoSaveLoop {
    #[must_use]
    pub fn new(
        session: Arc<Session>,
        store: Arc<PersistenceStore>,
        schedule: AutoSaveSchedule,
    ) -> Self {
        Self {
            session,
            store,
            schedule,
            stats: Arc::new(Mutex::new(AutoSaveStats::default())),
            worker: None,
        }
    }

    #[must_use]
    pub fn schedule(&self) -> AutoSaveSchedule {
        self.schedule
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.worker.is_some() {
            return Err(SessionError::AutoSaveAlreadyRunning);
        }

        let (signals, receiver) = mpsc::channel();
        let session = Arc::clone(&self.session);
        let store = Arc::clone(&self.store);
        let stats = Arc::clone(&self.stats);
        let schedule = self.schedule;
        let handle = thread::Builder::new()
            .name("orbiton-autosave".to_string())
            .spawn(move || run_loop(&session, &store, &stats, schedule, &receiver))
            .map_err(|source| SessionError::Spawn {
                what: "auto-save",
                source,
            })?;

        debug!(?schedule, "auto-save started");
        self.worker = Some(Worker { signals, handle });
        Ok(())
    }

    /// Runs one tick on the save thread and waits for its outcome.
    pub fn trigger(&self) -> Result<TickOutcome, SessionError> {
        let worker = self.worker.as_ref().ok_or(SessionError::AutoSaveNotRunning)?;
        let (ack, outcome) = mpsc::channel();
        worker
            .signals
            .send(Signal::Tick(ack))
            .map_err(|_| SessionError::AutoSaveNotRunning)?;
        outcome.recv().map_err(|_| SessionError::AutoSaveNotRunning)
    }

    /// Stops the thread, then writes one final snapshot and returns its path.
    ///
    /// An in-flight tick finishes first. Stopping a stopped loop does nothing
    /// and returns `Ok(None)`.
    pub fn stop(&mut self) -> Result<Option<PathBuf>, SessionError> {
        let Some(worker) = self.worker.take() else {
            return Ok(None);
        };
        let _ = worker.signals.send(Signal::Stop);
        if worker.handle.join().is_err() {
            warn!("auto-save thread panicked");
        }

        let path = self.store.save(&self.session.snapshot(), None)?;
        debug!(path = %path.display(), "final snapshot saved");
        Ok(Some(path))
    }

    #[must_use]
    pub fn stats(&self) -> AutoSaveStats {
        *lock_unpoisoned(&self.stats)
    }
}

impl Drop for AutoSaveLoop {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.signals.send(Signal::Stop);
            let _ = worker.handle.join();
        }
    }
}

fn run_loop(
    session: &Session,
    store: &PersistenceStore,
    stats: &Mutex<AutoSaveStats>,
    schedule: AutoSaveSchedule,
    signals: &Receiver<Signal>,
) {
    let mut deadline = match schedule {
        AutoSaveSchedule::Interval(period) => Some(Instant::now() + period),
        AutoSaveSchedule::Manual => None,
    };

    loop {
        let signal = match deadline {
            Some(at) => match signals.recv_timeout(at.saturating_duration_since(Instant::now())) {
                Ok(signal) => Some(signal),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match signals.recv() {
                Ok(signal) => Some(signal),
                Err(_) => break,
            },
        };

        match signal {
            None => {
                tick(session, store, stats);
                if let AutoSaveSchedule::Interval(period) = schedule {
                    deadline = Some(Instant::now() + period);
                }
            }
            Some(Signal::Tick(ack)) => {
                let _ = ack.send(tick(session, store, stats));
            }
            Some(Signal::Stop) => break,
        }
    }
}

fn tick(session: &Session, store: &PersistenceStore, stats: &Mutex<AutoSaveStats>) -> TickOutcome {
    let snapshot = session.snapshot();
    lock_unpoisoned(stats).ticks += 1;

    if snapshot.messages.is_empty() {
        lock_unpoisoned(stats).skipped += 1;
        return TickOutcome::Skipped;
    }

    match store.save(&snapshot, None) {
        Ok(path) => {
            lock_unpoisoned(stats).saved += 1;
            debug!(path = %path.display(), "auto-saved session");
            TickOutcome::Saved(path)
        }
        Err(error) => {
            lock_unpoisoned(stats).failed += 1;
            warn!(%error, kind = %error.kind(), "auto-save failed; retrying next tick");
            TickOutcome::Failed(error.to_string())
        }
    }
}
