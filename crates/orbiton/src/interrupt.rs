//! Tracks the single active turn and its cancellation flag.

use std::sync::atomic::Ordering;
use std::sync::Mutex;

use agent_runner::{cancel_signal, CancelSignal, RunId};
use tracing::debug;

use crate::error::SessionError;
use crate::session::lock_unpoisoned;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionState {
    Idle,
    Running { run_id: RunId },
    /// Cancellation requested; waiting for the runner to acknowledge.
    Interrupting { run_id: RunId },
}

impl ExecutionState {
    #[must_use]
    pub fn run_id(self) -> Option<RunId> {
        match self {
            Self::Idle => None,
            Self::Running { run_id } | Self::Interrupting { run_id } => Some(run_id),
        }
    }
}

struct CoordinatorInner {
    state: ExecutionState,
    cancel: Option<CancelSignal>,
}

pub struct InterruptCoordinator {
    inner: Mutex<CoordinatorInner>,
}

impl Default for InterruptCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CoordinatorInner {
                state: ExecutionState::Idle,
                cancel: None,
            }),
        }
    }

    /// Marks `run_id` as the active turn and hands out its cancellation flag.
    pub fn begin(&self, run_id: RunId) -> Result<CancelSignal, SessionError> {
        let mut inner = lock_unpoisoned(&self.inner);
        if let Some(active) = inner.state.run_id() {
            return Err(SessionError::ExecutionAlreadyRunning { run_id: active });
        }

        let cancel = cancel_signal();
        inner.state = ExecutionState::Running { run_id };
        inner.cancel = Some(cancel.clone());
        debug!(run_id, "turn started");
        Ok(cancel)
    }

    /// Sets the active turn's cancellation flag. Returns the run it applies to.
    pub fn request_interrupt(&self) -> Option<RunId> {
        let mut inner = lock_unpoisoned(&self.inner);
        let run_id = inner.state.run_id()?;
        if let Some(cancel) = inner.cancel.as_ref() {
            cancel.store(true, Ordering::SeqCst);
        }
        inner.state = ExecutionState::Interrupting { run_id };
        debug!(run_id, "interrupt requested");
        Some(run_id)
    }

    /// Returns to idle when `run_id` is the active turn.
    pub fn finish(&self, run_id: RunId) -> bool {
        let mut inner = lock_unpoisoned(&self.inner);
        if inner.state.run_id() != Some(run_id) {
            return false;
        }
        inner.state = ExecutionState::Idle;
        inner.cancel = None;
        debug!(run_id, "turn finished");
        true
    }

    #[must_use]
    pub fn state(&self) -> ExecutionState {
        lock_unpoisoned(&self.inner).state
    }

    #[must_use]
    pub fn active_run(&self) -> Option<RunId> {
        self.state().run_id()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.active_run().is_some()
    }
}
