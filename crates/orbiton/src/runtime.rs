//! Runs agent turns on worker threads and feeds their notifications back to
//! the foreground loop.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use agent_runner::{
    AgentRunner, CancelSignal, Notification, RunId, RunMessage, RunRequest, RunnerProfile,
};
use serde_json::Value;
use session_store::Role;
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::interrupt::InterruptCoordinator;
use crate::ledger::ContextEntry;
use crate::session::lock_unpoisoned;

/// How long shutdown waits for interrupted workers before detaching them.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

const SHUTDOWN_POLL: Duration = Duration::from_millis(10);

/// Everything the foreground loop reacts to, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    Input(String),
    Notification(Notification),
    /// SIGINT.
    Interrupt,
    Resize,
    /// Standard input closed.
    InputClosed,
}

/// Turn parameters chosen by the foreground loop.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnRequest {
    pub agent_id: String,
    pub model_id: String,
    pub input: String,
    pub context: Vec<ContextEntry>,
}

/// What the foreground loop needs from whoever executes turns.
pub trait TurnHost {
    fn profile(&self) -> RunnerProfile;
    fn available_agents(&self) -> Vec<String>;
    fn start_turn(&mut self, request: TurnRequest) -> Result<RunId, SessionError>;
    fn request_interrupt(&mut self) -> Option<RunId>;
}

pub struct RuntimeController {
    runner: Arc<dyn AgentRunner>,
    coordinator: Arc<InterruptCoordinator>,
    events: Sender<AppEvent>,
    next_run_id: AtomicU64,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl RuntimeController {
    pub fn new(
        runner: Arc<dyn AgentRunner>,
        coordinator: Arc<InterruptCoordinator>,
        events: Sender<AppEvent>,
    ) -> Self {
        Self {
            runner,
            coordinator,
            events,
            next_run_id: AtomicU64::new(1),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Begins a turn on the coordinator and runs it on a named worker thread.
    pub fn start_turn(&self, request: TurnRequest) -> Result<RunId, SessionError> {
        self.reap_finished_workers();

        let run_id = self.next_run_id.fetch_add(1, Ordering::SeqCst);
        let cancel = self.coordinator.begin(run_id)?;
        let run_request = RunRequest {
            run_id,
            agent_id: request.agent_id,
            model_id: request.model_id,
            input: request.input,
            context: to_run_messages(&request.context),
        };

        let runner = Arc::clone(&self.runner);
        let events = self.events.clone();
        let spawned = thread::Builder::new()
            .name(format!("orbiton-run-{run_id}"))
            .spawn(move || run_worker(runner.as_ref(), &events, run_request, cancel));

        match spawned {
            Ok(handle) => {
                lock_unpoisoned(&self.workers).push(handle);
                debug!(run_id, "turn worker spawned");
                Ok(run_id)
            }
            Err(source) => {
                self.coordinator.finish(run_id);
                Err(SessionError::Spawn {
                    what: "turn worker",
                    source,
                })
            }
        }
    }

    pub fn request_interrupt(&self) -> Option<RunId> {
        self.coordinator.request_interrupt()
    }

    /// Interrupts any running turn and waits up to [`SHUTDOWN_GRACE`] for
    /// the workers to exit.
    pub fn shutdown(&self) {
        self.shutdown_within(SHUTDOWN_GRACE);
    }

    /// Like [`shutdown`](Self::shutdown) with an explicit grace period.
    /// Workers still running afterwards are detached.
    pub fn shutdown_within(&self, grace: Duration) {
        self.coordinator.request_interrupt();
        let workers = std::mem::take(&mut *lock_unpoisoned(&self.workers));

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline && !workers.iter().all(JoinHandle::is_finished) {
            thread::sleep(SHUTDOWN_POLL);
        }

        for worker in workers {
            if !worker.is_finished() {
                let name = worker.thread().name().unwrap_or("turn worker").to_string();
                warn!(thread = %name, "turn worker ignored cancellation; detaching");
                continue;
            }
            if worker.join().is_err() {
                warn!("turn worker panicked outside the runner");
            }
        }
    }

    fn reap_finished_workers(&self) {
        let mut workers = lock_unpoisoned(&self.workers);
        let (finished, running): (Vec<_>, Vec<_>) =
            workers.drain(..).partition(JoinHandle::is_finished);
        *workers = running;
        for worker in finished {
            let _ = worker.join();
        }
    }
}

impl TurnHost for RuntimeController {
    fn profile(&self) -> RunnerProfile {
        self.runner.profile()
    }

    fn available_agents(&self) -> Vec<String> {
        self.runner.available_agents()
    }

    fn start_turn(&mut self, request: TurnRequest) -> Result<RunId, SessionError> {
        RuntimeController::start_turn(self, request)
    }

    fn request_interrupt(&mut self) -> Option<RunId> {
        RuntimeController::request_interrupt(self)
    }
}

fn run_worker(
    runner: &dyn AgentRunner,
    events: &Sender<AppEvent>,
    request: RunRequest,
    cancel: CancelSignal,
) {
    let run_id = request.run_id;
    let terminal_emitted = AtomicBool::new(false);
    let mut emit = |notification: Notification| {
        if notification.is_terminal() {
            terminal_emitted.store(true, Ordering::SeqCst);
        }
        // The foreground loop may already be gone during shutdown.
        let _ = events.send(AppEvent::Notification(notification));
    };

    let outcome = catch_unwind(AssertUnwindSafe(|| runner.execute(request, cancel, &mut emit)));
    let failure = match outcome {
        Ok(Ok(())) => None,
        Ok(Err(error)) => Some(error),
        Err(_) => Some("agent runner panicked".to_string()),
    };

    if terminal_emitted.load(Ordering::SeqCst) {
        if let Some(error) = failure {
            warn!(run_id, %error, "runner failed after ending its turn");
        }
        return;
    }

    let error = failure.unwrap_or_else(|| "agent runner exited without finishing the turn".to_string());
    warn!(run_id, %error, "turn failed");
    emit(Notification::Failed { run_id, error });
}

/// Converts ledger context into the runner's message vocabulary.
#[must_use]
pub fn to_run_messages(context: &[ContextEntry]) -> Vec<RunMessage> {
    let mut messages = Vec::with_capacity(context.len());
    for entry in context {
        match entry {
            ContextEntry::Message(message) => {
                let text = message.text.clone();
                messages.push(match message.role {
                    Role::User => RunMessage::UserText { text },
                    Role::Agent => RunMessage::AgentText { text },
                    Role::System => RunMessage::SystemText { text },
                });
            }
            ContextEntry::ToolExecution(execution) => {
                messages.push(RunMessage::ToolCall {
                    call_id: execution.call_id.clone(),
                    tool_name: execution.tool_name.clone(),
                    arguments: Value::Object(execution.arguments.clone()),
                });
                if let Some(outcome) = &execution.outcome {
                    messages.push(RunMessage::ToolResult {
                        call_id: execution.call_id.clone(),
                        tool_name: execution.tool_name.clone(),
                        content: outcome.result.clone(),
                        is_error: !outcome.success,
                    });
                }
            }
        }
    }
    messages
}
