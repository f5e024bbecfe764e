mod support;

use std::sync::atomic::Ordering;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use agent_runner::{
    is_cancelled, AgentRunner, CancelSignal, Notification, RunMessage, RunRequest, RunnerProfile,
};
use agent_runner_mock::{MockRunner, MockStep, MockToolCall};
use orbiton::app::{App, Flow};
use orbiton::autosave::AutoSaveSchedule;
use orbiton::bridge::INTERRUPTED_RESULT;
use orbiton::interrupt::InterruptCoordinator;
use orbiton::ledger::ContextEntry;
use orbiton::runtime::{to_run_messages, AppEvent, RuntimeController, TurnRequest};
use orbiton::ErrorKind;
use serde_json::{json, Map, Value};
use session_store::{ConversationMessage, MessageId, Role};
use time::OffsetDateTime;

use support::{test_config, RecordingRenderer};

const WAIT: Duration = Duration::from_secs(5);

struct Rig {
    app: App,
    controller: RuntimeController,
    coordinator: Arc<InterruptCoordinator>,
    events: Receiver<AppEvent>,
    display: RecordingRenderer,
    _dir: tempfile::TempDir,
}

impl Rig {
    fn new(runner: Arc<dyn AgentRunner>) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let coordinator = Arc::new(InterruptCoordinator::new());
        let (sender, events) = mpsc::channel();
        let controller = RuntimeController::new(runner, Arc::clone(&coordinator), sender);
        let profile = orbiton::runtime::TurnHost::profile(&controller);
        let app = App::with_schedule(
            test_config(dir.path()),
            &profile,
            Arc::clone(&coordinator),
            Some(AutoSaveSchedule::Manual),
        );
        Self {
            app,
            controller,
            coordinator,
            events,
            display: RecordingRenderer::default(),
            _dir: dir,
        }
    }

    fn handle(&mut self, event: AppEvent) -> Flow {
        self.app
            .handle_event(event, &mut self.controller, &mut self.display)
    }

    /// Pumps worker events into the app until `done` holds.
    fn pump_until(&mut self, mut done: impl FnMut(&Self) -> bool) {
        let deadline = Instant::now() + WAIT;
        while !done(self) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            assert!(!remaining.is_zero(), "timed out waiting for runner events");
            if let Ok(event) = self.events.recv_timeout(remaining) {
                self.handle(event);
            }
        }
    }

    fn pump_until_idle(&mut self) {
        self.pump_until(|rig| !rig.coordinator.is_running());
    }
}

impl Drop for Rig {
    fn drop(&mut self) {
        self.controller.shutdown();
    }
}

/// Streams a little text, starts a tool and then waits for cancellation.
struct StallingRunner;

impl AgentRunner for StallingRunner {
    fn profile(&self) -> RunnerProfile {
        RunnerProfile {
            runner_id: "stalling".to_string(),
            agent_id: "react".to_string(),
            model_id: "mock-model".to_string(),
        }
    }

    fn execute(
        &self,
        req: RunRequest,
        cancel: CancelSignal,
        emit: &mut dyn FnMut(Notification),
    ) -> Result<(), String> {
        let run_id = req.run_id;
        emit(Notification::ExecutionStarted { run_id });
        emit(Notification::ContentDelta {
            run_id,
            text: "Checking".to_string(),
        });
        emit(Notification::ToolStarted {
            run_id,
            call_id: "call-slow".to_string(),
            tool_name: "sleep".to_string(),
            arguments: Map::new(),
        });

        let deadline = Instant::now() + WAIT;
        while !is_cancelled(&cancel) {
            if Instant::now() > deadline {
                return Err("never cancelled".to_string());
            }
            thread::sleep(Duration::from_millis(5));
        }
        emit(Notification::Interrupted { run_id });
        Ok(())
    }
}

/// Ends without a terminal notification, by error or by panic.
struct BrokenRunner {
    panic: bool,
}

impl AgentRunner for BrokenRunner {
    fn profile(&self) -> RunnerProfile {
        RunnerProfile {
            runner_id: "broken".to_string(),
            agent_id: "react".to_string(),
            model_id: "mock-model".to_string(),
        }
    }

    fn execute(
        &self,
        req: RunRequest,
        _cancel: CancelSignal,
        emit: &mut dyn FnMut(Notification),
    ) -> Result<(), String> {
        emit(Notification::ExecutionStarted { run_id: req.run_id });
        emit(Notification::ContentDelta {
            run_id: req.run_id,
            text: "partial".to_string(),
        });
        if self.panic {
            panic!("runner bug");
        }
        Err("upstream closed the stream".to_string())
    }
}

/// Blocks in an external call that never looks at the cancel flag.
struct UnresponsiveRunner {
    release: Mutex<Receiver<()>>,
}

impl UnresponsiveRunner {
    fn new() -> (Self, Sender<()>) {
        let (release, wait) = mpsc::channel();
        let runner = Self {
            release: Mutex::new(wait),
        };
        (runner, release)
    }
}

impl AgentRunner for UnresponsiveRunner {
    fn profile(&self) -> RunnerProfile {
        RunnerProfile {
            runner_id: "unresponsive".to_string(),
            agent_id: "react".to_string(),
            model_id: "mock-model".to_string(),
        }
    }

    fn execute(
        &self,
        req: RunRequest,
        _cancel: CancelSignal,
        emit: &mut dyn FnMut(Notification),
    ) -> Result<(), String> {
        emit(Notification::ExecutionStarted { run_id: req.run_id });
        let release = self.release.lock().map_err(|_| "poisoned".to_string())?;
        let _ = release.recv_timeout(Duration::from_secs(30));
        Ok(())
    }
}

fn scripted_runner() -> MockRunner {
    let mut arguments = Map::new();
    arguments.insert("path".to_string(), Value::String("{input}".to_string()));
    MockRunner::new(vec![
        MockStep::Text("Reading it.\n".to_string()),
        MockStep::Tool(MockToolCall {
            tool_name: "read".to_string(),
            arguments,
            output: (1..=8).map(|n| format!("line {n}")).collect::<Vec<_>>().join("\n"),
            success: true,
        }),
        MockStep::Text("That is the whole file.".to_string()),
    ])
}

#[test]
fn mock_turn_flows_from_worker_to_ledger() {
    let mut rig = Rig::new(Arc::new(scripted_runner()));

    assert_eq!(rig.handle(AppEvent::Input("notes.md".to_string())), Flow::Continue);
    assert!(rig.coordinator.is_running());
    rig.pump_until_idle();

    let session = Arc::clone(rig.app.session());
    let messages = session.messages(None, 0);
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].text, "notes.md");
    assert_eq!(messages[1].role, Role::Agent);
    assert_eq!(messages[1].text, "Reading it.\nThat is the whole file.");
    assert_eq!(messages[1].tool_calls, Some(vec!["call-1-1".to_string()]));

    let executions = session.tool_executions(None, 0);
    assert_eq!(executions.len(), 1);
    assert_eq!(executions[0].arguments.get("path"), Some(&json!("notes.md")));
    assert_eq!(executions[0].message_id, Some(messages[0].id));
    assert!(executions[0].outcome.as_ref().expect("completed").success);

    // Eight lines is over the five-line default threshold.
    assert_eq!(session.section_count(), 1);
    assert!(rig.display.contains("/expand 1 to show the full output"));
}

#[test]
fn interrupt_reaches_the_worker_and_settles_the_turn() {
    let mut rig = Rig::new(Arc::new(StallingRunner));

    rig.handle(AppEvent::Input("wait".to_string()));
    let session = Arc::clone(rig.app.session());
    rig.pump_until(|_| !session.in_flight_executions().is_empty());

    assert_eq!(rig.handle(AppEvent::Interrupt), Flow::Continue);
    rig.pump_until_idle();

    let messages = session.messages(None, 0);
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].text, "Checking");
    assert_eq!(messages[1].metadata.get("interrupted"), Some(&Value::Bool(true)));

    let executions = session.tool_executions(None, 0);
    let outcome = executions[0].outcome.as_ref().expect("settled");
    assert!(!outcome.success);
    assert_eq!(outcome.result, INTERRUPTED_RESULT);

    // Idle again: the next interrupt exits.
    assert_eq!(rig.handle(AppEvent::Interrupt), Flow::Exit);
}

#[test]
fn runner_error_without_terminal_event_fails_the_turn() {
    let mut rig = Rig::new(Arc::new(BrokenRunner { panic: false }));

    rig.handle(AppEvent::Input("go".to_string()));
    rig.pump_until_idle();

    let messages = rig.app.session().messages(None, 0);
    let roles: Vec<Role> = messages.iter().map(|message| message.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Agent, Role::System]);
    assert_eq!(messages[1].metadata.get("truncated"), Some(&Value::Bool(true)));
    assert_eq!(messages[2].text, "upstream closed the stream");
}

#[test]
fn runner_panic_becomes_a_failed_turn() {
    let mut rig = Rig::new(Arc::new(BrokenRunner { panic: true }));

    rig.handle(AppEvent::Input("go".to_string()));
    rig.pump_until_idle();

    let messages = rig.app.session().messages(None, 0);
    assert_eq!(
        messages.last().map(|message| message.text.as_str()),
        Some("agent runner panicked")
    );
    assert!(rig.display.contains("agent runner panicked"));
}

#[test]
fn only_one_turn_runs_at_a_time() {
    let (sender, _events) = mpsc::channel();
    let coordinator = Arc::new(InterruptCoordinator::new());
    let controller =
        RuntimeController::new(Arc::new(StallingRunner), Arc::clone(&coordinator), sender);
    let request = TurnRequest {
        agent_id: "react".to_string(),
        model_id: "mock-model".to_string(),
        input: "wait".to_string(),
        context: Vec::new(),
    };

    let first = controller.start_turn(request.clone()).expect("first turn");
    let error = controller.start_turn(request).expect_err("second turn");
    assert_eq!(error.kind(), ErrorKind::InvalidState);

    assert_eq!(controller.request_interrupt(), Some(first));
    controller.shutdown();
}

#[test]
fn shutdown_interrupts_and_joins_running_workers() {
    let (sender, events) = mpsc::channel();
    let coordinator = Arc::new(InterruptCoordinator::new());
    let controller =
        RuntimeController::new(Arc::new(StallingRunner), Arc::clone(&coordinator), sender);
    let run_id = controller
        .start_turn(TurnRequest {
            agent_id: "react".to_string(),
            model_id: "mock-model".to_string(),
            input: "wait".to_string(),
            context: Vec::new(),
        })
        .expect("turn");

    controller.shutdown();

    let received: Vec<AppEvent> = events.try_iter().collect();
    assert_eq!(
        received.last(),
        Some(&AppEvent::Notification(Notification::Interrupted { run_id }))
    );
}

#[test]
fn context_entries_map_to_run_messages() {
    let now = OffsetDateTime::now_utc();
    let message = |id, role, text: &str| {
        ContextEntry::Message(ConversationMessage {
            id: MessageId(id),
            role,
            text: text.to_string(),
            created_at: now,
            metadata: Map::new(),
            tool_calls: None,
        })
    };
    let context = vec![
        message(1, Role::User, "hi"),
        message(2, Role::Agent, "hello"),
        message(3, Role::System, "note"),
    ];

    assert_eq!(
        to_run_messages(&context),
        vec![
            RunMessage::UserText {
                text: "hi".to_string()
            },
            RunMessage::AgentText {
                text: "hello".to_string()
            },
            RunMessage::SystemText {
                text: "note".to_string()
            },
        ]
    );
}

#[test]
fn cancel_signal_is_shared_with_the_worker() {
    let coordinator = InterruptCoordinator::new();
    let cancel = coordinator.begin(9).expect("begin");
    assert!(!cancel.load(Ordering::SeqCst));
    coordinator.request_interrupt();
    assert!(cancel.load(Ordering::SeqCst));
}

#[test]
fn shutdown_detaches_a_worker_that_ignores_cancellation() {
    let (runner, release) = UnresponsiveRunner::new();
    let (sender, events) = mpsc::channel();
    let coordinator = Arc::new(InterruptCoordinator::new());
    let controller = RuntimeController::new(Arc::new(runner), Arc::clone(&coordinator), sender);
    let run_id = controller
        .start_turn(TurnRequest {
            agent_id: "react".to_string(),
            model_id: "mock-model".to_string(),
            input: "hang".to_string(),
            context: Vec::new(),
        })
        .expect("turn");
    assert_eq!(
        events.recv_timeout(WAIT),
        Ok(AppEvent::Notification(Notification::ExecutionStarted { run_id }))
    );

    let started = Instant::now();
    controller.shutdown_within(Duration::from_millis(100));
    assert!(started.elapsed() < Duration::from_secs(2));

    // Still waiting on the runner: no terminal notification yet.
    assert_eq!(coordinator.active_run(), Some(run_id));
    assert!(events.try_recv().is_err());

    drop(release);
}
