//! Deterministic scripted implementation of the `agent_runner` contract.
//!
//! This crate contains no transport logic and is intended for local runs and
//! integration testing of the client's event handling.

use std::thread;
use std::time::Duration;

use agent_runner::{
    is_cancelled, AgentRunner, CancelSignal, Notification, RunRequest, RunnerProfile,
};
use serde_json::{Map, Value};

/// Stable runner identifier used for explicit startup selection.
pub const MOCK_RUNNER_ID: &str = "mock";

/// Placeholder replaced by the turn input inside scripted text.
pub const INPUT_PLACEHOLDER: &str = "{input}";

/// Scripted tool call replayed by [`MockRunner`].
#[derive(Debug, Clone, PartialEq)]
pub struct MockToolCall {
    pub tool_name: String,
    pub arguments: Map<String, Value>,
    pub output: String,
    pub success: bool,
}

/// One step of a mock turn.
#[derive(Debug, Clone, PartialEq)]
pub enum MockStep {
    /// Streamed as whitespace-delimited tokens.
    Text(String),
    Tool(MockToolCall),
    /// Emits `Failed` and ends the turn.
    Fail(String),
}

/// Deterministic runner used by tests and the default binary configuration.
#[derive(Debug, Clone)]
pub struct MockRunner {
    steps: Vec<MockStep>,
    agents: Vec<String>,
    model_id: String,
    start_delay: Duration,
    token_delay: Duration,
}

impl MockRunner {
    const START_DELAY_MS: u64 = 150;
    const TOKEN_DELAY_MS: u64 = 30;

    /// Creates a runner replaying `steps` with no artificial delays.
    #[must_use]
    pub fn new(steps: Vec<MockStep>) -> Self {
        Self {
            steps,
            agents: vec!["react".to_string(), "plan".to_string()],
            model_id: "mock-model".to_string(),
            start_delay: Duration::ZERO,
            token_delay: Duration::ZERO,
        }
    }

    /// Adds pacing so streamed output is visible in an interactive terminal.
    #[must_use]
    pub fn with_delays(mut self, start_delay: Duration, token_delay: Duration) -> Self {
        self.start_delay = start_delay;
        self.token_delay = token_delay;
        self
    }

    /// Interactive pacing used by the binary.
    #[must_use]
    pub fn paced(self) -> Self {
        self.with_delays(
            Duration::from_millis(Self::START_DELAY_MS),
            Duration::from_millis(Self::TOKEN_DELAY_MS),
        )
    }

    #[must_use]
    pub fn steps(&self) -> &[MockStep] {
        &self.steps
    }

    fn stream_text(
        &self,
        run_id: u64,
        text: &str,
        cancel: &CancelSignal,
        emit: &mut dyn FnMut(Notification),
    ) -> bool {
        let mut pending_token = String::new();
        for ch in text.chars() {
            pending_token.push(ch);

            if matches!(ch, ' ' | '\n') {
                if is_cancelled(cancel) {
                    return false;
                }
                emit(Notification::ContentDelta {
                    run_id,
                    text: std::mem::take(&mut pending_token),
                });
                self.pause(self.token_delay);
            }
        }

        if !pending_token.is_empty() {
            if is_cancelled(cancel) {
                return false;
            }
            emit(Notification::ContentDelta {
                run_id,
                text: pending_token,
            });
            self.pause(self.token_delay);
        }

        true
    }

    fn pause(&self, delay: Duration) {
        if !delay.is_zero() {
            thread::sleep(delay);
        }
    }
}

impl Default for MockRunner {
    fn default() -> Self {
        let mut arguments = Map::new();
        arguments.insert("query".to_string(), Value::String(INPUT_PLACEHOLDER.to_string()));
        arguments.insert("limit".to_string(), Value::from(8));

        let output = (1..=8)
            .map(|index| format!("{index}. match for \"{INPUT_PLACEHOLDER}\" in notes/entry-{index}.md"))
            .collect::<Vec<_>>()
            .join("\n");

        Self::new(vec![
            MockStep::Text(format!("Looking into \"{INPUT_PLACEHOLDER}\".\n")),
            MockStep::Tool(MockToolCall {
                tool_name: "search".to_string(),
                arguments,
                output,
                success: true,
            }),
            MockStep::Text(
                "Found eight related notes. The search output above is collapsed; \
                 use /expand to read all of it.\n"
                    .to_string(),
            ),
        ])
        .paced()
    }
}

impl AgentRunner for MockRunner {
    fn profile(&self) -> RunnerProfile {
        RunnerProfile {
            runner_id: MOCK_RUNNER_ID.to_string(),
            agent_id: self.agents[0].clone(),
            model_id: self.model_id.clone(),
        }
    }

    fn available_agents(&self) -> Vec<String> {
        self.agents.clone()
    }

    fn execute(
        &self,
        req: RunRequest,
        cancel: CancelSignal,
        emit: &mut dyn FnMut(Notification),
    ) -> Result<(), String> {
        let run_id = req.run_id;
        let substitute = |text: &str| text.replace(INPUT_PLACEHOLDER, req.input.trim());

        emit(Notification::ExecutionStarted { run_id });
        self.pause(self.start_delay);

        for (index, step) in self.steps.iter().enumerate() {
            if is_cancelled(&cancel) {
                emit(Notification::Interrupted { run_id });
                return Ok(());
            }

            match step {
                MockStep::Text(text) => {
                    if !self.stream_text(run_id, &substitute(text), &cancel, emit) {
                        emit(Notification::Interrupted { run_id });
                        return Ok(());
                    }
                }
                MockStep::Tool(call) => {
                    let call_id = format!("call-{run_id}-{index}");
                    let arguments = call
                        .arguments
                        .iter()
                        .map(|(key, value)| {
                            let value = match value {
                                Value::String(text) => Value::String(substitute(text)),
                                other => other.clone(),
                            };
                            (key.clone(), value)
                        })
                        .collect();

                    emit(Notification::ToolStarted {
                        run_id,
                        call_id: call_id.clone(),
                        tool_name: call.tool_name.clone(),
                        arguments,
                    });
                    self.pause(self.token_delay);

                    if is_cancelled(&cancel) {
                        emit(Notification::Interrupted { run_id });
                        return Ok(());
                    }

                    emit(Notification::ToolFinished {
                        run_id,
                        call_id,
                        result: substitute(&call.output),
                        success: call.success,
                    });
                }
                MockStep::Fail(error) => {
                    emit(Notification::Failed {
                        run_id,
                        error: substitute(error),
                    });
                    return Ok(());
                }
            }
        }

        if is_cancelled(&cancel) {
            emit(Notification::Interrupted { run_id });
        } else {
            emit(Notification::ExecutionFinished { run_id });
        }

        Ok(())
    }
}
