//! Runner-agnostic contract for executing a single agent turn.
//!
//! This crate defines only the turn lifecycle and the notification stream a
//! runner emits while it works. Model transport, tool selection and reasoning
//! live behind the [`AgentRunner`] trait and are not described here.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{Map, Value};

/// Identifier for one agent turn.
pub type RunId = u64;

/// Shared cooperative cancellation flag for a turn.
pub type CancelSignal = Arc<AtomicBool>;

/// Creates a fresh, unset cancellation flag.
#[must_use]
pub fn cancel_signal() -> CancelSignal {
    Arc::new(AtomicBool::new(false))
}

/// Returns true once cancellation has been requested.
#[must_use]
pub fn is_cancelled(cancel: &CancelSignal) -> bool {
    cancel.load(Ordering::SeqCst)
}

/// Error returned while selecting or configuring a runner before any turn starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerInitError {
    message: String,
}

impl RunnerInitError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for RunnerInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for RunnerInitError {}

impl From<String> for RunnerInitError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for RunnerInitError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

/// Prior conversation item handed to the runner as context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunMessage {
    UserText {
        text: String,
    },
    AgentText {
        text: String,
    },
    SystemText {
        text: String,
    },
    ToolCall {
        call_id: String,
        tool_name: String,
        arguments: Value,
    },
    ToolResult {
        call_id: String,
        tool_name: String,
        content: String,
        is_error: bool,
    },
}

/// Input required to start a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub run_id: RunId,
    pub agent_id: String,
    pub model_id: String,
    pub input: String,
    pub context: Vec<RunMessage>,
}

/// One discrete lifecycle event emitted by a runner.
///
/// Zero or more `ContentDelta` notifications precede the terminal
/// `ExecutionFinished`/`Failed`/`Interrupted`, and `ToolStarted` always
/// precedes the `ToolFinished` carrying the same `call_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    ExecutionStarted {
        run_id: RunId,
    },
    ContentDelta {
        run_id: RunId,
        text: String,
    },
    ToolStarted {
        run_id: RunId,
        call_id: String,
        tool_name: String,
        arguments: Map<String, Value>,
    },
    ToolFinished {
        run_id: RunId,
        call_id: String,
        result: String,
        success: bool,
    },
    ExecutionFinished {
        run_id: RunId,
    },
    Failed {
        run_id: RunId,
        error: String,
    },
    Interrupted {
        run_id: RunId,
    },
}

impl Notification {
    /// Returns the turn identifier associated with this notification.
    #[must_use]
    pub fn run_id(&self) -> RunId {
        match self {
            Self::ExecutionStarted { run_id }
            | Self::ContentDelta { run_id, .. }
            | Self::ToolStarted { run_id, .. }
            | Self::ToolFinished { run_id, .. }
            | Self::ExecutionFinished { run_id }
            | Self::Failed { run_id, .. }
            | Self::Interrupted { run_id } => *run_id,
        }
    }

    /// Returns true when this notification ends the turn.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ExecutionFinished { .. } | Self::Failed { .. } | Self::Interrupted { .. }
        )
    }
}

/// Identity of a runner and its current default agent/model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerProfile {
    pub runner_id: String,
    pub agent_id: String,
    pub model_id: String,
}

/// Executes agent turns and reports progress as [`Notification`]s.
pub trait AgentRunner: Send + Sync + 'static {
    /// Returns runner identity metadata.
    fn profile(&self) -> RunnerProfile;

    /// Agent identifiers this runner accepts in [`RunRequest::agent_id`].
    fn available_agents(&self) -> Vec<String> {
        vec![self.profile().agent_id]
    }

    /// Executes one turn and emits notifications in order.
    ///
    /// Runners check `cancel` between sub-steps (before each streamed chunk and
    /// before each tool call) and emit `Interrupted` once they observe it.
    /// Returning `Err` without having emitted a terminal notification is
    /// reported to the host as a failure.
    fn execute(
        &self,
        req: RunRequest,
        cancel: CancelSignal,
        emit: &mut dyn FnMut(Notification),
    ) -> Result<(), String>;
}
