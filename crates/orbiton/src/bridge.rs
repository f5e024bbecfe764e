//! Applies runner notifications to the session and the display.
//!
//! All notifications arrive on the foreground loop and pass through
//! [`EventBridge::dispatch`], which is the only place turn output reaches the
//! ledger.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use agent_runner::{Notification, RunId};
use serde_json::{Map, Value};
use session_store::{ExecutionId, MessageId, Role};
use tracing::{debug, warn};

use crate::display::{LineStyle, Renderer};
use crate::interrupt::InterruptCoordinator;
use crate::sections::{EntryRef, SectionKind};
use crate::session::Session;

/// Result of the terminal notification that ended a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Finished,
    Failed(String),
    Interrupted,
}

/// Result recorded for tool executions cut off by a user interrupt.
pub const INTERRUPTED_RESULT: &str = "interrupted";

/// Result recorded for tool executions still open when a turn finishes.
pub const UNFINISHED_RESULT: &str = "turn ended without a tool result";

const WORKING_STATUS: &str = "⠋ working… (ctrl+c to interrupt)";

struct InFlightCall {
    execution: ExecutionId,
    started: Instant,
}

pub struct EventBridge {
    session: Arc<Session>,
    coordinator: Arc<InterruptCoordinator>,
    pending: String,
    tool_calls: Vec<String>,
    in_flight: HashMap<String, InFlightCall>,
    trigger: Option<MessageId>,
}

impl EventBridge {
    #[must_use]
    pub fn new(session: Arc<Session>, coordinator: Arc<InterruptCoordinator>) -> Self {
        Self {
            session,
            coordinator,
            pending: String::new(),
            tool_calls: Vec::new(),
            in_flight: HashMap::new(),
            trigger: None,
        }
    }

    /// Resets per-turn buffers. Tool executions of the turn link back to
    /// `trigger`.
    pub fn begin_turn(&mut self, trigger: Option<MessageId>) {
        self.pending.clear();
        self.tool_calls.clear();
        self.in_flight.clear();
        self.trigger = trigger;
    }

    /// Streamed agent text not yet committed to the ledger.
    #[must_use]
    pub fn pending_text(&self) -> &str {
        &self.pending
    }

    /// Applies one notification. Returns the outcome when it ends the turn.
    ///
    /// Notifications for any run other than the active one are dropped.
    pub fn dispatch(
        &mut self,
        notification: Notification,
        display: &mut dyn Renderer,
    ) -> Option<TurnOutcome> {
        let run_id = notification.run_id();
        if self.coordinator.active_run() != Some(run_id) {
            debug!(run_id, ?notification, "ignoring notification for inactive run");
            return None;
        }

        match notification {
            Notification::ExecutionStarted { .. } => {
                display.show_status(WORKING_STATUS);
                None
            }
            Notification::ContentDelta { text, .. } => {
                self.pending.push_str(&text);
                display.update_streaming(&self.pending);
                None
            }
            Notification::ToolStarted {
                call_id,
                tool_name,
                arguments,
                ..
            } => {
                self.on_tool_started(call_id, tool_name, arguments, display);
                None
            }
            Notification::ToolFinished {
                call_id,
                result,
                success,
                ..
            } => {
                self.on_tool_finished(&call_id, result, success, display);
                None
            }
            Notification::ExecutionFinished { .. } => {
                self.on_finished(run_id, display);
                Some(TurnOutcome::Finished)
            }
            Notification::Failed { error, .. } => {
                self.on_failed(run_id, &error, display);
                Some(TurnOutcome::Failed(error))
            }
            Notification::Interrupted { .. } => {
                self.on_interrupted(run_id, display);
                Some(TurnOutcome::Interrupted)
            }
        }
    }

    fn on_tool_started(
        &mut self,
        call_id: String,
        tool_name: String,
        arguments: Map<String, Value>,
        display: &mut dyn Renderer,
    ) {
        let rendered_arguments = Value::Object(arguments.clone()).to_string();
        match self.session.append_tool_execution(
            tool_name.clone(),
            call_id.clone(),
            arguments,
            self.trigger,
        ) {
            Ok(execution) => {
                self.tool_calls.push(call_id.clone());
                self.in_flight.insert(
                    call_id,
                    InFlightCall {
                        execution,
                        started: Instant::now(),
                    },
                );
                display.append_line(LineStyle::ToolCall, &format!("{tool_name} {rendered_arguments}"));
                display.show_status(&format!("⠋ running {tool_name}…"));
            }
            Err(error) => {
                warn!(%error, "rejected tool invocation");
                display.append_line(LineStyle::Warning, &error.to_string());
            }
        }
    }

    fn on_tool_finished(
        &mut self,
        call_id: &str,
        result: String,
        success: bool,
        display: &mut dyn Renderer,
    ) {
        let Some(call) = self.in_flight.remove(call_id) else {
            warn!(call_id, "tool result without a matching invocation");
            display.append_line(
                LineStyle::Warning,
                &format!("result for unknown tool call {call_id} ignored"),
            );
            return;
        };

        if let Err(error) = self.session.complete_tool_execution(
            call.execution,
            result.clone(),
            call.started.elapsed(),
            success,
        ) {
            warn!(%error, "could not complete tool execution");
            display.append_line(LineStyle::Warning, &error.to_string());
            return;
        }

        let style = if success {
            LineStyle::ToolResult
        } else {
            LineStyle::Error
        };
        match self.session.register_if_exceeds(
            SectionKind::ToolOutput,
            EntryRef::ToolExecution(call.execution),
            &result,
        ) {
            Ok(Some(section)) => {
                let preview = self.session.threshold().preview(&result);
                display.append_line(style, &preview);
                display.append_line(
                    LineStyle::Hint,
                    &format!("(/expand {section} to show the full output)"),
                );
            }
            Ok(None) => display.append_line(style, &result),
            Err(error) => {
                warn!(%error, "could not register tool output section");
                display.append_line(style, &result);
            }
        }
        display.show_status(WORKING_STATUS);
    }

    fn on_finished(&mut self, run_id: RunId, display: &mut dyn Renderer) {
        if !self.in_flight.is_empty() {
            warn!(run_id, open = self.in_flight.len(), "turn finished with tools in flight");
            self.fail_in_flight(UNFINISHED_RESULT);
        }
        let text = std::mem::take(&mut self.pending);
        let tool_calls = std::mem::take(&mut self.tool_calls);
        display.update_streaming("");

        if !text.is_empty() || !tool_calls.is_empty() {
            let id = self.session.append_message_with_tool_calls(
                Role::Agent,
                text.clone(),
                Map::new(),
                tool_calls,
            );
            if let Err(error) =
                self.session
                    .register_if_exceeds(SectionKind::AgentText, EntryRef::Message(id), &text)
            {
                warn!(%error, "could not register agent text section");
            }
            if !text.is_empty() {
                display.append_line(LineStyle::Agent, text.trim_end());
            }
        }

        self.end_turn(run_id, display);
    }

    fn on_failed(&mut self, run_id: RunId, error: &str, display: &mut dyn Renderer) {
        let mut metadata = Map::new();
        metadata.insert("truncated".to_string(), Value::Bool(true));
        self.flush_partial(metadata, display);
        self.fail_in_flight(error);

        self.session
            .append_message(Role::System, error.to_string(), Map::new());
        display.append_line(LineStyle::Error, error);
        self.end_turn(run_id, display);
    }

    fn on_interrupted(&mut self, run_id: RunId, display: &mut dyn Renderer) {
        let mut metadata = Map::new();
        metadata.insert("truncated".to_string(), Value::Bool(true));
        metadata.insert("interrupted".to_string(), Value::Bool(true));
        self.flush_partial(metadata, display);
        self.fail_in_flight(INTERRUPTED_RESULT);

        display.append_line(LineStyle::Warning, "interrupted");
        self.end_turn(run_id, display);
    }

    /// Commits whatever streamed so far as a truncated agent message.
    fn flush_partial(&mut self, metadata: Map<String, Value>, display: &mut dyn Renderer) {
        let text = std::mem::take(&mut self.pending);
        let tool_calls = std::mem::take(&mut self.tool_calls);
        display.update_streaming("");
        if text.is_empty() && tool_calls.is_empty() {
            return;
        }

        self.session
            .append_message_with_tool_calls(Role::Agent, text.clone(), metadata, tool_calls);
        if !text.is_empty() {
            display.append_line(LineStyle::Agent, &format!("{} […]", text.trim_end()));
        }
    }

    fn fail_in_flight(&mut self, result: &str) {
        for (call_id, call) in self.in_flight.drain() {
            if let Err(error) = self.session.complete_tool_execution(
                call.execution,
                result,
                call.started.elapsed(),
                false,
            ) {
                warn!(%call_id, %error, "could not fail in-flight tool execution");
            }
        }
    }

    fn end_turn(&mut self, run_id: RunId, display: &mut dyn Renderer) {
        self.trigger = None;
        self.coordinator.finish(run_id);
        display.clear_status();
    }
}
