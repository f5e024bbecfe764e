//! Append-only record of one conversation.

use std::time::Duration;

use serde_json::{Map, Value};
use session_store::{
    ConversationMessage, ExecutionId, MessageId, Role, SessionState, ToolExecution, ToolOutcome,
};
use time::OffsetDateTime;

use crate::error::SessionError;
use crate::sections::EntryRef;

/// Rough size of one model token, used to budget context.
pub const CHARS_PER_TOKEN: usize = 4;

/// One ledger entry handed to a runner as prior context.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextEntry {
    Message(ConversationMessage),
    ToolExecution(ToolExecution),
}

impl ContextEntry {
    fn estimated_chars(&self) -> usize {
        match self {
            Self::Message(message) => message.text.chars().count(),
            Self::ToolExecution(execution) => {
                let arguments = Value::Object(execution.arguments.clone()).to_string();
                let result = execution
                    .outcome
                    .as_ref()
                    .map_or(0, |outcome| outcome.result.chars().count());
                execution.tool_name.chars().count() + arguments.chars().count() + result
            }
        }
    }

    fn is_message(&self) -> bool {
        matches!(self, Self::Message(_))
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionStatistics {
    pub user_messages: usize,
    pub agent_messages: usize,
    pub system_messages: usize,
    pub tool_executions: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub in_flight: usize,
    /// Mean duration of completed executions.
    pub mean_duration_ms: Option<f64>,
}

impl SessionStatistics {
    #[must_use]
    pub fn messages(&self) -> usize {
        self.user_messages + self.agent_messages + self.system_messages
    }
}

/// Ordered messages and tool executions drawn from one id sequence.
///
/// Entries are only ever appended; the one permitted mutation is completing
/// an in-flight tool execution exactly once.
#[derive(Debug, Clone)]
pub struct Ledger {
    state: SessionState,
}

impl Ledger {
    #[must_use]
    pub fn new(agent_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            state: SessionState::new(agent_id, model_id),
        }
    }

    /// Wraps a state read back from a validated snapshot.
    #[must_use]
    pub fn from_state(state: SessionState) -> Self {
        Self { state }
    }

    /// An empty ledger with this ledger's session identity, agent and model.
    #[must_use]
    pub fn empty_like(&self) -> Self {
        let mut state = self.state.clone();
        state.messages.clear();
        state.tool_executions.clear();
        state.updated_at = OffsetDateTime::now_utc();
        Self { state }
    }

    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Value copy for persistence. Later appends never show up in it.
    #[must_use]
    pub fn snapshot(&self) -> SessionState {
        self.state.clone()
    }

    pub fn append_message(
        &mut self,
        role: Role,
        text: impl Into<String>,
        metadata: Map<String, Value>,
    ) -> MessageId {
        self.append_message_with_tool_calls(role, text, metadata, Vec::new())
    }

    /// Appends a message that records the runner call ids it issued.
    pub fn append_message_with_tool_calls(
        &mut self,
        role: Role,
        text: impl Into<String>,
        metadata: Map<String, Value>,
        tool_calls: Vec<String>,
    ) -> MessageId {
        let id = MessageId(self.state.next_entry_id());
        let now = self.touch();
        self.state.messages.push(ConversationMessage {
            id,
            role,
            text: text.into(),
            created_at: now,
            metadata,
            tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        });
        id
    }

    /// Records a tool invocation as in flight.
    pub fn append_tool_execution(
        &mut self,
        tool_name: impl Into<String>,
        call_id: impl Into<String>,
        arguments: Map<String, Value>,
        trigger: Option<MessageId>,
    ) -> Result<ExecutionId, SessionError> {
        let call_id = call_id.into();
        if self.in_flight_execution(&call_id).is_some() {
            return Err(SessionError::CallAlreadyInFlight { call_id });
        }
        if let Some(message_id) = trigger {
            if self.state.message(message_id).is_none() {
                return Err(SessionError::UnknownOwner {
                    owner: EntryRef::Message(message_id),
                });
            }
        }

        let id = ExecutionId(self.state.next_entry_id());
        let now = self.touch();
        self.state.tool_executions.push(ToolExecution {
            id,
            call_id,
            tool_name: tool_name.into(),
            arguments,
            message_id: trigger,
            started_at: now,
            outcome: None,
        });
        Ok(id)
    }

    pub fn complete_tool_execution(
        &mut self,
        id: ExecutionId,
        result: impl Into<String>,
        duration: Duration,
        success: bool,
    ) -> Result<(), SessionError> {
        let index = self
            .state
            .tool_executions
            .binary_search_by_key(&id, |execution| execution.id)
            .map_err(|_| SessionError::UnknownExecution { id })?;
        if self.state.tool_executions[index].outcome.is_some() {
            return Err(SessionError::ExecutionAlreadyCompleted { id });
        }

        self.state.tool_executions[index].outcome = Some(ToolOutcome {
            result: result.into(),
            success,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
        });
        self.touch();
        Ok(())
    }

    #[must_use]
    pub fn in_flight_execution(&self, call_id: &str) -> Option<ExecutionId> {
        self.state
            .tool_executions
            .iter()
            .rev()
            .find(|execution| execution.is_in_flight() && execution.call_id == call_id)
            .map(|execution| execution.id)
    }

    #[must_use]
    pub fn in_flight_executions(&self) -> Vec<ExecutionId> {
        self.state
            .tool_executions
            .iter()
            .filter(|execution| execution.is_in_flight())
            .map(|execution| execution.id)
            .collect()
    }

    /// Messages from `offset`, at most `limit` of them (all when `None`).
    #[must_use]
    pub fn messages(&self, limit: Option<usize>, offset: usize) -> &[ConversationMessage] {
        page(&self.state.messages, limit, offset)
    }

    #[must_use]
    pub fn tool_executions(&self, limit: Option<usize>, offset: usize) -> &[ToolExecution] {
        page(&self.state.tool_executions, limit, offset)
    }

    /// Newest contiguous run of entries whose estimated size fits
    /// `max_tokens`, oldest first.
    ///
    /// Entries are never split. A suffix without any message is extended back
    /// to the newest message, so a non-empty ledger never yields an empty
    /// context.
    #[must_use]
    pub fn context(&self, max_tokens: usize) -> Vec<ContextEntry> {
        let entries = self.interleaved();
        if entries.is_empty() {
            return Vec::new();
        }

        let budget = max_tokens.saturating_mul(CHARS_PER_TOKEN);
        let mut used = 0usize;
        let mut start = entries.len();
        for (index, entry) in entries.iter().enumerate().rev() {
            let size = entry.estimated_chars();
            if used + size > budget {
                break;
            }
            used += size;
            start = index;
        }

        if !entries[start..].iter().any(ContextEntry::is_message) {
            start = entries[..start]
                .iter()
                .rposition(ContextEntry::is_message)
                .unwrap_or(entries.len() - 1);
        }

        entries.into_iter().skip(start).collect()
    }

    #[must_use]
    pub fn statistics(&self) -> SessionStatistics {
        let mut stats = SessionStatistics::default();
        for message in &self.state.messages {
            match message.role {
                Role::User => stats.user_messages += 1,
                Role::Agent => stats.agent_messages += 1,
                Role::System => stats.system_messages += 1,
            }
        }

        let mut total_ms = 0u64;
        for execution in &self.state.tool_executions {
            stats.tool_executions += 1;
            match &execution.outcome {
                None => stats.in_flight += 1,
                Some(outcome) => {
                    if outcome.success {
                        stats.succeeded += 1;
                    } else {
                        stats.failed += 1;
                    }
                    total_ms = total_ms.saturating_add(outcome.duration_ms);
                }
            }
        }

        let completed = stats.succeeded + stats.failed;
        if completed > 0 {
            stats.mean_duration_ms = Some(total_ms as f64 / completed as f64);
        }
        stats
    }

    pub fn set_agent(&mut self, agent_id: impl Into<String>) {
        self.state.agent_id = agent_id.into();
        self.touch();
    }

    pub fn set_model(&mut self, model_id: impl Into<String>) {
        self.state.model_id = model_id.into();
        self.touch();
    }

    #[must_use]
    pub fn contains(&self, entry: EntryRef) -> bool {
        match entry {
            EntryRef::Message(id) => self.state.message(id).is_some(),
            EntryRef::ToolExecution(id) => self.state.tool_execution(id).is_some(),
        }
    }

    fn interleaved(&self) -> Vec<ContextEntry> {
        let mut entries =
            Vec::with_capacity(self.state.messages.len() + self.state.tool_executions.len());
        let mut messages = self.state.messages.iter().peekable();
        let mut executions = self.state.tool_executions.iter().peekable();

        loop {
            let take_message = match (messages.peek(), executions.peek()) {
                (Some(message), Some(execution)) => message.id.0 < execution.id.0,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            if take_message {
                if let Some(message) = messages.next() {
                    entries.push(ContextEntry::Message(message.clone()));
                }
            } else if let Some(execution) = executions.next() {
                entries.push(ContextEntry::ToolExecution(execution.clone()));
            }
        }

        entries
    }

    fn touch(&mut self) -> OffsetDateTime {
        let now = OffsetDateTime::now_utc();
        self.state.updated_at = now;
        now
    }
}

fn page<T>(items: &[T], limit: Option<usize>, offset: usize) -> &[T] {
    let start = offset.min(items.len());
    let end = match limit {
        Some(limit) => start.saturating_add(limit).min(items.len()),
        None => items.len(),
    };
    &items[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn ledger() -> Ledger {
        Ledger::new("react", "mock-model")
    }

    #[test]
    fn append_order_is_preserved_across_kinds() {
        let mut ledger = ledger();
        let user = ledger.append_message(Role::User, "hi", Map::new());
        let tool = ledger
            .append_tool_execution("search", "call-1", Map::new(), Some(user))
            .expect("append tool");
        let agent = ledger.append_message(Role::Agent, "hello", Map::new());

        assert!(user.0 < tool.0 && tool.0 < agent.0);
        let texts: Vec<&str> = ledger
            .messages(None, 0)
            .iter()
            .map(|message| message.text.as_str())
            .collect();
        assert_eq!(texts, vec!["hi", "hello"]);
    }

    #[test]
    fn statistics_match_appends() {
        let mut ledger = ledger();
        ledger.append_message(Role::User, "q", Map::new());
        ledger.append_message(Role::Agent, "a", Map::new());

        let stats = ledger.statistics();
        assert_eq!(stats.user_messages, 1);
        assert_eq!(stats.agent_messages, 1);
        assert_eq!(stats.messages(), 2);
        assert_eq!(stats.tool_executions, 0);
        assert_eq!(stats.mean_duration_ms, None);
    }

    #[test]
    fn completion_happens_exactly_once() {
        let mut ledger = ledger();
        let id = ledger
            .append_tool_execution("search", "call-1", Map::new(), None)
            .expect("append tool");

        ledger
            .complete_tool_execution(id, "done", Duration::from_millis(40), true)
            .expect("first completion");
        let error = ledger
            .complete_tool_execution(id, "again", Duration::from_millis(1), false)
            .expect_err("second completion");

        assert_eq!(error.kind(), ErrorKind::InvalidState);
        let outcome = ledger.state().tool_executions[0]
            .outcome
            .clone()
            .expect("outcome");
        assert_eq!(outcome.result, "done");
        assert_eq!(outcome.duration_ms, 40);
    }

    #[test]
    fn completing_unknown_execution_is_not_found() {
        let mut ledger = ledger();
        let error = ledger
            .complete_tool_execution(ExecutionId(3), "x", Duration::ZERO, true)
            .expect_err("unknown execution");
        assert_eq!(error.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn one_in_flight_execution_per_call_id() {
        let mut ledger = ledger();
        let first = ledger
            .append_tool_execution("search", "call-1", Map::new(), None)
            .expect("append tool");
        let error = ledger
            .append_tool_execution("search", "call-1", Map::new(), None)
            .expect_err("duplicate in-flight call");
        assert_eq!(error.kind(), ErrorKind::InvalidState);

        ledger
            .complete_tool_execution(first, "ok", Duration::ZERO, true)
            .expect("complete");
        ledger
            .append_tool_execution("search", "call-1", Map::new(), None)
            .expect("call id reusable once completed");
    }

    #[test]
    fn trigger_must_be_a_known_message() {
        let mut ledger = ledger();
        let error = ledger
            .append_tool_execution("search", "call-1", Map::new(), Some(MessageId(5)))
            .expect_err("dangling trigger");
        assert_eq!(error.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn statistics_cover_tool_outcomes() {
        let mut ledger = ledger();
        let ok = ledger
            .append_tool_execution("a", "c1", Map::new(), None)
            .expect("append");
        let bad = ledger
            .append_tool_execution("b", "c2", Map::new(), None)
            .expect("append");
        ledger
            .append_tool_execution("c", "c3", Map::new(), None)
            .expect("append");
        ledger
            .complete_tool_execution(ok, "", Duration::from_millis(10), true)
            .expect("complete");
        ledger
            .complete_tool_execution(bad, "", Duration::from_millis(30), false)
            .expect("complete");

        let stats = ledger.statistics();
        assert_eq!(stats.tool_executions, 3);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.in_flight, 1);
        assert_eq!(stats.mean_duration_ms, Some(20.0));
        assert_eq!(ledger.in_flight_executions().len(), 1);
    }

    #[test]
    fn pagination_clamps_to_bounds() {
        let mut ledger = ledger();
        for index in 0..5 {
            ledger.append_message(Role::User, format!("m{index}"), Map::new());
        }

        assert_eq!(ledger.messages(Some(2), 1)[0].text, "m1");
        assert_eq!(ledger.messages(Some(2), 1).len(), 2);
        assert_eq!(ledger.messages(Some(10), 4).len(), 1);
        assert!(ledger.messages(None, 9).is_empty());
        assert!(ledger.tool_executions(None, 0).is_empty());
    }

    #[test]
    fn context_of_many_messages_is_a_whole_message_suffix() {
        let mut ledger = ledger();
        for index in 0..100 {
            ledger.append_message(Role::User, format!("message number {index:03}"), Map::new());
        }

        let context = ledger.context(50);

        assert!(!context.is_empty());
        let total: usize = context.iter().map(ContextEntry::estimated_chars).sum();
        assert!(total <= 50 * CHARS_PER_TOKEN);
        for entry in &context {
            let ContextEntry::Message(message) = entry else {
                panic!("only messages were appended");
            };
            assert!(message.text.starts_with("message number "));
            assert_eq!(message.text.len(), "message number 000".len());
        }
        let ContextEntry::Message(last) = context.last().expect("entry") else {
            panic!("expected message");
        };
        assert_eq!(last.text, "message number 099");
    }

    #[test]
    fn context_never_empty_when_newest_message_exceeds_budget() {
        let mut ledger = ledger();
        ledger.append_message(Role::User, "x".repeat(10_000), Map::new());

        let context = ledger.context(10);

        assert_eq!(context.len(), 1);
    }

    #[test]
    fn context_reaches_back_to_newest_message() {
        let mut ledger = ledger();
        let user = ledger.append_message(Role::User, "find it", Map::new());
        let id = ledger
            .append_tool_execution("search", "c1", Map::new(), Some(user))
            .expect("append");
        ledger
            .complete_tool_execution(id, "y".repeat(400), Duration::ZERO, true)
            .expect("complete");
        ledger
            .append_tool_execution("search", "c2", Map::new(), Some(user))
            .expect("append");

        let context = ledger.context(5);

        assert!(matches!(context.first(), Some(ContextEntry::Message(m)) if m.id == user));
        assert_eq!(context.len(), 3);
    }

    #[test]
    fn empty_like_keeps_identity_and_drops_entries() {
        let mut ledger = ledger();
        ledger.append_message(Role::User, "hi", Map::new());

        let cleared = ledger.empty_like();

        assert_eq!(cleared.state().session_id, ledger.state().session_id);
        assert_eq!(cleared.state().agent_id, "react");
        assert!(cleared.state().is_empty());
        assert_eq!(ledger.state().messages.len(), 1);
    }

    #[test]
    fn mutations_refresh_updated_at() {
        let mut ledger = ledger();
        let before = ledger.state().updated_at;
        std::thread::sleep(Duration::from_millis(2));

        ledger.set_model("gpt-4");

        assert!(ledger.state().updated_at > before);
        assert_eq!(ledger.state().model_id, "gpt-4");
    }
}
