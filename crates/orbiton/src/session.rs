//! Thread-safe handle over the ledger and its sections.
//!
//! The foreground loop mutates the session while the auto-save thread takes
//! value snapshots of it. Every operation holds the lock for a single step,
//! so a snapshot always sees whole entries.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde_json::{Map, Value};
use session_store::{
    ConversationMessage, ExecutionId, MessageId, Role, SessionState, ToolExecution,
};

use crate::error::SessionError;
use crate::ledger::{ContextEntry, Ledger, SessionStatistics};
use crate::sections::{EntryRef, ExpandThreshold, SectionId, SectionKind, SectionRegistry, SectionView};

struct SessionInner {
    ledger: Ledger,
    sections: SectionRegistry,
}

pub struct Session {
    inner: Mutex<SessionInner>,
    threshold: ExpandThreshold,
}

impl Session {
    #[must_use]
    pub fn new(
        agent_id: impl Into<String>,
        model_id: impl Into<String>,
        threshold: ExpandThreshold,
    ) -> Self {
        Self {
            inner: Mutex::new(SessionInner {
                ledger: Ledger::new(agent_id, model_id),
                sections: SectionRegistry::new(),
            }),
            threshold,
        }
    }

    #[must_use]
    pub fn threshold(&self) -> ExpandThreshold {
        self.threshold
    }

    pub fn append_message(
        &self,
        role: Role,
        text: impl Into<String>,
        metadata: Map<String, Value>,
    ) -> MessageId {
        self.lock().ledger.append_message(role, text, metadata)
    }

    pub fn append_message_with_tool_calls(
        &self,
        role: Role,
        text: impl Into<String>,
        metadata: Map<String, Value>,
        tool_calls: Vec<String>,
    ) -> MessageId {
        self.lock()
            .ledger
            .append_message_with_tool_calls(role, text, metadata, tool_calls)
    }

    pub fn append_tool_execution(
        &self,
        tool_name: impl Into<String>,
        call_id: impl Into<String>,
        arguments: Map<String, Value>,
        trigger: Option<MessageId>,
    ) -> Result<ExecutionId, SessionError> {
        self.lock()
            .ledger
            .append_tool_execution(tool_name, call_id, arguments, trigger)
    }

    pub fn complete_tool_execution(
        &self,
        id: ExecutionId,
        result: impl Into<String>,
        duration: Duration,
        success: bool,
    ) -> Result<(), SessionError> {
        self.lock()
            .ledger
            .complete_tool_execution(id, result, duration, success)
    }

    #[must_use]
    pub fn in_flight_executions(&self) -> Vec<ExecutionId> {
        self.lock().ledger.in_flight_executions()
    }

    #[must_use]
    pub fn messages(&self, limit: Option<usize>, offset: usize) -> Vec<ConversationMessage> {
        self.lock().ledger.messages(limit, offset).to_vec()
    }

    #[must_use]
    pub fn tool_executions(&self, limit: Option<usize>, offset: usize) -> Vec<ToolExecution> {
        self.lock().ledger.tool_executions(limit, offset).to_vec()
    }

    #[must_use]
    pub fn tool_execution(&self, id: ExecutionId) -> Option<ToolExecution> {
        self.lock().ledger.state().tool_execution(id).cloned()
    }

    #[must_use]
    pub fn context(&self, max_tokens: usize) -> Vec<ContextEntry> {
        self.lock().ledger.context(max_tokens)
    }

    #[must_use]
    pub fn statistics(&self) -> SessionStatistics {
        self.lock().ledger.statistics()
    }

    /// Registers a collapsed section for an entry already in the ledger.
    pub fn register_section(
        &self,
        kind: SectionKind,
        owner: EntryRef,
        content: impl Into<String>,
    ) -> Result<SectionId, SessionError> {
        let mut inner = self.lock();
        if !inner.ledger.contains(owner) {
            return Err(SessionError::UnknownOwner { owner });
        }
        Ok(inner
            .sections
            .register(kind, owner, content, &self.threshold))
    }

    /// Registers a section only when `content` is over the threshold.
    pub fn register_if_exceeds(
        &self,
        kind: SectionKind,
        owner: EntryRef,
        content: &str,
    ) -> Result<Option<SectionId>, SessionError> {
        if !self.threshold.exceeded_by(content) {
            return Ok(None);
        }
        self.register_section(kind, owner, content).map(Some)
    }

    pub fn toggle_section(&self, id: SectionId) -> Result<bool, SessionError> {
        self.lock().sections.toggle(id)
    }

    pub fn section(&self, id: SectionId) -> Result<SectionView, SessionError> {
        self.lock().sections.get(id)
    }

    #[must_use]
    pub fn next_section_after(&self, current: Option<SectionId>) -> Option<SectionId> {
        self.lock().sections.next_section_after(current)
    }

    #[must_use]
    pub fn previous_section_before(&self, current: Option<SectionId>) -> Option<SectionId> {
        self.lock().sections.previous_section_before(current)
    }

    #[must_use]
    pub fn last_section(&self) -> Option<SectionId> {
        self.lock().sections.last()
    }

    #[must_use]
    pub fn section_count(&self) -> usize {
        self.lock().sections.len()
    }

    #[must_use]
    pub fn section_for(&self, owner: EntryRef) -> Option<SectionId> {
        self.lock().sections.for_owner(owner)
    }

    /// Drops every entry and section in one step. Session id, agent and
    /// model survive; snapshots already written are untouched.
    pub fn clear(&self) {
        let mut inner = self.lock();
        let cleared = inner.ledger.empty_like();
        *inner = SessionInner {
            ledger: cleared,
            sections: SectionRegistry::new(),
        };
    }

    /// Starts a brand-new session with a fresh id on the same agent and model.
    pub fn reset(&self) {
        let mut inner = self.lock();
        let state = inner.ledger.state();
        let ledger = Ledger::new(state.agent_id.clone(), state.model_id.clone());
        *inner = SessionInner {
            ledger,
            sections: SectionRegistry::new(),
        };
    }

    /// Replaces the session with a loaded snapshot and rebuilds sections for
    /// its long tool results and agent messages.
    pub fn restore(&self, state: SessionState) {
        let mut sections = SectionRegistry::new();
        let mut owners: Vec<(u64, SectionKind, EntryRef, &str)> = Vec::new();
        for message in &state.messages {
            if message.role == Role::Agent && self.threshold.exceeded_by(&message.text) {
                owners.push((
                    message.id.0,
                    SectionKind::AgentText,
                    EntryRef::Message(message.id),
                    &message.text,
                ));
            }
        }
        for execution in &state.tool_executions {
            if let Some(outcome) = &execution.outcome {
                if self.threshold.exceeded_by(&outcome.result) {
                    owners.push((
                        execution.id.0,
                        SectionKind::ToolOutput,
                        EntryRef::ToolExecution(execution.id),
                        &outcome.result,
                    ));
                }
            }
        }
        owners.sort_by_key(|(position, ..)| *position);
        for (_, kind, owner, content) in owners {
            sections.register(kind, owner, content, &self.threshold);
        }

        *self.lock() = SessionInner {
            ledger: Ledger::from_state(state),
            sections,
        };
    }

    /// Value copy of the whole session for persistence.
    #[must_use]
    pub fn snapshot(&self) -> SessionState {
        self.lock().ledger.snapshot()
    }

    #[must_use]
    pub fn session_id(&self) -> String {
        self.lock().ledger.state().session_id.clone()
    }

    #[must_use]
    pub fn agent_id(&self) -> String {
        self.lock().ledger.state().agent_id.clone()
    }

    #[must_use]
    pub fn model_id(&self) -> String {
        self.lock().ledger.state().model_id.clone()
    }

    #[must_use]
    pub fn message_count(&self) -> usize {
        self.lock().ledger.state().messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().ledger.state().is_empty()
    }

    pub fn set_agent(&self, agent_id: impl Into<String>) {
        self.lock().ledger.set_agent(agent_id);
    }

    pub fn set_model(&self, model_id: impl Into<String>) {
        self.lock().ledger.set_model(model_id);
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        lock_unpoisoned(&self.inner)
    }
}

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
