use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::model::{ConversationMessage, SessionState, ToolExecution};

pub const SNAPSHOT_VERSION: u32 = 1;

/// First line of every snapshot file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SnapshotHeader {
    pub version: u32,
    pub session_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub saved_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub agent_id: String,
    pub model_id: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl SnapshotHeader {
    #[must_use]
    pub fn v1(state: &SessionState, saved_at: OffsetDateTime) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            session_id: state.session_id.clone(),
            saved_at,
            created_at: state.created_at,
            updated_at: state.updated_at,
            agent_id: state.agent_id.clone(),
            model_id: state.model_id.clone(),
            metadata: state.metadata.clone(),
        }
    }

    pub(crate) fn into_state(self) -> SessionState {
        SessionState {
            session_id: self.session_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
            agent_id: self.agent_id,
            model_id: self.model_id,
            metadata: self.metadata,
            messages: Vec::new(),
            tool_executions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum JsonLine {
    Session(SnapshotHeader),
    Message(ConversationMessage),
    ToolExecution(ToolExecution),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum JsonLineRef<'a> {
    Session(&'a SnapshotHeader),
    Message(&'a ConversationMessage),
    ToolExecution(&'a ToolExecution),
}

/// Snapshot lines after the header: both entry kinds merged back into id order.
pub(crate) fn entry_lines(state: &SessionState) -> Vec<JsonLineRef<'_>> {
    let mut lines = Vec::with_capacity(state.messages.len() + state.tool_executions.len());
    let mut messages = state.messages.iter().peekable();
    let mut executions = state.tool_executions.iter().peekable();

    loop {
        let take_message = match (messages.peek(), executions.peek()) {
            (Some(message), Some(execution)) => message.id.0 < execution.id.0,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };

        if take_message {
            if let Some(message) = messages.next() {
                lines.push(JsonLineRef::Message(message));
            }
        } else if let Some(execution) = executions.next() {
            lines.push(JsonLineRef::ToolExecution(execution));
        }
    }

    lines
}
