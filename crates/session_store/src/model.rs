use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
    System,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::User, Role::Agent, Role::System];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
            Self::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Self::User),
            "agent" => Ok(Self::Agent),
            "system" => Ok(Self::System),
            other => Err(format!("unrecognized role '{other}'")),
        }
    }
}

/// Ledger position of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

/// Ledger position of a tool execution.
///
/// Message and execution ids share one sequence, so ids order entries of both
/// kinds relative to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConversationMessage {
    pub id: MessageId,
    pub role: Role,
    pub text: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<String>>,
}

/// Final state of a completed tool execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolOutcome {
    pub result: String,
    pub success: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolExecution {
    pub id: ExecutionId,
    pub call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
    /// Message that triggered the call. A reference only; the execution does
    /// not belong to the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    /// `None` while the execution is in flight.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ToolOutcome>,
}

impl ToolExecution {
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.outcome.is_none()
    }

    #[must_use]
    pub fn succeeded(&self) -> Option<bool> {
        self.outcome.as_ref().map(|outcome| outcome.success)
    }
}

/// One complete conversation: the unit of persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionState {
    pub session_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub agent_id: String,
    pub model_id: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub messages: Vec<ConversationMessage>,
    pub tool_executions: Vec<ToolExecution>,
}

impl SessionState {
    /// Starts an empty session with a fresh identifier.
    #[must_use]
    pub fn new(agent_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            session_id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            agent_id: agent_id.into(),
            model_id: model_id.into(),
            metadata: Map::new(),
            messages: Vec::new(),
            tool_executions: Vec::new(),
        }
    }

    /// Returns the next unused position in the shared entry sequence.
    #[must_use]
    pub fn next_entry_id(&self) -> u64 {
        let last_message = self.messages.last().map(|message| message.id.0);
        let last_execution = self.tool_executions.last().map(|execution| execution.id.0);
        last_message.max(last_execution).map_or(1, |id| id + 1)
    }

    #[must_use]
    pub fn message(&self, id: MessageId) -> Option<&ConversationMessage> {
        self.messages
            .binary_search_by_key(&id, |message| message.id)
            .ok()
            .map(|index| &self.messages[index])
    }

    #[must_use]
    pub fn tool_execution(&self, id: ExecutionId) -> Option<&ToolExecution> {
        self.tool_executions
            .binary_search_by_key(&id, |execution| execution.id)
            .ok()
            .map(|index| &self.tool_executions[index])
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.tool_executions.is_empty()
    }
}
