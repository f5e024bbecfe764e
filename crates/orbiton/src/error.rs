use agent_runner::RunId;
use session_store::{ExecutionId, SessionStoreError};
use thiserror::Error;

use crate::sections::{EntryRef, SectionId};

pub use session_store::ErrorKind;

/// Failures raised by the session engine and its background workers.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("tool execution {id} is already completed")]
    ExecutionAlreadyCompleted { id: ExecutionId },

    #[error("no tool execution {id} in this session")]
    UnknownExecution { id: ExecutionId },

    #[error("no section {id}")]
    UnknownSection { id: SectionId },

    #[error("entry {owner} is not in this session")]
    UnknownOwner { owner: EntryRef },

    #[error("tool call {call_id} already has an in-flight execution")]
    CallAlreadyInFlight { call_id: String },

    #[error("auto-save loop is already running")]
    AutoSaveAlreadyRunning,

    #[error("auto-save loop is not running")]
    AutoSaveNotRunning,

    #[error("a turn is already running (run {run_id})")]
    ExecutionAlreadyRunning { run_id: RunId },

    #[error("failed to spawn {what} thread: {source}")]
    Spawn {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Store(#[from] SessionStoreError),
}

impl SessionError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ExecutionAlreadyCompleted { .. }
            | Self::CallAlreadyInFlight { .. }
            | Self::AutoSaveAlreadyRunning
            | Self::AutoSaveNotRunning
            | Self::ExecutionAlreadyRunning { .. } => ErrorKind::InvalidState,
            Self::UnknownExecution { .. }
            | Self::UnknownSection { .. }
            | Self::UnknownOwner { .. } => ErrorKind::NotFound,
            Self::Spawn { .. } => ErrorKind::IoFailure,
            Self::Store(error) => error.kind(),
        }
    }
}
