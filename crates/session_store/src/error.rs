use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Coarse error classification shared by the store and the session layer.
///
/// Callers decide retry and surfacing policy from the kind alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidState,
    NotFound,
    CorruptState,
    IoFailure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InvalidState => "invalid state",
            Self::NotFound => "not found",
            Self::CorruptState => "corrupt state",
            Self::IoFailure => "I/O failure",
        })
    }
}

#[derive(Debug, Error)]
pub enum SessionStoreError {
    #[error("I/O error while {operation} at {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error while reading line {line} in {path}: {source}")]
    IoLine {
        path: PathBuf,
        line: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse JSON at {path}:{line}: {source}")]
    JsonLineParse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("missing session header line in {path}")]
    MissingHeader { path: PathBuf },

    #[error("line {line} in {path} must be a session header record")]
    InvalidHeaderRecord { path: PathBuf, line: usize },

    #[error("line {line} in {path} has unsupported snapshot version {found}; expected 1")]
    UnsupportedVersion {
        path: PathBuf,
        line: usize,
        found: u32,
    },

    #[error("line {line} in {path} must be a message or tool_execution record")]
    InvalidEntryRecord { path: PathBuf, line: usize },

    #[error("line {line} in {path} has entry id {id}, which does not follow previous id {previous}")]
    NonIncreasingId {
        path: PathBuf,
        line: usize,
        id: u64,
        previous: u64,
    },

    #[error(
        "line {line} in {path} has tool execution {execution_id} referencing unknown message {message_id}"
    )]
    DanglingMessageRef {
        path: PathBuf,
        line: usize,
        execution_id: u64,
        message_id: u64,
    },

    #[error("line {line} in {path} starts a second in-flight execution for call '{call_id}'")]
    DuplicateInFlightCall {
        path: PathBuf,
        line: usize,
        call_id: String,
    },

    #[error("snapshot '{id}' does not exist")]
    SnapshotNotFound { id: String },

    #[error("'{id}' is not a valid snapshot id")]
    InvalidSnapshotId { id: String },

    #[error("refusing to overwrite existing snapshot at {path}")]
    SnapshotExists { path: PathBuf },

    #[error("failed to serialize snapshot for {path}: {source}")]
    JsonSerialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to format UTC timestamp as RFC3339: {0}")]
    ClockFormat(#[source] time::error::Format),
}

impl SessionStoreError {
    #[must_use]
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    #[must_use]
    pub fn io_line(path: impl Into<PathBuf>, line: usize, source: std::io::Error) -> Self {
        Self::IoLine {
            path: path.into(),
            line,
            source,
        }
    }

    #[must_use]
    pub fn json_line(path: impl Into<PathBuf>, line: usize, source: serde_json::Error) -> Self {
        Self::JsonLineParse {
            path: path.into(),
            line,
            source,
        }
    }

    #[must_use]
    pub fn json_serialize(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::JsonSerialize {
            path: path.into(),
            source,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } | Self::IoLine { .. } | Self::JsonSerialize { .. } => {
                ErrorKind::IoFailure
            }
            Self::JsonLineParse { .. }
            | Self::MissingHeader { .. }
            | Self::InvalidHeaderRecord { .. }
            | Self::UnsupportedVersion { .. }
            | Self::InvalidEntryRecord { .. }
            | Self::NonIncreasingId { .. }
            | Self::DanglingMessageRef { .. }
            | Self::DuplicateInFlightCall { .. } => ErrorKind::CorruptState,
            Self::SnapshotNotFound { .. } => ErrorKind::NotFound,
            Self::InvalidSnapshotId { .. } | Self::SnapshotExists { .. } | Self::ClockFormat(_) => {
                ErrorKind::InvalidState
            }
        }
    }
}
