mod error;
mod export;
mod model;
mod paths;
mod schema;
mod store;

pub use error::{ErrorKind, SessionStoreError};
pub use export::{export, ExportFormat};
pub use model::{
    ConversationMessage, ExecutionId, MessageId, Role, SessionState, ToolExecution, ToolOutcome,
};
pub use paths::{default_history_dir, snapshot_file_name, HISTORY_DIR, SNAPSHOT_EXTENSION};
pub use schema::{SnapshotHeader, SNAPSHOT_VERSION};
pub use store::{PersistenceStore, SnapshotInfo};
