use std::path::{Path, PathBuf};

pub const HISTORY_DIR: [&str; 2] = [".orbiton", "history"];

pub const SNAPSHOT_EXTENSION: &str = "jsonl";

#[must_use]
pub fn default_history_dir(home: &Path) -> PathBuf {
    home.join(HISTORY_DIR[0]).join(HISTORY_DIR[1])
}

#[must_use]
pub fn sanitize_timestamp_for_filename(timestamp: &str) -> String {
    timestamp
        .chars()
        .map(|c| match c {
            ':' | '/' | '\\' | ' ' => '-',
            _ => c,
        })
        .collect()
}

#[must_use]
pub fn snapshot_file_name(saved_at: &str, session_id: &str) -> String {
    format!(
        "{}_{}.{SNAPSHOT_EXTENSION}",
        sanitize_timestamp_for_filename(saved_at),
        session_id
    )
}

/// Snapshot ids are file stems inside the history directory, never paths.
#[must_use]
pub(crate) fn is_valid_snapshot_id(id: &str) -> bool {
    !id.is_empty()
        && id != "."
        && id != ".."
        && !id.contains(['/', '\\'])
}
