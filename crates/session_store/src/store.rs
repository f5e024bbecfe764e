use std::collections::HashSet;
use std::ffi::OsStr;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};

use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::error::SessionStoreError;
use crate::export::{export, ExportFormat};
use crate::model::SessionState;
use crate::paths::{is_valid_snapshot_id, snapshot_file_name, SNAPSHOT_EXTENSION};
use crate::schema::{entry_lines, JsonLine, JsonLineRef, SnapshotHeader, SNAPSHOT_VERSION};

const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Summary of one snapshot file, as returned by [`PersistenceStore::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    /// File stem; accepted by [`PersistenceStore::delete`] and [`PersistenceStore::resolve`].
    pub id: String,
    pub session_id: String,
    pub created_at: OffsetDateTime,
    pub saved_at: OffsetDateTime,
    pub message_count: usize,
    pub path: PathBuf,
}

/// Reads and writes session snapshots under one history directory.
///
/// Snapshots are JSON Lines: a versioned header record followed by one record
/// per ledger entry in id order. Every save creates a new file.
#[derive(Debug, Clone)]
pub struct PersistenceStore {
    history_dir: PathBuf,
}

impl PersistenceStore {
    #[must_use]
    pub fn new(history_dir: impl Into<PathBuf>) -> Self {
        Self {
            history_dir: history_dir.into(),
        }
    }

    #[must_use]
    pub fn history_dir(&self) -> &Path {
        &self.history_dir
    }

    /// Writes `state` to a new file and returns its path.
    ///
    /// Without a destination the file name is derived from the save time and
    /// session id inside the history directory, which is created on demand.
    /// An explicit destination that already exists is rejected.
    pub fn save(
        &self,
        state: &SessionState,
        destination: Option<&Path>,
    ) -> Result<PathBuf, SessionStoreError> {
        let saved_at = OffsetDateTime::now_utc();
        let header = SnapshotHeader::v1(state, saved_at);

        let (path, allow_suffix) = match destination {
            Some(destination) => {
                if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
                    create_dir(parent)?;
                }
                (destination.to_path_buf(), false)
            }
            None => {
                create_dir(&self.history_dir)?;
                let stamp = saved_at
                    .format(&Rfc3339)
                    .map_err(SessionStoreError::ClockFormat)?;
                (
                    self.history_dir
                        .join(snapshot_file_name(&stamp, &state.session_id)),
                    true,
                )
            }
        };

        let contents = render_snapshot(&path, &header, state)?;
        let written = write_new_file(&path, &contents, allow_suffix)?;
        debug!(
            path = %written.display(),
            session_id = %state.session_id,
            messages = state.messages.len(),
            "snapshot saved"
        );
        Ok(written)
    }

    /// Reads a snapshot, rejecting any structural violation.
    pub fn load(&self, path: &Path) -> Result<SessionState, SessionStoreError> {
        read_snapshot(path).map(|(_, state)| state)
    }

    /// Lists loadable snapshots in `directory`, newest save first.
    ///
    /// A missing directory lists as empty. Files that fail to load are skipped.
    pub fn list(&self, directory: &Path) -> Result<Vec<SnapshotInfo>, SessionStoreError> {
        let entries = match fs::read_dir(directory) {
            Ok(entries) => entries,
            Err(source) if source.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(SessionStoreError::io(
                    "reading history directory",
                    directory,
                    source,
                ))
            }
        };

        let mut infos = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| {
                SessionStoreError::io("reading history directory", directory, source)
            })?;
            let path = entry.path();
            if path.extension() != Some(OsStr::new(SNAPSHOT_EXTENSION)) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(OsStr::to_str).map(str::to_string) else {
                continue;
            };

            match read_snapshot(&path) {
                Ok((saved_at, state)) => infos.push(SnapshotInfo {
                    id,
                    session_id: state.session_id,
                    created_at: state.created_at,
                    saved_at,
                    message_count: state.messages.len(),
                    path,
                }),
                Err(error) => {
                    warn!(path = %path.display(), %error, "skipping unreadable snapshot");
                }
            }
        }

        infos.sort_by(|a, b| {
            b.saved_at
                .cmp(&a.saved_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(infos)
    }

    /// Removes the snapshot with the given id from the history directory.
    pub fn delete(&self, id: &str) -> Result<(), SessionStoreError> {
        if !is_valid_snapshot_id(id) {
            return Err(SessionStoreError::InvalidSnapshotId { id: id.to_string() });
        }

        let path = self.snapshot_path(id);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "snapshot deleted");
                Ok(())
            }
            Err(source) if source.kind() == IoErrorKind::NotFound => {
                Err(SessionStoreError::SnapshotNotFound { id: id.to_string() })
            }
            Err(source) => Err(SessionStoreError::io("deleting snapshot", path, source)),
        }
    }

    /// Maps a snapshot id, or a path to a snapshot file, to an existing path.
    pub fn resolve(&self, reference: &str) -> Result<PathBuf, SessionStoreError> {
        if is_valid_snapshot_id(reference) {
            let path = self.snapshot_path(reference);
            if path.is_file() {
                return Ok(path);
            }
        }

        let path = PathBuf::from(reference);
        if path.is_file() {
            return Ok(path);
        }

        Err(SessionStoreError::SnapshotNotFound {
            id: reference.to_string(),
        })
    }

    /// Renders `state` in a human-readable or structured export format.
    #[must_use]
    pub fn export(&self, state: &SessionState, format: ExportFormat) -> String {
        export(state, format)
    }

    /// Writes an export to `path`, appending the format's extension when the
    /// path has none. Unlike snapshots, exports replace an existing file.
    pub fn export_to_file(
        &self,
        state: &SessionState,
        format: ExportFormat,
        path: &Path,
    ) -> Result<PathBuf, SessionStoreError> {
        let mut path = path.to_path_buf();
        if path.extension().is_none() {
            path.set_extension(format.extension());
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            create_dir(parent)?;
        }

        fs::write(&path, export(state, format))
            .map_err(|source| SessionStoreError::io("writing export", &path, source))?;
        Ok(path)
    }

    fn snapshot_path(&self, id: &str) -> PathBuf {
        self.history_dir.join(format!("{id}.{SNAPSHOT_EXTENSION}"))
    }
}

fn create_dir(path: &Path) -> Result<(), SessionStoreError> {
    fs::create_dir_all(path)
        .map_err(|source| SessionStoreError::io("creating directory", path, source))
}

fn render_snapshot(
    path: &Path,
    header: &SnapshotHeader,
    state: &SessionState,
) -> Result<String, SessionStoreError> {
    let mut contents = String::new();
    for line in std::iter::once(JsonLineRef::Session(header)).chain(entry_lines(state)) {
        let encoded = serde_json::to_string(&line)
            .map_err(|source| SessionStoreError::json_serialize(path, source))?;
        contents.push_str(&encoded);
        contents.push('\n');
    }
    Ok(contents)
}

fn write_new_file(
    path: &Path,
    contents: &str,
    allow_suffix: bool,
) -> Result<PathBuf, SessionStoreError> {
    let mut candidate = path.to_path_buf();
    let mut attempt = 1;

    let mut file = loop {
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(file) => break file,
            Err(source) if source.kind() == IoErrorKind::AlreadyExists => {
                if !allow_suffix || attempt >= MAX_NAME_ATTEMPTS {
                    return Err(SessionStoreError::SnapshotExists { path: candidate });
                }
                attempt += 1;
                candidate = suffixed(path, attempt);
            }
            Err(source) => {
                return Err(SessionStoreError::io(
                    "creating snapshot file",
                    candidate,
                    source,
                ))
            }
        }
    };

    let written = file
        .write_all(contents.as_bytes())
        .and_then(|()| file.sync_all());
    if let Err(source) = written {
        drop(file);
        let _ = fs::remove_file(&candidate);
        return Err(SessionStoreError::io(
            "writing snapshot file",
            candidate,
            source,
        ));
    }

    Ok(candidate)
}

fn suffixed(path: &Path, attempt: u32) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(OsStr::to_str)
        .unwrap_or("snapshot");
    path.with_file_name(format!("{stem}-{attempt}.{SNAPSHOT_EXTENSION}"))
}

fn read_snapshot(path: &Path) -> Result<(OffsetDateTime, SessionState), SessionStoreError> {
    let file = File::open(path)
        .map_err(|source| SessionStoreError::io("opening snapshot file", path, source))?;
    let mut lines = BufReader::new(file).lines().enumerate();

    let Some((_, first)) = lines.next() else {
        return Err(SessionStoreError::MissingHeader {
            path: path.to_path_buf(),
        });
    };
    let first = first.map_err(|source| SessionStoreError::io_line(path, 1, source))?;
    let header = match parse_json_line(path, 1, &first)? {
        JsonLine::Session(header) => header,
        JsonLine::Message(_) | JsonLine::ToolExecution(_) => {
            return Err(SessionStoreError::InvalidHeaderRecord {
                path: path.to_path_buf(),
                line: 1,
            });
        }
    };
    validate_header_line(path, 1, &header)?;

    let saved_at = header.saved_at;
    let mut state = header.into_state();
    let mut previous_id: Option<u64> = None;
    let mut in_flight_calls: HashSet<String> = HashSet::new();

    for (line_index, line_result) in lines {
        let line_number = line_index + 1;
        let line =
            line_result.map_err(|source| SessionStoreError::io_line(path, line_number, source))?;

        match parse_json_line(path, line_number, &line)? {
            JsonLine::Session(_) => {
                return Err(SessionStoreError::InvalidEntryRecord {
                    path: path.to_path_buf(),
                    line: line_number,
                });
            }
            JsonLine::Message(message) => {
                validate_entry_order(path, line_number, previous_id, message.id.0)?;
                previous_id = Some(message.id.0);
                state.messages.push(message);
            }
            JsonLine::ToolExecution(execution) => {
                validate_entry_order(path, line_number, previous_id, execution.id.0)?;
                previous_id = Some(execution.id.0);

                if let Some(message_id) = execution.message_id {
                    if state.message(message_id).is_none() {
                        return Err(SessionStoreError::DanglingMessageRef {
                            path: path.to_path_buf(),
                            line: line_number,
                            execution_id: execution.id.0,
                            message_id: message_id.0,
                        });
                    }
                }
                if execution.is_in_flight() && !in_flight_calls.insert(execution.call_id.clone())
                {
                    return Err(SessionStoreError::DuplicateInFlightCall {
                        path: path.to_path_buf(),
                        line: line_number,
                        call_id: execution.call_id,
                    });
                }

                state.tool_executions.push(execution);
            }
        }
    }

    Ok((saved_at, state))
}

pub(crate) fn parse_json_line(
    path: &Path,
    line_number: usize,
    line: &str,
) -> Result<JsonLine, SessionStoreError> {
    serde_json::from_str::<JsonLine>(line)
        .map_err(|source| SessionStoreError::json_line(path, line_number, source))
}

pub(crate) fn validate_header_line(
    path: &Path,
    line_number: usize,
    header: &SnapshotHeader,
) -> Result<(), SessionStoreError> {
    if header.version != SNAPSHOT_VERSION {
        return Err(SessionStoreError::UnsupportedVersion {
            path: path.to_path_buf(),
            line: line_number,
            found: header.version,
        });
    }

    Ok(())
}

pub(crate) fn validate_entry_order(
    path: &Path,
    line_number: usize,
    previous: Option<u64>,
    id: u64,
) -> Result<(), SessionStoreError> {
    match previous {
        Some(previous) if id <= previous => Err(SessionStoreError::NonIncreasingId {
            path: path.to_path_buf(),
            line: line_number,
            id,
            previous,
        }),
        _ => Ok(()),
    }
}
