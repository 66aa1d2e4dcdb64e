//! Reading persisted sessions back

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::{command_dir, parse_segment_file_name};
use crate::error::{ObserveError, ObserveResult};
use crate::id::{validate_command_name, SessionId};
use crate::record::LogRecord;

/// One persisted session, possibly spread over several segments
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionListing {
    pub command: String,
    pub session_id: SessionId,
    pub date: NaiveDate,
    /// Segment paths in write order
    pub segments: Vec<PathBuf>,
    pub bytes: u64,
}

/// Load every record of a session, across rotated segments, in write order
///
/// Lines that fail to parse are skipped with a warning.
pub async fn load_session(
    root: &Path,
    command: &str,
    id: &SessionId,
) -> ObserveResult<Vec<LogRecord>> {
    validate_command_name(command)?;
    let listings = scan_command(root, command).await?;
    let Some(listing) = listings.into_iter().find(|l| &l.session_id == id) else {
        return Ok(Vec::new());
    };

    let mut records = Vec::new();
    for path in &listing.segments {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ObserveError::Read {
                path: path.clone(),
                source,
            })?;
        for (line_no, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match LogRecord::parse_line(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    path = %path.display(),
                    line = line_no + 1,
                    error = %e,
                    "skipping malformed session record"
                ),
            }
        }
    }
    Ok(records)
}

/// List persisted sessions, optionally for one command, newest first
pub async fn list_sessions(root: &Path, command: Option<&str>) -> ObserveResult<Vec<SessionListing>> {
    let commands = match command {
        Some(command) => {
            validate_command_name(command)?;
            vec![command.to_string()]
        }
        None => list_commands(root).await?,
    };

    let mut listings = Vec::new();
    for command in commands {
        listings.extend(scan_command(root, &command).await?);
    }
    listings.sort_by(|a, b| {
        b.date
            .cmp(&a.date)
            .then_with(|| a.command.cmp(&b.command))
            .then_with(|| a.session_id.cmp(&b.session_id))
    });
    Ok(listings)
}

async fn list_commands(root: &Path) -> ObserveResult<Vec<String>> {
    let dir = root.join("sessions");
    let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(ObserveError::Read { path: dir, source }),
    };

    let mut commands = Vec::new();
    while let Some(entry) = next_entry(&mut entries, &dir).await? {
        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
        if let (true, Some(name)) = (is_dir, entry.file_name().to_str()) {
            if validate_command_name(name).is_ok() {
                commands.push(name.to_string());
            }
        }
    }
    commands.sort();
    Ok(commands)
}

async fn scan_command(root: &Path, command: &str) -> ObserveResult<Vec<SessionListing>> {
    let dir = command_dir(root, command);
    let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => return Err(ObserveError::Read { path: dir, source }),
    };

    // (date, id) -> [(segment, path, bytes)]
    let mut grouped: BTreeMap<(NaiveDate, SessionId), Vec<(u32, PathBuf, u64)>> = BTreeMap::new();
    while let Some(entry) = next_entry(&mut entries, &dir).await? {
        let name = entry.file_name();
        let Some((date, id, segment)) = name.to_str().and_then(parse_segment_file_name) else {
            continue;
        };
        let bytes = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
        grouped
            .entry((date, id))
            .or_default()
            .push((segment, entry.path(), bytes));
    }

    Ok(grouped
        .into_iter()
        .map(|((date, session_id), mut segments)| {
            segments.sort_by_key(|(n, _, _)| *n);
            SessionListing {
                command: command.to_string(),
                session_id,
                date,
                bytes: segments.iter().map(|(_, _, b)| b).sum(),
                segments: segments.into_iter().map(|(_, p, _)| p).collect(),
            }
        })
        .collect())
}

async fn next_entry(
    entries: &mut tokio::fs::ReadDir,
    dir: &Path,
) -> ObserveResult<Option<tokio::fs::DirEntry>> {
    entries.next_entry().await.map_err(|source| ObserveError::Read {
        path: dir.to_path_buf(),
        source,
    })
}
