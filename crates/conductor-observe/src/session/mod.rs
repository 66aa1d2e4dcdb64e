//! Per-session log files
//!
//! Layout:
//!
//! ```text
//! <root>/sessions/<command>/<YYYY-MM-DD>_<session-id>.log      first segment
//! <root>/sessions/<command>/<YYYY-MM-DD>_<session-id>.1.log    after one rotation
//! ```
//!
//! Records are queued per session and written by one background task per
//! session, so callers never wait on disk I/O. A session id reused on the
//! same day continues in its newest existing segment.

mod manager;
mod reader;
mod store;
mod writer;

pub use manager::{AppendOutcome, SessionManager, ShutdownReport};
pub use reader::{list_sessions, load_session, SessionListing};
pub use store::{FsSegmentStore, SegmentStore};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::id::SessionId;

/// State of one command invocation's session
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: SessionId,
    pub command: String,
    pub created_at: DateTime<Utc>,
    /// Segment currently written to
    pub path: PathBuf,
    /// Bytes written to the current segment
    pub bytes: u64,
    pub rotation_count: u32,
    pub records_written: u64,
    pub records_dropped: u64,
    /// Flushed and marked terminal
    pub closed: bool,
}

impl Session {
    pub(crate) fn new(root: &Path, command: &str, id: SessionId) -> Self {
        let created_at = Utc::now();
        let path = segment_path(root, command, created_at.date_naive(), &id, 0);
        Self {
            id,
            command: command.to_string(),
            created_at,
            path,
            bytes: 0,
            rotation_count: 0,
            records_written: 0,
            records_dropped: 0,
            closed: false,
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.created_at.date_naive()
    }
}

/// Directory holding every session of `command`
pub fn command_dir(root: &Path, command: &str) -> PathBuf {
    root.join("sessions").join(command)
}

/// Path of segment `segment` (0-based) of a session
pub fn segment_path(
    root: &Path,
    command: &str,
    date: NaiveDate,
    id: &SessionId,
    segment: u32,
) -> PathBuf {
    command_dir(root, command).join(segment_file_name(date, id, segment))
}

fn segment_file_name(date: NaiveDate, id: &SessionId, segment: u32) -> String {
    let date = date.format("%Y-%m-%d");
    match segment {
        0 => format!("{date}_{id}.log"),
        n => format!("{date}_{id}.{n}.log"),
    }
}

/// Split a segment file name into (date, session id, segment index)
pub(crate) fn parse_segment_file_name(name: &str) -> Option<(NaiveDate, SessionId, u32)> {
    let stem = name.strip_suffix(".log")?;
    let (date, rest) = stem.split_once('_')?;
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let (id, segment) = match rest.rsplit_once('.') {
        Some((id, n)) if !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()) => {
            (id, n.parse().ok()?)
        }
        _ => (rest, 0),
    };
    Some((date, SessionId::parse(id).ok()?, segment))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 4).unwrap()
    }

    #[test]
    fn test_segment_paths() {
        let id = SessionId::parse("init").unwrap();
        let root = Path::new("/var/log/conductor");
        assert_eq!(
            segment_path(root, "deploy", date(), &id, 0),
            PathBuf::from("/var/log/conductor/sessions/deploy/2026-01-04_init.log")
        );
        assert_eq!(
            segment_path(root, "deploy", date(), &id, 2),
            PathBuf::from("/var/log/conductor/sessions/deploy/2026-01-04_init.2.log")
        );
    }

    #[test]
    fn test_parse_segment_names() {
        let (d, id, n) = parse_segment_file_name("2026-01-04_init.log").unwrap();
        assert_eq!((d, id.as_str(), n), (date(), "init", 0));

        let (_, id, n) = parse_segment_file_name("2026-01-04_init.3.log").unwrap();
        assert_eq!((id.as_str(), n), ("init", 3));

        let (_, id, n) = parse_segment_file_name("2026-01-04_build.v2.log").unwrap();
        assert_eq!((id.as_str(), n), ("build.v2", 0));

        assert!(parse_segment_file_name("notes.txt").is_none());
        assert!(parse_segment_file_name("yesterday_init.log").is_none());
    }
}
