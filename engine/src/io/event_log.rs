//! Append-only JSONL event journal.
//!
//! One single-line JSON record per event, appended and never rewritten. The
//! journal is the product artifact and the single source of truth for run
//! status (`core::status` replays it); dev tracing is separate and
//! unaffected by `RUST_LOG`.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use tracing::warn;

use crate::core::types::{Event, EventKind};

/// Appending writer for one sprint's journal.
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event, stamping it with the current wall clock.
    pub fn append(&self, story_id: Option<&str>, kind: EventKind) -> Result<Event> {
        let event = Event::new(now_ms(), story_id, kind);
        self.append_event(&event)?;
        Ok(event)
    }

    fn append_event(&self, event: &Event) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create log dir {}", parent.display()))?;
        }
        let mut line = serde_json::to_string(event).context("serialize event")?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open event log {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append event to {}", self.path.display()))?;
        Ok(())
    }

    /// Read the full journal. A missing file is an empty journal; a
    /// truncated trailing line (interrupted run) is skipped with a warning.
    pub fn read_all(&self) -> Result<Vec<Event>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read event log {}", self.path.display()))?;
        let mut events = Vec::new();
        for (index, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(line) {
                Ok(event) => events.push(event),
                Err(err) => {
                    warn!(line = index + 1, %err, "skipping unparseable journal line");
                }
            }
        }
        Ok(events)
    }
}

/// Current wall clock as epoch milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appended_events_replay_in_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = EventLog::new(&temp.path().join("sprint-001.jsonl"));

        log.append(
            None,
            EventKind::SprintStarted {
                sprint_id: "sprint-001".to_string(),
                stories: 1,
            },
        )
        .expect("append");
        log.append(Some("s-1"), EventKind::StoryStarted)
            .expect("append");

        let events = log.read_all().expect("read");
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0].kind, EventKind::SprintStarted { .. }));
        assert_eq!(events[1].story_id.as_deref(), Some("s-1"));
    }

    #[test]
    fn missing_journal_reads_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let log = EventLog::new(&temp.path().join("nope.jsonl"));
        assert!(log.read_all().expect("read").is_empty());
    }

    #[test]
    fn truncated_trailing_line_is_skipped() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("sprint-001.jsonl");
        let log = EventLog::new(&path);
        log.append(Some("s-1"), EventKind::StoryStarted)
            .expect("append");

        // Simulate an interrupted append.
        let mut contents = fs::read_to_string(&path).expect("read");
        contents.push_str("{\"ts_ms\": 12, \"type\": \"story_");
        fs::write(&path, contents).expect("write");

        let events = log.read_all().expect("read");
        assert_eq!(events.len(), 1);
    }
}
