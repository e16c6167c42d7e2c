//! Shared deterministic types for engine core logic.
//!
//! These types define stable contracts between pipeline stages. They must not
//! depend on external state or I/O and must remain deterministic across runs.

use serde::{Deserialize, Serialize};

use crate::model::StoryStatus;

/// An atomic implementation unit derived from a story.
///
/// Invariant: a task declares a non-empty `files` list or a setup `command`,
/// never neither. Ids are story-scoped with a zero-padded sequence
/// (`<story-id>-01`, `<story-id>-02`, …).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub command: Option<String>,
}

/// One normalized generated file at the service boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedFile {
    pub path: String,
    pub content: String,
}

/// Outcome of writing one task's files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed,
    /// Some files failed validation after the repair budget and were dropped.
    PartiallyCompleted,
    /// The task's setup command failed; remaining tasks were not attempted.
    Aborted,
    Skipped,
}

/// Parsed result of one test run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestReport {
    pub passed: u32,
    pub failed: u32,
    /// Set when no known report format matched; counts are then 0/0.
    pub parse_failed: bool,
}

impl TestReport {
    pub fn green(&self) -> bool {
        !self.parse_failed && self.failed == 0 && self.passed > 0
    }
}

/// One scoped fix instruction produced by failure analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixInstruction {
    pub test: String,
    pub file: String,
    #[serde(default)]
    pub section: Option<String>,
    pub expected: String,
    pub actual: String,
    pub instruction: String,
}

/// Memory carried between retry and generation within one story.
///
/// Cleared when the story reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub files_written: Vec<String>,
    pub report: TestReport,
    pub fixes: Vec<FixInstruction>,
}

/// Exact contract violations found by the enforcer, sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractViolations {
    pub files: Vec<String>,
    pub deps: Vec<String>,
}

impl ContractViolations {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.deps.is_empty()
    }
}

/// A write-once run event. Current status is always derived by replaying
/// these records; no separate mutable status object exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub ts_ms: u64,
    #[serde(default)]
    pub story_id: Option<String>,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EventKind {
    SprintStarted {
        sprint_id: String,
        stories: u32,
    },
    BackupCreated {
        backup_id: String,
    },
    StoryStarted,
    TasksPlanned {
        expected: u32,
        planned: u32,
        /// Tasks still missing after the bounded recovery call.
        gap: u32,
    },
    TaskFinished {
        task_id: String,
        outcome: TaskOutcome,
        files: Vec<String>,
    },
    SetupCommandFailed {
        task_id: String,
    },
    ContractViolation {
        files: Vec<String>,
        deps: Vec<String>,
    },
    TestsRun {
        attempt: u32,
        passed: u32,
        failed: u32,
        parse_failed: bool,
    },
    RetryScheduled {
        attempt: u32,
        fixes: u32,
        hint: Option<String>,
    },
    HardStop {
        reason: String,
    },
    StoryFinished {
        status: StoryStatus,
    },
    SprintCompleted {
        completed: u32,
        completed_with_failures: u32,
        failed: u32,
    },
}

impl Event {
    pub fn new(ts_ms: u64, story_id: Option<&str>, kind: EventKind) -> Self {
        Self {
            ts_ms,
            story_id: story_id.map(str::to_string),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_with_tagged_kind() {
        let event = Event::new(
            42,
            Some("s-1"),
            EventKind::TestsRun {
                attempt: 1,
                passed: 4,
                failed: 1,
                parse_failed: false,
            },
        );
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "tests_run");
        assert_eq!(json["payload"]["passed"], 4);
        assert_eq!(json["story_id"], "s-1");
    }

    #[test]
    fn report_green_requires_runs_and_no_failures() {
        assert!(TestReport {
            passed: 3,
            failed: 0,
            parse_failed: false
        }
        .green());
        assert!(!TestReport::default().green());
        assert!(!TestReport {
            passed: 3,
            failed: 1,
            parse_failed: false
        }
        .green());
        assert!(!TestReport {
            passed: 0,
            failed: 0,
            parse_failed: true
        }
        .green());
    }
}
