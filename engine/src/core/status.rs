//! Status projection by event replay.
//!
//! There is no mutable status store: progress is always computed from the
//! append-only event log by tracking the latest transition per story. A
//! projection of the same log is therefore always internally consistent.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::core::types::{Event, EventKind};
use crate::model::StoryStatus;

/// Replayed view of a sprint run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SprintProgress {
    pub sprint_id: Option<String>,
    /// Latest known status per story, keyed by story id.
    pub stories: BTreeMap<String, StoryStatus>,
    /// Story currently in progress, if any.
    pub current_story: Option<String>,
    pub completed: u32,
    pub completed_with_failures: u32,
    pub failed: u32,
    /// Set once the sprint-completed event has been seen.
    pub terminal: bool,
}

/// Project a slice of events into current progress.
pub fn project(events: &[Event]) -> SprintProgress {
    let mut progress = SprintProgress::default();

    for event in events {
        match &event.kind {
            EventKind::SprintStarted { sprint_id, .. } => {
                progress.sprint_id = Some(sprint_id.clone());
            }
            EventKind::StoryStarted => {
                if let Some(story_id) = &event.story_id {
                    progress
                        .stories
                        .insert(story_id.clone(), StoryStatus::InProgress);
                    progress.current_story = Some(story_id.clone());
                }
            }
            EventKind::StoryFinished { status } => {
                if let Some(story_id) = &event.story_id {
                    progress.stories.insert(story_id.clone(), *status);
                    if progress.current_story.as_deref() == Some(story_id.as_str()) {
                        progress.current_story = None;
                    }
                }
            }
            EventKind::SprintCompleted {
                completed,
                completed_with_failures,
                failed,
            } => {
                progress.completed = *completed;
                progress.completed_with_failures = *completed_with_failures;
                progress.failed = *failed;
                progress.terminal = true;
            }
            _ => {}
        }
    }

    if !progress.terminal {
        // Derive counters from per-story transitions while the run is live.
        progress.completed = count(&progress, StoryStatus::Completed);
        progress.completed_with_failures = count(&progress, StoryStatus::CompletedWithFailures);
        progress.failed = count(&progress, StoryStatus::Failed);
    }

    progress
}

fn count(progress: &SprintProgress, status: StoryStatus) -> u32 {
    progress
        .stories
        .values()
        .filter(|s| **s == status)
        .count() as u32
}
