//! Top-level sprint orchestration.
//!
//! One orchestrator drives one sprint to completion; stories run strictly
//! sequentially because later stories may depend on artifacts and decisions
//! from earlier ones. The snapshot is taken once, after the plan is
//! persisted and before the first story's first task. Unexpected errors are
//! caught at the story boundary: the story is marked failed, the cause is
//! logged, and the sprint proceeds to its terminal summary.

use std::path::Path;
use std::sync::{Condvar, Mutex};

use anyhow::{anyhow, Context, Result};
use tracing::{error, info, instrument, warn};

use crate::core::types::EventKind;
use crate::decompose::BootstrapContext;
use crate::io::config::EngineConfig;
use crate::io::event_log::{now_ms, EventLog};
use crate::io::generator::Generator;
use crate::io::sandbox::Sandbox;
use crate::io::snapshot::SnapshotManager;
use crate::io::store::Store;
use crate::model::{PlanStatus, Story, StoryStatus};
use crate::story::run_story;

/// Cooperative pause signal, checked before each unit of work.
///
/// Pausing never cancels in-flight calls; it only prevents the next task
/// from starting. Owned by the orchestrator instance, not process-wide
/// state.
#[derive(Default)]
pub struct PauseGate {
    paused: Mutex<bool>,
    resumed: Condvar,
}

impl PauseGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        let mut paused = self.paused.lock().expect("pause gate poisoned");
        *paused = true;
    }

    pub fn resume(&self) {
        let mut paused = self.paused.lock().expect("pause gate poisoned");
        *paused = false;
        self.resumed.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.lock().expect("pause gate poisoned")
    }

    /// Block while paused. Returns immediately when running.
    pub fn wait_until_resumed(&self) {
        let mut paused = self.paused.lock().expect("pause gate poisoned");
        while *paused {
            paused = self.resumed.wait(paused).expect("pause gate poisoned");
        }
    }
}

/// Terminal summary of a sprint run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SprintOutcome {
    pub sprint_id: String,
    pub completed: u32,
    pub completed_with_failures: u32,
    pub failed: u32,
}

/// Execute one sprint plan to completion.
#[instrument(skip_all, fields(sprint_id))]
pub fn run_sprint<G: Generator>(
    generator: &G,
    sandbox: &dyn Sandbox,
    project_root: &Path,
    config: &EngineConfig,
    gate: &PauseGate,
    sprint_id: &str,
) -> Result<SprintOutcome> {
    let store = Store::new(project_root);
    let mut plan = store
        .load_plan(sprint_id)
        .with_context(|| format!("load sprint plan '{sprint_id}'"))?;
    let backlog = store.load_backlog()?;

    plan.status = PlanStatus::Executing;
    plan.started_at_ms = Some(now_ms());
    store.write_plan(&plan)?;

    // Exactly one snapshot per sprint save, taken right after the plan is
    // persisted and before any event or task, so a restore reproduces the
    // log's pre-execution (non-)existence.
    let snapshot = SnapshotManager::new(&store, project_root, &config.excluded_tree_dirs);
    let record = snapshot.create(&mut plan)?;

    let log = EventLog::new(&store.paths().log_path(sprint_id));
    log.append(
        None,
        EventKind::SprintStarted {
            sprint_id: sprint_id.to_string(),
            stories: plan.story_ids.len() as u32,
        },
    )?;
    log.append(
        None,
        EventKind::BackupCreated {
            backup_id: record.id,
        },
    )?;

    let mut outcome = SprintOutcome {
        sprint_id: sprint_id.to_string(),
        completed: 0,
        completed_with_failures: 0,
        failed: 0,
    };

    for (index, story_id) in plan.story_ids.iter().enumerate() {
        let Some(mut story) = backlog.iter().find(|s| &s.id == story_id).cloned() else {
            warn!(%story_id, "story missing from backlog, skipping");
            continue;
        };

        let bootstrap = if index == 0 {
            bootstrap_context(sandbox, config, &backlog, story_id)?
        } else {
            BootstrapContext::default()
        };

        let status = match run_story(
            generator, sandbox, &store, config, &log, gate, &mut story, &bootstrap,
        ) {
            Ok(status) => status,
            Err(err) => {
                // The story boundary: log cause, mark failed, move on.
                error!(%story_id, err = %format!("{err:#}"), "story failed unexpectedly");
                log.append(
                    Some(story_id.as_str()),
                    EventKind::HardStop {
                        reason: format!("unexpected error: {err:#}"),
                    },
                )?;
                story.status = StoryStatus::Failed;
                story.finished_at_ms = Some(now_ms());
                store.update_story(&story)?;
                log.append(
                    Some(story_id.as_str()),
                    EventKind::StoryFinished {
                        status: StoryStatus::Failed,
                    },
                )?;
                StoryStatus::Failed
            }
        };

        match status {
            StoryStatus::Completed => outcome.completed += 1,
            StoryStatus::CompletedWithFailures => outcome.completed_with_failures += 1,
            StoryStatus::Failed => outcome.failed += 1,
            StoryStatus::NotStarted | StoryStatus::InProgress => {
                return Err(anyhow!("story '{story_id}' finished in non-terminal state"));
            }
        }
    }

    plan.status = PlanStatus::Completed;
    plan.finished_at_ms = Some(now_ms());
    store.write_plan(&plan)?;
    log.append(
        None,
        EventKind::SprintCompleted {
            completed: outcome.completed,
            completed_with_failures: outcome.completed_with_failures,
            failed: outcome.failed,
        },
    )?;
    info!(
        completed = outcome.completed,
        completed_with_failures = outcome.completed_with_failures,
        failed = outcome.failed,
        "sprint completed"
    );
    Ok(outcome)
}

/// Context handed only to the bootstrap story: its siblings' requirements
/// and a bounded listing of the current project tree.
fn bootstrap_context(
    sandbox: &dyn Sandbox,
    config: &EngineConfig,
    backlog: &[Story],
    story_id: &str,
) -> Result<BootstrapContext> {
    let siblings: Vec<String> = backlog
        .iter()
        .filter(|story| story.id != story_id)
        .map(|story| format!("- {} ({}): {}", story.id, story.title, story.requirement))
        .collect();

    let files = sandbox.list_files(&config.excluded_tree_dirs)?;
    let tree_listing = files.join("\n");

    Ok(BootstrapContext {
        siblings: (!siblings.is_empty()).then(|| siblings.join("\n")),
        tree_listing: (!tree_listing.is_empty()).then_some(tree_listing),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn pause_gate_blocks_until_resumed() {
        let gate = Arc::new(PauseGate::new());
        gate.pause();
        assert!(gate.is_paused());

        let passed = Arc::new(AtomicBool::new(false));
        let gate_clone = Arc::clone(&gate);
        let passed_clone = Arc::clone(&passed);
        let handle = thread::spawn(move || {
            gate_clone.wait_until_resumed();
            passed_clone.store(true, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!passed.load(Ordering::SeqCst));

        gate.resume();
        handle.join().expect("join");
        assert!(passed.load(Ordering::SeqCst));
    }

    #[test]
    fn pause_gate_is_a_no_op_when_running() {
        let gate = PauseGate::new();
        gate.wait_until_resumed();
        assert!(!gate.is_paused());
    }
}
