//! Whole-document store for the backlog table, sprint plans, and
//! architecture state.
//!
//! The store offers no partial-row updates: callers read a complete document,
//! modify it in memory, and write the complete document back. All writes are
//! atomic (temp file + rename).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::model::{ArchitectureState, SprintPlan, Story};

/// Well-known paths under `<project-root>/.sprint/`.
#[derive(Debug, Clone)]
pub struct SprintPaths {
    pub state_dir: PathBuf,
    pub backlog_path: PathBuf,
    pub architecture_path: PathBuf,
    pub plans_dir: PathBuf,
    pub logs_dir: PathBuf,
    pub backups_dir: PathBuf,
    pub attempts_dir: PathBuf,
    pub assets_dir: PathBuf,
    pub config_path: PathBuf,
}

impl SprintPaths {
    pub fn new(project_root: &Path) -> Self {
        let state_dir = project_root.join(".sprint");
        Self {
            backlog_path: state_dir.join("backlog.json"),
            architecture_path: state_dir.join("architecture.json"),
            plans_dir: state_dir.join("plans"),
            logs_dir: state_dir.join("logs"),
            backups_dir: state_dir.join("backups"),
            attempts_dir: state_dir.join("attempts"),
            assets_dir: state_dir.join("assets"),
            config_path: state_dir.join("config.toml"),
            state_dir,
        }
    }

    pub fn plan_path(&self, sprint_id: &str) -> PathBuf {
        self.plans_dir.join(format!("{sprint_id}.json"))
    }

    pub fn log_path(&self, sprint_id: &str) -> PathBuf {
        self.logs_dir.join(format!("{sprint_id}.jsonl"))
    }

    pub fn backup_dir(&self, sprint_id: &str) -> PathBuf {
        self.backups_dir.join(sprint_id)
    }
}

/// File-backed document store.
pub struct Store {
    paths: SprintPaths,
}

impl Store {
    pub fn new(project_root: &Path) -> Self {
        Self {
            paths: SprintPaths::new(project_root),
        }
    }

    pub fn paths(&self) -> &SprintPaths {
        &self.paths
    }

    /// Load the flat story table. Missing file means an empty backlog.
    pub fn load_backlog(&self) -> Result<Vec<Story>> {
        load_or_default(&self.paths.backlog_path)
    }

    pub fn write_backlog(&self, stories: &[Story]) -> Result<()> {
        write_json_atomic(&self.paths.backlog_path, &stories)
    }

    /// Replace one story's record in the table (whole-document rewrite).
    pub fn update_story(&self, story: &Story) -> Result<()> {
        let mut backlog = self.load_backlog()?;
        let slot = backlog
            .iter_mut()
            .find(|existing| existing.id == story.id)
            .ok_or_else(|| anyhow!("story '{}' not in backlog", story.id))?;
        *slot = story.clone();
        self.write_backlog(&backlog)
    }

    pub fn load_plan(&self, sprint_id: &str) -> Result<SprintPlan> {
        load_json(&self.paths.plan_path(sprint_id))
    }

    pub fn write_plan(&self, plan: &SprintPlan) -> Result<()> {
        write_json_atomic(&self.paths.plan_path(&plan.id), plan)
    }

    /// All persisted plans, sorted by sequence.
    pub fn list_plans(&self) -> Result<Vec<SprintPlan>> {
        if !self.paths.plans_dir.exists() {
            return Ok(Vec::new());
        }
        let mut plans = Vec::new();
        let entries = fs::read_dir(&self.paths.plans_dir)
            .with_context(|| format!("list {}", self.paths.plans_dir.display()))?;
        for entry in entries {
            let path = entry.context("read plans dir entry")?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                plans.push(load_json::<SprintPlan>(&path)?);
            }
        }
        plans.sort_by_key(|plan| plan.sequence);
        Ok(plans)
    }

    /// Load architecture state. Missing file means a fresh default.
    pub fn load_architecture(&self) -> Result<ArchitectureState> {
        load_or_default(&self.paths.architecture_path)
    }

    pub fn write_architecture(&self, state: &ArchitectureState) -> Result<()> {
        write_json_atomic(&self.paths.architecture_path, state)
    }
}

fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

fn load_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    load_json(path)
}

/// Serialize to pretty JSON with trailing newline and write atomically.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value).context("serialize json")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, &buf).with_context(|| format!("write temp {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    debug!(path = %path.display(), "wrote document");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StoryStatus;

    #[test]
    fn missing_backlog_loads_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = Store::new(temp.path());
        assert!(store.load_backlog().expect("load").is_empty());
    }

    #[test]
    fn update_story_rewrites_only_that_record() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = Store::new(temp.path());
        store
            .write_backlog(&[
                Story::new("s-1", "one", "first"),
                Story::new("s-2", "two", "second"),
            ])
            .expect("write");

        let mut story = Story::new("s-1", "one", "first");
        story.status = StoryStatus::Completed;
        store.update_story(&story).expect("update");

        let backlog = store.load_backlog().expect("load");
        assert_eq!(backlog[0].status, StoryStatus::Completed);
        assert_eq!(backlog[1].status, StoryStatus::NotStarted);
    }

    #[test]
    fn update_unknown_story_errors() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = Store::new(temp.path());
        store
            .write_backlog(&[Story::new("s-1", "one", "first")])
            .expect("write");

        let err = store
            .update_story(&Story::new("ghost", "x", "y"))
            .expect_err("should fail");
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn plans_list_sorted_by_sequence() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = Store::new(temp.path());
        store
            .write_plan(&SprintPlan::new("sprint-002", 2, vec![]))
            .expect("write");
        store
            .write_plan(&SprintPlan::new("sprint-001", 1, vec![]))
            .expect("write");

        let plans = store.list_plans().expect("list");
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].id, "sprint-001");
        assert_eq!(plans[1].id, "sprint-002");
    }

    #[test]
    fn architecture_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = Store::new(temp.path());

        let mut state = ArchitectureState::default();
        state.conventions.push("use ESM".to_string());
        store.write_architecture(&state).expect("write");

        assert_eq!(store.load_architecture().expect("load"), state);
    }
}
