//! Rollback scenarios: a sprint run followed by a restore must reproduce
//! the pre-execution state, and restoring an earlier sprint prunes every
//! later sprint's artifacts.

use std::time::Duration;

use serde_json::json;

use sprint_engine::io::config::EngineConfig;
use sprint_engine::io::sandbox::Sandbox;
use sprint_engine::io::snapshot::SnapshotManager;
use sprint_engine::model::{ArchitectureState, SprintPlan, Story, StoryStatus, TechStack};
use sprint_engine::sprint::{run_sprint, PauseGate};
use sprint_engine::test_support::{ScriptedCommand, ScriptedGenerator, TestProject};

fn green_story_replies(story_id: &str, file: &str) -> Vec<String> {
    vec![
        json!({
            "tasks": [{"id": format!("{story_id}-01"), "description": "implement",
                       "files": [file]}],
            "expected_task_count": 1,
            "tech_stack": "node"
        })
        .to_string(),
        json!({"files": [{"path": file, "content": "function list() {\n  return [];\n}\n"}]})
            .to_string(),
        json!({
            "path": "tests/story.test.js",
            "content": "test('works', () => {});\n",
            "cases": ["works"]
        })
        .to_string(),
    ]
}

fn green_commands() -> Vec<Result<ScriptedCommand, String>> {
    vec![
        Ok(ScriptedCommand::ok("")),
        Ok(ScriptedCommand::ok("# pass 1\n# fail 0\n")),
    ]
}

/// After a full run, restoring the sprint brings back the pre-execution
/// backlog, removes the event log, and removes the generated files.
#[test]
fn restore_after_run_reproduces_pre_execution_state() {
    let project = TestProject::new().expect("project");
    let store = project.store();

    project
        .sandbox()
        .write_file("README.md", "seed\n")
        .expect("seed");
    store
        .write_architecture(&ArchitectureState {
            tech_stack: Some(TechStack::Node),
            ..ArchitectureState::default()
        })
        .expect("architecture");
    store
        .write_backlog(&[Story::new("s-1", "Listing", "Users can list items")])
        .expect("backlog");
    store
        .write_plan(&SprintPlan::new("sprint-001", 1, vec!["s-1".to_string()]))
        .expect("plan");

    let generator = ScriptedGenerator::new(green_story_replies("s-1", "src/app.js"));
    let sandbox = project.scripted_sandbox(green_commands());
    run_sprint(
        &generator,
        &sandbox,
        project.root(),
        &EngineConfig::default(),
        &PauseGate::new(),
        "sprint-001",
    )
    .expect("run");

    // The run left its traces.
    assert!(store.paths().log_path("sprint-001").exists());
    assert!(project
        .sandbox()
        .read_file("src/app.js")
        .expect("read")
        .is_some());
    assert_eq!(
        store.load_backlog().expect("backlog")[0].status,
        StoryStatus::Completed
    );

    let config = EngineConfig::default();
    let manager = SnapshotManager::new(&store, project.root(), &config.excluded_tree_dirs);
    let restore_sandbox = project.scripted_sandbox(vec![Ok(ScriptedCommand::ok(""))]);
    manager
        .restore(
            "sprint-001",
            &restore_sandbox,
            Duration::from_secs(5),
            10_000,
        )
        .expect("restore");

    // Pre-execution state: untouched seed file, no generated code, no log,
    // story back to not started.
    assert_eq!(
        project
            .sandbox()
            .read_file("README.md")
            .expect("read")
            .as_deref(),
        Some("seed\n")
    );
    assert!(project
        .sandbox()
        .read_file("src/app.js")
        .expect("read")
        .is_none());
    assert!(!store.paths().log_path("sprint-001").exists());
    assert_eq!(
        store.load_backlog().expect("backlog")[0].status,
        StoryStatus::NotStarted
    );

    // Dependencies were reinstalled through the sandbox (stack is node).
    let commands = restore_sandbox.commands_seen();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0][0], "npm");

    // The registry still lists the snapshot.
    assert_eq!(store.load_plan("sprint-001").expect("plan").backups.len(), 1);
}

/// Restoring sprint N deletes the plans, logs, and backups of N+1 and N+2.
#[test]
fn restore_prunes_all_later_sprints() {
    let project = TestProject::new().expect("project");
    let store = project.store();
    let config = EngineConfig::default();

    store
        .write_backlog(&[
            Story::new("s-1", "One", "first"),
            Story::new("s-2", "Two", "second"),
            Story::new("s-3", "Three", "third"),
        ])
        .expect("backlog");

    for (sprint_id, sequence, story_id) in [
        ("sprint-001", 1, "s-1"),
        ("sprint-002", 2, "s-2"),
        ("sprint-003", 3, "s-3"),
    ] {
        store
            .write_plan(&SprintPlan::new(sprint_id, sequence, vec![story_id.to_string()]))
            .expect("plan");
        let generator = ScriptedGenerator::new(green_story_replies(story_id, "src/app.js"));
        let sandbox = project.scripted_sandbox(green_commands());
        run_sprint(
            &generator,
            &sandbox,
            project.root(),
            &config,
            &PauseGate::new(),
            sprint_id,
        )
        .expect("run");
    }

    let manager = SnapshotManager::new(&store, project.root(), &config.excluded_tree_dirs);
    let restore_sandbox = project.scripted_sandbox(vec![]);
    manager
        .restore(
            "sprint-001",
            &restore_sandbox,
            Duration::from_secs(5),
            10_000,
        )
        .expect("restore");

    for pruned in ["sprint-002", "sprint-003"] {
        assert!(!store.paths().plan_path(pruned).exists(), "{pruned} plan");
        assert!(!store.paths().log_path(pruned).exists(), "{pruned} log");
        assert!(!store.paths().backup_dir(pruned).exists(), "{pruned} backup");
    }
    assert!(store.paths().plan_path("sprint-001").exists());
    assert!(store.paths().backup_dir("sprint-001").exists());

    let plans = store.list_plans().expect("plans");
    assert_eq!(plans.len(), 1);
    assert_eq!(plans[0].id, "sprint-001");
}

/// A second snapshot request for the same sprint registers a second record
/// but the engine takes exactly one per run.
#[test]
fn one_snapshot_exists_per_sprint_run() {
    let project = TestProject::new().expect("project");
    let store = project.store();

    store
        .write_backlog(&[Story::new("s-1", "Listing", "Users can list items")])
        .expect("backlog");
    store
        .write_plan(&SprintPlan::new("sprint-001", 1, vec!["s-1".to_string()]))
        .expect("plan");

    let generator = ScriptedGenerator::new(green_story_replies("s-1", "src/app.js"));
    let sandbox = project.scripted_sandbox(green_commands());
    run_sprint(
        &generator,
        &sandbox,
        project.root(),
        &EngineConfig::default(),
        &PauseGate::new(),
        "sprint-001",
    )
    .expect("run");

    let plan = store.load_plan("sprint-001").expect("plan");
    assert_eq!(plan.backups.len(), 1);

    // The snapshot predates every task: the captured tree has no generated
    // file.
    let captured_tree = store.paths().backup_dir("sprint-001").join("tree");
    assert!(!captured_tree.join("src/app.js").exists());

    // The captured log slot is the explicit empty marker.
    assert!(store
        .paths()
        .backup_dir("sprint-001")
        .join("events.jsonl.EMPTY")
        .exists());
}

