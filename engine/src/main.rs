//! Sprint execution engine CLI.
//!
//! Drives one sprint plan at a time: `run` executes it end to end, `status`
//! replays the event journal, `backup`/`restore` manage snapshots, and
//! `validate` checks the stored documents against their invariants.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use sprint_engine::core::status::project;
use sprint_engine::io::config::load_config;
use sprint_engine::io::event_log::EventLog;
use sprint_engine::io::generator::ProcessGenerator;
use sprint_engine::io::sandbox::LocalSandbox;
use sprint_engine::io::snapshot::SnapshotManager;
use sprint_engine::io::store::Store;
use sprint_engine::logging;
use sprint_engine::sprint::{run_sprint, PauseGate};

#[derive(Parser)]
#[command(name = "sprint", version, about = "Automated implement-and-verify pipeline engine")]
struct Cli {
    /// Project root (defaults to the current directory).
    #[arg(long, global = true, default_value = ".")]
    project: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute a sprint plan to completion.
    Run {
        /// Sprint plan id (a `.sprint/plans/<id>.json` document).
        sprint_id: String,
    },
    /// Print replayed progress for a sprint.
    Status { sprint_id: String },
    /// Take a snapshot for a sprint without executing it.
    Backup { sprint_id: String },
    /// Restore a sprint's snapshot and prune later sprints.
    Restore { sprint_id: String },
    /// Check stored documents against schema and semantic invariants.
    Validate,
}

fn main() {
    logging::init();
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let store = Store::new(&cli.project);
    let config = load_config(&store.paths().config_path)?;

    match cli.command {
        Command::Run { sprint_id } => {
            let generator = ProcessGenerator::new(
                config.generator_command.clone(),
                Duration::from_secs(config.generation_timeout_secs),
                config.output_limit_bytes,
            );
            let sandbox = LocalSandbox::new(&cli.project);
            let gate = PauseGate::new();
            let outcome = run_sprint(
                &generator,
                &sandbox,
                &cli.project,
                &config,
                &gate,
                &sprint_id,
            )?;
            println!(
                "sprint {} completed: {} green, {} with failures, {} failed",
                outcome.sprint_id,
                outcome.completed,
                outcome.completed_with_failures,
                outcome.failed
            );
            Ok(())
        }
        Command::Status { sprint_id } => {
            let log = EventLog::new(&store.paths().log_path(&sprint_id));
            let progress = project(&log.read_all()?);
            if progress.sprint_id.is_none() && progress.stories.is_empty() {
                println!("no events for sprint '{sprint_id}'");
                return Ok(());
            }
            for (story_id, status) in &progress.stories {
                println!("{story_id}: {}", status_label(*status));
            }
            if let Some(current) = &progress.current_story {
                println!("in progress: {current}");
            }
            println!(
                "summary: {} green, {} with failures, {} failed{}",
                progress.completed,
                progress.completed_with_failures,
                progress.failed,
                if progress.terminal { " (terminal)" } else { "" }
            );
            Ok(())
        }
        Command::Backup { sprint_id } => {
            let mut plan = store
                .load_plan(&sprint_id)
                .with_context(|| format!("load sprint plan '{sprint_id}'"))?;
            let snapshot = SnapshotManager::new(&store, &cli.project, &config.excluded_tree_dirs);
            let record = snapshot.create(&mut plan)?;
            println!("snapshot '{}' created", record.id);
            Ok(())
        }
        Command::Restore { sprint_id } => {
            let sandbox = LocalSandbox::new(&cli.project);
            let snapshot = SnapshotManager::new(&store, &cli.project, &config.excluded_tree_dirs);
            snapshot.restore(
                &sprint_id,
                &sandbox,
                Duration::from_secs(config.command_timeout_secs),
                config.output_limit_bytes,
            )?;
            println!("snapshot '{sprint_id}' restored");
            Ok(())
        }
        Command::Validate => cmd_validate(&store),
    }
}

fn cmd_validate(store: &Store) -> Result<()> {
    let backlog = store.load_backlog()?;
    let mut errors = Vec::new();

    let mut seen = std::collections::BTreeSet::new();
    for story in &backlog {
        if !seen.insert(story.id.clone()) {
            errors.push(format!("duplicate story id '{}'", story.id));
        }
        if story.id.trim().is_empty() {
            errors.push("story with empty id".to_string());
        }
    }

    let plans = store.list_plans()?;
    let mut sequences = std::collections::BTreeSet::new();
    for plan in &plans {
        if !sequences.insert(plan.sequence) {
            errors.push(format!(
                "plan '{}' reuses sequence {}",
                plan.id, plan.sequence
            ));
        }
        for story_id in &plan.story_ids {
            if !backlog.iter().any(|story| &story.id == story_id) {
                errors.push(format!(
                    "plan '{}' references unknown story '{story_id}'",
                    plan.id
                ));
            }
        }
    }

    // Parse failures surface as errors from the store itself.
    store.load_architecture()?;

    if !errors.is_empty() {
        bail!("validation failed:\n- {}", errors.join("\n- "));
    }
    println!(
        "ok: {} stories, {} plans",
        backlog.len(),
        plans.len()
    );
    Ok(())
}

fn status_label(status: sprint_engine::model::StoryStatus) -> &'static str {
    use sprint_engine::model::StoryStatus;
    match status {
        StoryStatus::NotStarted => "not started",
        StoryStatus::InProgress => "in progress",
        StoryStatus::Completed => "completed",
        StoryStatus::CompletedWithFailures => "completed with failures",
        StoryStatus::Failed => "failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run() {
        let cli = Cli::parse_from(["sprint", "run", "sprint-001"]);
        assert!(matches!(cli.command, Command::Run { sprint_id } if sprint_id == "sprint-001"));
    }

    #[test]
    fn parse_project_flag() {
        let cli = Cli::parse_from(["sprint", "--project", "/tmp/demo", "status", "sprint-001"]);
        assert_eq!(cli.project, PathBuf::from("/tmp/demo"));
        assert!(matches!(cli.command, Command::Status { .. }));
    }

    #[test]
    fn parse_validate() {
        let cli = Cli::parse_from(["sprint", "validate"]);
        assert!(matches!(cli.command, Command::Validate));
    }
}
