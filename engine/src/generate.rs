//! Per-task code generation: context curation, normalization, validation,
//! in-place repair, and merge-aware writing.
//!
//! Validation failures get up to `task_repair_retries` in-place repair
//! requests carrying the exact violation list and the rejected content.
//! Beyond that only clean files are written and the task is recorded
//! partially complete. A declared setup command runs in the sandbox; its
//! failure aborts the story's remaining tasks.

use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use crate::core::contract::ArchitectureContract;
use crate::core::merge::merge_file;
use crate::core::normalize::normalize_files;
use crate::core::types::{FixInstruction, GeneratedFile, Task, TaskOutcome};
use crate::core::validate::validate_generated;
use crate::io::attempt_log::AttemptJournal;
use crate::io::config::EngineConfig;
use crate::io::generator::{request_object, GenerationRequest, Generator, Message, MessageRole};
use crate::io::prompt::PromptBuilder;
use crate::io::sandbox::Sandbox;
use crate::model::Story;

/// Result of one task execution.
#[derive(Debug, Clone)]
pub struct TaskRun {
    pub task_id: String,
    pub outcome: TaskOutcome,
    pub files_written: Vec<String>,
}

/// Inputs that stay fixed across the tasks of one attempt.
pub struct TaskContext<'a> {
    pub story: &'a Story,
    pub contract: &'a ArchitectureContract,
    pub conventions: &'a [String],
    /// Fixes already scoped to this task (see `core::fix_scope`).
    pub fixes: &'a [&'a FixInstruction],
    /// Targeted hint from the repeated-failure catalogue, if any.
    pub hint: Option<&'a str>,
    pub attempt: u32,
}

/// Execute one task: generate, validate, repair, merge, write, run command.
#[instrument(skip_all, fields(task_id = %task.id, attempt = context.attempt))]
pub fn run_task<G: Generator>(
    generator: &G,
    sandbox: &dyn Sandbox,
    config: &EngineConfig,
    task: &Task,
    context: &TaskContext<'_>,
    journal: &AttemptJournal,
) -> Result<TaskRun> {
    let mut files_written = Vec::new();
    let mut outcome = TaskOutcome::Completed;

    if !task.files.is_empty() {
        let (files, fully_clean) = generate_task_files(generator, sandbox, config, task, context)?;
        for file in &files {
            journal.record_generated(&file.path, &file.content)?;
            write_merged(sandbox, journal, file)?;
            files_written.push(file.path.clone());
        }
        if !fully_clean {
            outcome = TaskOutcome::PartiallyCompleted;
        }
    }

    if let Some(command) = &task.command {
        let argv: Vec<String> = command.split_whitespace().map(str::to_string).collect();
        info!(%command, "running task setup command");
        let output = sandbox.run_command(
            &argv,
            Duration::from_secs(config.command_timeout_secs),
            config.output_limit_bytes,
        )?;
        if !output.success() {
            warn!(exit_code = ?output.status.code(), "setup command failed");
            return Ok(TaskRun {
                task_id: task.id.clone(),
                outcome: TaskOutcome::Aborted,
                files_written,
            });
        }
    }

    Ok(TaskRun {
        task_id: task.id.clone(),
        outcome,
        files_written,
    })
}

/// Generate the task's files, repairing validation failures in place.
///
/// Returns the clean files to write and whether the final response was fully
/// clean.
fn generate_task_files<G: Generator>(
    generator: &G,
    sandbox: &dyn Sandbox,
    config: &EngineConfig,
    task: &Task,
    context: &TaskContext<'_>,
) -> Result<(Vec<GeneratedFile>, bool)> {
    let builder = PromptBuilder::new(config.prompt_budget_bytes);
    let initial_context = task_prompt_context(sandbox, config, task, context, None)?;
    let prompt = builder.build("task", &initial_context)?;
    let request = GenerationRequest::new("implementer", Value::String(prompt));

    let mut response = request_object(generator, &request)?;
    let mut repairs_left = config.task_repair_retries;

    loop {
        let files = normalize_files(&response)
            .with_context(|| format!("normalize response for task '{}'", task.id))?;

        let mut violations = Vec::new();
        for file in &files {
            violations.extend(validate_generated(&file.path, &file.content));
        }
        if violations.is_empty() {
            return Ok((files, true));
        }
        if repairs_left == 0 {
            warn!(
                ?violations,
                "repair budget exhausted, writing the clean subset"
            );
            let clean: Vec<GeneratedFile> = files
                .into_iter()
                .filter(|file| validate_generated(&file.path, &file.content).is_empty())
                .collect();
            return Ok((clean, false));
        }

        repairs_left -= 1;
        info!(violations = violations.len(), repairs_left, "requesting in-place repair");
        let repair_context = task_prompt_context(sandbox, config, task, context, Some(&violations))?;
        let repair_prompt = builder.build("task", &repair_context)?;
        let mut repair = GenerationRequest::new("implementer", Value::String(repair_prompt));
        repair.history.push(Message {
            role: MessageRole::Assistant,
            content: response.to_string(),
        });
        response = request_object(generator, &repair)?;
    }
}

/// Curate existing-file context: full content for files the task modifies,
/// bounded previews for the rest of the contract's existing files.
fn task_prompt_context(
    sandbox: &dyn Sandbox,
    config: &EngineConfig,
    task: &Task,
    context: &TaskContext<'_>,
    violations: Option<&[String]>,
) -> Result<Value> {
    let mut files = Vec::new();
    for path in &task.files {
        if let Some(content) = sandbox.read_file(path)? {
            files.push(json!({"path": path, "content": content, "full": true}));
        }
    }
    for path in context.contract.allowed_files() {
        if task.files.contains(path) {
            continue;
        }
        if let Some(content) = sandbox.read_file(path)? {
            let preview: String = content.chars().take(config.preview_limit_bytes).collect();
            files.push(json!({"path": path, "content": preview, "full": false}));
        }
    }

    Ok(json!({
        "task": {"id": task.id, "description": task.description, "files": task.files},
        "story": {
            "id": context.story.id,
            "title": context.story.title,
            "requirement": context.story.requirement,
        },
        "conventions": context.conventions,
        "files": files,
        "fixes": context.fixes,
        "hint": context.hint,
        "violations": violations,
        "attempt": context.attempt,
    }))
}

/// Back up then merge-write one generated file.
fn write_merged(
    sandbox: &dyn Sandbox,
    journal: &AttemptJournal,
    file: &GeneratedFile,
) -> Result<()> {
    let merged = match sandbox.read_file(&file.path)? {
        Some(existing) => {
            journal.backup_file(&file.path, &existing)?;
            merge_file(&file.path, &existing, &file.content)?
        }
        None => file.content.clone(),
    };
    sandbox.write_file(&file.path, &merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedGenerator, TestProject};

    fn task(files: &[&str]) -> Task {
        Task {
            id: "s-1-01".to_string(),
            description: "implement listing".to_string(),
            files: files.iter().map(|f| f.to_string()).collect(),
            command: None,
        }
    }

    fn files_reply(entries: &[(&str, &str)]) -> String {
        let files: Vec<Value> = entries
            .iter()
            .map(|(path, content)| json!({"path": path, "content": content}))
            .collect();
        json!({"files": files}).to_string()
    }

    #[test]
    fn clean_generation_writes_files() {
        let project = TestProject::new().expect("project");
        let generator = ScriptedGenerator::new(vec![files_reply(&[(
            "src/app.js",
            "function list() {\n  return [];\n}\n",
        )])]);
        let story = Story::new("s-1", "t", "r");
        let task = task(&["src/app.js"]);
        let contract =
            ArchitectureContract::build(&[], &[], std::slice::from_ref(&task), None);
        let journal = project.journal("s-1", 1);

        let run = run_task(
            &generator,
            project.sandbox(),
            &EngineConfig::default(),
            &task,
            &TaskContext {
                story: &story,
                contract: &contract,
                conventions: &[],
                fixes: &[],
                hint: None,
                attempt: 1,
            },
            &journal,
        )
        .expect("run");

        assert_eq!(run.outcome, TaskOutcome::Completed);
        assert_eq!(run.files_written, vec!["src/app.js"]);
        let written = project
            .sandbox()
            .read_file("src/app.js")
            .expect("read")
            .expect("exists");
        assert!(written.contains("function list"));
    }

    /// A validation failure is repaired in place with the violation list.
    #[test]
    fn invalid_output_gets_repair_retries() {
        let project = TestProject::new().expect("project");
        let generator = ScriptedGenerator::new(vec![
            files_reply(&[("src/app.js", "function broken() {\n  return 1;\n")]),
            files_reply(&[("src/app.js", "function fixed() {\n  return 1;\n}\n")]),
        ]);
        let story = Story::new("s-1", "t", "r");
        let task = task(&["src/app.js"]);
        let contract =
            ArchitectureContract::build(&[], &[], std::slice::from_ref(&task), None);
        let journal = project.journal("s-1", 1);

        let run = run_task(
            &generator,
            project.sandbox(),
            &EngineConfig::default(),
            &task,
            &TaskContext {
                story: &story,
                contract: &contract,
                conventions: &[],
                fixes: &[],
                hint: None,
                attempt: 1,
            },
            &journal,
        )
        .expect("run");

        assert_eq!(run.outcome, TaskOutcome::Completed);
        assert_eq!(generator.calls(), 2);
        let second = generator.request(1);
        assert!(second.history.iter().any(|m| m.role == MessageRole::Assistant));
        let prompt = second.context.as_str().expect("prompt");
        assert!(prompt.contains("unclosed '{'"));
    }

    /// Beyond the repair budget only clean files are written.
    #[test]
    fn exhausted_repairs_write_clean_subset_and_mark_partial() {
        let project = TestProject::new().expect("project");
        let bad = files_reply(&[
            ("src/ok.js", "function ok() {\n  return 1;\n}\n"),
            ("src/bad.js", "function bad() {\n"),
        ]);
        let generator = ScriptedGenerator::new(vec![bad.clone(), bad.clone(), bad]);
        let story = Story::new("s-1", "t", "r");
        let task = task(&["src/ok.js", "src/bad.js"]);
        let contract =
            ArchitectureContract::build(&[], &[], std::slice::from_ref(&task), None);
        let journal = project.journal("s-1", 1);

        let run = run_task(
            &generator,
            project.sandbox(),
            &EngineConfig::default(),
            &task,
            &TaskContext {
                story: &story,
                contract: &contract,
                conventions: &[],
                fixes: &[],
                hint: None,
                attempt: 1,
            },
            &journal,
        )
        .expect("run");

        assert_eq!(run.outcome, TaskOutcome::PartiallyCompleted);
        assert_eq!(run.files_written, vec!["src/ok.js"]);
        assert_eq!(generator.calls(), 3);
        assert!(project
            .sandbox()
            .read_file("src/bad.js")
            .expect("read")
            .is_none());
    }

    /// Existing files are backed up and merged, not clobbered.
    #[test]
    fn existing_source_is_merged_and_backed_up() {
        let project = TestProject::new().expect("project");
        project
            .sandbox()
            .write_file("src/app.js", "function keep() {\n  return 'old';\n}\n")
            .expect("seed");
        let generator = ScriptedGenerator::new(vec![files_reply(&[(
            "src/app.js",
            "function added() {\n  return 'new';\n}\n",
        )])]);
        let story = Story::new("s-1", "t", "r");
        let task = task(&["src/app.js"]);
        let contract =
            ArchitectureContract::build(&[], &[], std::slice::from_ref(&task), None);
        let journal = project.journal("s-1", 1);

        run_task(
            &generator,
            project.sandbox(),
            &EngineConfig::default(),
            &task,
            &TaskContext {
                story: &story,
                contract: &contract,
                conventions: &[],
                fixes: &[],
                hint: None,
                attempt: 1,
            },
            &journal,
        )
        .expect("run");

        let merged = project
            .sandbox()
            .read_file("src/app.js")
            .expect("read")
            .expect("exists");
        assert!(merged.contains("function keep"));
        assert!(merged.contains("function added"));
        assert!(project
            .attempt_backup_exists("s-1", 1, "src/app.js"));
    }

    #[test]
    fn failing_setup_command_aborts() {
        let project = TestProject::new().expect("project");
        let generator = ScriptedGenerator::new(vec![]);
        let story = Story::new("s-1", "t", "r");
        let task = Task {
            id: "s-1-01".to_string(),
            description: "setup".to_string(),
            files: Vec::new(),
            command: Some("false".to_string()),
        };
        let contract = ArchitectureContract::build(&[], &[], &[], None);
        let journal = project.journal("s-1", 1);

        let run = run_task(
            &generator,
            project.sandbox(),
            &EngineConfig::default(),
            &task,
            &TaskContext {
                story: &story,
                contract: &contract,
                conventions: &[],
                fixes: &[],
                hint: None,
                attempt: 1,
            },
            &journal,
        )
        .expect("run");

        assert_eq!(run.outcome, TaskOutcome::Aborted);
        assert_eq!(generator.calls(), 0);
    }
}
