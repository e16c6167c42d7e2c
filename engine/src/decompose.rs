//! Story decomposition: requirement in, ordered task list out.
//!
//! Two narrow retry paths exist and never overlap: a format-repair request
//! for structural violations (bad id pattern, files-and-command both
//! missing) that does not re-derive the technical approach, and a single
//! recovery call when the breakdown returns fewer tasks than it declared.
//! A remaining gap after recovery is logged, never hidden. An architectural
//! conflict is a hard stop before any generation.

use std::fmt;

use anyhow::{bail, Context, Result};
use jsonschema::Draft;
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use crate::core::types::Task;
use crate::io::config::EngineConfig;
use crate::io::generator::{request_object, GenerationRequest, Generator, Message, MessageRole};
use crate::io::prompt::PromptBuilder;
use crate::model::{ArchitectureDeltas, ArchitectureState, Story, TechStack};

const BREAKDOWN_SCHEMA: &str = include_str!("../schemas/breakdown.schema.json");

/// The decomposer reported that the story cannot be implemented without
/// breaking the established architecture. Hard stop; never auto-retried.
#[derive(Debug, Clone)]
pub struct ArchitecturalConflict {
    pub story_id: String,
    pub reason: String,
}

impl fmt::Display for ArchitecturalConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "architectural conflict in story '{}': {}",
            self.story_id, self.reason
        )
    }
}

impl std::error::Error for ArchitecturalConflict {}

/// Result of a successful decomposition.
#[derive(Debug, Clone)]
pub struct Decomposition {
    pub tasks: Vec<Task>,
    pub deltas: ArchitectureDeltas,
    /// Task count the breakdown declared for itself.
    pub expected: u32,
    /// Tasks still missing after the bounded recovery call.
    pub gap: u32,
}

/// Extra context available only to the bootstrap story of a sprint.
#[derive(Debug, Clone, Default)]
pub struct BootstrapContext {
    pub siblings: Option<String>,
    pub tree_listing: Option<String>,
}

/// Decompose a story into tasks, with bounded recovery and format repair.
#[instrument(skip_all, fields(story_id = %story.id))]
pub fn decompose_story<G: Generator>(
    generator: &G,
    config: &EngineConfig,
    story: &Story,
    architecture: &ArchitectureState,
    bootstrap: &BootstrapContext,
) -> Result<Decomposition> {
    let builder = PromptBuilder::new(config.prompt_budget_bytes);
    let prompt_context = json!({
        "story": {
            "id": story.id,
            "title": story.title,
            "requirement": story.requirement,
            "acceptance": story.acceptance,
        },
        "architecture": {
            "tech_stack": architecture.tech_stack.as_ref().map(TechStack::as_str),
            "conventions": architecture.conventions,
        },
        "siblings": bootstrap.siblings,
        "tree": bootstrap.tree_listing,
    });
    let prompt = builder.build("decomposer", &prompt_context)?;
    let request = GenerationRequest::new("decomposer", Value::String(prompt));

    let mut value = request_object(generator, &request)?;
    if let Some(conflict) = conflict_reason(&value) {
        return Err(ArchitecturalConflict {
            story_id: story.id.clone(),
            reason: conflict,
        }
        .into());
    }

    let mut violations = breakdown_violations(&value, &story.id);
    if !violations.is_empty() {
        warn!(?violations, "breakdown has structural violations, requesting format repair");
        value = request_format_repair(generator, &request, &value, &violations)?;
        if let Some(conflict) = conflict_reason(&value) {
            return Err(ArchitecturalConflict {
                story_id: story.id.clone(),
                reason: conflict,
            }
            .into());
        }
        violations = breakdown_violations(&value, &story.id);
        if !violations.is_empty() {
            bail!(
                "breakdown for story '{}' still malformed after format repair: {}",
                story.id,
                violations.join("; ")
            );
        }
    }

    let mut tasks = parse_tasks(&value)?;
    let expected = value
        .get("expected_task_count")
        .and_then(Value::as_u64)
        .map(|n| n as u32)
        .unwrap_or(tasks.len() as u32);

    if expected > tasks.len() as u32 {
        let missing = recover_missing_tasks(
            generator,
            config,
            &request,
            &story.id,
            tasks.len() as u32,
            expected,
        )?;
        for task in missing {
            if !tasks.iter().any(|existing| existing.id == task.id) {
                tasks.push(task);
            }
        }
    }

    let gap = expected.saturating_sub(tasks.len() as u32);
    if gap > 0 {
        warn!(expected, planned = tasks.len(), gap, "breakdown still short after recovery");
    }

    info!(tasks = tasks.len(), expected, gap, "story decomposed");
    Ok(Decomposition {
        deltas: parse_deltas(&value),
        tasks,
        expected,
        gap,
    })
}

fn conflict_reason(value: &Value) -> Option<String> {
    value
        .get("conflict")
        .and_then(Value::as_str)
        .filter(|reason| !reason.trim().is_empty())
        .map(str::to_string)
}

/// Structural violations: schema conformance plus the semantic task
/// invariants. Returned as human-readable strings fed back on repair.
pub fn breakdown_violations(value: &Value, story_id: &str) -> Vec<String> {
    let mut violations = schema_violations(value);
    if !violations.is_empty() {
        return violations;
    }

    let id_re = regex::Regex::new(&format!("^{}-\\d{{2}}$", regex::escape(story_id)))
        .expect("id pattern should compile");

    if let Some(tasks) = value.get("tasks").and_then(Value::as_array) {
        for (index, task) in tasks.iter().enumerate() {
            let id = task.get("id").and_then(Value::as_str).unwrap_or("");
            if !id_re.is_match(id) {
                violations.push(format!(
                    "task {} id '{}' does not match '{}-NN'",
                    index + 1,
                    id,
                    story_id
                ));
            }
            let has_files = task
                .get("files")
                .and_then(Value::as_array)
                .map(|files| !files.is_empty())
                .unwrap_or(false);
            let has_command = task
                .get("command")
                .and_then(Value::as_str)
                .map(|command| !command.trim().is_empty())
                .unwrap_or(false);
            if !has_files && !has_command {
                violations.push(format!(
                    "task {} ('{}') declares neither files nor a command",
                    index + 1,
                    id
                ));
            }
        }
    }
    violations
}

fn schema_violations(value: &Value) -> Vec<String> {
    let schema: Value =
        serde_json::from_str(BREAKDOWN_SCHEMA).expect("breakdown schema should be valid json");
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .expect("breakdown schema should compile");
    compiled.iter_errors(value).map(|err| err.to_string()).collect()
}

/// Narrow retry that fixes structure without re-deriving the approach: the
/// rejected object and the violation list go back verbatim.
fn request_format_repair<G: Generator>(
    generator: &G,
    request: &GenerationRequest,
    rejected: &Value,
    violations: &[String],
) -> Result<Value> {
    let mut repair = request.clone();
    repair.history.push(Message {
        role: MessageRole::Assistant,
        content: rejected.to_string(),
    });
    repair.history.push(Message {
        role: MessageRole::User,
        content: format!(
            "Your breakdown is structurally invalid. Keep the same tasks and technical \
             approach, fix only these violations, and resend the full object:\n- {}",
            violations.join("\n- ")
        ),
    });
    request_object(generator, &repair).context("format repair request")
}

/// One bounded recovery call asking for exactly the missing tasks.
fn recover_missing_tasks<G: Generator>(
    generator: &G,
    config: &EngineConfig,
    request: &GenerationRequest,
    story_id: &str,
    have: u32,
    expected: u32,
) -> Result<Vec<Task>> {
    if config.breakdown_recovery_calls == 0 {
        return Ok(Vec::new());
    }
    let wanted: Vec<String> = (have + 1..=expected)
        .map(|n| format!("{story_id}-{n:02}"))
        .collect();
    info!(missing = wanted.len(), "requesting missing breakdown tasks");

    let mut recovery = request.clone();
    recovery.history.push(Message {
        role: MessageRole::User,
        content: format!(
            "Your breakdown declared {expected} tasks but returned {have}. Reply with a JSON \
             object {{\"tasks\": [...]}} containing exactly the missing tasks {}.",
            wanted.join(", ")
        ),
    });

    let value = match request_object(generator, &recovery) {
        Ok(value) => value,
        Err(err) => {
            // Recovery is best-effort; the gap is logged by the caller.
            warn!(%err, "breakdown recovery call failed");
            return Ok(Vec::new());
        }
    };
    if !breakdown_violations(&value, story_id).is_empty() {
        warn!("recovered tasks were malformed, proceeding with the partial set");
        return Ok(Vec::new());
    }
    parse_tasks(&value)
}

fn parse_tasks(value: &Value) -> Result<Vec<Task>> {
    let tasks = value
        .get("tasks")
        .cloned()
        .context("breakdown missing 'tasks'")?;
    serde_json::from_value(tasks).context("parse breakdown tasks")
}

fn parse_deltas(value: &Value) -> ArchitectureDeltas {
    ArchitectureDeltas {
        tech_stack: value
            .get("tech_stack")
            .and_then(Value::as_str)
            .and_then(TechStack::from_name),
        conventions: string_list(value, "conventions"),
        schemas: string_list(value, "schemas"),
        endpoints: string_list(value, "endpoints"),
        todos: string_list(value, "todos"),
    }
}

fn string_list(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
