//! Per-story state machine and retry controller.
//!
//! One story runs Decompose → BuildContract → (Generate → Enforce → Test →
//! Analyze)* → Finalize. The attempt loop re-runs the full pipeline (all
//! tasks, then enforcement, then tests) up to the configured budget,
//! exiting immediately on the first green run. [`AttemptRecord`]s are the
//! only memory between Analyze and the next Generate and are cleared when
//! the story reaches a terminal state. A contract violation finalizes the
//! story without retry: re-running generation against the same contract
//! reproduces the same violation.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::analyze::analyze_failures;
use crate::core::contract::ArchitectureContract;
use crate::core::fix_scope::fixes_for_task;
use crate::core::signature::repeated_signature;
use crate::core::types::{AttemptRecord, EventKind, FixInstruction, TaskOutcome, TestReport};
use crate::decompose::{decompose_story, ArchitecturalConflict, BootstrapContext, Decomposition};
use crate::generate::{run_task, TaskContext};
use crate::io::attempt_log::{clear_story_attempts, AttemptJournal};
use crate::io::config::EngineConfig;
use crate::io::event_log::{now_ms, EventLog};
use crate::io::generator::Generator;
use crate::io::sandbox::Sandbox;
use crate::io::store::Store;
use crate::model::{Story, StoryStatus, TechStack};
use crate::sprint::PauseGate;
use crate::testing::{generate_tests, run_tests, TestRunOutcome};

/// Drive one story to a terminal state.
///
/// Hard stops (architectural conflict, exhausted breakdown recovery) are
/// handled here and finalize the story as `Failed`; infrastructure errors
/// propagate to the sprint boundary.
#[instrument(skip_all, fields(story_id = %story.id))]
pub fn run_story<G: Generator>(
    generator: &G,
    sandbox: &dyn Sandbox,
    store: &Store,
    config: &EngineConfig,
    log: &EventLog,
    gate: &PauseGate,
    story: &mut Story,
    bootstrap: &BootstrapContext,
) -> Result<StoryStatus> {
    story.status = StoryStatus::InProgress;
    story.started_at_ms = Some(now_ms());
    store.update_story(story)?;
    log.append(Some(story.id.as_str()), EventKind::StoryStarted)?;

    let mut architecture = store.load_architecture()?;
    let decomposition = match decompose_story(generator, config, story, &architecture, bootstrap) {
        Ok(decomposition) => decomposition,
        Err(err) => {
            let reason = match err.downcast_ref::<ArchitecturalConflict>() {
                Some(conflict) => conflict.to_string(),
                None => format!("breakdown failed: {err:#}"),
            };
            warn!(%reason, "hard stop before generation");
            log.append(Some(story.id.as_str()), EventKind::HardStop { reason })?;
            return finalize(store, log, story, StoryStatus::Failed);
        }
    };

    architecture.apply_deltas(&decomposition.deltas);
    store.write_architecture(&architecture)?;
    log.append(
        Some(story.id.as_str()),
        EventKind::TasksPlanned {
            expected: decomposition.expected,
            planned: decomposition.tasks.len() as u32,
            gap: decomposition.gap,
        },
    )?;

    let stack = architecture.tech_stack.clone().unwrap_or_else(|| {
        warn!("no tech stack declared, assuming node");
        TechStack::Node
    });

    // The contract is computed exactly once, from the pre-story baseline
    // plus the decomposer's output, and never changes afterwards.
    let baseline_files = sandbox.list_files(&config.excluded_tree_dirs)?;
    let baseline_deps = read_manifest_deps(sandbox, &stack)?;
    let contract = ArchitectureContract::build(
        &baseline_files,
        &baseline_deps,
        &decomposition.tasks,
        Some(stack.manifest_file()),
    );

    let status = run_attempts(
        generator,
        sandbox,
        store,
        config,
        log,
        gate,
        story,
        &decomposition,
        &contract,
        &architecture.conventions,
        &stack,
    )?;
    finalize(store, log, story, status)
}

/// The bounded per-story retry loop.
#[allow(clippy::too_many_arguments)]
fn run_attempts<G: Generator>(
    generator: &G,
    sandbox: &dyn Sandbox,
    store: &Store,
    config: &EngineConfig,
    log: &EventLog,
    gate: &PauseGate,
    story: &Story,
    decomposition: &Decomposition,
    contract: &ArchitectureContract,
    conventions: &[String],
    stack: &TechStack,
) -> Result<StoryStatus> {
    let mut attempts: Vec<AttemptRecord> = Vec::new();
    let mut all_written: BTreeSet<String> = BTreeSet::new();

    for attempt in 1..=config.max_story_attempts {
        let journal = AttemptJournal::new(&store.paths().attempts_dir, &story.id, attempt);
        let carried_fixes: Vec<FixInstruction> = attempts
            .last()
            .map(|record| record.fixes.clone())
            .unwrap_or_default();
        let hint = repeated_signature(&config.failure_signatures, &attempts)
            .map(|rule| rule.hint.clone());

        let mut attempt_written: Vec<String> = Vec::new();
        let mut setup_failed = false;

        for task in &decomposition.tasks {
            // The only safe suspension point: between units of work.
            gate.wait_until_resumed();

            let scoped = fixes_for_task(task, &carried_fixes);
            let run = run_task(
                generator,
                sandbox,
                config,
                task,
                &TaskContext {
                    story,
                    contract,
                    conventions,
                    fixes: &scoped,
                    hint: hint.as_deref(),
                    attempt,
                },
                &journal,
            )?;
            log.append(
                Some(story.id.as_str()),
                EventKind::TaskFinished {
                    task_id: run.task_id.clone(),
                    outcome: run.outcome,
                    files: run.files_written.clone(),
                },
            )?;
            attempt_written.extend(run.files_written);

            if run.outcome == TaskOutcome::Aborted {
                log.append(
                    Some(story.id.as_str()),
                    EventKind::SetupCommandFailed {
                        task_id: task.id.clone(),
                    },
                )?;
                setup_failed = true;
                break;
            }
        }

        all_written.extend(attempt_written.iter().cloned());
        let written: Vec<String> = all_written.iter().cloned().collect();

        // Enforcement runs over everything the story has written so far,
        // even after an aborted attempt.
        let manifest_deps = read_manifest_deps(sandbox, stack)?;
        let violations = contract.enforce(&written, &manifest_deps);
        if !violations.is_empty() {
            warn!(
                files = violations.files.len(),
                deps = violations.deps.len(),
                "contract violated, story fails without retry"
            );
            log.append(
                Some(story.id.as_str()),
                EventKind::ContractViolation {
                    files: violations.files,
                    deps: violations.deps,
                },
            )?;
            return Ok(StoryStatus::CompletedWithFailures);
        }

        if setup_failed {
            return Ok(StoryStatus::CompletedWithFailures);
        }

        install_dependencies(sandbox, config, stack);

        let (outcome, artifact_path) = test_phase(
            generator, sandbox, config, story, stack, &attempt_written, &journal,
        )?;
        log.append(
            Some(story.id.as_str()),
            EventKind::TestsRun {
                attempt,
                passed: outcome.report.passed,
                failed: outcome.report.failed,
                parse_failed: outcome.report.parse_failed,
            },
        )?;

        let mut record = AttemptRecord {
            attempt,
            files_written: attempt_written.clone(),
            report: outcome.report,
            fixes: Vec::new(),
        };

        if outcome.report.green() {
            info!(attempt, "story green, exiting retry loop");
            return Ok(StoryStatus::Completed);
        }
        if attempt == config.max_story_attempts {
            info!(attempt, "retry budget exhausted, keeping final artifacts");
            return Ok(StoryStatus::CompletedWithFailures);
        }

        let mut files_in_play = attempt_written.clone();
        if let Some(path) = artifact_path {
            files_in_play.push(path);
        }
        record.fixes = analyze_failures(generator, config, story, &outcome.output, &files_in_play)?;
        journal.record_json("fixes.json", &record.fixes)?;

        attempts.push(record);
        let next_hint = repeated_signature(&config.failure_signatures, &attempts)
            .map(|rule| rule.hint.clone());
        log.append(
            Some(story.id.as_str()),
            EventKind::RetryScheduled {
                attempt: attempt + 1,
                fixes: attempts.last().map(|r| r.fixes.len() as u32).unwrap_or(0),
                hint: next_hint,
            },
        )?;
    }

    // Unreachable: the loop always returns from its last iteration.
    Ok(StoryStatus::CompletedWithFailures)
}

/// Generate, write, and run the test artifact. Generation failure degrades
/// to a parse-failed report so the retry loop keeps well-formed input.
fn test_phase<G: Generator>(
    generator: &G,
    sandbox: &dyn Sandbox,
    config: &EngineConfig,
    story: &Story,
    stack: &TechStack,
    files_written: &[String],
    journal: &AttemptJournal,
) -> Result<(TestRunOutcome, Option<String>)> {
    match generate_tests(generator, sandbox, config, story, stack, files_written) {
        Ok(artifact) => {
            journal.record_generated(&artifact.path, &artifact.content)?;
            sandbox.write_file(&artifact.path, &artifact.content)?;
            let outcome = run_tests(sandbox, config, stack, &artifact.path);
            journal.record_report(&outcome.output)?;
            Ok((outcome, Some(artifact.path)))
        }
        Err(err) => {
            warn!(%err, "test generation failed, degrading to parse-failed report");
            let output = format!("test generation failed: {err:#}");
            journal.record_report(&output)?;
            Ok((
                TestRunOutcome {
                    report: TestReport {
                        passed: 0,
                        failed: 0,
                        parse_failed: true,
                    },
                    output,
                },
                None,
            ))
        }
    }
}

fn install_dependencies(sandbox: &dyn Sandbox, config: &EngineConfig, stack: &TechStack) {
    let argv = stack.install_command();
    match sandbox.run_command(
        &argv,
        Duration::from_secs(config.command_timeout_secs),
        config.output_limit_bytes,
    ) {
        Ok(output) if output.success() => {}
        Ok(output) => {
            warn!(exit_code = ?output.status.code(), "install step failed, proceeding to tests");
        }
        Err(err) => {
            warn!(%err, "install step could not run, proceeding to tests");
        }
    }
}

fn read_manifest_deps(sandbox: &dyn Sandbox, stack: &TechStack) -> Result<Vec<String>> {
    let content = sandbox
        .read_file(stack.manifest_file())
        .context("read dependency manifest")?;
    Ok(content
        .map(|content| stack.parse_manifest_deps(&content))
        .unwrap_or_default())
}

/// Terminal bookkeeping: status + timestamp into the backlog store, attempt
/// journal cleared, terminal event appended.
fn finalize(
    store: &Store,
    log: &EventLog,
    story: &mut Story,
    status: StoryStatus,
) -> Result<StoryStatus> {
    story.status = status;
    story.finished_at_ms = Some(now_ms());
    store.update_story(story)?;
    clear_story_attempts(&store.paths().attempts_dir, &story.id)?;
    log.append(Some(story.id.as_str()), EventKind::StoryFinished { status })?;
    info!(?status, "story finalized");
    Ok(status)
}
