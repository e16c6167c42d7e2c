//! Test artifact generation and execution.
//!
//! The generator mirrors per-task generation but emits exactly one test
//! artifact plus its declared cases. The runner picks its execution tool
//! from the declared tech stack (never from the file extension) and
//! degrades every tooling failure (timeout, missing executable,
//! unparseable output) to a zero-result report so retry and analysis always
//! see well-formed input.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use crate::core::report::parse_report;
use crate::core::types::TestReport;
use crate::core::validate::validate_generated;
use crate::io::config::EngineConfig;
use crate::io::generator::{request_object, GenerationRequest, Generator, Message, MessageRole};
use crate::io::prompt::PromptBuilder;
use crate::io::sandbox::Sandbox;
use crate::model::{Story, TechStack};

/// One generated test artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestArtifact {
    pub path: String,
    pub content: String,
    pub cases: Vec<String>,
}

/// Outcome of one test run: the parsed report plus the raw output that
/// failure analysis will read.
#[derive(Debug, Clone)]
pub struct TestRunOutcome {
    pub report: TestReport,
    pub output: String,
}

/// Generate the story's test artifact, repairing validation failures in
/// place like per-task generation does.
#[instrument(skip_all, fields(story_id = %story.id))]
pub fn generate_tests<G: Generator>(
    generator: &G,
    sandbox: &dyn Sandbox,
    config: &EngineConfig,
    story: &Story,
    stack: &TechStack,
    files_written: &[String],
) -> Result<TestArtifact> {
    let builder = PromptBuilder::new(config.prompt_budget_bytes);
    let mut files = Vec::new();
    for path in files_written {
        if let Some(content) = sandbox.read_file(path)? {
            files.push(json!({"path": path, "content": content}));
        }
    }
    let prompt_context = json!({
        "story": {
            "id": story.id,
            "title": story.title,
            "requirement": story.requirement,
            "acceptance": story.acceptance,
        },
        "tech_stack": stack.as_str(),
        "files": files,
    });
    let prompt = builder.build("tests", &prompt_context)?;
    let request = GenerationRequest::new("test-author", Value::String(prompt));

    let mut response = request_object(generator, &request)?;
    let mut repairs_left = config.task_repair_retries;

    loop {
        let artifact = parse_artifact(&response)?;
        let violations = validate_generated(&artifact.path, &artifact.content);
        if violations.is_empty() {
            info!(path = %artifact.path, cases = artifact.cases.len(), "test artifact generated");
            return Ok(artifact);
        }
        if repairs_left == 0 {
            return Err(anyhow!(
                "test artifact still invalid after repairs: {}",
                violations.join("; ")
            ));
        }
        repairs_left -= 1;
        warn!(?violations, repairs_left, "test artifact rejected, requesting repair");
        let mut repair = request.clone();
        repair.history.push(Message {
            role: MessageRole::Assistant,
            content: response.to_string(),
        });
        repair.history.push(Message {
            role: MessageRole::User,
            content: format!(
                "The test artifact was rejected. Fix exactly these violations and resend the \
                 full object:\n- {}",
                violations.join("\n- ")
            ),
        });
        response = request_object(generator, &repair)?;
    }
}

fn parse_artifact(response: &Value) -> Result<TestArtifact> {
    let path = response
        .get("path")
        .and_then(Value::as_str)
        .context("test response missing 'path'")?;
    let content = response
        .get("content")
        .and_then(Value::as_str)
        .context("test response missing 'content'")?;
    let cases = response
        .get("cases")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Ok(TestArtifact {
        path: path.to_string(),
        content: content.to_string(),
        cases,
    })
}

/// Run the artifact with the stack's test tool.
///
/// Never returns an error for tooling failures: a missing executable or a
/// timeout degrades to a parse-failed 0/0 report with the failure text as
/// output.
#[instrument(skip_all, fields(artifact = artifact_path))]
pub fn run_tests(
    sandbox: &dyn Sandbox,
    config: &EngineConfig,
    stack: &TechStack,
    artifact_path: &str,
) -> TestRunOutcome {
    let argv = stack.test_command(artifact_path);
    let output = match sandbox.run_command(
        &argv,
        Duration::from_secs(config.test_timeout_secs),
        config.output_limit_bytes,
    ) {
        Ok(output) => output,
        Err(err) => {
            warn!(%err, "test tool could not run");
            return TestRunOutcome {
                report: TestReport {
                    passed: 0,
                    failed: 0,
                    parse_failed: true,
                },
                output: format!("test tool could not run: {err:#}"),
            };
        }
    };

    let text = output.combined_text();
    if output.timed_out {
        warn!("test run timed out");
        return TestRunOutcome {
            report: TestReport {
                passed: 0,
                failed: 0,
                parse_failed: true,
            },
            output: text,
        };
    }

    let report = parse_report(&text);
    info!(
        passed = report.passed,
        failed = report.failed,
        parse_failed = report.parse_failed,
        "test run parsed"
    );
    TestRunOutcome {
        report,
        output: text,
    }
}
