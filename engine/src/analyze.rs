//! Failure analysis: failing test output in, scoped fix list out.
//!
//! Any failing or unparseable test result is turned into a structured
//! per-failure fix list. Analysis is best-effort: a malformed fix list gets
//! one corrected request; if that also fails, the retry proceeds without
//! fixes rather than aborting the story.

use anyhow::Result;
use jsonschema::Draft;
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use crate::core::types::FixInstruction;
use crate::io::config::EngineConfig;
use crate::io::generator::{request_object, GenerationRequest, Generator, Message, MessageRole};
use crate::io::prompt::PromptBuilder;
use crate::model::Story;

const FIXES_SCHEMA: &str = include_str!("../schemas/fixes.schema.json");

/// Request a structured fix list for a failing test run.
#[instrument(skip_all, fields(story_id = %story.id))]
pub fn analyze_failures<G: Generator>(
    generator: &G,
    config: &EngineConfig,
    story: &Story,
    test_output: &str,
    files_in_play: &[String],
) -> Result<Vec<FixInstruction>> {
    let builder = PromptBuilder::new(config.prompt_budget_bytes);
    let prompt_context = json!({
        "story": {"id": story.id, "title": story.title},
        "output": test_output,
        "files": files_in_play,
    });
    let prompt = builder.build("fixes", &prompt_context)?;
    let request = GenerationRequest::new("failure-analyst", Value::String(prompt));

    let value = match request_object(generator, &request) {
        Ok(value) => value,
        Err(err) => {
            warn!(%err, "failure analysis call failed, retrying without fixes");
            return Ok(Vec::new());
        }
    };

    let violations = schema_violations(&value);
    if violations.is_empty() {
        return Ok(parse_fixes(&value));
    }

    warn!(?violations, "fix list malformed, requesting corrected response");
    let mut repair = request.clone();
    repair.history.push(Message {
        role: MessageRole::Assistant,
        content: value.to_string(),
    });
    repair.history.push(Message {
        role: MessageRole::User,
        content: format!(
            "Your fix list is structurally invalid. Fix only these violations and resend the \
             full object:\n- {}",
            violations.join("\n- ")
        ),
    });
    match request_object(generator, &repair) {
        Ok(corrected) if schema_violations(&corrected).is_empty() => Ok(parse_fixes(&corrected)),
        Ok(_) | Err(_) => {
            warn!("fix list still malformed, retrying without fixes");
            Ok(Vec::new())
        }
    }
}

fn schema_violations(value: &Value) -> Vec<String> {
    let schema: Value =
        serde_json::from_str(FIXES_SCHEMA).expect("fixes schema should be valid json");
    let compiled = jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .expect("fixes schema should compile");
    compiled.iter_errors(value).map(|err| err.to_string()).collect()
}

fn parse_fixes(value: &Value) -> Vec<FixInstruction> {
    let fixes: Vec<FixInstruction> = value
        .get("fixes")
        .cloned()
        .and_then(|fixes| serde_json::from_value(fixes).ok())
        .unwrap_or_default();
    info!(fixes = fixes.len(), "failure analysis produced fixes");
    fixes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedGenerator;

    fn story() -> Story {
        Story::new("s-1", "Item listing", "Users can list items")
    }

    #[test]
    fn well_formed_fix_list_is_parsed() {
        let generator = ScriptedGenerator::new(vec![json!({
            "fixes": [{
                "test": "lists items",
                "file": "src/app.js",
                "section": "listItems",
                "expected": "200",
                "actual": "500",
                "instruction": "return rows instead of throwing"
            }]
        })
        .to_string()]);

        let fixes = analyze_failures(
            &generator,
            &EngineConfig::default(),
            &story(),
            "not ok 1 - lists items\n",
            &["src/app.js".to_string()],
        )
        .expect("analyze");

        assert_eq!(fixes.len(), 1);
        assert_eq!(fixes[0].file, "src/app.js");
        assert_eq!(fixes[0].section.as_deref(), Some("listItems"));
    }

    /// A malformed list gets one corrected request.
    #[test]
    fn malformed_fix_list_gets_one_correction() {
        let generator = ScriptedGenerator::new(vec![
            json!({"fixes": [{"file": "src/app.js"}]}).to_string(),
            json!({
                "fixes": [{
                    "test": "t", "file": "src/app.js",
                    "expected": "a", "actual": "b", "instruction": "c"
                }]
            })
            .to_string(),
        ]);

        let fixes = analyze_failures(
            &generator,
            &EngineConfig::default(),
            &story(),
            "output",
            &[],
        )
        .expect("analyze");

        assert_eq!(fixes.len(), 1);
        assert_eq!(generator.calls(), 2);
    }

    /// Analysis never hard-fails the retry loop.
    #[test]
    fn unrecoverable_analysis_yields_no_fixes() {
        let generator = ScriptedGenerator::new(vec![
            "not json at all".to_string(),
            "still not json".to_string(),
        ]);

        let fixes = analyze_failures(
            &generator,
            &EngineConfig::default(),
            &story(),
            "output",
            &[],
        )
        .expect("analyze");

        assert!(fixes.is_empty());
    }
}
