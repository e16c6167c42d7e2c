//! Prompt pack builder for deterministic service input.
//!
//! Templates carry HTML-comment section markers
//! (`<!-- section:KEY required|droppable -->`). Assembly is byte-budgeted:
//! droppable sections go first, in a fixed order, and the tail is truncated
//! as a last resort so a prompt never exceeds its budget.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::Environment;
use serde::Serialize;
use tracing::debug;

const DECOMPOSER_TEMPLATE: &str = include_str!("prompts/decomposer.md");
const TASK_TEMPLATE: &str = include_str!("prompts/task.md");
const TESTS_TEMPLATE: &str = include_str!("prompts/tests.md");
const FIXES_TEMPLATE: &str = include_str!("prompts/fixes.md");

static ENGINE: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    env.add_template("decomposer", DECOMPOSER_TEMPLATE)
        .expect("decomposer template should be valid");
    env.add_template("task", TASK_TEMPLATE)
        .expect("task template should be valid");
    env.add_template("tests", TESTS_TEMPLATE)
        .expect("tests template should be valid");
    env.add_template("fixes", FIXES_TEMPLATE)
        .expect("fixes template should be valid");
    env
});

/// A parsed section from rendered template output.
#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

/// Builds prompt packs within a byte budget.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        Self { budget_bytes }
    }

    pub fn build<C: Serialize>(&self, template: &str, context: &C) -> Result<String> {
        let rendered = ENGINE
            .get_template(template)
            .with_context(|| format!("unknown template '{template}'"))?
            .render(context)
            .with_context(|| format!("render template '{template}'"))?;

        let mut sections = parse_sections(&rendered);
        apply_budget(&mut sections, self.budget_bytes);
        Ok(render_sections(&sections))
    }
}

/// Parse sections using the marker grammar.
fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    static SECTION_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
        regex::Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").unwrap()
    });

    let mut sections = Vec::new();
    let matches: Vec<_> = SECTION_RE.captures_iter(rendered).collect();

    for (i, caps) in matches.iter().enumerate() {
        let key = caps.get(1).unwrap().as_str().to_string();
        let required = caps.get(2).unwrap().as_str() == "required";
        let start = caps.get(0).unwrap().end();
        let end = matches
            .get(i + 1)
            .map(|m| m.get(0).unwrap().start())
            .unwrap_or(rendered.len());

        let content = rendered[start..end].trim().to_string();
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key,
                required,
                content,
            });
        }
    }

    sections
}

/// Drop order for droppable sections under budget pressure.
const DROP_ORDER: [&str; 6] = [
    "tree",
    "siblings",
    "previews",
    "conventions",
    "history",
    "fixes",
];

fn apply_budget(sections: &mut Vec<ParsedSection>, budget: usize) {
    let total_len =
        |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };

    if total_len(sections) <= budget {
        return;
    }

    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            break;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            debug!(
                section = key,
                bytes_dropped = sections[idx].content.len(),
                "dropped section for budget"
            );
            sections.remove(idx);
        }
    }

    // If still over budget, truncate the last section.
    if total_len(sections) > budget && !sections.is_empty() {
        let other_len: usize = sections
            .iter()
            .take(sections.len() - 1)
            .map(|s| s.content.len())
            .sum();
        let allowed = budget.saturating_sub(other_len);
        let last = sections.last_mut().unwrap();
        if last.content.len() > allowed {
            if allowed > 12 {
                last.content.truncate(allowed - 12);
                last.content.push_str("\n[truncated]");
            } else {
                last.content.truncate(allowed);
            }
        }
    }
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
