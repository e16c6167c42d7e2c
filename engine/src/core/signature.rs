//! Repeated-failure signature catalogue.
//!
//! Signatures are configuration data: each rule pairs a pattern with the
//! targeted hint to inject when the same failure shape recurs across
//! attempts. Detection is a generic scan over attempt history; no rule gets
//! its own control flow.

use serde::{Deserialize, Serialize};

use crate::core::types::AttemptRecord;

/// One catalogued failure shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureRule {
    pub id: String,
    /// Regex matched against the fix instructions and expected/actual text
    /// of an attempt.
    pub pattern: String,
    /// Hint injected into the next generation context instead of generic
    /// retry text.
    pub hint: String,
}

/// Built-in rules used when the config file does not override them.
pub fn default_rules() -> Vec<SignatureRule> {
    vec![
        SignatureRule {
            id: "module-not-found".to_string(),
            pattern: r"(?i)cannot find module|module not found".to_string(),
            hint: "A required module is missing on every attempt: declare the dependency in the \
                   manifest task instead of re-editing the importing file."
                .to_string(),
        },
        SignatureRule {
            id: "port-in-use".to_string(),
            pattern: r"(?i)EADDRINUSE|address already in use".to_string(),
            hint: "The server port stays occupied between tests: close the server handle in the \
                   test teardown rather than changing ports."
                .to_string(),
        },
        SignatureRule {
            id: "schema-mismatch".to_string(),
            pattern: r"(?i)no such (?:table|column)|undefined column".to_string(),
            hint: "The schema and the queries disagree on every attempt: regenerate the schema \
                   file and the query file together in one task."
                .to_string(),
        },
        SignatureRule {
            id: "async-not-awaited".to_string(),
            pattern: r"(?i)promise.*pending|unhandled (?:promise )?rejection".to_string(),
            hint: "An async call escapes its test: await every database and HTTP call and return \
                   the promise from the handler."
                .to_string(),
        },
    ]
}

/// Find a rule whose pattern matched the two most recent attempts.
///
/// One occurrence is ordinary failure; the same signature twice in a row is
/// the loop the catalogue exists to break.
pub fn repeated_signature<'a>(
    rules: &'a [SignatureRule],
    attempts: &[AttemptRecord],
) -> Option<&'a SignatureRule> {
    if attempts.len() < 2 {
        return None;
    }
    let recent = &attempts[attempts.len() - 2..];

    rules.iter().find(|rule| {
        let Ok(re) = regex::Regex::new(&rule.pattern) else {
            return false;
        };
        recent
            .iter()
            .all(|attempt| attempt_text(attempt).lines().any(|line| re.is_match(line)))
    })
}

fn attempt_text(attempt: &AttemptRecord) -> String {
    let mut buf = String::new();
    for fix in &attempt.fixes {
        buf.push_str(&fix.instruction);
        buf.push('\n');
        buf.push_str(&fix.expected);
        buf.push('\n');
        buf.push_str(&fix.actual);
        buf.push('\n');
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{FixInstruction, TestReport};

    fn attempt(n: u32, instruction: &str) -> AttemptRecord {
        AttemptRecord {
            attempt: n,
            files_written: Vec::new(),
            report: TestReport {
                passed: 0,
                failed: 1,
                parse_failed: false,
            },
            fixes: vec![FixInstruction {
                test: "t".to_string(),
                file: "a.js".to_string(),
                section: None,
                expected: "ok".to_string(),
                actual: instruction.to_string(),
                instruction: instruction.to_string(),
            }],
        }
    }

    #[test]
    fn single_occurrence_is_not_repeated() {
        let rules = default_rules();
        let attempts = vec![attempt(1, "Error: Cannot find module 'express'")];
        assert!(repeated_signature(&rules, &attempts).is_none());
    }

    #[test]
    fn same_signature_in_two_consecutive_attempts_matches() {
        let rules = default_rules();
        let attempts = vec![
            attempt(1, "Error: Cannot find module 'express'"),
            attempt(2, "Error: Cannot find module 'express'"),
        ];
        let rule = repeated_signature(&rules, &attempts).expect("rule");
        assert_eq!(rule.id, "module-not-found");
    }

    #[test]
    fn different_failures_across_attempts_do_not_match() {
        let rules = default_rules();
        let attempts = vec![
            attempt(1, "Error: Cannot find module 'express'"),
            attempt(2, "listen EADDRINUSE: address already in use"),
        ];
        assert!(repeated_signature(&rules, &attempts).is_none());
    }

    #[test]
    fn invalid_pattern_is_skipped_not_fatal() {
        let rules = vec![SignatureRule {
            id: "broken".to_string(),
            pattern: "(unclosed".to_string(),
            hint: "n/a".to_string(),
        }];
        let attempts = vec![attempt(1, "x"), attempt(2, "x")];
        assert!(repeated_signature(&rules, &attempts).is_none());
    }
}
