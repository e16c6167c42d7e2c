//! Pass/fail extraction from test runner output.
//!
//! Three tiers, tried in order: explicit summary counters, marker-occurrence
//! counting, keyword counting. Output that matches none of them degrades to a
//! parse-failed 0/0 report, never an error, so retry and analysis always
//! receive well-formed input.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::TestReport;

static SUMMARY_PASS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#\s*pass(?:ed|ing)?\s+(\d+)").unwrap());
static SUMMARY_FAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#\s*fail(?:ed|ing)?\s+(\d+)").unwrap());
static MARKER_OK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:ok\s+\d+\b|✓|√)").unwrap());
static MARKER_NOT_OK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:not ok\s+\d+\b|✗|✖|×)").unwrap());
static KEYWORD_PASS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bpassed\b").unwrap());
static KEYWORD_FAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:failed|error)\b").unwrap());

/// Parse combined runner output into a report.
pub fn parse_report(output: &str) -> TestReport {
    if let Some(report) = parse_summary_counters(output) {
        return report;
    }
    if let Some(report) = parse_markers(output) {
        return report;
    }
    if let Some(report) = parse_keywords(output) {
        return report;
    }
    TestReport {
        passed: 0,
        failed: 0,
        parse_failed: true,
    }
}

/// Tier 1: explicit `# pass N` / `# fail N` summary counters.
fn parse_summary_counters(output: &str) -> Option<TestReport> {
    let passed = SUMMARY_PASS_RE
        .captures(output)
        .and_then(|caps| caps[1].parse::<u32>().ok());
    let failed = SUMMARY_FAIL_RE
        .captures(output)
        .and_then(|caps| caps[1].parse::<u32>().ok());

    match (passed, failed) {
        (None, None) => None,
        (passed, failed) => Some(TestReport {
            passed: passed.unwrap_or(0),
            failed: failed.unwrap_or(0),
            parse_failed: false,
        }),
    }
}

/// Tier 2: count per-case result markers (`ok N`/`not ok N`, check marks).
fn parse_markers(output: &str) -> Option<TestReport> {
    let passed = MARKER_OK_RE.find_iter(output).count() as u32;
    let failed = MARKER_NOT_OK_RE.find_iter(output).count() as u32;
    if passed == 0 && failed == 0 {
        return None;
    }
    Some(TestReport {
        passed,
        failed,
        parse_failed: false,
    })
}

/// Tier 3: bare keyword occurrences, the loosest signal.
fn parse_keywords(output: &str) -> Option<TestReport> {
    let passed = KEYWORD_PASS_RE.find_iter(output).count() as u32;
    let failed = KEYWORD_FAIL_RE.find_iter(output).count() as u32;
    if passed == 0 && failed == 0 {
        return None;
    }
    Some(TestReport {
        passed,
        failed,
        parse_failed: false,
    })
}
