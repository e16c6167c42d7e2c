//! Recovery parser for structured objects embedded in free text.
//!
//! The generation service replies with prose that is expected to contain one
//! JSON object. Extraction is strict parse first, then a quote-aware scan for
//! balanced candidates keeping the largest valid one, then a short fixed list
//! of textual repairs. Repair is bounded and explicit; anything beyond this
//! list is the caller's cue to request a corrected response.

use anyhow::{anyhow, Result};
use serde_json::Value;
use tracing::debug;

/// Extract the largest well-formed JSON object from `text`.
pub fn extract_object(text: &str) -> Result<Value> {
    // Strict parse of the whole payload first.
    if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
        if value.is_object() {
            return Ok(value);
        }
    }

    if let Some(value) = largest_balanced_candidate(text) {
        return Ok(value);
    }

    for repaired in textual_repairs(text) {
        if let Some(value) = largest_balanced_candidate(&repaired) {
            debug!("object recovered after textual repair");
            return Ok(value);
        }
    }

    Err(anyhow!("no well-formed object found in response"))
}

/// Scan for balanced `{…}` spans honoring string quoting, parse each, and
/// keep the largest candidate that parses as an object.
fn largest_balanced_candidate(text: &str) -> Option<Value> {
    let bytes = text.as_bytes();
    let mut best: Option<(usize, Value)> = None;
    let mut i = 0usize;

    while i < bytes.len() {
        if bytes[i] != b'{' {
            i += 1;
            continue;
        }
        if let Some(end) = balanced_span_end(bytes, i) {
            let candidate = &text[i..end];
            if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                if value.is_object() {
                    let len = candidate.len();
                    if best.as_ref().map(|(best_len, _)| len > *best_len).unwrap_or(true) {
                        best = Some((len, value));
                    }
                }
            }
            // Overlapping candidates: continue scanning inside the span too,
            // a smaller inner object may be valid when the outer one is not.
            i += 1;
        } else {
            i += 1;
        }
    }

    best.map(|(_, value)| value)
}

/// End (exclusive) of the balanced span opening at `start`, or `None`.
fn balanced_span_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut i = start;

    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            match b {
                b'\\' => i += 1,
                b'"' => in_string = false,
                _ => {}
            }
        } else {
            match b {
                b'"' => in_string = true,
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(i + 1);
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    None
}

/// The fixed repair list, applied one at a time and cumulatively.
///
/// Order matters: fence stripping first exposes the object for the later
/// character-level repairs.
fn textual_repairs(text: &str) -> Vec<String> {
    let mut variants = Vec::new();

    let unfenced = strip_code_fences(text);
    variants.push(unfenced.clone());

    let unescaped = unfenced.replace("\\'", "'");
    variants.push(unescaped.clone());

    variants.push(strip_trailing_commas(&unescaped));

    variants
}

fn strip_code_fences(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Remove commas that directly precede a closing brace or bracket, outside
/// of strings.
fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut i = 0usize;

    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            if c == '\\' && i + 1 < chars.len() {
                out.push(chars[i + 1]);
                i += 2;
                continue;
            }
            if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }
        if c == '"' {
            in_string = true;
            out.push('"');
            i += 1;
            continue;
        }
        if c == ',' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                i += 1;
                continue;
            }
        }
        out.push(c);
        i += 1;
    }
    out
}
