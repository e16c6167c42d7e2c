//! Per-category merge policies for generated files.
//!
//! Structured data merges associatively, parsed source merges by named
//! definition, and markup/front-end/style files are replaced wholesale (the
//! generator emits complete files for those).

use anyhow::{Context, Result};
use serde_json::Value;

/// Merge policy selected for a file path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileCategory {
    /// Recursive associative merge (`.json`).
    Structured,
    /// Named-definition merge for JS-family source.
    Source,
    /// Full replacement (markup, styles, front-end scripts, unknown).
    Replace,
}

impl FileCategory {
    pub fn from_path(path: &str) -> Self {
        let ext = path.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
        match ext.as_str() {
            "json" => Self::Structured,
            "js" | "mjs" | "cjs" | "ts" => Self::Source,
            _ => Self::Replace,
        }
    }
}

/// Merge `new_content` into `old_content` according to the path's category.
pub fn merge_file(path: &str, old_content: &str, new_content: &str) -> Result<String> {
    match FileCategory::from_path(path) {
        FileCategory::Structured => merge_structured(old_content, new_content)
            .with_context(|| format!("merge structured file {path}")),
        FileCategory::Source => Ok(merge_source(old_content, new_content)),
        FileCategory::Replace => Ok(new_content.to_string()),
    }
}

/// Recursive associative merge of two JSON documents.
///
/// Nested maps merge key-by-key, arrays concatenate with scalar
/// de-duplication, scalar leaves are overwritten by the update.
pub fn merge_structured(old_content: &str, new_content: &str) -> Result<String> {
    let mut old: Value = serde_json::from_str(old_content).context("parse existing json")?;
    let new: Value = serde_json::from_str(new_content).context("parse incoming json")?;
    merge_value(&mut old, new);
    let mut buf = serde_json::to_string_pretty(&old)?;
    buf.push('\n');
    Ok(buf)
}

fn merge_value(old: &mut Value, new: Value) {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => {
            for (key, new_child) in new_map {
                match old_map.get_mut(&key) {
                    Some(old_child) => merge_value(old_child, new_child),
                    None => {
                        old_map.insert(key, new_child);
                    }
                }
            }
        }
        (Value::Array(old_items), Value::Array(new_items)) => {
            for item in new_items {
                let duplicate_scalar = !item.is_object()
                    && !item.is_array()
                    && old_items.iter().any(|existing| *existing == item);
                if !duplicate_scalar {
                    old_items.push(item);
                }
            }
        }
        (old_slot, new_value) => *old_slot = new_value,
    }
}

/// Named-definition merge for JS-family source.
///
/// Every definition present in the old version is kept verbatim; definitions
/// in the new version whose name does not already exist are appended in their
/// original order. Unnamed statements from the new version are appended only
/// when not already present verbatim.
pub fn merge_source(old_content: &str, new_content: &str) -> String {
    let old_segments = scan_segments(old_content);
    let new_segments = scan_segments(new_content);

    let existing_names: Vec<&str> = old_segments
        .iter()
        .filter_map(|segment| segment.name.as_deref())
        .collect();

    let mut merged = old_content.trim_end().to_string();
    for segment in &new_segments {
        let keep = match &segment.name {
            Some(name) => !existing_names.contains(&name.as_str()),
            None => {
                let trimmed = segment.text.trim();
                !trimmed.is_empty()
                    && !old_segments
                        .iter()
                        .any(|existing| existing.text.trim() == trimmed)
            }
        };
        if keep {
            if !merged.is_empty() {
                merged.push_str("\n\n");
            }
            merged.push_str(segment.text.trim_end());
        }
    }
    merged.push('\n');
    merged
}

#[derive(Debug, Clone)]
struct Segment {
    name: Option<String>,
    text: String,
}

/// Split source into top-level statements, tracking strings, comments and
/// brace depth so definition bodies stay intact.
fn scan_segments(source: &str) -> Vec<Segment> {
    let bytes = source.as_bytes();
    let mut segments = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut i = 0usize;
    let mut seen_brace_at_top = false;

    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            '"' | '\'' | '`' => {
                i = skip_string(bytes, i);
                continue;
            }
            '/' if i + 1 < bytes.len() && bytes[i + 1] == b'/' => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                continue;
            }
            '/' if i + 1 < bytes.len() && bytes[i + 1] == b'*' => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i = (i + 2).min(bytes.len());
                continue;
            }
            '{' => {
                depth += 1;
                if depth == 1 {
                    seen_brace_at_top = true;
                }
            }
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 && seen_brace_at_top {
                    // Close of a top-level block body ends the statement
                    // (optionally swallowing a trailing `;`).
                    let mut end = i + 1;
                    if end < bytes.len() && bytes[end] == b';' {
                        end += 1;
                    }
                    push_segment(&mut segments, &source[start..end]);
                    start = end;
                    seen_brace_at_top = false;
                }
            }
            ';' if depth == 0 => {
                push_segment(&mut segments, &source[start..=i]);
                start = i + 1;
                seen_brace_at_top = false;
            }
            _ => {}
        }
        i += 1;
    }
    push_segment(&mut segments, &source[start..]);
    segments
}

fn skip_string(bytes: &[u8], open: usize) -> usize {
    let quote = bytes[open];
    let mut i = open + 1;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            i += 2;
            continue;
        }
        if bytes[i] == quote {
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn push_segment(segments: &mut Vec<Segment>, text: &str) {
    if text.trim().is_empty() {
        return;
    }
    segments.push(Segment {
        name: definition_name(text),
        text: text.to_string(),
    });
}

/// Extract the defined name from a top-level statement, if any.
fn definition_name(statement: &str) -> Option<String> {
    use std::sync::LazyLock;
    static DEF_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
        regex::Regex::new(
            r"(?m)^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?(?:function\s*\*?\s*|class\s+|const\s+|let\s+|var\s+)([A-Za-z_$][A-Za-z0-9_$]*)",
        )
        .unwrap()
    });
    DEF_RE
        .captures(statement)
        .map(|caps| caps[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_extension() {
        assert_eq!(FileCategory::from_path("package.json"), FileCategory::Structured);
        assert_eq!(FileCategory::from_path("src/app.js"), FileCategory::Source);
        assert_eq!(FileCategory::from_path("lib/util.mjs"), FileCategory::Source);
        assert_eq!(FileCategory::from_path("index.html"), FileCategory::Replace);
        assert_eq!(FileCategory::from_path("styles/main.css"), FileCategory::Replace);
        assert_eq!(FileCategory::from_path("README"), FileCategory::Replace);
    }

    /// Merging a structured file with an empty update returns it unchanged.
    #[test]
    fn structured_merge_with_empty_update_is_identity() {
        let old = "{\n  \"name\": \"demo\",\n  \"dependencies\": {\n    \"express\": \"^4.0.0\"\n  }\n}\n";
        let merged = merge_structured(old, "{}").expect("merge");
        let old_value: Value = serde_json::from_str(old).expect("old");
        let merged_value: Value = serde_json::from_str(&merged).expect("merged");
        assert_eq!(old_value, merged_value);
    }

    #[test]
    fn structured_merge_is_recursive_and_overwrites_scalars() {
        let old = r#"{"scripts": {"test": "node --test"}, "version": "1.0.0"}"#;
        let new = r#"{"scripts": {"start": "node app.js"}, "version": "1.1.0"}"#;
        let merged: Value =
            serde_json::from_str(&merge_structured(old, new).expect("merge")).expect("parse");

        assert_eq!(merged["scripts"]["test"], "node --test");
        assert_eq!(merged["scripts"]["start"], "node app.js");
        assert_eq!(merged["version"], "1.1.0");
    }

    #[test]
    fn structured_merge_concatenates_arrays_deduping_scalars() {
        let old = r#"{"keywords": ["api", "demo"]}"#;
        let new = r#"{"keywords": ["demo", "sqlite"]}"#;
        let merged: Value =
            serde_json::from_str(&merge_structured(old, new).expect("merge")).expect("parse");

        assert_eq!(
            merged["keywords"],
            serde_json::json!(["api", "demo", "sqlite"])
        );
    }

    /// Merging {A,B} with {B,C} yields exactly {A,B,C}, with B's original
    /// body preserved.
    #[test]
    fn source_merge_keeps_existing_and_appends_new_definitions() {
        let old = "function a() {\n  return 1;\n}\n\nfunction b() {\n  return 'original';\n}\n";
        let new = "function b() {\n  return 'rewritten';\n}\n\nfunction c() {\n  return 3;\n}\n";

        let merged = merge_source(old, new);

        assert!(merged.contains("function a()"));
        assert!(merged.contains("return 'original'"));
        assert!(!merged.contains("rewritten"));
        assert!(merged.contains("function c()"));
        assert_eq!(merged.matches("function b()").count(), 1);
    }

    #[test]
    fn source_merge_handles_const_and_class_definitions() {
        let old = "const db = require('./db');\n\nclass Store {\n  get() {}\n}\n";
        let new = "const db = require('./db');\n\nconst cache = new Map();\n\nclass Store {\n  broken() {}\n}\n";

        let merged = merge_source(old, new);

        assert_eq!(merged.matches("const db").count(), 1);
        assert!(merged.contains("const cache"));
        assert!(merged.contains("get() {}"));
        assert!(!merged.contains("broken"));
    }

    #[test]
    fn source_scanner_ignores_braces_in_strings_and_comments() {
        let old = "function a() {\n  const s = \"not a } brace\";\n  // a } comment\n  return s;\n}\n";
        let new = "function b() {\n  return 2;\n}\n";

        let merged = merge_source(old, new);

        assert!(merged.contains("function a()"));
        assert!(merged.contains("function b()"));
        assert_eq!(merged.matches("function").count(), 2);
    }

    #[test]
    fn replace_category_overwrites_entirely() {
        let merged = merge_file("index.html", "<p>old</p>", "<p>new</p>").expect("merge");
        assert_eq!(merged, "<p>new</p>");
    }
}
