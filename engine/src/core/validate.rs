//! Pre-write validation for generated artifacts.
//!
//! Validators return a list of human-readable violations; an empty list means
//! the artifact may be written. The violation strings are fed back verbatim
//! to the generation service on repair retries, so they name the exact
//! construct at fault.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::merge::FileCategory;

/// Validate one generated file before it is written.
pub fn validate_generated(path: &str, content: &str) -> Vec<String> {
    let mut violations = Vec::new();

    if FileCategory::from_path(path) == FileCategory::Source {
        violations.extend(check_source_parseable(path, content));
        violations.extend(check_embedded_queries(path, content));
        if is_test_artifact(path) {
            violations.extend(check_test_isolation(path, content));
        }
    }

    violations
}

/// True for paths that hold test code (the isolation checks only apply there).
pub fn is_test_artifact(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.contains(".test.")
        || lower.contains(".spec.")
        || lower.contains("/test/")
        || lower.contains("/tests/")
        || lower.starts_with("test/")
        || lower.starts_with("tests/")
}

/// Quote- and comment-aware bracket balance check.
///
/// Not a full parse, but it rejects the dominant malformed-output mode:
/// truncated or doubled bodies with unbalanced delimiters.
fn check_source_parseable(path: &str, content: &str) -> Vec<String> {
    let bytes = content.as_bytes();
    let mut stack: Vec<char> = Vec::new();
    let mut i = 0usize;

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
            '(' | '[' | '{' => stack.push(c),
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                if stack.pop() != Some(expected) {
                    return vec![format!("{path}: unbalanced '{c}'")];
                }
            }
            _ => {}
        }
        i += 1;
    }

    if let Some(open) = stack.last() {
        return vec![format!("{path}: unclosed '{open}'")];
    }
    Vec::new()
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

static SQL_RESERVED: &[&str] = &[
    "order", "group", "key", "index", "default", "check", "primary", "references", "table",
    "where", "select", "from",
];

static CREATE_TABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)create\s+table\s+(?:if\s+not\s+exists\s+)?\w+\s*\(([^;]*?)\)\s*[;"'`]"#)
        .unwrap()
});
static TYPE_KEYWORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:text|integer|real|blob|varchar|boolean|numeric|datetime)\b").unwrap()
});
static DANGLING_CONDITION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bwhere\s+(?:and|or)\b|\b(?:and|or)\s*["'`;]|\bwhere\s*["'`;]"#).unwrap()
});

/// Pattern checks for SQL embedded in source strings.
///
/// Three anti-patterns: reserved words used as bare column identifiers,
/// likely missing separators between column definitions, and conditional
/// clauses with a dangling or leading AND/OR.
fn check_embedded_queries(path: &str, content: &str) -> Vec<String> {
    let mut violations = Vec::new();

    for caps in CREATE_TABLE_RE.captures_iter(content) {
        let column_list = &caps[1];
        for column in column_list.split(',') {
            let Some(name) = column.split_whitespace().next() else {
                continue;
            };
            let bare = name.trim();
            if SQL_RESERVED.contains(&bare.to_ascii_lowercase().as_str()) {
                violations.push(format!(
                    "{path}: reserved word '{bare}' used as a bare column identifier"
                ));
            }
            // Two or more type keywords inside one comma-separated column
            // definition means a separator went missing.
            if TYPE_KEYWORD_RE.find_iter(column).count() >= 2 {
                violations.push(format!(
                    "{path}: likely missing separator in column definition '{}'",
                    column.split_whitespace().collect::<Vec<_>>().join(" ")
                ));
            }
        }
    }

    if DANGLING_CONDITION_RE.is_match(content) {
        violations.push(format!(
            "{path}: malformed conditional clause (dangling or leading AND/OR after WHERE)"
        ));
    }

    violations
}

static HANDLE_OPEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^(?:const|let|var)\s+(\w+)\s*=\s*(?:new\s+(?:sqlite3\.)?Database|\w+\.createConnection|net\.connect|mysql\.createPool)\s*\(",
    )
    .unwrap()
});
static TEST_SCOPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(?:test|it|describe)\s*\(").unwrap());

/// Detect shared resource handles opened at module scope of a test file and
/// never closed, the anti-pattern that makes test runs order-dependent.
fn check_test_isolation(path: &str, content: &str) -> Vec<String> {
    let first_test_at = TEST_SCOPE_RE
        .find(content)
        .map(|m| m.start())
        .unwrap_or(content.len());

    let mut violations = Vec::new();
    for caps in HANDLE_OPEN_RE.captures_iter(content) {
        let open_at = caps.get(0).map(|m| m.start()).unwrap_or(0);
        let handle = &caps[1];
        if open_at < first_test_at && !content.contains(&format!("{handle}.close(")) {
            violations.push(format!(
                "{path}: shared handle '{handle}' opened outside any test scope and never closed"
            ));
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_source_passes() {
        let content = "function a() {\n  return [1, 2].map((x) => x);\n}\n";
        assert!(validate_generated("src/a.js", content).is_empty());
    }

    #[test]
    fn unclosed_brace_is_reported() {
        let content = "function a() {\n  return 1;\n";
        let violations = validate_generated("src/a.js", content);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("unclosed '{'"));
    }

    #[test]
    fn braces_inside_strings_do_not_trip_the_check() {
        let content = "const s = \"} } }\";\nconst t = `{ {`;\n";
        assert!(validate_generated("src/a.js", content).is_empty());
    }

    #[test]
    fn reserved_word_as_bare_column_is_reported() {
        let content = r#"db.run("CREATE TABLE items (id INTEGER, order TEXT);");"#;
        let violations = validate_generated("src/db.js", content);
        assert!(violations.iter().any(|v| v.contains("reserved word 'order'")));
    }

    #[test]
    fn missing_column_separator_is_reported() {
        let content = r#"db.run("CREATE TABLE items (id INTEGER name TEXT, price REAL);");"#;
        let violations = validate_generated("src/db.js", content);
        assert!(violations.iter().any(|v| v.contains("missing separator")));
    }

    #[test]
    fn dangling_where_condition_is_reported() {
        let content = r#"db.all("SELECT * FROM items WHERE AND price > 0");"#;
        let violations = validate_generated("src/db.js", content);
        assert!(violations
            .iter()
            .any(|v| v.contains("malformed conditional clause")));
    }

    #[test]
    fn well_formed_queries_pass() {
        let content = r#"db.run("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT);");
db.all("SELECT * FROM items WHERE price > 0 AND name = ?");"#;
        assert!(validate_generated("src/db.js", content).is_empty());
    }

    #[test]
    fn module_scope_handle_without_close_is_reported() {
        let content = "const db = new sqlite3.Database('./app.db');\n\ntest('lists items', () => {\n  db.all('SELECT 1');\n});\n";
        let violations = validate_generated("tests/items.test.js", content);
        assert!(violations.iter().any(|v| v.contains("shared handle 'db'")));
    }

    #[test]
    fn closed_handle_passes_isolation_check() {
        let content = "const db = new sqlite3.Database('./app.db');\n\ntest('lists items', () => {\n  db.all('SELECT 1');\n});\n\nafter(() => db.close());\n";
        assert!(validate_generated("tests/items.test.js", content).is_empty());
    }

    #[test]
    fn isolation_checks_only_apply_to_test_files() {
        let content = "const db = new sqlite3.Database('./app.db');\nmodule.exports = db;\n";
        assert!(validate_generated("src/db.js", content).is_empty());
    }

    #[test]
    fn non_source_files_are_not_parsed() {
        assert!(validate_generated("index.html", "<div>{{").is_empty());
    }
}
