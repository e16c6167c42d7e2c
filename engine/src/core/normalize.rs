//! Normalization of polymorphic generation-service responses.
//!
//! The service has emitted at least three shapes for the same payload over
//! time. Everything is folded into one canonical `Vec<GeneratedFile>` at the
//! boundary; nothing deeper in the pipeline branches on shape.

use anyhow::{anyhow, Result};
use serde_json::Value;

use crate::core::types::GeneratedFile;

/// Normalize a response object into a canonical file list.
///
/// Accepted shapes:
/// 1. `{"files": [{"path": "...", "content": "..."}, …]}`
/// 2. `{"files": {"<path>": "<content>", …}}`
/// 3. a bare `{"path": "...", "content": "..."}` object
///
/// Entries are neither lost nor duplicated: a later entry for an
/// already-seen path replaces the earlier one in place.
pub fn normalize_files(response: &Value) -> Result<Vec<GeneratedFile>> {
    let raw = match response.get("files") {
        Some(Value::Array(items)) => items
            .iter()
            .map(entry_from_object)
            .collect::<Result<Vec<_>>>()?,
        Some(Value::Object(map)) => map
            .iter()
            .map(|(path, content)| {
                let content = content
                    .as_str()
                    .ok_or_else(|| anyhow!("content for '{path}' is not a string"))?;
                Ok(GeneratedFile {
                    path: path.clone(),
                    content: content.to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?,
        Some(other) => {
            return Err(anyhow!(
                "unsupported 'files' shape: {}",
                shape_name(other)
            ))
        }
        None => vec![entry_from_object(response)?],
    };

    let mut files: Vec<GeneratedFile> = Vec::with_capacity(raw.len());
    for entry in raw {
        if entry.path.trim().is_empty() {
            return Err(anyhow!("generated file with empty path"));
        }
        match files.iter_mut().find(|f| f.path == entry.path) {
            Some(existing) => existing.content = entry.content,
            None => files.push(entry),
        }
    }
    Ok(files)
}

fn entry_from_object(value: &Value) -> Result<GeneratedFile> {
    let object = value
        .as_object()
        .ok_or_else(|| anyhow!("file entry is not an object"))?;
    let path = object
        .get("path")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("file entry missing 'path'"))?;
    let content = object
        .get("content")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("file entry '{path}' missing 'content'"))?;
    Ok(GeneratedFile {
        path: path.to_string(),
        content: content.to_string(),
    })
}

fn shape_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
