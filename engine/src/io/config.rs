//! Engine configuration stored under `.sprint/config.toml`.

use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::signature::{default_rules, SignatureRule};

/// Engine configuration (TOML).
///
/// This file is intended to be edited by humans and must remain stable and
/// automatable. Missing fields default to sensible values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Command line that reaches the generation service; the request JSON
    /// goes to its stdin, the free-text reply comes from its stdout.
    pub generator_command: Vec<String>,

    /// Full generate→enforce→test passes allowed per story.
    pub max_story_attempts: u32,

    /// In-place repair retries per task for validation failures.
    pub task_repair_retries: u32,

    /// Recovery calls allowed when a breakdown returns fewer tasks than
    /// declared.
    pub breakdown_recovery_calls: u32,

    /// Wall-clock budget for one generation-service call, in seconds.
    pub generation_timeout_secs: u64,

    /// Wall-clock budget for setup/install commands, in seconds.
    pub command_timeout_secs: u64,

    /// Wall-clock budget for one test run, in seconds.
    pub test_timeout_secs: u64,

    /// Truncate captured process output beyond this many bytes.
    pub output_limit_bytes: usize,

    /// Bytes of existing-file preview handed to generation for files the
    /// task does not modify.
    pub preview_limit_bytes: usize,

    /// Maximum bytes for an assembled prompt before droppable sections go.
    pub prompt_budget_bytes: usize,

    /// Directories excluded from snapshots (regenerable caches, build
    /// artifacts, engine state).
    pub excluded_tree_dirs: Vec<String>,

    /// Repeated-failure signature catalogue (see `core::signature`).
    pub failure_signatures: Vec<SignatureRule>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            generator_command: vec!["codex".to_string(), "exec".to_string()],
            max_story_attempts: 3,
            task_repair_retries: 2,
            breakdown_recovery_calls: 1,
            generation_timeout_secs: 10 * 60,
            command_timeout_secs: 5 * 60,
            test_timeout_secs: 5 * 60,
            output_limit_bytes: 100_000,
            preview_limit_bytes: 2_000,
            prompt_budget_bytes: 40_000,
            excluded_tree_dirs: vec![
                ".git".to_string(),
                ".sprint".to_string(),
                "node_modules".to_string(),
                "__pycache__".to_string(),
                "dist".to_string(),
                "target".to_string(),
            ],
            failure_signatures: default_rules(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.generator_command.is_empty() || self.generator_command[0].trim().is_empty() {
            return Err(anyhow!("generator_command must be a non-empty array"));
        }
        if self.max_story_attempts == 0 {
            return Err(anyhow!("max_story_attempts must be > 0"));
        }
        if self.generation_timeout_secs == 0
            || self.command_timeout_secs == 0
            || self.test_timeout_secs == 0
        {
            return Err(anyhow!("timeouts must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.prompt_budget_bytes == 0 {
            return Err(anyhow!("prompt_budget_bytes must be > 0"));
        }
        for rule in &self.failure_signatures {
            regex::Regex::new(&rule.pattern)
                .with_context(|| format!("invalid failure signature pattern '{}'", rule.id))?;
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, &buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
