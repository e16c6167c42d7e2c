//! Per-attempt artifact journal under `.sprint/attempts/`.
//!
//! Every attempt of a story gets its own directory holding pre-merge backups
//! of files about to be modified, the generated artifacts, and the raw test
//! output. Product artifacts, unaffected by `RUST_LOG`; cleared when the
//! story reaches a terminal state.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

/// Paths for one story attempt.
#[derive(Debug, Clone)]
pub struct AttemptPaths {
    pub dir: PathBuf,
    pub backups_dir: PathBuf,
    pub generated_dir: PathBuf,
    pub report_path: PathBuf,
}

impl AttemptPaths {
    pub fn new(attempts_dir: &Path, story_id: &str, attempt: u32) -> Self {
        let dir = attempts_dir.join(story_id).join(attempt.to_string());
        Self {
            backups_dir: dir.join("backups"),
            generated_dir: dir.join("generated"),
            report_path: dir.join("report.txt"),
            dir,
        }
    }
}

/// Journal writer for one story attempt.
pub struct AttemptJournal {
    paths: AttemptPaths,
}

impl AttemptJournal {
    pub fn new(attempts_dir: &Path, story_id: &str, attempt: u32) -> Self {
        Self {
            paths: AttemptPaths::new(attempts_dir, story_id, attempt),
        }
    }

    /// Record a file's pre-merge content before it is modified.
    pub fn backup_file(&self, path: &str, content: &str) -> Result<()> {
        write_under(&self.paths.backups_dir, path, content)
    }

    /// Record a generated artifact as it came back from the service.
    pub fn record_generated(&self, path: &str, content: &str) -> Result<()> {
        write_under(&self.paths.generated_dir, path, content)
    }

    /// Record raw test runner output for this attempt.
    pub fn record_report(&self, output: &str) -> Result<()> {
        if let Some(parent) = self.paths.report_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&self.paths.report_path, output)
            .with_context(|| format!("write {}", self.paths.report_path.display()))
    }

    /// Record a structured document (fixes, task outcomes) as pretty JSON.
    pub fn record_json<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let mut buf = serde_json::to_string_pretty(value).context("serialize journal json")?;
        buf.push('\n');
        write_under(&self.paths.dir, name, &buf)
    }
}

/// Remove all attempt directories for a story. Called on terminal state.
pub fn clear_story_attempts(attempts_dir: &Path, story_id: &str) -> Result<()> {
    let dir = attempts_dir.join(story_id);
    if dir.exists() {
        fs::remove_dir_all(&dir).with_context(|| format!("remove {}", dir.display()))?;
    }
    Ok(())
}

fn write_under(base: &Path, relative: &str, content: &str) -> Result<()> {
    let target = base.join(relative);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(&target, content).with_context(|| format!("write {}", target.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn journal_paths_are_stable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = AttemptPaths::new(temp.path(), "s-1", 2);
        assert!(paths.dir.ends_with(Path::new("s-1/2")));
        assert!(paths.backups_dir.ends_with("backups"));
        assert!(paths.report_path.ends_with("report.txt"));
    }

    #[test]
    fn backup_and_generated_files_land_in_their_dirs() {
        let temp = tempfile::tempdir().expect("tempdir");
        let journal = AttemptJournal::new(temp.path(), "s-1", 1);

        journal.backup_file("src/app.js", "old").expect("backup");
        journal
            .record_generated("src/app.js", "new")
            .expect("generated");
        journal.record_report("# pass 1\n").expect("report");

        let base = temp.path().join("s-1/1");
        assert_eq!(
            fs::read_to_string(base.join("backups/src/app.js")).expect("read"),
            "old"
        );
        assert_eq!(
            fs::read_to_string(base.join("generated/src/app.js")).expect("read"),
            "new"
        );
        assert!(base.join("report.txt").exists());
    }

    #[test]
    fn clearing_removes_all_attempts_for_the_story() {
        let temp = tempfile::tempdir().expect("tempdir");
        AttemptJournal::new(temp.path(), "s-1", 1)
            .backup_file("a.js", "x")
            .expect("backup");
        AttemptJournal::new(temp.path(), "s-1", 2)
            .backup_file("a.js", "y")
            .expect("backup");

        clear_story_attempts(temp.path(), "s-1").expect("clear");
        assert!(!temp.path().join("s-1").exists());
    }
}
