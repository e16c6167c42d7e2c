//! Sandboxed project access.
//!
//! The [`Sandbox`] trait is the engine's only route to the project tree and
//! to command execution. Path containment and command scoping are the
//! sandbox's responsibility, so orchestration code never touches the
//! filesystem directly and tests can substitute scripted sandboxes.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tracing::{debug, instrument};

use crate::io::process::{run_command_with_timeout, CommandOutput};

/// Abstraction over the isolated project directory and command boundary.
pub trait Sandbox {
    /// Read a project-relative file. `None` when the file does not exist.
    fn read_file(&self, path: &str) -> Result<Option<String>>;

    /// Write a project-relative file, creating parent directories.
    fn write_file(&self, path: &str, content: &str) -> Result<()>;

    /// List project-relative file paths, sorted, skipping excluded
    /// directories.
    fn list_files(&self, excluded_dirs: &[String]) -> Result<Vec<String>>;

    /// Run a command with the project root as working directory.
    fn run_command(
        &self,
        argv: &[String],
        timeout: Duration,
        output_limit_bytes: usize,
    ) -> Result<CommandOutput>;
}

/// Sandbox rooted at a local project directory.
pub struct LocalSandbox {
    root: PathBuf,
}

impl LocalSandbox {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a project-relative path, rejecting escapes.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        if relative.is_absolute() {
            return Err(anyhow!("absolute path '{path}' rejected"));
        }
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => return Err(anyhow!("path '{path}' escapes the project root")),
            }
        }
        Ok(self.root.join(relative))
    }
}

impl Sandbox for LocalSandbox {
    fn read_file(&self, path: &str) -> Result<Option<String>> {
        let full = self.resolve(path)?;
        if !full.exists() {
            return Ok(None);
        }
        let contents =
            fs::read_to_string(&full).with_context(|| format!("read {}", full.display()))?;
        Ok(Some(contents))
    }

    fn write_file(&self, path: &str, content: &str) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&full, content).with_context(|| format!("write {}", full.display()))?;
        debug!(path, bytes = content.len(), "wrote project file");
        Ok(())
    }

    fn list_files(&self, excluded_dirs: &[String]) -> Result<Vec<String>> {
        let mut files = Vec::new();
        walk(&self.root, &self.root, excluded_dirs, &mut files)?;
        files.sort();
        Ok(files)
    }

    #[instrument(skip_all, fields(command = %argv.join(" ")))]
    fn run_command(
        &self,
        argv: &[String],
        timeout: Duration,
        output_limit_bytes: usize,
    ) -> Result<CommandOutput> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| anyhow!("empty command"))?;
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.root);
        run_command_with_timeout(cmd, None, timeout, output_limit_bytes)
    }
}

fn walk(
    root: &Path,
    dir: &Path,
    excluded_dirs: &[String],
    files: &mut Vec<String>,
) -> Result<()> {
    let entries = fs::read_dir(dir).with_context(|| format!("list {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if path.is_dir() {
            if excluded_dirs.iter().any(|excluded| *excluded == name) {
                continue;
            }
            walk(root, &path, excluded_dirs, files)?;
        } else if let Ok(relative) = path.strip_prefix(root) {
            files.push(relative.to_string_lossy().replace('\\', "/"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let sandbox = LocalSandbox::new(temp.path());

        sandbox
            .write_file("src/app.js", "module.exports = {};\n")
            .expect("write");
        let content = sandbox.read_file("src/app.js").expect("read");
        assert_eq!(content.as_deref(), Some("module.exports = {};\n"));
    }

    #[test]
    fn missing_file_reads_as_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        let sandbox = LocalSandbox::new(temp.path());
        assert!(sandbox.read_file("nope.txt").expect("read").is_none());
    }

    #[test]
    fn rejects_path_escapes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let sandbox = LocalSandbox::new(temp.path());

        assert!(sandbox.read_file("../outside.txt").is_err());
        assert!(sandbox.write_file("/etc/passwd", "x").is_err());
    }

    #[test]
    fn list_skips_excluded_directories() {
        let temp = tempfile::tempdir().expect("tempdir");
        let sandbox = LocalSandbox::new(temp.path());
        sandbox.write_file("src/app.js", "x").expect("write");
        sandbox
            .write_file("node_modules/express/index.js", "x")
            .expect("write");

        let files = sandbox
            .list_files(&["node_modules".to_string()])
            .expect("list");
        assert_eq!(files, vec!["src/app.js"]);
    }

    #[test]
    fn run_command_executes_in_project_root() {
        let temp = tempfile::tempdir().expect("tempdir");
        let sandbox = LocalSandbox::new(temp.path());
        sandbox.write_file("marker.txt", "here").expect("write");

        let output = sandbox
            .run_command(
                &["ls".to_string()],
                Duration::from_secs(5),
                10_000,
            )
            .expect("run");
        assert!(output.success());
        assert!(String::from_utf8_lossy(&output.stdout).contains("marker.txt"));
    }
}
