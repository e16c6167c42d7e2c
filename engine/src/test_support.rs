//! Test-only helpers: scripted collaborators and a project fixture.
//!
//! Scripted fakes return predetermined payloads without spawning processes
//! or calling any service, which keeps engine tests deterministic and fast.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Result};

use crate::io::attempt_log::AttemptJournal;
use crate::io::generator::{GenerationRequest, Generator};
use crate::io::process::CommandOutput;
use crate::io::sandbox::{LocalSandbox, Sandbox};
use crate::io::store::Store;

/// Generator that replays scripted replies in order and records every
/// request it saw.
pub struct ScriptedGenerator {
    replies: RefCell<VecDeque<String>>,
    requests: RefCell<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(replies: Vec<String>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    /// Number of calls made so far.
    pub fn calls(&self) -> usize {
        self.requests.borrow().len()
    }

    /// The request seen at `index` (0-based call order).
    pub fn request(&self, index: usize) -> GenerationRequest {
        self.requests.borrow()[index].clone()
    }
}

impl Generator for ScriptedGenerator {
    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.requests.borrow_mut().push(request.clone());
        self.replies
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted reply left (call {})", self.calls()))
    }
}

/// One scripted command result for [`ScriptedSandbox`].
#[derive(Debug, Clone)]
pub struct ScriptedCommand {
    pub exit_code: i32,
    pub stdout: String,
    pub timed_out: bool,
}

impl ScriptedCommand {
    pub fn ok(stdout: &str) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.to_string(),
            timed_out: false,
        }
    }

    pub fn failing(stdout: &str) -> Self {
        Self {
            exit_code: 1,
            stdout: stdout.to_string(),
            timed_out: false,
        }
    }
}

/// Sandbox with real file access but scripted command execution.
///
/// `run_command` pops the next scripted result; an `Err` entry simulates a
/// spawn failure (missing executable). When the script is exhausted,
/// commands succeed silently so incidental install steps don't need
/// scripting.
pub struct ScriptedSandbox {
    inner: LocalSandbox,
    results: RefCell<VecDeque<Result<ScriptedCommand, String>>>,
    seen: RefCell<Vec<Vec<String>>>,
}

impl ScriptedSandbox {
    pub fn new(root: &Path, results: Vec<Result<ScriptedCommand, String>>) -> Self {
        Self {
            inner: LocalSandbox::new(root),
            results: RefCell::new(results.into()),
            seen: RefCell::new(Vec::new()),
        }
    }

    /// Every argv passed to `run_command`, in order.
    pub fn commands_seen(&self) -> Vec<Vec<String>> {
        self.seen.borrow().clone()
    }
}

impl Sandbox for ScriptedSandbox {
    fn read_file(&self, path: &str) -> Result<Option<String>> {
        self.inner.read_file(path)
    }

    fn write_file(&self, path: &str, content: &str) -> Result<()> {
        self.inner.write_file(path, content)
    }

    fn list_files(&self, excluded_dirs: &[String]) -> Result<Vec<String>> {
        self.inner.list_files(excluded_dirs)
    }

    fn run_command(
        &self,
        argv: &[String],
        _timeout: Duration,
        _output_limit_bytes: usize,
    ) -> Result<CommandOutput> {
        self.seen.borrow_mut().push(argv.to_vec());
        match self.results.borrow_mut().pop_front() {
            Some(Ok(scripted)) => Ok(command_output(&scripted)),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(command_output(&ScriptedCommand::ok(""))),
        }
    }
}

fn command_output(scripted: &ScriptedCommand) -> CommandOutput {
    use std::os::unix::process::ExitStatusExt;
    CommandOutput {
        status: std::process::ExitStatus::from_raw(scripted.exit_code << 8),
        stdout: scripted.stdout.clone().into_bytes(),
        stderr: Vec::new(),
        stdout_truncated: 0,
        stderr_truncated: 0,
        timed_out: scripted.timed_out,
    }
}

/// Temporary project directory with a real sandbox and store.
pub struct TestProject {
    temp: tempfile::TempDir,
    sandbox: LocalSandbox,
}

impl TestProject {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir()?;
        let sandbox = LocalSandbox::new(temp.path());
        Ok(Self { temp, sandbox })
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn sandbox(&self) -> &LocalSandbox {
        &self.sandbox
    }

    pub fn store(&self) -> Store {
        Store::new(self.root())
    }

    pub fn scripted_sandbox(
        &self,
        results: Vec<Result<ScriptedCommand, String>>,
    ) -> ScriptedSandbox {
        ScriptedSandbox::new(self.root(), results)
    }

    pub fn journal(&self, story_id: &str, attempt: u32) -> AttemptJournal {
        AttemptJournal::new(&self.store().paths().attempts_dir, story_id, attempt)
    }

    pub fn attempt_backup_exists(&self, story_id: &str, attempt: u32, path: &str) -> bool {
        self.store()
            .paths()
            .attempts_dir
            .join(story_id)
            .join(attempt.to_string())
            .join("backups")
            .join(path)
            .exists()
    }
}
