//! Backup and restore of the full execution context.
//!
//! A snapshot captures the sprint plan, its event log, the backlog table,
//! the architecture state, wireframe/static assets, and the project tree
//! minus regenerable caches. Items that did not exist at capture time are
//! recorded with an explicit empty marker so a restore can delete what
//! appeared later. Restoring a sprint prunes every later-sequenced sprint's
//! plan, log, and backups.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tracing::{info, instrument, warn};

use crate::io::event_log::now_ms;
use crate::io::sandbox::Sandbox;
use crate::io::store::Store;
use crate::model::{BackupRecord, SprintPlan};

const PLAN_ITEM: &str = "plan.json";
const LOG_ITEM: &str = "events.jsonl";
const BACKLOG_ITEM: &str = "backlog.json";
const ARCHITECTURE_ITEM: &str = "architecture.json";
const ASSETS_ITEM: &str = "assets";
const TREE_ITEM: &str = "tree";
const EMPTY_SUFFIX: &str = ".EMPTY";

pub struct SnapshotManager<'a> {
    store: &'a Store,
    project_root: PathBuf,
    excluded_dirs: Vec<String>,
}

impl<'a> SnapshotManager<'a> {
    pub fn new(store: &'a Store, project_root: &Path, excluded_dirs: &[String]) -> Self {
        Self {
            store,
            project_root: project_root.to_path_buf(),
            excluded_dirs: excluded_dirs.to_vec(),
        }
    }

    /// Capture a snapshot for `plan` and register it in the plan's backup
    /// registry. Called once per sprint save, before any task runs.
    #[instrument(skip_all, fields(sprint_id = %plan.id))]
    pub fn create(&self, plan: &mut SprintPlan) -> Result<BackupRecord> {
        let paths = self.store.paths();
        let backup_dir = paths.backup_dir(&plan.id);
        fs::create_dir_all(&backup_dir)
            .with_context(|| format!("create backup dir {}", backup_dir.display()))?;

        capture_file(&paths.plan_path(&plan.id), &backup_dir, PLAN_ITEM)?;
        capture_file(&paths.log_path(&plan.id), &backup_dir, LOG_ITEM)?;
        capture_file(&paths.backlog_path, &backup_dir, BACKLOG_ITEM)?;
        capture_file(&paths.architecture_path, &backup_dir, ARCHITECTURE_ITEM)?;
        capture_dir(&paths.assets_dir, &backup_dir.join(ASSETS_ITEM), &[])?;
        capture_dir(
            &self.project_root,
            &backup_dir.join(TREE_ITEM),
            &self.excluded_dirs,
        )?;

        let record = BackupRecord {
            id: plan.id.clone(),
            created_at_ms: now_ms(),
        };
        plan.backups.push(record.clone());
        self.store.write_plan(plan)?;
        info!(backup_dir = %backup_dir.display(), "snapshot created");
        Ok(record)
    }

    /// Restore the snapshot for `sprint_id` and prune later sprints.
    ///
    /// Dependencies are reinstalled through the sandbox afterwards because
    /// dependency caches are excluded from the captured tree.
    #[instrument(skip_all, fields(sprint_id))]
    pub fn restore(&self, sprint_id: &str, sandbox: &dyn Sandbox, command_timeout: Duration, output_limit_bytes: usize) -> Result<()> {
        let paths = self.store.paths();
        let backup_dir = paths.backup_dir(sprint_id);
        if !backup_dir.exists() {
            return Err(anyhow!("no snapshot for sprint '{sprint_id}'"));
        }

        // The registry lives in the plan document; carry it across the
        // restore so the snapshot itself stays listed.
        let current_registry = self
            .store
            .load_plan(sprint_id)
            .map(|plan| plan.backups)
            .unwrap_or_default();

        restore_file(&backup_dir, PLAN_ITEM, &paths.plan_path(sprint_id))?;
        restore_file(&backup_dir, LOG_ITEM, &paths.log_path(sprint_id))?;
        restore_file(&backup_dir, BACKLOG_ITEM, &paths.backlog_path)?;
        restore_file(&backup_dir, ARCHITECTURE_ITEM, &paths.architecture_path)?;
        restore_dir(&backup_dir.join(ASSETS_ITEM), &paths.assets_dir, &[])?;

        clear_dir(&self.project_root, &self.excluded_dirs)?;
        restore_dir(
            &backup_dir.join(TREE_ITEM),
            &self.project_root,
            &self.excluded_dirs,
        )?;

        let mut plan = self.store.load_plan(sprint_id)?;
        if !current_registry.is_empty() {
            plan.backups = current_registry;
            self.store.write_plan(&plan)?;
        }

        self.prune_after(plan.sequence)?;
        self.reinstall_dependencies(sandbox, command_timeout, output_limit_bytes)?;
        info!("snapshot restored");
        Ok(())
    }

    /// Delete plans, logs, and backups for every sprint sequenced after
    /// `sequence`.
    fn prune_after(&self, sequence: u32) -> Result<()> {
        let paths = self.store.paths();
        for plan in self.store.list_plans()? {
            if plan.sequence <= sequence {
                continue;
            }
            info!(sprint_id = %plan.id, "pruning later sprint");
            remove_if_exists(&paths.plan_path(&plan.id))?;
            remove_if_exists(&paths.log_path(&plan.id))?;
            let backup_dir = paths.backup_dir(&plan.id);
            if backup_dir.exists() {
                fs::remove_dir_all(&backup_dir)
                    .with_context(|| format!("remove {}", backup_dir.display()))?;
            }
        }
        Ok(())
    }

    fn reinstall_dependencies(
        &self,
        sandbox: &dyn Sandbox,
        command_timeout: Duration,
        output_limit_bytes: usize,
    ) -> Result<()> {
        let architecture = self.store.load_architecture()?;
        let Some(stack) = architecture.tech_stack else {
            return Ok(());
        };
        let argv = stack.install_command();
        let output = sandbox.run_command(&argv, command_timeout, output_limit_bytes)?;
        if !output.success() {
            warn!(
                command = %argv.join(" "),
                exit_code = ?output.status.code(),
                "dependency reinstall failed after restore"
            );
        }
        Ok(())
    }
}

/// Copy `source` into the backup as `item`, or write the empty marker when
/// the source does not exist yet.
fn capture_file(source: &Path, backup_dir: &Path, item: &str) -> Result<()> {
    let target = backup_dir.join(item);
    if source.exists() {
        fs::copy(source, &target)
            .with_context(|| format!("capture {} -> {}", source.display(), target.display()))?;
    } else {
        let marker = backup_dir.join(format!("{item}{EMPTY_SUFFIX}"));
        fs::write(&marker, "").with_context(|| format!("write marker {}", marker.display()))?;
    }
    Ok(())
}

/// Restore `item` from the backup: copy it back, or, when the empty marker
/// is present, delete the current version because it did not exist at
/// capture time.
fn restore_file(backup_dir: &Path, item: &str, target: &Path) -> Result<()> {
    let captured = backup_dir.join(item);
    let marker = backup_dir.join(format!("{item}{EMPTY_SUFFIX}"));
    if captured.exists() {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::copy(&captured, target)
            .with_context(|| format!("restore {} -> {}", captured.display(), target.display()))?;
        return Ok(());
    }
    if marker.exists() {
        remove_if_exists(target)?;
        return Ok(());
    }
    Err(anyhow!(
        "snapshot item '{item}' missing from {}",
        backup_dir.display()
    ))
}

fn capture_dir(source: &Path, target: &Path, excluded_dirs: &[String]) -> Result<()> {
    if !source.exists() {
        return Ok(());
    }
    copy_dir(source, target, excluded_dirs)
}

fn restore_dir(captured: &Path, target: &Path, excluded_dirs: &[String]) -> Result<()> {
    if !captured.exists() {
        return Ok(());
    }
    copy_dir(captured, target, excluded_dirs)
}

fn copy_dir(source: &Path, target: &Path, excluded_dirs: &[String]) -> Result<()> {
    fs::create_dir_all(target).with_context(|| format!("create {}", target.display()))?;
    let entries = fs::read_dir(source).with_context(|| format!("list {}", source.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("read entry in {}", source.display()))?;
        let name = entry.file_name();
        let name_str = name.to_string_lossy().to_string();
        let from = entry.path();
        let to = target.join(&name);
        if from.is_dir() {
            if excluded_dirs.iter().any(|excluded| *excluded == name_str) {
                continue;
            }
            copy_dir(&from, &to, excluded_dirs)?;
        } else {
            fs::copy(&from, &to)
                .with_context(|| format!("copy {} -> {}", from.display(), to.display()))?;
        }
    }
    Ok(())
}

/// Remove everything under `dir` except excluded directories.
fn clear_dir(dir: &Path, excluded_dirs: &[String]) -> Result<()> {
    let entries = fs::read_dir(dir).with_context(|| format!("list {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
        let name = entry.file_name().to_string_lossy().to_string();
        let path = entry.path();
        if path.is_dir() {
            if excluded_dirs.iter().any(|excluded| *excluded == name) {
                continue;
            }
            fs::remove_dir_all(&path).with_context(|| format!("remove {}", path.display()))?;
        } else {
            fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
        }
    }
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_file(path).with_context(|| format!("remove {}", path.display()))?;
    }
    Ok(())
}
