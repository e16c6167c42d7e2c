//! Closed-world architecture contract: builder and enforcer.
//!
//! A contract is computed exactly once per story, from the pre-story baseline
//! plus everything the decomposer named, and is immutable thereafter. The
//! enforcer compares what a story actually touched against the contract and
//! reports the exact offenders. Violations are never auto-retried: re-running
//! generation against the same contract reproduces the same violation.

use std::collections::BTreeSet;

use crate::core::types::{ContractViolations, Task};

/// Allowed file paths and dependency names for one story.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchitectureContract {
    allowed_files: BTreeSet<String>,
    allowed_deps: BTreeSet<String>,
}

impl ArchitectureContract {
    /// Build the contract from the pre-story baseline and the decomposer's
    /// task list.
    ///
    /// Allowed files are the baseline tree plus every path a task names.
    /// Allowed dependencies are the baseline manifest plus every dependency
    /// named in tasks, including names embedded in the description of a task
    /// that targets the manifest file itself.
    pub fn build(
        baseline_files: &[String],
        baseline_deps: &[String],
        tasks: &[Task],
        manifest_file: Option<&str>,
    ) -> Self {
        let mut allowed_files: BTreeSet<String> = baseline_files.iter().cloned().collect();
        let mut allowed_deps: BTreeSet<String> = baseline_deps.iter().cloned().collect();

        for task in tasks {
            for file in &task.files {
                allowed_files.insert(file.clone());
            }
            let targets_manifest = manifest_file
                .map(|manifest| task.files.iter().any(|f| f == manifest))
                .unwrap_or(false);
            if targets_manifest {
                for dep in scan_dependency_names(&task.description) {
                    allowed_deps.insert(dep);
                }
            }
        }

        Self {
            allowed_files,
            allowed_deps,
        }
    }

    pub fn allows_file(&self, path: &str) -> bool {
        self.allowed_files.contains(path)
    }

    pub fn allowed_files(&self) -> impl Iterator<Item = &String> {
        self.allowed_files.iter()
    }

    /// Check actually-written files and the actual dependency manifest
    /// against the contract. Returns the exact offending entries, sorted.
    ///
    /// Idempotent: a compliant set never reports a violation, no matter how
    /// often it is re-checked.
    pub fn enforce(&self, written_files: &[String], manifest_deps: &[String]) -> ContractViolations {
        let mut files: Vec<String> = written_files
            .iter()
            .filter(|path| !self.allowed_files.contains(*path))
            .cloned()
            .collect();
        files.sort();
        files.dedup();

        let mut deps: Vec<String> = manifest_deps
            .iter()
            .filter(|dep| !self.allowed_deps.contains(*dep))
            .cloned()
            .collect();
        deps.sort();
        deps.dedup();

        ContractViolations { files, deps }
    }

    /// True when every baseline entry is still allowed. The contract only
    /// ever extends the baseline.
    pub fn covers_baseline(&self, baseline_files: &[String], baseline_deps: &[String]) -> bool {
        baseline_files.iter().all(|f| self.allowed_files.contains(f))
            && baseline_deps.iter().all(|d| self.allowed_deps.contains(d))
    }
}

/// Scan a manifest task description for dependency names.
///
/// Dependency names appear quoted (`"express"`, `'sqlite3'`) or backticked
/// in breakdown prose; bare prose words are not dependency names.
fn scan_dependency_names(description: &str) -> Vec<String> {
    use std::sync::LazyLock;
    static DEP_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
        regex::Regex::new(r#"["'`]([@a-z0-9][@a-z0-9._/-]*)["'`]"#).unwrap()
    });

    let mut names: Vec<String> = DEP_RE
        .captures_iter(description)
        .map(|caps| caps[1].to_string())
        .filter(|name| !name.contains('/') || name.starts_with('@'))
        .collect();
    names.sort();
    names.dedup();
    names
}
