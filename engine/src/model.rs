//! Durable documents owned by the backlog/plan store.
//!
//! These are whole-document records: the engine reads and writes them as
//! complete snapshots (no partial-row updates) and mutates only the fields
//! it owns: story status and timestamps, plan status and backup registry,
//! and architecture-state deltas accumulated from decomposition.

use serde::{Deserialize, Serialize};

/// Execution status of a story, owned by the engine during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryStatus {
    NotStarted,
    InProgress,
    Completed,
    CompletedWithFailures,
    Failed,
}

/// A requirement unit carried through planning, implementation, verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Story {
    pub id: String,
    pub title: String,
    pub requirement: String,
    #[serde(default)]
    pub acceptance: Vec<String>,
    pub status: StoryStatus,
    #[serde(default)]
    pub started_at_ms: Option<u64>,
    #[serde(default)]
    pub finished_at_ms: Option<u64>,
}

impl Story {
    pub fn new(id: &str, title: &str, requirement: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            requirement: requirement.to_string(),
            acceptance: Vec::new(),
            status: StoryStatus::NotStarted,
            started_at_ms: None,
            finished_at_ms: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Planned,
    Executing,
    Completed,
}

/// Registry entry for a snapshot taken for this plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: String,
    pub created_at_ms: u64,
}

/// One sprint's execution plan: an ordered story-id list plus run metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SprintPlan {
    pub id: String,
    /// Position in the sprint sequence; restore prunes all higher sequences.
    pub sequence: u32,
    pub story_ids: Vec<String>,
    pub status: PlanStatus,
    #[serde(default)]
    pub started_at_ms: Option<u64>,
    #[serde(default)]
    pub finished_at_ms: Option<u64>,
    /// Snapshot registry. Preserved across plan restores.
    #[serde(default)]
    pub backups: Vec<BackupRecord>,
}

impl SprintPlan {
    pub fn new(id: &str, sequence: u32, story_ids: Vec<String>) -> Self {
        Self {
            id: id.to_string(),
            sequence,
            story_ids,
            status: PlanStatus::Planned,
            started_at_ms: None,
            finished_at_ms: None,
            backups: Vec::new(),
        }
    }
}

/// Declared technology stack for the generated project.
///
/// The stack decides the install and test commands and the dependency
/// manifest; the runner never infers a tool from a file extension alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TechStack {
    Node,
    Python,
}

impl TechStack {
    /// Parse a stack name as declared by the decomposer.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "node" | "nodejs" | "node.js" | "javascript" => Some(Self::Node),
            "python" | "python3" => Some(Self::Python),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Node => "node",
            Self::Python => "python",
        }
    }

    /// Dependency manifest filename at the project root.
    pub fn manifest_file(&self) -> &'static str {
        match self {
            Self::Node => "package.json",
            Self::Python => "requirements.txt",
        }
    }

    /// Command that installs dependencies after a merge or tree restore.
    pub fn install_command(&self) -> Vec<String> {
        match self {
            Self::Node => vec!["npm".into(), "install".into()],
            Self::Python => vec![
                "pip".into(),
                "install".into(),
                "-r".into(),
                "requirements.txt".into(),
            ],
        }
    }

    /// Command that runs a single test artifact.
    pub fn test_command(&self, artifact: &str) -> Vec<String> {
        match self {
            Self::Node => vec!["node".into(), "--test".into(), artifact.into()],
            Self::Python => vec!["pytest".into(), "-q".into(), artifact.into()],
        }
    }

    /// Extract dependency names from the manifest's raw content.
    pub fn parse_manifest_deps(&self, content: &str) -> Vec<String> {
        match self {
            Self::Node => parse_package_json_deps(content),
            Self::Python => parse_requirements_deps(content),
        }
    }
}

fn parse_package_json_deps(content: &str) -> Vec<String> {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(content) else {
        return Vec::new();
    };
    let mut deps = Vec::new();
    for section in ["dependencies", "devDependencies"] {
        if let Some(map) = value.get(section).and_then(|v| v.as_object()) {
            deps.extend(map.keys().cloned());
        }
    }
    deps.sort();
    deps.dedup();
    deps
}

fn parse_requirements_deps(content: &str) -> Vec<String> {
    let mut deps: Vec<String> = content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            line.split(['=', '<', '>', '~', '!', ';', ' '])
                .next()
                .unwrap_or(line)
                .trim()
                .to_string()
        })
        .filter(|name| !name.is_empty())
        .collect();
    deps.sort();
    deps.dedup();
    deps
}

/// Cross-sprint durable knowledge accumulated from decomposition deltas.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchitectureState {
    pub tech_stack: Option<TechStack>,
    /// Locked conventions (naming, layout, framework choices).
    pub conventions: Vec<String>,
    /// Accumulated schema inventory (tables, documents).
    pub schemas: Vec<String>,
    /// Accumulated endpoint inventory.
    pub endpoints: Vec<String>,
    /// Pending TODOs surfaced by decomposition but deferred.
    pub todos: Vec<String>,
}

impl ArchitectureState {
    /// Fold decomposition deltas into the durable state.
    ///
    /// Additive only: existing conventions and inventory entries are never
    /// removed, and the tech stack is locked by the first story that sets it.
    pub fn apply_deltas(&mut self, deltas: &ArchitectureDeltas) {
        if self.tech_stack.is_none() {
            self.tech_stack = deltas.tech_stack.clone();
        }
        merge_unique(&mut self.conventions, &deltas.conventions);
        merge_unique(&mut self.schemas, &deltas.schemas);
        merge_unique(&mut self.endpoints, &deltas.endpoints);
        merge_unique(&mut self.todos, &deltas.todos);
    }
}

/// Optional deltas emitted alongside a task breakdown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchitectureDeltas {
    pub tech_stack: Option<TechStack>,
    pub conventions: Vec<String>,
    pub schemas: Vec<String>,
    pub endpoints: Vec<String>,
    pub todos: Vec<String>,
}

fn merge_unique(target: &mut Vec<String>, additions: &[String]) {
    for addition in additions {
        if !target.iter().any(|existing| existing == addition) {
            target.push(addition.clone());
        }
    }
}
