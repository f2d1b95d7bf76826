// Plan and Step data model (§3.3). Step-type dispatch is a closed set of 15
// tagged variants (§9 design notes), not a string-keyed table: the executor
// pattern-matches on `StepType` and each variant carries only the metadata
// its executor needs.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepType {
    RepoSetup,
    Packages { family: String, packages: Vec<String> },
    Tool,
    PostInstall { streaming: bool },
    Verify,
    Config { path: String, contents: String },
    ShellConfig { shell: String, marker: String, line: String },
    Service { unit: String },
    Download { url: String, dest: String, sha256: Option<String> },
    GithubRelease { repo: String, tag: Option<String>, asset_pattern: Option<String> },
    Source { repo_url: String, checkout: Option<String> },
    Build,
    Install { from: String, to: String },
    Cleanup { paths: Vec<String> },
    Notification { message: String },
}

impl StepType {
    /// Human label for the 15 kinds, used in logs and plan summaries.
    pub fn kind_name(&self) -> &'static str {
        match self {
            StepType::RepoSetup => "repo_setup",
            StepType::Packages { .. } => "packages",
            StepType::Tool => "tool",
            StepType::PostInstall { .. } => "post_install",
            StepType::Verify => "verify",
            StepType::Config { .. } => "config",
            StepType::ShellConfig { .. } => "shell_config",
            StepType::Service { .. } => "service",
            StepType::Download { .. } => "download",
            StepType::GithubRelease { .. } => "github_release",
            StepType::Source { .. } => "source",
            StepType::Build => "build",
            StepType::Install { .. } => "install",
            StepType::Cleanup { .. } => "cleanup",
            StepType::Notification { .. } => "notification",
        }
    }

    /// `tool`, `build`, and `download` stream output line-by-line (§4.5);
    /// everything else runs blocking.
    pub fn streams_output(&self) -> bool {
        matches!(self, StepType::Tool | StepType::Build | StepType::Download { .. })
    }

    pub fn default_timeout_ms(&self) -> u64 {
        match self {
            StepType::Build => 1_800_000,
            _ => 120_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub step_type: StepType,
    pub label: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Shell fragments inherited from this step's transitive dependencies'
    /// `post_env` (§4.3 post_env propagation), sourced before `command` runs.
    #[serde(default)]
    pub post_env: Vec<String>,
    #[serde(default)]
    pub needs_sudo: bool,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub timeout_ms: u64,
    #[serde(default)]
    pub batchable: bool,
    /// The install method this step used, when it's a tool step built from
    /// `recipe.install[method]` (§4.8 needs this to pick the method-family
    /// failure handlers; not every step has one).
    #[serde(default)]
    pub method: Option<String>,
}

impl Step {
    pub fn new(id: impl Into<String>, step_type: StepType, label: impl Into<String>) -> Self {
        let timeout_ms = step_type.default_timeout_ms();
        Step {
            id: id.into(),
            step_type,
            label: label.into(),
            command: Vec::new(),
            env: HashMap::new(),
            post_env: Vec::new(),
            needs_sudo: false,
            depends_on: Vec::new(),
            timeout_ms,
            batchable: false,
            method: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Done,
    Failed,
    Skipped,
    Blocked,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub stdout_tail: Vec<String>,
    pub stderr_tail: Vec<String>,
    pub error: Option<String>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Copied from `Step::method` so the failure analyzer (§4.8) can pick
    /// method-family handlers without re-resolving the plan.
    #[serde(default)]
    pub method: Option<String>,
}

impl StepResult {
    pub fn pending(step_id: &str) -> Self {
        StepResult {
            step_id: step_id.to_string(),
            status: StepStatus::Pending,
            exit_code: None,
            duration_ms: 0,
            stdout_tail: Vec::new(),
            stderr_tail: Vec::new(),
            method: None,
            error: None,
            started_at: chrono::Utc::now(),
            ended_at: None,
        }
    }
}

/// An ordered list of steps plus metadata, produced by the resolver (§3.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub tool_id: String,
    pub label: String,
    pub steps: Vec<Step>,
    pub needs_sudo: bool,
    pub already_installed: bool,
}

impl Plan {
    pub fn new(tool_id: impl Into<String>, label: impl Into<String>) -> Self {
        Plan {
            tool_id: tool_id.into(),
            label: label.into(),
            steps: Vec::new(),
            needs_sudo: false,
            already_installed: false,
        }
    }

    pub fn push(&mut self, step: Step) {
        self.needs_sudo = self.needs_sudo || step.needs_sudo;
        self.steps.push(step);
    }

    pub fn step_index(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == step_id)
    }
}
