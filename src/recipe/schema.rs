// Declarative recipe schema (§3.1). A recipe is pure data: no behavior lives
// here beyond `validate()`, which enforces the load-time invariants the
// registry depends on before a single lookup is served.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Method keys a recipe's `install` map may use. `_default` is the
/// catch-all, typically a `bash -c` installer script.
pub const KNOWN_METHODS: &[&str] = &[
    "apt", "dnf", "yum", "apk", "pacman", "zypper", "brew", "snap", "pip",
    "pipx", "npm", "cargo", "go", "source", "_default",
];

/// Distro families a recipe's `requires.packages` map may key on.
pub const KNOWN_FAMILIES: &[&str] = &["debian", "rhel", "alpine", "arch", "suse", "macos"];

#[derive(Debug, Clone)]
pub enum RecipeError {
    MissingInstallMethods(String),
    NeedsSudoMismatch { tool_id: String, method: String },
    PreferNotInInstall { tool_id: String, method: String },
    UnknownFamily { tool_id: String, family: String },
}

impl fmt::Display for RecipeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecipeError::MissingInstallMethods(id) => {
                write!(f, "recipe '{id}' declares no install methods and is not marked not_installable")
            }
            RecipeError::NeedsSudoMismatch { tool_id, method } => {
                write!(f, "recipe '{tool_id}': method '{method}' appears in `install` but not in `needs_sudo`")
            }
            RecipeError::PreferNotInInstall { tool_id, method } => {
                write!(f, "recipe '{tool_id}': `prefer` entry '{method}' is not a key in `install`")
            }
            RecipeError::UnknownFamily { tool_id, family } => {
                write!(f, "recipe '{tool_id}': `requires.packages` uses unknown family '{family}'")
            }
        }
    }
}

impl std::error::Error for RecipeError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Risk {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartRequired {
    None,
    Shell,
    Session,
    System,
}

/// A single step template used inside `repo_setup`, `post_install`, and
/// choice `plan_fragment`s. This is the recipe-authoring-time shape; the
/// resolver turns these into fully-assembled `plan::Step` values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTemplate {
    pub id: String,
    #[serde(rename = "type")]
    pub step_type: String,
    pub label: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub needs_sudo: bool,
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub batchable: bool,
    #[serde(default)]
    pub metadata: HashMap<String, serde_yaml::Value>,
    /// Where a choice fragment's steps land relative to the primary install
    /// step: "before" or "after".
    #[serde(default = "default_position")]
    pub position: String,
}

fn default_position() -> String {
    "after".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Requires {
    #[serde(default)]
    pub binaries: Vec<String>,
    #[serde(default)]
    pub packages: HashMap<String, Vec<String>>,
    /// Set when the `source` method requires a specific compiler toolchain
    /// to be present (gate type: source-toolchain, §3.5).
    pub requires_toolchain: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceOptionSpec {
    pub id: String,
    pub label: String,
    /// Name of the availability predicate evaluated against the profile;
    /// resolved by the choice resolver's decision table (§4.4).
    pub availability_predicate: String,
    #[serde(default)]
    pub recommended: bool,
    #[serde(default)]
    pub plan_fragment: Vec<StepTemplate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceSpec {
    pub id: String,
    pub label: String,
    pub options: Vec<ChoiceOptionSpec>,
    #[serde(default)]
    pub auto_select_if_singleton: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationStrategy {
    InstallDep,
    SwitchMethod,
    RetryWithModifier,
    InstallPackages,
    EnvFix,
    Manual,
    CleanupRetry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationOptionSpec {
    pub id: String,
    pub label: String,
    pub strategy: RemediationStrategy,
    /// Strategy-specific fields, kept loosely typed at the schema layer and
    /// interpreted by the analyzer/executor per strategy (§4.8).
    #[serde(default)]
    pub fields: HashMap<String, serde_yaml::Value>,
    #[serde(default)]
    pub recommended: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureCategory {
    Environment,
    Dependency,
    Permissions,
    Compiler,
    Network,
    Configuration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureHandlerSpec {
    pub pattern: String,
    pub failure_id: String,
    pub category: FailureCategory,
    pub label: String,
    pub description: String,
    pub example_stderr: Option<String>,
    pub options: Vec<RemediationOptionSpec>,
}

/// A full recipe, as authored in the registry's YAML documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub id: String,
    #[serde(default)]
    pub not_installable: bool,
    #[serde(default)]
    pub install: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub needs_sudo: HashMap<String, bool>,
    #[serde(default)]
    pub requires: Requires,
    #[serde(default)]
    pub prefer: Vec<String>,
    #[serde(default)]
    pub repo_setup: HashMap<String, Vec<StepTemplate>>,
    #[serde(default)]
    pub post_install: Vec<StepTemplate>,
    pub post_env: Option<String>,
    pub verify: Option<Vec<String>>,
    #[serde(default)]
    pub update: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub rollback: HashMap<String, Vec<String>>,
    pub risk: Risk,
    pub restart_required: RestartRequired,
    #[serde(default)]
    pub on_failure: Vec<FailureHandlerSpec>,
    #[serde(default)]
    pub choices: Vec<ChoiceSpec>,
}

impl Recipe {
    /// Enforces the §3.1 schema invariants. Called once per recipe at
    /// registry load time; a failing recipe aborts the whole load with a
    /// diagnostic naming the offending recipe and field, per §4.1.
    pub fn validate(&self) -> Result<(), RecipeError> {
        if !self.not_installable && self.install.is_empty() {
            return Err(RecipeError::MissingInstallMethods(self.id.clone()));
        }

        for method in self.install.keys() {
            if !self.needs_sudo.contains_key(method) {
                return Err(RecipeError::NeedsSudoMismatch {
                    tool_id: self.id.clone(),
                    method: method.clone(),
                });
            }
        }

        for method in &self.prefer {
            if !self.install.contains_key(method) {
                return Err(RecipeError::PreferNotInInstall {
                    tool_id: self.id.clone(),
                    method: method.clone(),
                });
            }
        }

        for family in self.requires.packages.keys() {
            if !KNOWN_FAMILIES.contains(&family.as_str()) {
                return Err(RecipeError::UnknownFamily {
                    tool_id: self.id.clone(),
                    family: family.clone(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_recipe() -> Recipe {
        Recipe {
            id: "example".into(),
            not_installable: false,
            install: HashMap::from([("apt".to_string(), vec!["apt-get".into(), "install".into()])]),
            needs_sudo: HashMap::from([("apt".to_string(), true)]),
            requires: Requires::default(),
            prefer: vec![],
            repo_setup: HashMap::new(),
            post_install: vec![],
            post_env: None,
            verify: None,
            update: HashMap::new(),
            rollback: HashMap::new(),
            risk: Risk::Low,
            restart_required: RestartRequired::None,
            on_failure: vec![],
            choices: vec![],
        }
    }

    #[test]
    fn valid_recipe_passes() {
        assert!(base_recipe().validate().is_ok());
    }

    #[test]
    fn missing_needs_sudo_fails() {
        let mut r = base_recipe();
        r.needs_sudo.clear();
        assert!(matches!(r.validate(), Err(RecipeError::NeedsSudoMismatch { .. })));
    }

    #[test]
    fn prefer_not_in_install_fails() {
        let mut r = base_recipe();
        r.prefer = vec!["dnf".into()];
        assert!(matches!(r.validate(), Err(RecipeError::PreferNotInInstall { .. })));
    }

    #[test]
    fn unknown_family_fails() {
        let mut r = base_recipe();
        r.requires.packages.insert("bsd".into(), vec!["pkg".into()]);
        assert!(matches!(r.validate(), Err(RecipeError::UnknownFamily { .. })));
    }

    #[test]
    fn not_installable_recipe_needs_no_install_methods() {
        let mut r = base_recipe();
        r.install.clear();
        r.needs_sudo.clear();
        r.not_installable = true;
        assert!(r.validate().is_ok());
    }
}
