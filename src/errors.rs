// Typed error taxonomy threaded through Result return types across component
// boundaries (resolver, executor, state store, engine). The CLI boundary
// wraps these in `anyhow` for top-level reporting.

use thiserror::Error;

/// Errors raised while resolving a recipe + profile into a plan.
#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("tool '{0}' is not present in the recipe registry")]
    ToolNotFound(String),

    #[error("no installable method for '{tool_id}' on this system (attempted: {attempted:?})")]
    NoSelectableMethod { tool_id: String, attempted: Vec<String> },

    #[error("dependency cycle detected while resolving '{tool_id}': {cycle:?}")]
    DependencyCycle { tool_id: String, cycle: Vec<String> },

    #[error("choice '{choice_id}' for '{tool_id}' was not resolved: {reason}")]
    ChoiceUnresolved { tool_id: String, choice_id: String, reason: String },

    #[error("distro family '{family}' is not supported by recipe '{tool_id}'")]
    UnsupportedFamily { tool_id: String, family: String },
}

/// Errors raised by the step executor. Predictable command failures are
/// reported as a `StepResult` with `status=failed`, never as this type;
/// this type is reserved for invariant violations the resolver/loader
/// should already have ruled out.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("step '{0}' has an unknown or unsupported step type")]
    UnknownStepType(String),

    #[error("step '{step_id}' has a malformed command: {reason}")]
    MalformedCommand { step_id: String, reason: String },

    #[error("sudo password required for step '{0}' but no provider supplied one")]
    SudoPasswordRequired(String),

    #[error("sudo authentication failed for step '{0}'")]
    SudoAuthFailed(String),
}

/// Errors raised by the plan state store.
#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("plan '{0}' was not found in the state store")]
    PlanNotFound(String),

    #[error("plan state file for '{plan_id}' is corrupted: {reason}")]
    PlanCorrupted { plan_id: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

/// Top-level engine error, the union type returned by orchestrator entry
/// points.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Resolver(#[from] ResolverError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    StateStore(#[from] StateStoreError),

    #[error("recipe registry failed schema validation: {0}")]
    RegistryInvalid(String),

    #[error("plan failed DAG validation: {0}")]
    SchedulerInvalid(String),

    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("no space left on device while running step '{0}'")]
    DiskFull(String),
}
