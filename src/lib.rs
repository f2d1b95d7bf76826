//! Deterministic tool provisioning control plane.
//!
//! This crate resolves a declarative recipe plus a detected system profile
//! into an ordered installation plan, executes that plan under a
//! concurrency-bounded DAG scheduler, persists resumable plan state, and
//! ranks remediation options when a step fails. The `provisionctl` binary
//! is a thin CLI wrapper around [`engine::Engine`]; integration tests under
//! `tests/` drive the same entry points directly.
//!
//! ## Crate layout
//! - [`recipe`]: the declarative recipe schema, built-in registry, and
//!   platform/package constant tables (C1).
//! - [`profile`]: system profiling, fast-tier and lazy-deep (C2).
//! - [`resolver`]: method selection, dependency resolution, and choice
//!   resolution (C3, C4).
//! - [`plan`]: the step/plan data model shared across every component.
//! - [`executor`]: step execution, sudo, streaming output, shell-rc and
//!   archive utilities (C5).
//! - [`scheduler`]: the dependency DAG and worker-bounded runner (C6).
//! - [`state`]: the resumable plan state store (C7).
//! - [`analyzer`]: failure-handler matching and remediation ranking (C8).
//! - [`engine`]: the orchestrator tying the above together (C9).
//! - [`config`]: ambient engine configuration.
//! - [`cli`]: subcommand implementations.

pub mod analyzer;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod logger;
pub mod plan;
pub mod profile;
pub mod recipe;
pub mod resolver;
pub mod scheduler;
pub mod state;
