//! Typed errors surfaced across component boundaries.

use thiserror::Error;

/// Errors from project decomposition. None of these are retried by the
/// engine — a broken plan surfaces to the caller rather than silently
/// proceeding into the task graph.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("planner response failed schema validation: {0}")]
    Malformed(String),

    #[error("plan contains no tasks")]
    Empty,

    #[error("duplicate task id in plan: {0}")]
    DuplicateTaskId(String),

    #[error("task {task} depends on unknown task {dependency}")]
    UnknownDependency { task: String, dependency: String },

    #[error("task dependencies contain a cycle through {0}")]
    DependencyCycle(String),

    #[error("planner call failed: {0}")]
    Collaborator(#[source] anyhow::Error),
}

/// Errors from engine configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
