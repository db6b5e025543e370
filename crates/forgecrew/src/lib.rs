//! Forgecrew — an autonomous code-change production engine.
//!
//! The engine decomposes a project into a DAG of tasks and drives each task
//! through a production protocol:
//!
//! - **Foreman**: one-shot decomposition into a validated task plan.
//! - **EscalationLadder**: an ordered roster of worker tiers, cheapest
//!   first; each failed tier's output is fed to the next so capable tiers
//!   never repeat a known-bad strategy.
//! - **CleanupCrew**: a bounded inspector/surgeon loop that retires small
//!   mechanical defects before review.
//! - **ReviewCouncil**: two independent reviewer seats scoring the diff
//!   concurrently; acceptance needs consensus and veto findings reject
//!   unconditionally.
//! - **ProtocolOrchestrator**: the per-task state machine composing all of
//!   the above, with workspace isolation and revert-on-reject.
//!
//! LLM access, tool execution, and workspace/git plumbing are external
//! collaborators behind the traits in [`bridges`]. The engine owns no
//! durable on-disk state.

pub mod bridges;
pub mod cleanup;
pub mod config;
pub mod contracts;
pub mod cost;
pub mod council;
pub mod error;
pub mod events;
pub mod foreman;
pub mod ladder;
pub mod orchestrator;
pub mod prompts;
pub mod state_machine;

pub use bridges::{
    ChatMessage, CommandOutput, Completion, CompletionLimits, ModelClient, RepoMapProvider, Role,
    ToolExecutor, WorkspaceManager,
};
pub use config::{ForgeConfig, ModelSpec, TierSpec};
pub use contracts::{
    CleanupReport, Consensus, Finding, Plan, ProtocolTaskResult, ReviewVerdict, Severity, Task,
    TaskStatus,
};
pub use error::{ConfigError, PlanError};
pub use events::{EngineEvent, EventBus, EventSubscription};
pub use orchestrator::{calculate_confidence, Confidence, ConfidenceStatus, ProtocolOrchestrator};
pub use state_machine::{StateMachine, TaskState};
