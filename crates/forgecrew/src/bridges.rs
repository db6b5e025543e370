//! Collaborator bridges — narrow traits over the systems the engine consumes.
//!
//! The engine never talks to an LLM endpoint, a sandbox, or git directly.
//! Everything external comes in through these traits, which the surrounding
//! system implements and tests replace with scripted fakes. All methods are
//! suspension points; timeouts and cancellation are layered by the caller.

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Role of a chat message sent to a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// A single message in a model conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Generation limits passed with every completion request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CompletionLimits {
    pub max_tokens: u64,
    pub temperature: f32,
}

impl Default for CompletionLimits {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.2,
        }
    }
}

/// A completed model response with its token usage.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub tokens_used: u64,
}

/// LLM completion access. Implementations must tolerate concurrent
/// invocation — the review council calls this from two seats at once.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(
        &self,
        model: &str,
        preamble: &str,
        messages: &[ChatMessage],
        limits: CompletionLimits,
    ) -> Result<Completion>;
}

/// Output of a sandboxed command run.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Sandboxed read/write/run access scoped to one workspace path.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn read_file(&self, workspace: &Path, file: &str) -> Result<String>;

    async fn write_file(&self, workspace: &Path, file: &str, contents: &str) -> Result<()>;

    async fn run_command(&self, workspace: &Path, command: &str) -> Result<CommandOutput>;
}

/// Workspace isolation and diff/revert plumbing (git worktrees in the
/// surrounding system — this core only sees paths, diffs, and identities).
#[async_trait]
pub trait WorkspaceManager: Send + Sync {
    /// Create (or reuse) an isolated workspace under `base` for `label`.
    async fn create(&self, base: &Path, label: &str) -> Result<PathBuf>;

    /// Unified diff of the workspace against its base revision.
    async fn diff(&self, workspace: &Path) -> Result<String>;

    /// Restore the workspace to the content a verified identity denotes.
    async fn revert(&self, workspace: &Path, identity: &str) -> Result<()>;
}

/// Condensed symbol-level summary of a workspace, supplied to reviewers
/// and the inspector as architectural context.
#[async_trait]
pub trait RepoMapProvider: Send + Sync {
    async fn map(&self, workspace: &Path) -> Result<String>;
}
