//! Engine loop — composes the foreman, ladder, cleanup crew, and council
//! into the per-task retry protocol.
//!
//! `execute_task` drives the typed state machine through up to
//! `max_outer_rounds` of implement → sweep → review. Acceptance records the
//! diff's verified identity; rejection reverts the workspace (best-effort)
//! and carries the council's combined feedback into the next round. Roster
//! or round-budget exhaustion locks the task.
//!
//! No durable state: verified identities and verdict history live in memory
//! for the lifetime of one orchestrator instance.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::bridges::{ModelClient, RepoMapProvider, ToolExecutor, WorkspaceManager};
use crate::cleanup::CleanupCrew;
use crate::config::ForgeConfig;
use crate::contracts::{
    CleanupReport, Consensus, EscalationRecord, Plan, ProtocolTaskResult, ReviewVerdict, Task,
    TaskStatus,
};
use crate::cost::CostTracker;
use crate::council::ReviewCouncil;
use crate::error::PlanError;
use crate::events::{EngineEvent, EventBus, EventSubscription};
use crate::foreman::Foreman;
use crate::ladder::EscalationLadder;
use crate::state_machine::{StateMachine, TaskState};

/// Health bands for a task's confidence score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceStatus {
    Healthy,
    Warning,
    Error,
}

/// Recency-weighted confidence over a task's verdict history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Confidence {
    pub score: f64,
    pub status: ConfidenceStatus,
}

/// Weighted average of verdict scores where verdict `i` (oldest first) has
/// weight `i + 1`, so later verdicts dominate. An empty history is healthy.
pub fn calculate_confidence(verdicts: &[ReviewVerdict]) -> Confidence {
    if verdicts.is_empty() {
        return Confidence {
            score: 100.0,
            status: ConfidenceStatus::Healthy,
        };
    }

    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    for (i, verdict) in verdicts.iter().enumerate() {
        let weight = (i + 1) as f64;
        weighted_sum += verdict.quality_score * weight;
        weight_total += weight;
    }
    let score = weighted_sum / weight_total;

    let status = if score >= 85.0 {
        ConfidenceStatus::Healthy
    } else if score >= 70.0 {
        ConfidenceStatus::Warning
    } else {
        ConfidenceStatus::Error
    };

    Confidence { score, status }
}

pub struct ProtocolOrchestrator {
    config: ForgeConfig,
    workspaces: Arc<dyn WorkspaceManager>,
    repo_map: Arc<dyn RepoMapProvider>,
    foreman: Foreman,
    ladder: EscalationLadder,
    cleanup: CleanupCrew,
    council: ReviewCouncil,
    bus: Arc<EventBus>,
    cost: Arc<CostTracker>,
    /// Last accepted diff hash per task id.
    verified: Mutex<HashMap<String, String>>,
    /// Append-only verdict history per task id.
    verdicts: Mutex<HashMap<String, Vec<ReviewVerdict>>>,
}

impl ProtocolOrchestrator {
    pub fn new(
        config: ForgeConfig,
        client: Arc<dyn ModelClient>,
        executor: Arc<dyn ToolExecutor>,
        workspaces: Arc<dyn WorkspaceManager>,
        repo_map: Arc<dyn RepoMapProvider>,
    ) -> Self {
        let bus = Arc::new(EventBus::new());
        let cost = Arc::new(CostTracker::new());

        let foreman = Foreman::new(
            Arc::clone(&client),
            config.foreman.clone(),
            Arc::clone(&cost),
        );
        let ladder = EscalationLadder::new(
            Arc::clone(&client),
            Arc::clone(&executor),
            config.roster.clone(),
            config.verify_command.clone(),
            Arc::clone(&cost),
            Arc::clone(&bus),
        );
        let cleanup = CleanupCrew::new(
            Arc::clone(&client),
            Arc::clone(&executor),
            Arc::clone(&workspaces),
            config.inspector.clone(),
            config.surgeon.clone(),
            config.max_cleanup_cycles,
            config.max_fix_lines,
            Arc::clone(&cost),
        );
        let council = ReviewCouncil::new(
            client,
            config.reviewer.clone(),
            config.quality_threshold,
            config.consensus_required,
            Arc::clone(&cost),
            Arc::clone(&bus),
        );

        Self {
            config,
            workspaces,
            repo_map,
            foreman,
            ladder,
            cleanup,
            council,
            bus,
            cost,
            verified: Mutex::new(HashMap::new()),
            verdicts: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to engine events; drop the handle to unsubscribe.
    pub fn subscribe(&self) -> EventSubscription {
        self.bus.subscribe()
    }

    /// One-shot decomposition of a project idea into a validated task plan.
    pub async fn decompose_project(
        &self,
        project_idea: &str,
        tech_stack: &str,
        definition_of_done: &str,
    ) -> Result<Plan, PlanError> {
        self.foreman
            .decompose(project_idea, tech_stack, definition_of_done)
            .await
    }

    /// Confidence over a task's accumulated verdict history.
    pub fn confidence_for(&self, task_id: &str) -> Confidence {
        let history = self.verdicts.lock().expect("verdict history lock poisoned");
        calculate_confidence(history.get(task_id).map(Vec::as_slice).unwrap_or(&[]))
    }

    /// Run one task to a terminal state.
    ///
    /// Errors only when no workspace can be acquired at all; every other
    /// failure mode ends in a `Locked` result, not an `Err`.
    pub async fn execute_task(
        &self,
        task: &mut Task,
        project_context: &str,
        definition_of_done: &str,
    ) -> Result<ProtocolTaskResult> {
        self.cost.reset();
        let mut machine = StateMachine::new();

        self.bus.publish(EngineEvent::TaskStarted {
            task_id: task.id.clone(),
            round_budget: self.config.max_outer_rounds,
            timestamp: Utc::now(),
        });
        task.status = TaskStatus::InProgress;

        let workspace = self.acquire_workspace(task).await?;
        let baseline = self.baseline_identity(task, &workspace).await;
        machine.advance(TaskState::Implementing, Some("workspace ready"))?;

        let mut prior_feedback: Option<String> = None;
        let mut last_cleanup: Option<CleanupReport> = None;
        let mut last_consensus: Option<Consensus> = None;
        let mut last_escalations: Vec<EscalationRecord> = Vec::new();
        let mut last_tier: Option<String> = None;
        let mut last_output = String::new();

        for round in 1..=self.config.max_outer_rounds {
            machine.set_round(round);
            info!(task_id = %task.id, round, "outer round starting");

            let outcome = self
                .ladder
                .run(
                    task,
                    &workspace,
                    project_context,
                    prior_feedback.as_deref(),
                    round,
                )
                .await;

            if !outcome.success {
                machine.lock("escalation roster exhausted")?;
                return Ok(self.lock_task(
                    task,
                    "escalation roster exhausted",
                    outcome.escalations,
                    last_cleanup,
                    last_consensus,
                    None,
                    outcome.output,
                ));
            }

            let mut diff = match self.workspaces.diff(&workspace).await {
                Ok(d) => d,
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "diff failed; reviewing empty diff");
                    String::new()
                }
            };

            let map = match self.repo_map.map(&workspace).await {
                Ok(m) => m,
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "repo map unavailable");
                    String::new()
                }
            };

            if self.config.cleanup_enabled {
                machine.advance(TaskState::Sweeping, None)?;
                let report = self.cleanup.sweep(&workspace, &diff, &map).await;
                if report.findings_fixed > 0 {
                    // The surgeon changed the workspace; review what is
                    // actually there now.
                    if let Ok(d) = self.workspaces.diff(&workspace).await {
                        diff = d;
                    }
                }
                last_cleanup = Some(report);
            }

            machine.advance(TaskState::Reviewing, None)?;
            let review = self
                .council
                .review(task, &diff, definition_of_done, &map)
                .await;
            self.verdicts
                .lock()
                .expect("verdict history lock poisoned")
                .entry(task.id.clone())
                .or_default()
                .extend(review.verdicts);
            self.publish_cost(task);

            if review.consensus.final_passed {
                machine.advance(TaskState::Accepted, Some("consensus reached"))?;
                let identity = blake3::hash(diff.as_bytes()).to_hex().to_string();
                self.verified
                    .lock()
                    .expect("verified identity lock poisoned")
                    .insert(task.id.clone(), identity);
                task.status = TaskStatus::Accepted;
                self.bus.publish(EngineEvent::TaskCompleted {
                    task_id: task.id.clone(),
                    rounds_used: round,
                    timestamp: Utc::now(),
                });
                info!(task_id = %task.id, round, history = %machine.summary(), "task accepted");

                let snapshot = self.cost.snapshot();
                return Ok(ProtocolTaskResult {
                    success: true,
                    escalations: outcome.escalations,
                    cleanup_report: last_cleanup,
                    consensus: Some(review.consensus),
                    total_tokens_used: snapshot.total_tokens,
                    total_cost_usd: snapshot.total_cost_usd,
                    active_worker_tier: outcome.active_tier,
                    output: outcome.output,
                });
            }

            machine.advance(TaskState::Reverting, Some("consensus failed"))?;
            self.revert_workspace(task, &workspace, &baseline).await;
            prior_feedback = Some(review.consensus.combined_feedback.clone());
            last_consensus = Some(review.consensus);
            last_escalations = outcome.escalations;
            last_tier = outcome.active_tier;
            last_output = outcome.output;
            machine.advance(TaskState::Implementing, Some("retrying with review feedback"))?;
        }

        machine.lock("outer round budget exhausted")?;
        warn!(task_id = %task.id, history = %machine.summary(), "task locked");
        Ok(self.lock_task(
            task,
            "outer round budget exhausted",
            last_escalations,
            last_cleanup,
            last_consensus,
            last_tier,
            last_output,
        ))
    }

    /// Create the task's isolated workspace, falling back to the
    /// caller-supplied path when creation fails.
    async fn acquire_workspace(&self, task: &Task) -> Result<PathBuf> {
        match self
            .workspaces
            .create(&self.config.workspace_base, &task.id)
            .await
        {
            Ok(path) => Ok(path),
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "workspace creation failed; using fallback");
                task.workspace_path
                    .clone()
                    .context("workspace creation failed and the task carries no fallback path")
            }
        }
    }

    /// Identity of the workspace before any worker touches it.
    async fn baseline_identity(&self, task: &Task, workspace: &std::path::Path) -> String {
        let initial = match self.workspaces.diff(workspace).await {
            Ok(d) => d,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "baseline diff failed; hashing empty");
                String::new()
            }
        };
        blake3::hash(initial.as_bytes()).to_hex().to_string()
    }

    /// Roll back to the last verified identity. Best-effort: a failed revert
    /// is logged and surfaced on the bus, never fatal.
    async fn revert_workspace(&self, task: &Task, workspace: &std::path::Path, baseline: &str) {
        let identity = self
            .verified
            .lock()
            .expect("verified identity lock poisoned")
            .get(&task.id)
            .cloned()
            .unwrap_or_else(|| baseline.to_string());

        let success = match self.workspaces.revert(workspace, &identity).await {
            Ok(()) => true,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "revert failed; workspace may retain rejected content");
                false
            }
        };

        self.bus.publish(EngineEvent::WorkspaceReverted {
            task_id: task.id.clone(),
            identity,
            success,
            timestamp: Utc::now(),
        });
    }

    fn publish_cost(&self, task: &Task) {
        let snapshot = self.cost.snapshot();
        self.bus.publish(EngineEvent::CostUpdate {
            task_id: task.id.clone(),
            total_tokens: snapshot.total_tokens,
            total_cost_usd: snapshot.total_cost_usd,
            timestamp: Utc::now(),
        });
    }

    #[allow(clippy::too_many_arguments)]
    fn lock_task(
        &self,
        task: &mut Task,
        reason: &str,
        escalations: Vec<EscalationRecord>,
        cleanup_report: Option<CleanupReport>,
        consensus: Option<Consensus>,
        active_worker_tier: Option<String>,
        output: String,
    ) -> ProtocolTaskResult {
        task.status = TaskStatus::Locked;
        self.bus.publish(EngineEvent::TaskLocked {
            task_id: task.id.clone(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
        self.publish_cost(task);

        let snapshot = self.cost.snapshot();
        ProtocolTaskResult {
            success: false,
            escalations,
            cleanup_report,
            consensus,
            total_tokens_used: snapshot.total_tokens,
            total_cost_usd: snapshot.total_cost_usd,
            active_worker_tier,
            output,
        }
    }
}
