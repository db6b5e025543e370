//! Escalation ladder — ordered roster of coder tiers, cheapest first.
//!
//! Tiers run strictly in roster order, never skipped, never reordered. Each
//! later tier sees every prior tier's full output and failure feedback from
//! the same run, so it does not repeat known-bad strategies. A tier fails
//! when its build/test verification command fails; the final tier failing
//! ends the attempt, not necessarily the task — the orchestrator may start
//! another round back at tier 1.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{info, warn};

use crate::bridges::{ChatMessage, CompletionLimits, ModelClient, ToolExecutor};
use crate::config::TierSpec;
use crate::contracts::{AttemptMetrics, EscalationRecord, Task, WorkerAttemptResult};
use crate::cost::CostTracker;
use crate::events::{EngineEvent, EventBus};
use crate::prompts;

/// Keep only this much of a failing verification's output as feedback.
const FEEDBACK_TAIL_CHARS: usize = 2000;

/// Result of one full ladder run.
#[derive(Debug, Clone)]
pub struct LadderOutcome {
    pub success: bool,
    /// Tier that produced the accepted output, when one succeeded.
    pub active_tier: Option<String>,
    pub output: String,
    /// One record per failed tier, in roster order.
    pub escalations: Vec<EscalationRecord>,
}

pub struct EscalationLadder {
    client: Arc<dyn ModelClient>,
    executor: Arc<dyn ToolExecutor>,
    roster: Vec<TierSpec>,
    verify_command: String,
    cost: Arc<CostTracker>,
    bus: Arc<EventBus>,
}

impl EscalationLadder {
    pub fn new(
        client: Arc<dyn ModelClient>,
        executor: Arc<dyn ToolExecutor>,
        roster: Vec<TierSpec>,
        verify_command: String,
        cost: Arc<CostTracker>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            client,
            executor,
            roster,
            verify_command,
            cost,
            bus,
        }
    }

    /// Run the roster against a task inside its workspace.
    ///
    /// `prior_round_feedback` is the previous outer round's review feedback,
    /// if any; escalation history never crosses rounds.
    pub async fn run(
        &self,
        task: &Task,
        workspace: &Path,
        project_context: &str,
        prior_round_feedback: Option<&str>,
        round: u32,
    ) -> LadderOutcome {
        let mut escalations: Vec<EscalationRecord> = Vec::new();

        for tier in &self.roster {
            self.bus.publish(EngineEvent::WorkerTierActive {
                task_id: task.id.clone(),
                tier: tier.name.clone(),
                round,
                timestamp: Utc::now(),
            });

            let attempt = self
                .attempt_tier(tier, task, workspace, project_context, prior_round_feedback, &escalations)
                .await;

            if attempt.success {
                info!(task = %task.id, tier = %tier.name, "tier verified green");
                return LadderOutcome {
                    success: true,
                    active_tier: Some(tier.name.clone()),
                    output: attempt.output,
                    escalations,
                };
            }

            let feedback = attempt.errors.join("\n");
            warn!(task = %task.id, tier = %tier.name, "tier failed; escalating");
            escalations.push(EscalationRecord {
                tier_name: tier.name.clone(),
                output: attempt.output,
                feedback,
            });
        }

        LadderOutcome {
            success: false,
            active_tier: None,
            output: String::new(),
            escalations,
        }
    }

    /// One tier's attempt: model call, then build/test verification.
    ///
    /// A collaborator failure is a tier failure with the error as feedback;
    /// it never propagates out of the ladder.
    async fn attempt_tier(
        &self,
        tier: &TierSpec,
        task: &Task,
        workspace: &Path,
        project_context: &str,
        prior_round_feedback: Option<&str>,
        escalations: &[EscalationRecord],
    ) -> WorkerAttemptResult {
        let request = build_request(task, project_context, prior_round_feedback, escalations);
        let started = Instant::now();

        let completion = match self
            .client
            .complete(
                &tier.model.model,
                prompts::WORKER_PREAMBLE,
                &[ChatMessage::user(request)],
                CompletionLimits {
                    max_tokens: tier.model.max_tokens,
                    temperature: tier.model.temperature,
                },
            )
            .await
        {
            Ok(c) => c,
            Err(e) => {
                return WorkerAttemptResult {
                    success: false,
                    output: String::new(),
                    artifacts: vec![],
                    errors: vec![format!("worker model call failed: {e}")],
                    metrics: AttemptMetrics {
                        latency_ms: started.elapsed().as_millis() as u64,
                        ..Default::default()
                    },
                }
            }
        };

        self.cost.record(
            &tier.name,
            completion.tokens_used,
            tier.model.cost_of(completion.tokens_used),
        );

        let verification = match self
            .executor
            .run_command(workspace, &self.verify_command)
            .await
        {
            Ok(out) => out,
            Err(e) => {
                return WorkerAttemptResult {
                    success: false,
                    output: completion.text,
                    artifacts: vec![],
                    errors: vec![format!("verification could not run: {e}")],
                    metrics: AttemptMetrics {
                        tokens_used: completion.tokens_used,
                        latency_ms: started.elapsed().as_millis() as u64,
                        iterations: 1,
                        tool_calls: 1,
                    },
                }
            }
        };

        let metrics = AttemptMetrics {
            tokens_used: completion.tokens_used,
            latency_ms: started.elapsed().as_millis() as u64,
            iterations: 1,
            tool_calls: 1,
        };

        if verification.success() {
            WorkerAttemptResult {
                success: true,
                output: completion.text,
                artifacts: vec![],
                errors: vec![],
                metrics,
            }
        } else {
            let mut detail = verification.stderr;
            if detail.trim().is_empty() {
                detail = verification.stdout;
            }
            WorkerAttemptResult {
                success: false,
                output: completion.text,
                artifacts: vec![],
                errors: vec![format!(
                    "verification failed (exit {}): {}",
                    verification.exit_code,
                    tail(&detail, FEEDBACK_TAIL_CHARS)
                )],
                metrics,
            }
        }
    }
}

/// Build the worker request, appending prior-round review feedback and this
/// run's escalation history so later tiers see every known-bad strategy.
fn build_request(
    task: &Task,
    project_context: &str,
    prior_round_feedback: Option<&str>,
    escalations: &[EscalationRecord],
) -> String {
    let mut request = format!(
        "## Task {}\n{}\n\n## Acceptance criteria\n{}\n\n## Project context\n{}",
        task.id,
        task.description,
        task.acceptance_criteria.join("\n"),
        project_context,
    );

    if let Some(feedback) = prior_round_feedback {
        request.push_str(&format!(
            "\n\n## Review feedback from the previous round\n{feedback}"
        ));
    }

    for record in escalations {
        request.push_str(&format!(
            "\n\n## Failed attempt by tier `{}` (do not repeat this strategy)\n\
             ### Output\n{}\n### Failure\n{}",
            record.tier_name, record.output, record.feedback
        ));
    }

    request
}

fn tail(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth_back(max_chars.saturating_sub(1)) {
        Some((idx, _)) if text.len() > max_chars => &text[idx..],
        _ => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridges::{CommandOutput, Completion};
    use crate::config::ModelSpec;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Records every request and replays canned responses in order.
    struct ScriptedClient {
        responses: Mutex<Vec<String>>,
        requests: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        fn new(responses: &[&str]) -> Self {
            let mut queue: Vec<String> = responses.iter().map(|s| s.to_string()).collect();
            queue.reverse();
            Self {
                responses: Mutex::new(queue),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedClient {
        async fn complete(
            &self,
            _model: &str,
            _preamble: &str,
            messages: &[ChatMessage],
            _limits: CompletionLimits,
        ) -> Result<Completion> {
            self.requests
                .lock()
                .unwrap()
                .push(messages[0].content.clone());
            let text = self
                .responses
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| anyhow::anyhow!("script exhausted"))?;
            Ok(Completion {
                text,
                tokens_used: 50,
            })
        }
    }

    /// Replays canned verification exit codes in order.
    struct ScriptedExecutor {
        exit_codes: Mutex<Vec<i32>>,
    }

    impl ScriptedExecutor {
        fn new(exit_codes: &[i32]) -> Self {
            let mut queue = exit_codes.to_vec();
            queue.reverse();
            Self {
                exit_codes: Mutex::new(queue),
            }
        }
    }

    #[async_trait]
    impl ToolExecutor for ScriptedExecutor {
        async fn read_file(&self, _workspace: &Path, _file: &str) -> Result<String> {
            Ok(String::new())
        }

        async fn write_file(&self, _workspace: &Path, _file: &str, _contents: &str) -> Result<()> {
            Ok(())
        }

        async fn run_command(&self, _workspace: &Path, _command: &str) -> Result<CommandOutput> {
            let code = self.exit_codes.lock().unwrap().pop().unwrap_or(0);
            Ok(CommandOutput {
                exit_code: code,
                stdout: String::new(),
                stderr: if code == 0 {
                    String::new()
                } else {
                    "test failed: expected 2, got 3".into()
                },
            })
        }
    }

    fn roster() -> Vec<TierSpec> {
        ["alpha", "beta", "gamma"]
            .iter()
            .map(|name| TierSpec {
                name: name.to_string(),
                model: ModelSpec {
                    model: format!("model-{name}"),
                    max_tokens: 1024,
                    temperature: 0.2,
                    cost_per_1k_tokens: 0.001,
                },
            })
            .collect()
    }

    fn ladder_with(
        client: Arc<ScriptedClient>,
        executor: Arc<ScriptedExecutor>,
    ) -> (EscalationLadder, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new());
        let ladder = EscalationLadder::new(
            client,
            executor,
            roster(),
            "cargo test --quiet".into(),
            Arc::new(CostTracker::new()),
            Arc::clone(&bus),
        );
        (ladder, bus)
    }

    fn test_task() -> Task {
        Task {
            id: "t-1".into(),
            description: "add the parser".into(),
            dependencies: Default::default(),
            acceptance_criteria: vec!["parses valid input".into()],
            workspace_path: None,
            status: crate::contracts::TaskStatus::InProgress,
        }
    }

    #[tokio::test]
    async fn test_tier_one_clean_pass() {
        let client = Arc::new(ScriptedClient::new(&["implemented the parser"]));
        let executor = Arc::new(ScriptedExecutor::new(&[0]));
        let (ladder, _bus) = ladder_with(Arc::clone(&client), executor);

        let outcome = ladder
            .run(&test_task(), &PathBuf::from("/ws"), "ctx", None, 1)
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.active_tier.as_deref(), Some("alpha"));
        assert!(outcome.escalations.is_empty());
        assert_eq!(outcome.output, "implemented the parser");
    }

    #[tokio::test]
    async fn test_escalation_carries_prior_tier_output() {
        let client = Arc::new(ScriptedClient::new(&["alpha attempt", "beta attempt"]));
        let executor = Arc::new(ScriptedExecutor::new(&[1, 0]));
        let (ladder, _bus) = ladder_with(Arc::clone(&client), executor);

        let outcome = ladder
            .run(&test_task(), &PathBuf::from("/ws"), "ctx", None, 1)
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.active_tier.as_deref(), Some("beta"));
        assert_eq!(outcome.escalations.len(), 1);
        assert_eq!(outcome.escalations[0].tier_name, "alpha");

        // Beta's request must include alpha's full output and failure.
        let requests = client.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].contains("alpha attempt"));
        assert!(requests[1].contains("tier `alpha`"));
        assert!(requests[1].contains("expected 2, got 3"));
        // Alpha's own request has no escalation history.
        assert!(!requests[0].contains("Failed attempt"));
    }

    #[tokio::test]
    async fn test_roster_exhaustion() {
        let client = Arc::new(ScriptedClient::new(&["a", "b", "c"]));
        let executor = Arc::new(ScriptedExecutor::new(&[1, 1, 1]));
        let (ladder, _bus) = ladder_with(Arc::clone(&client), executor);

        let outcome = ladder
            .run(&test_task(), &PathBuf::from("/ws"), "ctx", None, 1)
            .await;

        assert!(!outcome.success);
        assert!(outcome.active_tier.is_none());
        assert_eq!(outcome.escalations.len(), 3);
        let tiers: Vec<&str> = outcome
            .escalations
            .iter()
            .map(|e| e.tier_name.as_str())
            .collect();
        assert_eq!(tiers, vec!["alpha", "beta", "gamma"]);
    }

    #[tokio::test]
    async fn test_model_failure_counts_as_tier_failure() {
        // Only two responses scripted: alpha's call consumes one, beta's
        // call exhausts the script and errors, gamma gets the last one.
        let client = Arc::new(ScriptedClient::new(&["a", "c"]));
        let executor = Arc::new(ScriptedExecutor::new(&[1, 0]));
        let (ladder, _bus) = ladder_with(Arc::clone(&client), executor);

        let outcome = ladder
            .run(&test_task(), &PathBuf::from("/ws"), "ctx", None, 1)
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.active_tier.as_deref(), Some("gamma"));
        assert_eq!(outcome.escalations.len(), 2);
        assert!(outcome.escalations[1]
            .feedback
            .contains("worker model call failed"));
    }

    #[tokio::test]
    async fn test_prior_round_feedback_included() {
        let client = Arc::new(ScriptedClient::new(&["done"]));
        let executor = Arc::new(ScriptedExecutor::new(&[0]));
        let (ladder, _bus) = ladder_with(Arc::clone(&client), executor);

        ladder
            .run(
                &test_task(),
                &PathBuf::from("/ws"),
                "ctx",
                Some("missing error handling in parser"),
                2,
            )
            .await;

        let requests = client.requests.lock().unwrap();
        assert!(requests[0].contains("previous round"));
        assert!(requests[0].contains("missing error handling in parser"));
    }

    #[tokio::test]
    async fn test_tier_active_events_in_roster_order() {
        let client = Arc::new(ScriptedClient::new(&["a", "b", "c"]));
        let executor = Arc::new(ScriptedExecutor::new(&[1, 1, 1]));
        let (ladder, bus) = ladder_with(client, executor);
        let mut sub = bus.subscribe();

        ladder
            .run(&test_task(), &PathBuf::from("/ws"), "ctx", None, 1)
            .await;

        let mut seen = Vec::new();
        while let Some(EngineEvent::WorkerTierActive { tier, .. }) = sub.try_recv() {
            seen.push(tier);
        }
        assert_eq!(seen, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_tail_truncates_long_text() {
        let long = "x".repeat(5000);
        assert_eq!(tail(&long, 100).len(), 100);
        assert_eq!(tail("short", 100), "short");
    }
}
