//! Foreman — one-shot project decomposition into a dependency-ordered plan.
//!
//! Runs once per project. The planner's JSON is decoded strictly and the
//! resulting dependency graph is checked for cycles; a plan that fails
//! either check is a `PlanError` and never reaches the task graph.

use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use tracing::info;

use crate::bridges::{ChatMessage, CompletionLimits, ModelClient};
use crate::config::ModelSpec;
use crate::contracts::{extract_json_block, Plan};
use crate::cost::CostTracker;
use crate::error::PlanError;
use crate::prompts;

pub struct Foreman {
    client: Arc<dyn ModelClient>,
    spec: ModelSpec,
    cost: Arc<CostTracker>,
}

impl Foreman {
    pub fn new(client: Arc<dyn ModelClient>, spec: ModelSpec, cost: Arc<CostTracker>) -> Self {
        Self { client, spec, cost }
    }

    /// Decompose a project specification into a validated plan.
    ///
    /// No automatic retry: a cyclic or undecodable plan surfaces to the
    /// caller, which owns retry policy.
    pub async fn decompose(
        &self,
        project_idea: &str,
        tech_stack: &str,
        definition_of_done: &str,
    ) -> Result<Plan, PlanError> {
        let request = format!(
            "## Project\n{project_idea}\n\n## Tech stack\n{tech_stack}\n\n\
             ## Definition of done\n{definition_of_done}"
        );

        let completion = self
            .client
            .complete(
                &self.spec.model,
                prompts::FOREMAN_PREAMBLE,
                &[ChatMessage::user(request)],
                CompletionLimits {
                    max_tokens: self.spec.max_tokens,
                    temperature: self.spec.temperature,
                },
            )
            .await
            .map_err(PlanError::Collaborator)?;

        self.cost.record(
            "foreman",
            completion.tokens_used,
            self.spec.cost_of(completion.tokens_used),
        );

        let json = extract_json_block(&completion.text).unwrap_or(&completion.text);
        let plan: Plan =
            serde_json::from_str(json).map_err(|e| PlanError::Malformed(e.to_string()))?;

        validate_plan(&plan)?;

        info!(
            tasks = plan.tasks.len(),
            complexity = %plan.complexity,
            "plan accepted"
        );
        Ok(plan)
    }
}

/// Structural validation of a decoded plan: non-empty, unique ids, known
/// dependencies, and an acyclic dependency graph.
pub fn validate_plan(plan: &Plan) -> Result<(), PlanError> {
    if plan.tasks.is_empty() {
        return Err(PlanError::Empty);
    }

    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for task in &plan.tasks {
        if graph.contains_node(task.id.as_str()) {
            return Err(PlanError::DuplicateTaskId(task.id.clone()));
        }
        graph.add_node(task.id.as_str());
    }

    for task in &plan.tasks {
        for dep in &task.dependencies {
            if !graph.contains_node(dep.as_str()) {
                return Err(PlanError::UnknownDependency {
                    task: task.id.clone(),
                    dependency: dep.clone(),
                });
            }
            graph.add_edge(dep.as_str(), task.id.as_str(), ());
        }
    }

    toposort(&graph, None)
        .map(|_| ())
        .map_err(|cycle| PlanError::DependencyCycle(cycle.node_id().to_string()))
}
