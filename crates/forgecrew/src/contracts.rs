//! Typed contracts for everything that crosses a component boundary.
//!
//! Model responses are never consumed as free text: each one is decoded into
//! a typed contract before any routing decision, and an undecodable response
//! fails closed — a malformed verdict is an automatic reject, never an
//! implicit pass.

use std::collections::BTreeSet;
use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created by decomposition, not yet executed.
    Pending,
    /// Currently inside `execute_task`.
    InProgress,
    /// A passing consensus was reached — terminal.
    Accepted,
    /// Retry budget or roster exhausted — terminal.
    Locked,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Accepted | Self::Locked)
    }
}

/// A unit of work produced by decomposition.
///
/// `dependencies` must form a DAG over the plan's task ids; the foreman
/// rejects cyclic plans before any task reaches the engine.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Task {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    /// Ordered, checkable completion statements.
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    /// Caller-supplied fallback path used when workspace creation fails.
    #[serde(default)]
    pub workspace_path: Option<PathBuf>,
    #[serde(default = "default_task_status")]
    pub status: TaskStatus,
}

fn default_task_status() -> TaskStatus {
    TaskStatus::Pending
}

/// Output of the foreman's one-shot decomposition.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Plan {
    pub summary: String,
    /// Coarse effort estimate, e.g. "small", "medium", "large".
    pub complexity: String,
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub notes: Vec<String>,
}

/// Usage metrics for one worker attempt.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AttemptMetrics {
    pub tokens_used: u64,
    pub latency_ms: u64,
    pub iterations: u32,
    pub tool_calls: u32,
}

/// Result of one tier's attempt at a task.
///
/// Owned by the tier that produced it; downstream consumers clone, never
/// mutate, after it is returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerAttemptResult {
    pub success: bool,
    pub output: String,
    /// Files the worker reports having touched.
    pub artifacts: Vec<String>,
    pub errors: Vec<String>,
    pub metrics: AttemptMetrics,
}

/// One failed tier in an escalation run. Appended, never removed, for the
/// lifetime of the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRecord {
    pub tier_name: String,
    pub output: String,
    pub feedback: String,
}

/// Severity of an inspector finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Minor,
    Major,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Minor => write!(f, "minor"),
            Self::Major => write!(f, "major"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// A defect reported by the inspector and retired by the surgeon.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Finding {
    pub severity: Severity,
    pub category: String,
    pub file: String,
    #[serde(default)]
    pub line: Option<u32>,
    pub description: String,
    pub suggested_fix: String,
}

/// A surgeon's minimal fix for one finding. The surgeon may only touch the
/// file the finding names; anything else is refused.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SurgeonFix {
    pub file: String,
    pub contents: String,
}

/// Itemized audit trail inside a review verdict.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct AuditLog {
    /// Acceptance criteria the diff satisfies.
    #[serde(default)]
    pub mapped: Vec<String>,
    /// Acceptance criteria the diff misses.
    #[serde(default)]
    pub missing: Vec<String>,
    #[serde(default)]
    pub unplanned_additions: Vec<String>,
    #[serde(default)]
    pub architectural_sins: Vec<String>,
    /// Labels of detected slop patterns; veto-classified labels force
    /// rejection regardless of score.
    #[serde(default)]
    pub slop_patterns_detected: Vec<String>,
}

/// Slop-pattern labels that veto a change unconditionally.
const VETO_PATTERNS: &[&str] = &[
    "hardcoded-secret",
    "required-feature-deletion",
    "unbounded-recursion",
    "injection-vulnerability",
];

/// Whether a slop-pattern label is veto-classified.
///
/// Labels are normalized (case, `_`/space vs `-`) before matching so a
/// reviewer writing `Hardcoded_Secret` still vetoes. Unknown labels are
/// deductions, not vetoes.
pub fn is_veto_pattern(label: &str) -> bool {
    let normalized = label
        .trim()
        .to_ascii_lowercase()
        .replace([' ', '_'], "-");
    VETO_PATTERNS.contains(&normalized.as_str())
}

/// One reviewer seat's scored verdict on a diff.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub task_id: String,
    /// Always within [0, 100].
    pub quality_score: f64,
    pub passed: bool,
    pub audit_log: AuditLog,
    /// Present whenever the verdict is a rejection.
    pub correction_directive: Option<String>,
    /// Content hash of the diff this verdict scored.
    pub verified_hash: String,
}

impl ReviewVerdict {
    /// Whether any veto-classified slop pattern was detected.
    pub fn has_veto(&self) -> bool {
        self.audit_log
            .slop_patterns_detected
            .iter()
            .any(|p| is_veto_pattern(p))
    }

    /// Veto-classified labels present in this verdict.
    pub fn veto_patterns(&self) -> Vec<String> {
        self.audit_log
            .slop_patterns_detected
            .iter()
            .filter(|p| is_veto_pattern(p))
            .cloned()
            .collect()
    }
}

/// Raw reviewer output before invariant enforcement.
#[derive(Debug, Deserialize, JsonSchema)]
struct RawVerdict {
    quality_score: f64,
    passed: bool,
    #[serde(default)]
    audit_log: AuditLog,
    #[serde(default)]
    correction_directive: Option<String>,
}

/// Decode a reviewer response into an invariant-safe verdict.
///
/// Fail-closed: a response that does not decode as strict JSON yields an
/// automatic-reject verdict (score 0, directive explains the failure). After
/// decoding, the pass invariant is re-derived in code — `passed` is true
/// only when the reviewer said so AND `quality_score >= threshold` AND no
/// veto-classified slop pattern is present. A reviewer cannot talk its way
/// past its own findings.
pub fn parse_verdict(raw: &str, task_id: &str, threshold: f64, diff_hash: &str) -> ReviewVerdict {
    let json = extract_json_block(raw).unwrap_or(raw);

    let parsed: RawVerdict = match serde_json::from_str(json) {
        Ok(v) => v,
        Err(e) => {
            return ReviewVerdict {
                task_id: task_id.to_string(),
                quality_score: 0.0,
                passed: false,
                audit_log: AuditLog::default(),
                correction_directive: Some(format!(
                    "reviewer response failed schema validation ({e}); rejected fail-closed"
                )),
                verified_hash: diff_hash.to_string(),
            }
        }
    };

    let score = parsed.quality_score.clamp(0.0, 100.0);
    let veto = parsed
        .audit_log
        .slop_patterns_detected
        .iter()
        .any(|p| is_veto_pattern(p));
    let passed = parsed.passed && score >= threshold && !veto;

    let correction_directive = if passed {
        None
    } else {
        parsed.correction_directive.or_else(|| {
            Some(if veto {
                "veto condition detected; change must be reworked".to_string()
            } else {
                format!("quality score {score:.0} below threshold {threshold:.0}")
            })
        })
    };

    ReviewVerdict {
        task_id: task_id.to_string(),
        quality_score: score,
        passed,
        audit_log: parsed.audit_log,
        correction_directive,
        verified_hash: diff_hash.to_string(),
    }
}

/// Decode an inspector scan into findings.
///
/// Returns `None` when the response does not decode — the cleanup loop
/// treats that as a failed cycle, not as "clean".
pub fn parse_findings(raw: &str) -> Option<Vec<Finding>> {
    let json = extract_json_block(raw).unwrap_or(raw);
    serde_json::from_str(json).ok()
}

/// Decode a surgeon fix. `None` on schema failure — the finding stays open.
pub fn parse_surgeon_fix(raw: &str) -> Option<SurgeonFix> {
    let json = extract_json_block(raw).unwrap_or(raw);
    serde_json::from_str(json).ok()
}

/// Combined outcome of the two reviewer seats.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Consensus {
    pub reviewer_a_score: f64,
    pub reviewer_a_passed: bool,
    pub reviewer_a_feedback: Option<String>,
    pub reviewer_b_score: f64,
    pub reviewer_b_passed: bool,
    pub reviewer_b_feedback: Option<String>,
    pub final_passed: bool,
    /// Concatenated correction directives; populated only on rejection.
    pub combined_feedback: String,
}

/// Report from one cleanup sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanupReport {
    pub cycles_run: u32,
    pub findings_fixed: u32,
    /// Findings whose fix exceeded the size threshold and was handed back
    /// to the worker roster instead of auto-applied.
    pub flagged_for_escalation: Vec<Finding>,
    /// Inspector reported zero findings on the final cycle.
    pub clean: bool,
    /// False when the cycle budget ran out or a scan failed to decode.
    pub complete: bool,
}

/// Terminal artifact of `execute_task`, returned to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolTaskResult {
    pub success: bool,
    /// Escalation history of the final round.
    pub escalations: Vec<EscalationRecord>,
    pub cleanup_report: Option<CleanupReport>,
    pub consensus: Option<Consensus>,
    pub total_tokens_used: u64,
    pub total_cost_usd: f64,
    /// Tier that produced the final output, if any tier succeeded.
    pub active_worker_tier: Option<String>,
    pub output: String,
}

/// Extract a JSON object or array from a response that may wrap it in
/// fencing or prose. Strict decoding still happens on the extracted slice.
pub(crate) fn extract_json_block(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        let body = start + 7;
        if let Some(end) = text[body..].find("```") {
            return Some(text[body..body + end].trim());
        }
    }

    let obj = text.find('{').map(|s| (s, text.rfind('}')));
    let arr = text.find('[').map(|s| (s, text.rfind(']')));
    let candidate = match (obj, arr) {
        (Some((os, Some(oe))), Some((as_, Some(ae)))) => {
            if as_ < os {
                Some((as_, ae))
            } else {
                Some((os, oe))
            }
        }
        (Some((os, Some(oe))), _) => Some((os, oe)),
        (_, Some((as_, Some(ae)))) => Some((as_, ae)),
        _ => None,
    };

    candidate.and_then(|(start, end)| {
        if end > start {
            Some(&text[start..=end])
        } else {
            None
        }
    })
}
