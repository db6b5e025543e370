//! Task state machine — explicit states and legal transition guards.
//!
//! Every `execute_task` run walks this graph: it starts at `Preparing` and
//! terminates at either `Accepted` or `Locked`. The engine loop calls
//! `advance()` to move between states; each call validates the transition
//! and records it in the transition log, so a run can be reconstructed
//! offline from the log alone.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// The set of per-task engine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Creating the isolated workspace and recording the baseline identity.
    Preparing,
    /// A worker tier is producing changes (the escalation ladder runs here).
    Implementing,
    /// The inspector/surgeon crew is cleaning the candidate diff.
    Sweeping,
    /// Both reviewer seats are scoring the diff.
    Reviewing,
    /// Rolling the workspace back after a rejected round.
    Reverting,
    /// Consensus reached — terminal state.
    Accepted,
    /// Round budget or roster exhausted — terminal state.
    Locked,
}

impl TaskState {
    /// Whether this is a terminal state (no further transitions allowed).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Accepted | Self::Locked)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preparing => write!(f, "Preparing"),
            Self::Implementing => write!(f, "Implementing"),
            Self::Sweeping => write!(f, "Sweeping"),
            Self::Reviewing => write!(f, "Reviewing"),
            Self::Reverting => write!(f, "Reverting"),
            Self::Accepted => write!(f, "Accepted"),
            Self::Locked => write!(f, "Locked"),
        }
    }
}

/// Legal transitions between task states.
///
/// ```text
/// Preparing → Implementing
/// Implementing → Sweeping | Reviewing
/// Sweeping → Reviewing
/// Reviewing → Accepted | Reverting
/// Reverting → Implementing
/// any non-terminal → Locked
/// ```
fn is_legal_transition(from: TaskState, to: TaskState) -> bool {
    use TaskState::*;

    // Any non-terminal state can lock.
    if to == Locked && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (Preparing, Implementing)
            // Cleanup is optional; the diff can go straight to review
            | (Implementing, Sweeping)
            | (Implementing, Reviewing)
            | (Sweeping, Reviewing)
            | (Reviewing, Accepted)
            | (Reviewing, Reverting)
            // After reverting: re-enter implementation with reviewer feedback
            | (Reverting, Implementing)
    )
}

/// A single recorded state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: TaskState,
    pub to: TaskState,
    /// Outer round number at the time of transition (0 for pre-loop states).
    pub round: u32,
    /// Milliseconds since the state machine was created.
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Error returned when an illegal transition is attempted.
#[derive(Debug, Clone)]
pub struct IllegalTransition {
    pub from: TaskState,
    pub to: TaskState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Illegal state transition: {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

/// Tracks the current state, enforces legal transitions, and keeps the full
/// transition log for diagnostics.
pub struct StateMachine {
    current: TaskState,
    round: u32,
    created_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl StateMachine {
    /// Create a new state machine starting at `Preparing`.
    pub fn new() -> Self {
        Self {
            current: TaskState::Preparing,
            round: 0,
            created_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> TaskState {
        self.current
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    /// Set the outer round counter (called by the engine loop).
    pub fn set_round(&mut self, round: u32) {
        self.round = round;
    }

    /// Attempt to advance to the next state.
    pub fn advance(&mut self, to: TaskState, reason: Option<&str>) -> Result<(), IllegalTransition> {
        if !is_legal_transition(self.current, to) {
            return Err(IllegalTransition {
                from: self.current,
                to,
            });
        }

        let record = TransitionRecord {
            from: self.current,
            to,
            round: self.round,
            elapsed_ms: self.created_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        };

        tracing::debug!(
            from = %self.current,
            to = %to,
            round = self.round,
            "State transition"
        );

        self.transitions.push(record);
        self.current = to;
        Ok(())
    }

    /// Transition to `Locked` from any non-terminal state.
    pub fn lock(&mut self, reason: &str) -> Result<(), IllegalTransition> {
        self.advance(TaskState::Locked, Some(reason))
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// One-line history string for logs.
    pub fn summary(&self) -> String {
        let states: Vec<String> = self.transitions.iter().map(|t| t.to.to_string()).collect();
        format!(
            "{} -> {} ({}ms, {} transitions)",
            TaskState::Preparing,
            self.current,
            self.created_at.elapsed().as_millis(),
            self.transitions.len(),
        ) + if states.is_empty() {
            String::new()
        } else {
            format!(" [{}]", states.join(" -> "))
        }
        .as_str()
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
