//! Token and dollar accounting across one task's attempt chain.
//!
//! One tracker belongs to one orchestrator instance and is reset at the
//! start of every `execute_task`. The interior lock exists because the two
//! reviewer seats record usage concurrently within a task — the tracker is
//! still not meant to be shared across concurrently-executing tasks.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Point-in-time view of accumulated usage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostSnapshot {
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    /// Per-worker breakdown keyed by tier/role name.
    pub by_worker: BTreeMap<String, WorkerUsage>,
}

/// Usage attributed to one worker role.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct WorkerUsage {
    pub calls: u32,
    pub tokens: u64,
    pub cost_usd: f64,
}

/// Accumulates usage per attempt chain.
#[derive(Debug, Default)]
pub struct CostTracker {
    inner: Mutex<CostSnapshot>,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completion's usage against a worker role.
    pub fn record(&self, worker: &str, tokens: u64, cost_usd: f64) {
        let mut inner = self.inner.lock().expect("cost tracker lock poisoned");
        inner.total_tokens += tokens;
        inner.total_cost_usd += cost_usd;
        let usage = inner.by_worker.entry(worker.to_string()).or_default();
        usage.calls += 1;
        usage.tokens += tokens;
        usage.cost_usd += cost_usd;
    }

    /// Clear all accumulated usage. Called at the start of each task.
    pub fn reset(&self) {
        *self.inner.lock().expect("cost tracker lock poisoned") = CostSnapshot::default();
    }

    pub fn snapshot(&self) -> CostSnapshot {
        self.inner
            .lock()
            .expect("cost tracker lock poisoned")
            .clone()
    }
}
