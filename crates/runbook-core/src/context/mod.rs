//! Run-scoped shared state.
//!
//! One [`RunContext`] exists per run and is destroyed after the final audit
//! flush. It is the only shared mutable state: the artifacts index is
//! mutated by the artifact store, the budget by the cost tracker, and step
//! results by the executor; everyone else reads snapshots.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::artifact::ArtifactStore;
use crate::audit::AuditLog;
use crate::cost::CostTracker;
use crate::types::{Policy, RunId, StepId, StepResult, Workflow};

/// Shared state for one run.
pub struct RunContext {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub workflow: Arc<Workflow>,
    /// Effective policy (document policy + overrides).
    pub policy: Policy,
    /// Run inputs (document inputs + caller-supplied overrides).
    pub inputs: BTreeMap<String, Value>,
    pub cost: Arc<CostTracker>,
    pub artifacts: Arc<ArtifactStore>,
    pub audit: Arc<AuditLog>,
    cancel: CancellationToken,
    results: RwLock<BTreeMap<StepId, StepResult>>,
}

impl RunContext {
    pub fn new(
        run_id: RunId,
        workflow: Arc<Workflow>,
        policy: Policy,
        inputs: BTreeMap<String, Value>,
        cost: Arc<CostTracker>,
        artifacts: Arc<ArtifactStore>,
        audit: Arc<AuditLog>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            workflow,
            policy,
            inputs,
            cost,
            artifacts,
            audit,
            cancel,
            results: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Child token handed to in-flight adapter calls.
    pub fn child_cancel_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    /// Record the terminal result for a step. Only the executor calls this,
    /// once per step.
    pub async fn record_result(&self, result: StepResult) {
        self.results.write().await.insert(result.step_id.clone(), result);
    }

    pub async fn result(&self, step_id: &StepId) -> Option<StepResult> {
        self.results.read().await.get(step_id).cloned()
    }

    pub async fn results_snapshot(&self) -> BTreeMap<StepId, StepResult> {
        self.results.read().await.clone()
    }
}
