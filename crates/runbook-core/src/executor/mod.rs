//! Executor module
//!
//! The orchestration state machine:
//! - walks the RunPlan in topological order with a ready set
//! - evaluates `when` predicates before routing
//! - dispatches adapters with timeout, retry, and cooperative cancellation
//! - enforces declared emits, evaluates gates, and drives drain mode
//! - emits the audit trail and produces the RunSummary

use chrono::Utc;
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};

use crate::adapter::{
    Adapter, AdapterErrorKind, AdapterRegistry, AdapterResult, StepInvocation,
};
use crate::artifact::StepArtifactWriter;
use crate::audit::AuditEventKind;
use crate::context::RunContext;
use crate::plan::{PlanNode, RunPlan, WhenPredicate};
use crate::router::{RouteError, Router, RoutingDecision};
use crate::types::{
    ErrorKind, GateResult, RunStatus, RunSummary, Step, StepError, StepId, StepResult, StepStatus,
};
use crate::verify::Verifier;

/// Grace window a cancelled adapter call gets before its result is abandoned.
const CANCELLATION_GRACE: Duration = Duration::from_millis(500);

/// Reported spend beyond `estimate * factor + slack` is logged as a
/// dishonest-looking adapter.
const TOKEN_SOFT_CAP_FACTOR: u64 = 4;
const TOKEN_SOFT_CAP_SLACK: u64 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Pending,
    Running,
    Terminal,
}

/// The orchestration state machine.
pub struct Executor {
    registry: Arc<AdapterRegistry>,
    router: Arc<Router>,
    verifier: Arc<Verifier>,
}

impl Executor {
    pub fn new(registry: Arc<AdapterRegistry>, router: Arc<Router>, verifier: Arc<Verifier>) -> Self {
        Self {
            registry,
            router,
            verifier,
        }
    }

    /// Execute a plan to completion and produce the run summary. The audit
    /// log is flushed and the manifest written before returning.
    pub async fn execute(&self, plan: &RunPlan, ctx: &RunContext) -> RunSummary {
        self.audit(
            ctx,
            AuditEventKind::RunStarted {
                workflow_name: ctx.workflow.name.clone(),
                inputs: ctx.inputs.clone(),
                budget: ctx.cost.initial_budget(),
            },
        )
        .await;

        let mut states: BTreeMap<StepId, NodeState> = plan
            .nodes
            .keys()
            .map(|id| (id.clone(), NodeState::Pending))
            .collect();
        let mut in_flight = FuturesUnordered::new();
        let mut stop_scheduling = false;
        let mut budget_drain = false;
        let mut any_budget_skip = false;
        let mut budget_skip_with_block_gates = false;

        loop {
            let mut made_progress = false;

            if !stop_scheduling && !ctx.is_cancelled() {
                for step_id in self.ready_steps(plan, &states) {
                    if in_flight.len() >= ctx.policy.max_workers.max(1) {
                        break;
                    }
                    let node = match plan.node(&step_id) {
                        Some(node) => node,
                        None => continue,
                    };

                    if let Some(reason) = self.blocked_by_predecessor(node, ctx).await {
                        self.skip_step(ctx, &step_id, reason, None).await;
                        states.insert(step_id, NodeState::Terminal);
                        made_progress = true;
                        continue;
                    }

                    if !self.when_holds(node, ctx).await {
                        self.skip_step(ctx, &step_id, "when predicate false".to_string(), None)
                            .await;
                        states.insert(step_id, NodeState::Terminal);
                        made_progress = true;
                        continue;
                    }

                    let drained = budget_drain || ctx.cost.in_drain_mode();
                    if drained && self.nonzero_minimum_estimate(node) {
                        any_budget_skip = true;
                        if node.step.gates.iter().any(|g| g.is_blocking()) {
                            budget_skip_with_block_gates = true;
                        }
                        self.skip_step(
                            ctx,
                            &step_id,
                            "budget drain mode".to_string(),
                            Some(StepError::new(
                                ErrorKind::BudgetExhausted,
                                "run is in budget drain mode",
                                false,
                            )),
                        )
                        .await;
                        states.insert(step_id, NodeState::Terminal);
                        made_progress = true;
                        continue;
                    }

                    match self
                        .router
                        .route(&node.step, &ctx.policy, ctx.cost.remaining())
                    {
                        Ok(decision) => {
                            self.audit(
                                ctx,
                                AuditEventKind::StepRouted {
                                    step_id: step_id.clone(),
                                    decision: decision.clone(),
                                },
                            )
                            .await;
                            states.insert(step_id.clone(), NodeState::Running);
                            let step = node.step.clone();
                            in_flight.push(async move {
                                let result = self.run_step(step, decision, ctx).await;
                                (step_id, result)
                            });
                            made_progress = true;
                        }
                        Err(e @ RouteError::NoAdapterAvailable { .. }) => {
                            let error =
                                StepError::new(ErrorKind::NoAdapterAvailable, e.to_string(), false);
                            self.fail_unrouted(ctx, &step_id, error).await;
                            states.insert(step_id, NodeState::Terminal);
                            if ctx.policy.fail_fast {
                                stop_scheduling = true;
                            }
                            made_progress = true;
                        }
                        Err(e @ RouteError::BudgetExhausted { .. }) => {
                            budget_drain = true;
                            any_budget_skip = true;
                            if node.step.gates.iter().any(|g| g.is_blocking()) {
                                budget_skip_with_block_gates = true;
                            }
                            self.audit(
                                ctx,
                                AuditEventKind::Error {
                                    step_id: Some(step_id.clone()),
                                    kind: ErrorKind::BudgetExhausted.as_str().to_string(),
                                    message: e.to_string(),
                                },
                            )
                            .await;
                            self.skip_step(
                                ctx,
                                &step_id,
                                e.to_string(),
                                Some(StepError::new(ErrorKind::BudgetExhausted, e.to_string(), false)),
                            )
                            .await;
                            states.insert(step_id, NodeState::Terminal);
                            if ctx.policy.fail_fast {
                                stop_scheduling = true;
                            }
                            made_progress = true;
                        }
                    }
                }
            }

            let all_terminal = states.values().all(|s| *s == NodeState::Terminal);
            if all_terminal && in_flight.is_empty() {
                break;
            }

            if in_flight.is_empty() {
                if ctx.is_cancelled() {
                    self.abort_remaining(ctx, &mut states).await;
                    break;
                }
                if stop_scheduling {
                    self.skip_remaining(ctx, &mut states, "fail_fast stop").await;
                    break;
                }
                if made_progress {
                    continue;
                }
                // No runnable work and nothing terminalized: orchestration bug.
                self.audit(
                    ctx,
                    AuditEventKind::Error {
                        step_id: None,
                        kind: ErrorKind::Internal.as_str().to_string(),
                        message: "no ready steps but plan not complete".to_string(),
                    },
                )
                .await;
                for (id, state) in states.iter_mut() {
                    if *state != NodeState::Terminal {
                        ctx.record_result(StepResult {
                            step_id: id.clone(),
                            chosen_adapter: None,
                            status: StepStatus::Failed,
                            started_at: None,
                            ended_at: None,
                            tokens_used: 0,
                            emitted_paths: Vec::new(),
                            gate_report: Vec::new(),
                            error: Some(StepError::new(
                                ErrorKind::Internal,
                                "unreachable step in plan",
                                false,
                            )),
                        })
                        .await;
                        *state = NodeState::Terminal;
                    }
                }
                break;
            }

            if let Some((step_id, result)) = in_flight.next().await {
                tracing::info!(
                    step_id = %step_id,
                    status = result.status.as_str(),
                    tokens_used = result.tokens_used,
                    "step finished"
                );
                if result.status == StepStatus::Failed && ctx.policy.fail_fast {
                    stop_scheduling = true;
                }
                states.insert(step_id, NodeState::Terminal);
                ctx.record_result(result).await;
            }
        }

        self.finalize(ctx, any_budget_skip, budget_skip_with_block_gates)
            .await
    }

    async fn finalize(
        &self,
        ctx: &RunContext,
        any_budget_skip: bool,
        budget_skip_with_block_gates: bool,
    ) -> RunSummary {
        let step_results = ctx.results_snapshot().await;
        let artifacts = ctx.artifacts.index_snapshot().await;
        let cost = ctx.cost.report();

        let any_failed = step_results.values().any(|r| r.status == StepStatus::Failed);
        let any_succeeded = step_results
            .values()
            .any(|r| r.status == StepStatus::Succeeded);
        let status = if ctx.is_cancelled() {
            RunStatus::Aborted
        } else if any_failed || budget_skip_with_block_gates {
            RunStatus::Failed
        } else if any_budget_skip && !any_succeeded {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        };

        self.audit(
            ctx,
            AuditEventKind::RunEnded {
                status,
                tokens_used_total: cost.tokens_used_total,
                budget_remaining: cost.remaining,
            },
        )
        .await;
        if let Err(e) = ctx.audit.flush().await {
            tracing::error!(error = %e, "audit flush failed");
        }

        let summary = RunSummary {
            run_id: ctx.run_id.clone(),
            status,
            step_results,
            artifacts,
            tokens_used_total: cost.tokens_used_total,
            budget_remaining: cost.remaining,
        };
        if let Err(e) = ctx.artifacts.write_manifest(&summary).await {
            tracing::error!(error = %e, "manifest write failed");
        }
        tracing::info!(
            run_id = %summary.run_id,
            status = summary.status.as_str(),
            tokens_used_total = summary.tokens_used_total,
            "run finished"
        );
        summary
    }

    /// Pending steps whose predecessors are all terminal, in rank order.
    fn ready_steps(&self, plan: &RunPlan, states: &BTreeMap<StepId, NodeState>) -> Vec<StepId> {
        let mut ready: Vec<&PlanNode> = plan
            .nodes
            .values()
            .filter(|node| states.get(&node.step.id) == Some(&NodeState::Pending))
            .filter(|node| {
                node.preds
                    .iter()
                    .all(|pred| states.get(pred) == Some(&NodeState::Terminal))
            })
            .collect();
        ready.sort_by_key(|node| node.rank);
        ready.into_iter().map(|node| node.step.id.clone()).collect()
    }

    /// Reason this step cannot run because a predecessor did not succeed.
    async fn blocked_by_predecessor(&self, node: &PlanNode, ctx: &RunContext) -> Option<String> {
        for pred in &node.preds {
            if let Some(result) = ctx.result(pred).await {
                if result.status != StepStatus::Succeeded {
                    return Some(format!(
                        "predecessor '{}' {}",
                        pred,
                        result.status.as_str()
                    ));
                }
            }
        }
        None
    }

    /// Evaluate the step's `when` predicate against artifacts produced by
    /// its transitive predecessors. Anything outside that view reads as
    /// absent, which keeps the check deterministic under concurrency.
    async fn when_holds(&self, node: &PlanNode, ctx: &RunContext) -> bool {
        match &node.when {
            WhenPredicate::Always => true,
            WhenPredicate::ArtifactExists { path } => ctx
                .artifacts
                .descriptor(path)
                .await
                .map(|d| node.ancestors.contains(&d.produced_by))
                .unwrap_or(false),
            WhenPredicate::ArtifactProperty {
                path,
                pointer,
                equals,
            } => {
                let Some(descriptor) = ctx.artifacts.descriptor(path).await else {
                    return false;
                };
                if !node.ancestors.contains(&descriptor.produced_by) {
                    return false;
                }
                match ctx.artifacts.read_json(path).await {
                    Ok(value) => value.pointer(pointer) == Some(equals),
                    Err(_) => false,
                }
            }
        }
    }

    fn nonzero_minimum_estimate(&self, node: &PlanNode) -> bool {
        self.router
            .minimum_estimate(node.step.actor)
            .map(|min| min > 0)
            .unwrap_or(false)
    }

    async fn skip_step(
        &self,
        ctx: &RunContext,
        step_id: &StepId,
        reason: String,
        error: Option<StepError>,
    ) {
        tracing::debug!(step_id = %step_id, reason = %reason, "step skipped");
        self.audit(
            ctx,
            AuditEventKind::StepSkipped {
                step_id: step_id.clone(),
                reason,
            },
        )
        .await;
        ctx.record_result(StepResult::skipped(step_id.clone(), error))
            .await;
    }

    async fn fail_unrouted(&self, ctx: &RunContext, step_id: &StepId, error: StepError) {
        self.audit(
            ctx,
            AuditEventKind::Error {
                step_id: Some(step_id.clone()),
                kind: error.kind.as_str().to_string(),
                message: error.message.clone(),
            },
        )
        .await;
        ctx.record_result(StepResult {
            step_id: step_id.clone(),
            chosen_adapter: None,
            status: StepStatus::Failed,
            started_at: None,
            ended_at: None,
            tokens_used: 0,
            emitted_paths: Vec::new(),
            gate_report: Vec::new(),
            error: Some(error),
        })
        .await;
    }

    async fn abort_remaining(&self, ctx: &RunContext, states: &mut BTreeMap<StepId, NodeState>) {
        for (id, state) in states.iter_mut() {
            if *state != NodeState::Terminal {
                ctx.record_result(StepResult {
                    step_id: id.clone(),
                    chosen_adapter: None,
                    status: StepStatus::Aborted,
                    started_at: None,
                    ended_at: None,
                    tokens_used: 0,
                    emitted_paths: Vec::new(),
                    gate_report: Vec::new(),
                    error: Some(StepError::new(
                        ErrorKind::Cancelled,
                        "run cancelled before step started",
                        false,
                    )),
                })
                .await;
                *state = NodeState::Terminal;
            }
        }
    }

    async fn skip_remaining(
        &self,
        ctx: &RunContext,
        states: &mut BTreeMap<StepId, NodeState>,
        reason: &str,
    ) {
        let pending: Vec<StepId> = states
            .iter()
            .filter(|(_, state)| **state != NodeState::Terminal)
            .map(|(id, _)| id.clone())
            .collect();
        for id in pending {
            self.skip_step(ctx, &id, reason.to_string(), None).await;
            states.insert(id, NodeState::Terminal);
        }
    }

    /// Run one step through routing, dispatch, emit enforcement, and gates,
    /// retrying per policy.
    async fn run_step(
        &self,
        step: Step,
        mut decision: RoutingDecision,
        ctx: &RunContext,
    ) -> StepResult {
        let step_id = step.id.clone();
        let started_at = Utc::now();
        let max_attempts = ctx.policy.retry.max_attempts;
        let mut attempt: u32 = 1;
        let mut timeout_retries: u32 = 0;
        let mut tokens_total: u64 = 0;

        loop {
            // Retries reuse the routing decision unless the adapter has
            // become unavailable, in which case the router is consulted again.
            let still_available = self
                .registry
                .descriptor(&decision.chosen)
                .map(|d| d.available)
                .unwrap_or(false);
            if !still_available && attempt > 1 {
                match self
                    .router
                    .route(&step, &ctx.policy, ctx.cost.remaining())
                {
                    Ok(new_decision) => {
                        self.audit(
                            ctx,
                            AuditEventKind::StepRouted {
                                step_id: step_id.clone(),
                                decision: new_decision.clone(),
                            },
                        )
                        .await;
                        decision = new_decision;
                    }
                    Err(e) => {
                        let kind = match e {
                            RouteError::NoAdapterAvailable { .. } => ErrorKind::NoAdapterAvailable,
                            RouteError::BudgetExhausted { .. } => ErrorKind::BudgetExhausted,
                        };
                        return self
                            .terminal(
                                &step_id,
                                &decision.chosen,
                                StepStatus::Failed,
                                started_at,
                                tokens_total,
                                Vec::new(),
                                Vec::new(),
                                Some(StepError::new(kind, e.to_string(), false)),
                            )
                            .await;
                    }
                }
            }

            let Some(adapter) = self.registry.lookup(&decision.chosen) else {
                return self
                    .terminal(
                        &step_id,
                        &decision.chosen,
                        StepStatus::Failed,
                        started_at,
                        tokens_total,
                        Vec::new(),
                        Vec::new(),
                        Some(StepError::new(
                            ErrorKind::Internal,
                            format!("routed adapter '{}' is not registered", decision.chosen),
                            false,
                        )),
                    )
                    .await;
            };

            self.audit(
                ctx,
                AuditEventKind::StepStarted {
                    step_id: step_id.clone(),
                    adapter: decision.chosen.clone(),
                },
            )
            .await;
            tracing::info!(
                step_id = %step_id,
                adapter = %decision.chosen,
                attempt,
                "step execution started"
            );
            let attempt_started = Utc::now();

            let estimate = self
                .registry
                .descriptor(&decision.chosen)
                .map(|d| d.estimated_cost)
                .unwrap_or(0);
            let reservation = ctx.cost.reserve(&step_id, estimate);

            let invocation = StepInvocation {
                run_id: ctx.run_id.clone(),
                step_id: step_id.clone(),
                actor: step.actor,
                params: step.with.clone(),
                declared_emits: step.emits.clone(),
                inputs: ctx.inputs.clone(),
                attempt,
            };
            let writer = StepArtifactWriter::new(ctx.artifacts.clone(), step_id.clone());
            let cancel = ctx.child_cancel_token();
            let step_timeout = Duration::from_millis(ctx.policy.step_timeout_ms.max(1));

            enum Attempt {
                Finished(AdapterResult),
                TimedOut,
                Abandoned,
            }

            let grace_cancel = cancel.clone();
            let outcome = tokio::select! {
                finished = timeout(step_timeout, adapter.execute(&invocation, &writer, cancel)) => {
                    match finished {
                        Ok(result) => Attempt::Finished(result),
                        Err(_) => Attempt::TimedOut,
                    }
                }
                _ = async {
                    grace_cancel.cancelled().await;
                    sleep(CANCELLATION_GRACE).await;
                } => Attempt::Abandoned,
            };

            let attempt_ms = (Utc::now() - attempt_started).num_milliseconds().max(0) as u64;

            match outcome {
                Attempt::Abandoned => {
                    // Adapter did not observe cancellation inside the grace
                    // window; its result is discarded.
                    ctx.cost.release(reservation);
                    self.audit(
                        ctx,
                        AuditEventKind::StepEnded {
                            step_id: step_id.clone(),
                            status: StepStatus::Aborted,
                            tokens_used: 0,
                            duration_ms: attempt_ms,
                            emitted: Vec::new(),
                        },
                    )
                    .await;
                    return self
                        .terminal(
                            &step_id,
                            &decision.chosen,
                            StepStatus::Aborted,
                            started_at,
                            tokens_total,
                            Vec::new(),
                            Vec::new(),
                            Some(StepError::new(
                                ErrorKind::Cancelled,
                                "cancellation observed while step was in flight",
                                false,
                            )),
                        )
                        .await;
                }
                Attempt::TimedOut => {
                    ctx.cost.release(reservation);
                    self.audit(
                        ctx,
                        AuditEventKind::StepEnded {
                            step_id: step_id.clone(),
                            status: StepStatus::Failed,
                            tokens_used: 0,
                            duration_ms: attempt_ms,
                            emitted: Vec::new(),
                        },
                    )
                    .await;
                    let can_retry = attempt <= max_attempts && timeout_retries < 1;
                    if can_retry {
                        timeout_retries += 1;
                        sleep(ctx.policy.retry.backoff_for(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return self
                        .terminal(
                            &step_id,
                            &decision.chosen,
                            StepStatus::Failed,
                            started_at,
                            tokens_total,
                            Vec::new(),
                            Vec::new(),
                            Some(StepError::new(
                                ErrorKind::Timeout,
                                format!("step exceeded {}ms timeout", ctx.policy.step_timeout_ms),
                                true,
                            )),
                        )
                        .await;
                }
                Attempt::Finished(result) => {
                    tokens_total = tokens_total.saturating_add(result.tokens_used);
                    let soft_cap = estimate
                        .saturating_mul(TOKEN_SOFT_CAP_FACTOR)
                        .saturating_add(TOKEN_SOFT_CAP_SLACK);
                    if result.tokens_used > soft_cap {
                        tracing::warn!(
                            step_id = %step_id,
                            adapter = %decision.chosen,
                            reported = result.tokens_used,
                            soft_cap,
                            "adapter reported tokens far above its estimate"
                        );
                    }
                    match ctx.cost.settle(reservation, result.tokens_used) {
                        Ok(update) => {
                            self.audit(
                                ctx,
                                AuditEventKind::CostUpdate {
                                    step_id: step_id.clone(),
                                    delta: update.delta,
                                    remaining: update.remaining,
                                },
                            )
                            .await;
                        }
                        Err(e) => {
                            return self
                                .terminal(
                                    &step_id,
                                    &decision.chosen,
                                    StepStatus::Failed,
                                    started_at,
                                    tokens_total,
                                    Vec::new(),
                                    Vec::new(),
                                    Some(StepError::new(ErrorKind::Internal, e.to_string(), false)),
                                )
                                .await;
                        }
                    }

                    if ctx.is_cancelled() {
                        // The adapter observed cancellation (or completed as
                        // it arrived); the run is aborting either way.
                        self.audit(
                            ctx,
                            AuditEventKind::StepEnded {
                                step_id: step_id.clone(),
                                status: StepStatus::Aborted,
                                tokens_used: result.tokens_used,
                                duration_ms: attempt_ms,
                                emitted: Vec::new(),
                            },
                        )
                        .await;
                        return self
                            .terminal(
                                &step_id,
                                &decision.chosen,
                                StepStatus::Aborted,
                                started_at,
                                tokens_total,
                                Vec::new(),
                                Vec::new(),
                                Some(StepError::new(
                                    ErrorKind::Cancelled,
                                    "run cancelled during step execution",
                                    false,
                                )),
                            )
                            .await;
                    }

                    if result.is_ok() {
                        return self
                            .complete_successful_attempt(
                                &step,
                                &decision,
                                ctx,
                                started_at,
                                attempt_started,
                                tokens_total,
                                result.tokens_used,
                            )
                            .await;
                    }

                    let error = result.error.clone().unwrap_or_else(|| {
                        crate::adapter::AdapterError::permanent("adapter failed without detail")
                    });
                    self.audit(
                        ctx,
                        AuditEventKind::StepEnded {
                            step_id: step_id.clone(),
                            status: StepStatus::Failed,
                            tokens_used: result.tokens_used,
                            duration_ms: attempt_ms,
                            emitted: Vec::new(),
                        },
                    )
                    .await;

                    if error.kind == AdapterErrorKind::Transient && attempt <= max_attempts {
                        tracing::debug!(
                            step_id = %step_id,
                            attempt,
                            "transient adapter failure, retrying"
                        );
                        sleep(ctx.policy.retry.backoff_for(attempt)).await;
                        attempt += 1;
                        continue;
                    }

                    let kind = match error.kind {
                        AdapterErrorKind::Transient => ErrorKind::AdapterTransient,
                        AdapterErrorKind::Permanent => ErrorKind::AdapterPermanent,
                        AdapterErrorKind::Budget => ErrorKind::BudgetExhausted,
                    };
                    return self
                        .terminal(
                            &step_id,
                            &decision.chosen,
                            StepStatus::Failed,
                            started_at,
                            tokens_total,
                            Vec::new(),
                            Vec::new(),
                            Some(StepError::new(
                                kind,
                                error.message,
                                error.kind == AdapterErrorKind::Transient,
                            )),
                        )
                        .await;
                }
            }
        }
    }

    /// Emit enforcement and gate evaluation for an attempt that returned ok.
    #[allow(clippy::too_many_arguments)]
    async fn complete_successful_attempt(
        &self,
        step: &Step,
        decision: &RoutingDecision,
        ctx: &RunContext,
        started_at: chrono::DateTime<Utc>,
        attempt_started: chrono::DateTime<Utc>,
        tokens_total: u64,
        attempt_tokens: u64,
    ) -> StepResult {
        let step_id = step.id.clone();
        let index = ctx.artifacts.index_snapshot().await;

        let missing: Vec<&String> = step
            .emits
            .iter()
            .filter(|path| {
                index
                    .get(path.as_str())
                    .map(|d| d.produced_by != step_id)
                    .unwrap_or(true)
            })
            .collect();
        let attempt_ms = (Utc::now() - attempt_started).num_milliseconds().max(0) as u64;

        if !missing.is_empty() {
            let message = format!(
                "adapter reported success without producing: {}",
                missing
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            self.audit(
                ctx,
                AuditEventKind::StepEnded {
                    step_id: step_id.clone(),
                    status: StepStatus::Failed,
                    tokens_used: attempt_tokens,
                    duration_ms: attempt_ms,
                    emitted: Vec::new(),
                },
            )
            .await;
            return self
                .terminal(
                    &step_id,
                    &decision.chosen,
                    StepStatus::Failed,
                    started_at,
                    tokens_total,
                    Vec::new(),
                    Vec::new(),
                    Some(StepError::new(ErrorKind::MissingEmittedArtifact, message, false)),
                )
                .await;
        }

        let emitted: Vec<String> = index
            .values()
            .filter(|d| d.produced_by == step_id)
            .map(|d| d.path.clone())
            .collect();

        let gate_report = self
            .verifier
            .evaluate_step(step, &ctx.artifacts, ctx.cost.report())
            .await;
        if !gate_report.is_empty() {
            self.audit(
                ctx,
                AuditEventKind::GateEvaluated {
                    step_id: step_id.clone(),
                    report: gate_report.clone(),
                },
            )
            .await;
        }

        let blocked: Vec<&GateResult> = gate_report.iter().filter(|g| g.blocks()).collect();
        let (status, error) = if blocked.is_empty() {
            (StepStatus::Succeeded, None)
        } else {
            let names: Vec<&str> = blocked.iter().map(|g| g.kind.as_str()).collect();
            (
                StepStatus::Failed,
                Some(StepError::new(
                    ErrorKind::GateFailed,
                    format!("block gate(s) failed: {}", names.join(", ")),
                    false,
                )),
            )
        };

        let attempt_ms = (Utc::now() - attempt_started).num_milliseconds().max(0) as u64;
        self.audit(
            ctx,
            AuditEventKind::StepEnded {
                step_id: step_id.clone(),
                status,
                tokens_used: attempt_tokens,
                duration_ms: attempt_ms,
                emitted: emitted.clone(),
            },
        )
        .await;

        self.terminal(
            &step_id,
            &decision.chosen,
            status,
            started_at,
            tokens_total,
            emitted,
            gate_report,
            error,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn terminal(
        &self,
        step_id: &StepId,
        adapter: &str,
        status: StepStatus,
        started_at: chrono::DateTime<Utc>,
        tokens_used: u64,
        emitted_paths: Vec<String>,
        gate_report: Vec<GateResult>,
        error: Option<StepError>,
    ) -> StepResult {
        StepResult {
            step_id: step_id.clone(),
            chosen_adapter: Some(adapter.to_string()),
            status,
            started_at: Some(started_at),
            ended_at: Some(Utc::now()),
            tokens_used,
            emitted_paths,
            gate_report,
            error,
        }
    }

    async fn audit(&self, ctx: &RunContext, kind: AuditEventKind) {
        if let Err(e) = ctx.audit.append(kind).await {
            tracing::error!(error = %e, "audit append failed");
        }
    }
}
