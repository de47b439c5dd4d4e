//! Per-step routing policy engine.
//!
//! Given a step, the active policy, and the remaining budget, the router
//! selects exactly one adapter and records how it got there: every candidate
//! considered, every rejection with its reason, and whether the capability
//! filter had to fall back to the broader set.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::adapter::{AdapterDescriptor, AdapterRegistry};
use crate::types::{ActorKind, Policy, Step, StepId};

/// Routing failures.
#[derive(Debug, Error)]
pub enum RouteError {
    /// No registered, available adapter serves the actor kind. Permanent.
    #[error("no adapter available for actor '{actor}'")]
    NoAdapterAvailable { actor: ActorKind },

    /// Every candidate's estimate exceeds the remaining budget.
    #[error(
        "budget exhausted for step '{step_id}': cheapest candidate costs {cheapest}, {remaining} remaining"
    )]
    BudgetExhausted {
        step_id: StepId,
        cheapest: u64,
        remaining: u64,
    },
}

/// A candidate the router turned down, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedCandidate {
    pub name: String,
    pub reason: String,
}

/// Full record of one routing decision, written to the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub step_id: StepId,
    pub chosen: String,
    /// Every candidate the registry returned for the actor kind.
    pub considered: Vec<String>,
    pub rejected: Vec<RejectedCandidate>,
    /// True when capability filters removed all candidates and the broader
    /// set was used instead.
    pub fallback: bool,
}

/// Aggregated routing statistics for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingStatistics {
    pub total_decisions: u64,
    pub adapter_usage: BTreeMap<String, u64>,
    pub fallback_count: u64,
}

/// Cost/policy-aware adapter selector.
pub struct Router {
    registry: Arc<AdapterRegistry>,
    stats: Mutex<RoutingStatistics>,
}

impl Router {
    pub fn new(registry: Arc<AdapterRegistry>) -> Self {
        Self {
            registry,
            stats: Mutex::new(RoutingStatistics::default()),
        }
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Minimum estimated cost across available candidates for a step's
    /// actor, used by the executor's drain-mode pre-check.
    pub fn minimum_estimate(&self, actor: ActorKind) -> Option<u64> {
        self.registry
            .query(actor, &[], false)
            .into_iter()
            .filter(|d| d.available)
            .map(|d| d.estimated_cost)
            .min()
    }

    /// Select one adapter for the step.
    pub fn route(
        &self,
        step: &Step,
        policy: &Policy,
        remaining_budget: u64,
    ) -> Result<RoutingDecision, RouteError> {
        let candidates = self
            .registry
            .query(step.actor, &[], policy.prefer_deterministic);
        let considered: Vec<String> = candidates.iter().map(|d| d.name.clone()).collect();
        let mut rejected: Vec<RejectedCandidate> = Vec::new();

        let available: Vec<AdapterDescriptor> = candidates
            .into_iter()
            .filter(|d| {
                if d.available {
                    true
                } else {
                    rejected.push(RejectedCandidate {
                        name: d.name.clone(),
                        reason: "unavailable".to_string(),
                    });
                    false
                }
            })
            .collect();
        if available.is_empty() {
            return Err(RouteError::NoAdapterAvailable { actor: step.actor });
        }

        let cheapest = available
            .iter()
            .map(|d| d.estimated_cost)
            .min()
            .unwrap_or(0);
        let affordable: Vec<AdapterDescriptor> = available
            .into_iter()
            .filter(|d| {
                if d.estimated_cost <= remaining_budget {
                    true
                } else {
                    rejected.push(RejectedCandidate {
                        name: d.name.clone(),
                        reason: format!(
                            "estimated cost {} exceeds remaining budget {}",
                            d.estimated_cost, remaining_budget
                        ),
                    });
                    false
                }
            })
            .collect();
        if affordable.is_empty() {
            return Err(RouteError::BudgetExhausted {
                step_id: step.id.clone(),
                cheapest,
                remaining: remaining_budget,
            });
        }

        let preferred: Vec<AdapterDescriptor> = if policy.prefer_deterministic
            && affordable.iter().any(|d| d.is_deterministic())
        {
            affordable
                .into_iter()
                .filter(|d| {
                    if d.is_deterministic() {
                        true
                    } else {
                        rejected.push(RejectedCandidate {
                            name: d.name.clone(),
                            reason: "deterministic adapter preferred".to_string(),
                        });
                        false
                    }
                })
                .collect()
        } else {
            affordable
        };

        let required = required_capabilities(&step.with);
        let (pool, fallback) = if required.is_empty() {
            (preferred, false)
        } else {
            let capable: Vec<AdapterDescriptor> = preferred
                .iter()
                .filter(|d| required.iter().all(|cap| d.capabilities.contains(cap)))
                .cloned()
                .collect();
            if capable.is_empty() {
                // Capability filter eliminated everyone: fall back to the
                // broader set and flag the decision.
                (preferred, true)
            } else {
                for d in &preferred {
                    if !required.iter().all(|cap| d.capabilities.contains(cap)) {
                        rejected.push(RejectedCandidate {
                            name: d.name.clone(),
                            reason: format!("missing capabilities: {}", required.join(", ")),
                        });
                    }
                }
                (capable, false)
            }
        };

        // The registry query is already ranked, and the filters preserved
        // order, so the first survivor is the choice.
        let chosen = match pool.first() {
            Some(descriptor) => descriptor.name.clone(),
            None => return Err(RouteError::NoAdapterAvailable { actor: step.actor }),
        };

        let decision = RoutingDecision {
            step_id: step.id.clone(),
            chosen: chosen.clone(),
            considered,
            rejected,
            fallback,
        };
        tracing::debug!(
            step_id = %decision.step_id,
            chosen = %decision.chosen,
            fallback = decision.fallback,
            "routing decision"
        );
        self.record(&decision);
        Ok(decision)
    }

    /// Routing statistics accumulated so far.
    pub fn statistics(&self) -> RoutingStatistics {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, decision: &RoutingDecision) {
        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        stats.total_decisions += 1;
        *stats.adapter_usage.entry(decision.chosen.clone()).or_insert(0) += 1;
        if decision.fallback {
            stats.fallback_count += 1;
        }
    }
}

/// Capability requirements derived from a step's `with` payload.
fn required_capabilities(with: &Value) -> Vec<String> {
    let mut required = Vec::new();
    for key in ["capabilities", "analyzers", "languages"] {
        if let Some(values) = with.get(key).and_then(Value::as_array) {
            for value in values {
                if let Some(tag) = value.as_str() {
                    required.push(tag.to_string());
                }
            }
        }
    }
    required.sort();
    required.dedup();
    required
}
