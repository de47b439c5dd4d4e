//! Workflow document types.
//!
//! A Workflow is the declarative input for a run: named inputs, an execution
//! policy, and an ordered list of steps. It is immutable once loaded.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::gate::Gate;
use super::ids::StepId;

/// Closed set of actor kinds a step may name.
///
/// Unknown values are rejected at deserialization time (strict mode); the
/// router resolves an actor kind to a concrete adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    /// Diagnostic collection (linters, analyzers).
    Diag,
    /// Deterministic code fixers / formatters.
    Fixer,
    /// Test execution and report emission.
    TestRunner,
    /// AI-assisted editing.
    Editor,
    /// AI-assisted analysis.
    Analyst,
    /// Verification / gate evaluation helpers.
    Verifier,
}

impl ActorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorKind::Diag => "diag",
            ActorKind::Fixer => "fixer",
            ActorKind::TestRunner => "test_runner",
            ActorKind::Editor => "editor",
            ActorKind::Analyst => "analyst",
            ActorKind::Verifier => "verifier",
        }
    }
}

impl std::fmt::Display for ActorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry policy for transient adapter failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct RetryPolicy {
    /// Additional attempts after the first (0 disables retries, max 5).
    #[serde(default)]
    pub max_attempts: u32,
    /// Backoff before attempt N+1; the last entry repeats when exhausted.
    #[serde(default)]
    pub backoff_ms: Vec<u64>,
}

impl RetryPolicy {
    /// Backoff before the given retry attempt (1-based). Empty list = none.
    pub fn backoff_for(&self, attempt: u32) -> std::time::Duration {
        if self.backoff_ms.is_empty() || attempt == 0 {
            return std::time::Duration::ZERO;
        }
        let idx = (attempt as usize - 1).min(self.backoff_ms.len() - 1);
        std::time::Duration::from_millis(self.backoff_ms[idx])
    }
}

fn default_max_tokens() -> u64 {
    50_000
}

fn default_true() -> bool {
    true
}

fn default_step_timeout_ms() -> u64 {
    120_000
}

fn default_max_workers() -> usize {
    1
}

/// Run execution policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Policy {
    /// Token/credit budget for the whole run.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u64,
    /// Prefer deterministic adapters when any satisfies the step.
    #[serde(default = "default_true")]
    pub prefer_deterministic: bool,
    /// Abort the run at the first failed step.
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Per-step wall-clock timeout.
    #[serde(default = "default_step_timeout_ms")]
    pub step_timeout_ms: u64,
    /// Worker pool size; 1 means strictly sequential execution.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            prefer_deterministic: true,
            fail_fast: false,
            retry: RetryPolicy::default(),
            step_timeout_ms: default_step_timeout_ms(),
            max_workers: default_max_workers(),
        }
    }
}

/// Partial policy overrides applied on top of a document's policy at run
/// start (e.g. from a front-end flag).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefer_deterministic: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_fast: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,
}

impl PolicyOverrides {
    /// Merge the overrides over a base policy.
    pub fn apply(&self, base: &Policy) -> Policy {
        Policy {
            max_tokens: self.max_tokens.unwrap_or(base.max_tokens),
            prefer_deterministic: self
                .prefer_deterministic
                .unwrap_or(base.prefer_deterministic),
            fail_fast: self.fail_fast.unwrap_or(base.fail_fast),
            retry: base.retry.clone(),
            step_timeout_ms: self.step_timeout_ms.unwrap_or(base.step_timeout_ms),
            max_workers: self.max_workers.unwrap_or(base.max_workers),
        }
    }
}

/// A single unit of work bound to an actor kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Step {
    /// Unique identifier, `N.NNN` form.
    pub id: StepId,
    pub name: String,
    /// Logical worker kind, resolved to an adapter by the router.
    pub actor: ActorKind,
    /// Opaque payload handed to the adapter; only the envelope is validated.
    #[serde(default, rename = "with")]
    pub with: Value,
    /// Relative artifact paths the adapter is expected to produce.
    #[serde(default)]
    pub emits: Vec<String>,
    #[serde(default)]
    pub gates: Vec<Gate>,
    /// Raw predicate spec; parsed into an evaluable form by the planner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<Value>,
    /// `None` = sequential default (previous step); `Some([])` = root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<StepId>>,
}

impl Step {
    /// Create a minimal step for the given actor.
    pub fn new(id: impl Into<StepId>, name: impl Into<String>, actor: ActorKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            actor,
            with: Value::Null,
            emits: Vec::new(),
            gates: Vec::new(),
            when: None,
            depends_on: None,
        }
    }

    pub fn with_params(mut self, with: Value) -> Self {
        self.with = with;
        self
    }

    pub fn with_emits(mut self, emits: Vec<String>) -> Self {
        self.emits = emits;
        self
    }

    pub fn with_gates(mut self, gates: Vec<Gate>) -> Self {
        self.gates = gates;
        self
    }

    pub fn with_depends_on(mut self, deps: Vec<StepId>) -> Self {
        self.depends_on = Some(deps);
        self
    }

    pub fn with_when(mut self, when: Value) -> Self {
        self.when = Some(when);
        self
    }
}

/// The declarative workflow document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Workflow {
    pub name: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,
    #[serde(default)]
    pub policy: Policy,
    pub steps: Vec<Step>,
}

impl Workflow {
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            inputs: BTreeMap::new(),
            policy: Policy::default(),
            steps,
        }
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_inputs(mut self, inputs: BTreeMap<String, Value>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Find a step by ID.
    pub fn get_step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }
}
