//! Adapter contract.
//!
//! Adapters are black boxes behind a single trait: given a step invocation
//! and a scoped artifact writer, they do their work and report a structured
//! [`AdapterResult`]. Failures are data, never panics or `Err` — the
//! executor decides what a failure means for the run.

mod registry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

pub use registry::{AdapterRegistry, RegistryError};

// Re-export for adapter implementations.
pub use tokio_util::sync::CancellationToken;

use crate::artifact::StepArtifactWriter;
use crate::types::{ActorKind, RunId, StepId};

/// Whether an adapter is a deterministic tool or an AI service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    Deterministic,
    Ai,
}

/// Registered adapter metadata used by the router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterDescriptor {
    /// Unique adapter name.
    pub name: String,
    pub kind: AdapterKind,
    /// Actor kinds this adapter can serve.
    pub actor_kinds: BTreeSet<ActorKind>,
    /// Capability tags (e.g. languages, analyzers).
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    /// Expected token/credit cost per invocation (0 for deterministic tools).
    pub estimated_cost: u64,
    /// Probed availability.
    pub available: bool,
    /// Declared side effect tags (e.g. `fs_write`).
    #[serde(default)]
    pub side_effects: BTreeSet<String>,
}

impl AdapterDescriptor {
    pub fn new(name: impl Into<String>, kind: AdapterKind, actor: ActorKind) -> Self {
        Self {
            name: name.into(),
            kind,
            actor_kinds: BTreeSet::from([actor]),
            capabilities: BTreeSet::new(),
            estimated_cost: 0,
            available: true,
            side_effects: BTreeSet::new(),
        }
    }

    pub fn with_actor_kinds(mut self, kinds: impl IntoIterator<Item = ActorKind>) -> Self {
        self.actor_kinds = kinds.into_iter().collect();
        self
    }

    pub fn with_capabilities<S: Into<String>>(mut self, caps: impl IntoIterator<Item = S>) -> Self {
        self.capabilities = caps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_estimated_cost(mut self, cost: u64) -> Self {
        self.estimated_cost = cost;
        self
    }

    pub fn with_available(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    pub fn with_side_effects<S: Into<String>>(mut self, tags: impl IntoIterator<Item = S>) -> Self {
        self.side_effects = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn supports_actor(&self, actor: ActorKind) -> bool {
        self.actor_kinds.contains(&actor)
    }

    pub fn is_deterministic(&self) -> bool {
        self.kind == AdapterKind::Deterministic
    }
}

/// Adapter error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterErrorKind {
    /// Retry per policy.
    Transient,
    /// Mark the step failed.
    Permanent,
    /// Surface to the executor to drain the run.
    Budget,
}

/// Structured adapter failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterError {
    pub kind: AdapterErrorKind,
    pub message: String,
}

impl AdapterError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: AdapterErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: AdapterErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn budget(message: impl Into<String>) -> Self {
        Self {
            kind: AdapterErrorKind::Budget,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == AdapterErrorKind::Transient
    }
}

/// Adapter completion status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterStatus {
    Ok,
    Failed,
}

/// Structured result every adapter execution returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterResult {
    pub status: AdapterStatus,
    pub tokens_used: u64,
    /// Relative paths the adapter wrote through its artifact writer.
    #[serde(default)]
    pub emitted_artifacts: Vec<String>,
    /// Structured diagnostics for the audit trail.
    #[serde(default)]
    pub diagnostics: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<AdapterError>,
}

impl AdapterResult {
    pub fn ok() -> Self {
        Self {
            status: AdapterStatus::Ok,
            tokens_used: 0,
            emitted_artifacts: Vec::new(),
            diagnostics: Vec::new(),
            error: None,
        }
    }

    pub fn failed(error: AdapterError) -> Self {
        Self {
            status: AdapterStatus::Failed,
            tokens_used: 0,
            emitted_artifacts: Vec::new(),
            diagnostics: Vec::new(),
            error: Some(error),
        }
    }

    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.tokens_used = tokens;
        self
    }

    pub fn with_emitted<S: Into<String>>(mut self, paths: impl IntoIterator<Item = S>) -> Self {
        self.emitted_artifacts = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Vec<Value>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == AdapterStatus::Ok
    }
}

/// Everything an adapter may know about the step it is executing.
///
/// Adapters never see the run context itself; this envelope plus the scoped
/// artifact writer is their whole world.
#[derive(Debug, Clone)]
pub struct StepInvocation {
    pub run_id: RunId,
    pub step_id: StepId,
    pub actor: ActorKind,
    /// The step's opaque `with` payload.
    pub params: Value,
    /// Paths the step declared it will emit.
    pub declared_emits: Vec<String>,
    /// Workflow-level inputs.
    pub inputs: BTreeMap<String, Value>,
    /// 1-based attempt number (increments on retry).
    pub attempt: u32,
}

/// The adapter contract.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Descriptor snapshot; probed once at registration.
    fn descriptor(&self) -> AdapterDescriptor;

    /// Execute one step. Implementations must write artifacts only through
    /// the provided writer, report tokens honestly, and observe the
    /// cancellation token at their own suspension points.
    async fn execute(
        &self,
        invocation: &StepInvocation,
        artifacts: &StepArtifactWriter,
        cancel: CancellationToken,
    ) -> AdapterResult;
}
