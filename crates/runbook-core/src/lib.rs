//! # Runbook Core
//!
//! Deterministic, schema-driven workflow orchestration kernel.
//!
//! This crate contains:
//! - Workflow / Step / Gate / Policy definitions and the schema validator
//! - Loader and planner (DAG build, ranks, predicate parsing)
//! - Adapter contract, registry, and the cost/policy-aware router
//! - Executor state machine with budget tracking and gate verification
//! - Append-only audit log and the run-scoped artifact store
//!
//! This crate does NOT care about:
//! - Concrete adapter internals (linters, AI clients, editors)
//! - Command-line parsing or environment handling
//! - Git, PR, or publishing operations
//! - Any network or service surface

pub mod adapter;
pub mod artifact;
pub mod audit;
pub mod context;
pub mod cost;
pub mod executor;
pub mod plan;
pub mod router;
pub mod schema;
pub mod types;
pub mod verify;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::adapter::AdapterRegistry;
use crate::artifact::{ArtifactError, ArtifactStore};
use crate::audit::{AuditError, AuditLog, FileAuditSink};
use crate::context::RunContext;
use crate::cost::CostTracker;
use crate::executor::Executor;
use crate::plan::{LoadError, PlanError, RunPlan};
use crate::router::Router;
use crate::schema::{SchemaError, SchemaRegistry, ValidationResult};
use crate::types::{
    PolicyOverrides, RunId, RunSummary, Workflow, EXIT_CODE_PLAN_ERROR,
};
use crate::verify::Verifier;

/// Errors surfaced by the top-level orchestration API.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Registry(#[from] adapter::RegistryError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunError {
    /// CLI exit status for errors raised before a run produced a summary.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Load(_) | RunError::Plan(_) | RunError::Schema(_) => EXIT_CODE_PLAN_ERROR,
            _ => 1,
        }
    }
}

/// The orchestration front door: owns the registries and produces runs.
///
/// Adapters and schemas are registered once at startup; each `run` creates a
/// fresh [`RunContext`] under `base_dir` (`artifacts/<run_id>/`,
/// `logs/<run_id>.jsonl`) and destroys it after the final audit flush.
pub struct Runner {
    base_dir: PathBuf,
    schemas: Arc<SchemaRegistry>,
    registry: Arc<AdapterRegistry>,
    router: Arc<Router>,
    verifier: Arc<Verifier>,
}

impl Runner {
    /// Create a runner with the built-in schema set.
    pub fn new(base_dir: impl Into<PathBuf>, registry: AdapterRegistry) -> Self {
        Self::with_schemas(base_dir, registry, SchemaRegistry::with_builtin())
    }

    /// Create a runner with a custom (pre-loaded) schema registry.
    pub fn with_schemas(
        base_dir: impl Into<PathBuf>,
        registry: AdapterRegistry,
        schemas: SchemaRegistry,
    ) -> Self {
        let schemas = Arc::new(schemas);
        let registry = Arc::new(registry);
        Self {
            base_dir: base_dir.into(),
            schemas: schemas.clone(),
            router: Arc::new(Router::new(registry.clone())),
            verifier: Arc::new(Verifier::new(schemas)),
            registry,
        }
    }

    /// Replace the verifier (e.g. after registering custom gate plugins).
    pub fn with_verifier(mut self, verifier: Verifier) -> Self {
        self.verifier = Arc::new(verifier);
        self
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Parse and validate a workflow document (YAML or JSON).
    pub fn load_workflow(&self, source: &str) -> Result<Workflow, LoadError> {
        plan::load_workflow(source, &self.schemas)
    }

    /// Build the run plan for a validated workflow.
    pub fn plan(&self, workflow: &Workflow) -> Result<RunPlan, PlanError> {
        plan::plan(workflow)
    }

    /// Execute a plan to completion.
    pub async fn run(
        &self,
        plan: &RunPlan,
        inputs: BTreeMap<String, Value>,
        overrides: PolicyOverrides,
        cancel: CancellationToken,
    ) -> Result<RunSummary, RunError> {
        let run_id = RunId::generate();
        let policy = overrides.apply(&plan.workflow.policy);

        let artifacts = Arc::new(ArtifactStore::create(&self.base_dir, run_id.clone()).await?);
        let sink = FileAuditSink::for_run(&self.base_dir, &run_id).await?;
        let audit = Arc::new(AuditLog::new(run_id.clone(), Arc::new(sink)));

        let mut merged_inputs = plan.workflow.inputs.clone();
        merged_inputs.extend(inputs);

        tracing::info!(
            run_id = %run_id,
            workflow = %plan.workflow.name,
            steps = plan.len(),
            budget = policy.max_tokens,
            "run starting"
        );

        let cost = Arc::new(CostTracker::new(policy.max_tokens));
        let ctx = RunContext::new(
            run_id,
            Arc::new(plan.workflow.clone()),
            policy,
            merged_inputs,
            cost,
            artifacts,
            audit,
            cancel,
        );

        let executor = Executor::new(
            self.registry.clone(),
            self.router.clone(),
            self.verifier.clone(),
        );
        Ok(executor.execute(plan, &ctx).await)
    }

    /// Load, plan, and run a workflow document in one call.
    pub async fn run_source(
        &self,
        source: &str,
        inputs: BTreeMap<String, Value>,
        overrides: PolicyOverrides,
        cancel: CancellationToken,
    ) -> Result<RunSummary, RunError> {
        let workflow = self.load_workflow(source)?;
        let plan = self.plan(&workflow)?;
        self.run(&plan, inputs, overrides, cancel).await
    }

    /// Validate a JSON artifact file on disk against a named schema.
    pub async fn validate_artifact(
        &self,
        path: impl AsRef<Path>,
        schema_id: &str,
    ) -> Result<ValidationResult, RunError> {
        let bytes = tokio::fs::read(path.as_ref()).await?;
        let document: Value = serde_json::from_slice(&bytes)
            .map_err(|e| RunError::Load(LoadError::Document(e.to_string())))?;
        Ok(self.schemas.validate(&document, schema_id)?)
    }

    /// Path of a run's audit log under this runner's base directory.
    pub fn audit_log_path(&self, run_id: &RunId) -> PathBuf {
        self.base_dir.join("logs").join(format!("{run_id}.jsonl"))
    }
}

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::adapter::{
        Adapter, AdapterDescriptor, AdapterError, AdapterKind, AdapterRegistry, AdapterResult,
        CancellationToken, StepInvocation,
    };
    pub use crate::artifact::{ArtifactStore, StepArtifactWriter};
    pub use crate::audit::{AuditEvent, AuditEventKind, AuditLog, AuditSink, FileAuditSink, MemoryAuditSink};
    pub use crate::context::RunContext;
    pub use crate::cost::{CostReport, CostTracker};
    pub use crate::executor::Executor;
    pub use crate::plan::{load_workflow, plan, PlanNode, RunPlan, WhenPredicate};
    pub use crate::router::{Router, RoutingDecision};
    pub use crate::schema::{SchemaRegistry, ValidationResult};
    pub use crate::types::{
        ActorKind, ArtifactDescriptor, ErrorKind, Gate, GateKind, GateResult, GateSeverity,
        Policy, PolicyOverrides, RunId, RunStatus, RunSummary, Step, StepError, StepId,
        StepResult, StepStatus, Workflow,
    };
    pub use crate::verify::{GateContext, GateOutcome, GatePlugin, Verifier};
    pub use crate::{RunError, Runner};
}

// Re-export key types at crate root.
pub use adapter::{Adapter, AdapterDescriptor, AdapterResult};
pub use plan::WhenPredicate;
pub use router::RoutingDecision;
pub use types::{RunStatus, StepResult, StepStatus};
