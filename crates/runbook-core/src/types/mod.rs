//! Type definitions for workflow documents, plans, and results.

mod gate;
mod ids;
mod result;
mod workflow;

pub use gate::{Gate, GateKind, GateSeverity};
pub use ids::{RunId, StepId};
pub use result::{
    ArtifactDescriptor, ErrorKind, GateResult, RunStatus, RunSummary, StepError, StepResult,
    StepStatus, EXIT_CODE_PLAN_ERROR,
};
pub use workflow::{ActorKind, Policy, PolicyOverrides, RetryPolicy, Step, Workflow};
