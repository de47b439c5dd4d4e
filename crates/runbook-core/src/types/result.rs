//! Run and step result records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::gate::GateSeverity;
use super::ids::{RunId, StepId};

/// Stable error kinds, serialized with the names used in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "SchemaValidationError")]
    SchemaValidation,
    #[serde(rename = "PlanError")]
    Plan,
    #[serde(rename = "NoAdapterAvailable")]
    NoAdapterAvailable,
    #[serde(rename = "BudgetExhausted")]
    BudgetExhausted,
    #[serde(rename = "MissingEmittedArtifact")]
    MissingEmittedArtifact,
    #[serde(rename = "GateFailed")]
    GateFailed,
    #[serde(rename = "AdapterTransient")]
    AdapterTransient,
    #[serde(rename = "AdapterPermanent")]
    AdapterPermanent,
    #[serde(rename = "Timeout")]
    Timeout,
    #[serde(rename = "Cancelled")]
    Cancelled,
    #[serde(rename = "InternalError")]
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::SchemaValidation => "SchemaValidationError",
            ErrorKind::Plan => "PlanError",
            ErrorKind::NoAdapterAvailable => "NoAdapterAvailable",
            ErrorKind::BudgetExhausted => "BudgetExhausted",
            ErrorKind::MissingEmittedArtifact => "MissingEmittedArtifact",
            ErrorKind::GateFailed => "GateFailed",
            ErrorKind::AdapterTransient => "AdapterTransient",
            ErrorKind::AdapterPermanent => "AdapterPermanent",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Internal => "InternalError",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured step error carried in results and audit events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl StepError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
        }
    }
}

/// Terminal step status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
    Skipped,
    Aborted,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
            StepStatus::Aborted => "aborted",
        }
    }
}

/// Outcome of a single evaluated gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    /// Gate kind name (`tests_pass`, `diff_limits`, ...).
    pub kind: String,
    pub passed: bool,
    pub severity: GateSeverity,
    pub details: Value,
}

impl GateResult {
    pub fn passed(kind: impl Into<String>, severity: GateSeverity, details: Value) -> Self {
        Self {
            kind: kind.into(),
            passed: true,
            severity,
            details,
        }
    }

    pub fn failed(kind: impl Into<String>, severity: GateSeverity, details: Value) -> Self {
        Self {
            kind: kind.into(),
            passed: false,
            severity,
            details,
        }
    }

    /// True when this result fails the owning step.
    pub fn blocks(&self) -> bool {
        !self.passed && self.severity == GateSeverity::Block
    }
}

/// Terminal record for one executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: StepId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chosen_adapter: Option<String>,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub tokens_used: u64,
    #[serde(default)]
    pub emitted_paths: Vec<String>,
    #[serde(default)]
    pub gate_report: Vec<GateResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
}

impl StepResult {
    /// Record for a step that was never dispatched.
    pub fn skipped(step_id: StepId, error: Option<StepError>) -> Self {
        Self {
            step_id,
            chosen_adapter: None,
            status: StepStatus::Skipped,
            started_at: None,
            ended_at: None,
            tokens_used: 0,
            emitted_paths: Vec::new(),
            gate_report: Vec::new(),
            error,
        }
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

/// Immutable descriptor for a catalogued artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    /// Relative forward-slash path under the run root.
    pub path: String,
    /// Lowercase hex SHA-256 of the content.
    pub digest: String,
    pub size_bytes: u64,
    pub produced_by: StepId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_hint: Option<String>,
}

/// Terminal run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
    Aborted,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Aborted => "aborted",
        }
    }

    /// CLI exit status mapping.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Succeeded => 0,
            RunStatus::Failed => 1,
            RunStatus::Aborted => 2,
        }
    }
}

/// Exit status for errors raised before a run starts (load/plan failures).
pub const EXIT_CODE_PLAN_ERROR: i32 = 3;

/// Terminal record of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub status: RunStatus,
    pub step_results: BTreeMap<StepId, StepResult>,
    pub artifacts: BTreeMap<String, ArtifactDescriptor>,
    pub tokens_used_total: u64,
    pub budget_remaining: u64,
}

impl RunSummary {
    /// Look up one step's result.
    pub fn step(&self, id: &str) -> Option<&StepResult> {
        self.step_results.get(&StepId::from(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_kind_stable_strings() {
        assert_eq!(
            serde_json::to_value(ErrorKind::SchemaValidation).expect("serialize"),
            json!("SchemaValidationError")
        );
        assert_eq!(
            serde_json::to_value(ErrorKind::GateFailed).expect("serialize"),
            json!("GateFailed")
        );
        assert_eq!(ErrorKind::Internal.as_str(), "InternalError");
    }

    #[test]
    fn test_gate_result_blocks_only_when_block_and_failed() {
        let warn = GateResult::failed("diff_limits", GateSeverity::Warn, Value::Null);
        let block = GateResult::failed("diff_limits", GateSeverity::Block, Value::Null);
        let passing = GateResult::passed("diff_limits", GateSeverity::Block, Value::Null);
        assert!(!warn.blocks());
        assert!(block.blocks());
        assert!(!passing.blocks());
    }

    #[test]
    fn test_run_status_exit_codes() {
        assert_eq!(RunStatus::Succeeded.exit_code(), 0);
        assert_eq!(RunStatus::Failed.exit_code(), 1);
        assert_eq!(RunStatus::Aborted.exit_code(), 2);
        assert_eq!(EXIT_CODE_PLAN_ERROR, 3);
    }

    #[test]
    fn test_step_result_duration() {
        let start = Utc::now();
        let result = StepResult {
            step_id: StepId::from("1.001"),
            chosen_adapter: Some("diag".to_string()),
            status: StepStatus::Succeeded,
            started_at: Some(start),
            ended_at: Some(start + chrono::Duration::milliseconds(42)),
            tokens_used: 0,
            emitted_paths: vec![],
            gate_report: vec![],
            error: None,
        };
        assert_eq!(result.duration_ms(), Some(42));
    }
}
