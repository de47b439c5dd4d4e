//! Gate type definitions.
//!
//! Gates are predicates evaluated over a step's emitted artifacts and run
//! state; `block` gates gate step success, `warn` gates are informational.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Gate severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GateSeverity {
    /// Failing the gate fails the step.
    #[default]
    Block,
    /// Failure is recorded but does not fail the step.
    Warn,
}

fn default_test_report() -> String {
    "test_report.json".to_string()
}

fn default_patch_artifact() -> String {
    "patch.diff".to_string()
}

fn default_max_lines() -> u64 {
    500
}

/// Gate variant with its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GateKind {
    /// Read a test-report artifact; require at least one pass and no failures
    /// beyond `allow_failures`.
    TestsPass {
        #[serde(default = "default_test_report")]
        report: String,
        #[serde(default)]
        allow_failures: u64,
    },
    /// Count changed lines in a unified-diff artifact.
    DiffLimits {
        #[serde(default = "default_patch_artifact")]
        patch: String,
        #[serde(default = "default_max_lines")]
        max_lines: u64,
    },
    /// Validate artifacts against a named schema. An empty artifact list
    /// means the step's declared emits.
    SchemaValid {
        schema: String,
        #[serde(default)]
        artifacts: Vec<String>,
    },
    /// Require a path in the run's artifacts index.
    ArtifactExists { path: String },
    /// Delegate to a registered gate plugin.
    Custom {
        plugin: String,
        #[serde(default)]
        params: Value,
    },
}

impl GateKind {
    /// Stable name used in reports and audit payloads.
    pub fn name(&self) -> &'static str {
        match self {
            GateKind::TestsPass { .. } => "tests_pass",
            GateKind::DiffLimits { .. } => "diff_limits",
            GateKind::SchemaValid { .. } => "schema_valid",
            GateKind::ArtifactExists { .. } => "artifact_exists",
            GateKind::Custom { .. } => "custom",
        }
    }
}

/// A gate attached to a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gate {
    #[serde(flatten)]
    pub kind: GateKind,
    #[serde(default)]
    pub severity: GateSeverity,
}

impl Gate {
    pub fn block(kind: GateKind) -> Self {
        Self {
            kind,
            severity: GateSeverity::Block,
        }
    }

    pub fn warn(kind: GateKind) -> Self {
        Self {
            kind,
            severity: GateSeverity::Warn,
        }
    }

    pub fn is_blocking(&self) -> bool {
        self.severity == GateSeverity::Block
    }
}
