//! Gate evaluation engine.
//!
//! The verifier turns a step's gates into a [`GateResult`] report. Gate
//! evaluation never raises: a gate that cannot be evaluated (missing
//! artifact, malformed report, unknown plugin) is a failed gate with the
//! failure in its details.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::artifact::ArtifactStore;
use crate::cost::CostReport;
use crate::schema::SchemaRegistry;
use crate::types::{Gate, GateKind, GateResult, Step};

/// Verifier configuration errors.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("gate plugin '{0}' is already registered")]
    DuplicatePlugin(String),
}

/// What a custom gate plugin reports back.
#[derive(Debug, Clone, PartialEq)]
pub struct GateOutcome {
    pub passed: bool,
    pub details: Value,
}

impl GateOutcome {
    pub fn pass(details: Value) -> Self {
        Self {
            passed: true,
            details,
        }
    }

    pub fn fail(details: Value) -> Self {
        Self {
            passed: false,
            details,
        }
    }
}

/// Read-only view custom gates evaluate against.
pub struct GateContext<'a> {
    pub step: &'a Step,
    pub store: &'a ArtifactStore,
    pub cost: CostReport,
}

/// Contract for `custom` gates, discovered by name.
#[async_trait]
pub trait GatePlugin: Send + Sync {
    fn name(&self) -> &str;

    async fn evaluate(&self, params: &Value, ctx: &GateContext<'_>) -> GateOutcome;
}

/// Built-in plugin mirroring the token budget gate: passes while total
/// settled spend stays within `max_tokens`.
pub struct TokenBudgetPlugin;

#[async_trait]
impl GatePlugin for TokenBudgetPlugin {
    fn name(&self) -> &str {
        "token_budget"
    }

    async fn evaluate(&self, params: &Value, ctx: &GateContext<'_>) -> GateOutcome {
        let Some(max_tokens) = params.get("max_tokens").and_then(Value::as_u64) else {
            return GateOutcome::fail(json!({"reason": "missing max_tokens parameter"}));
        };
        let used = ctx.cost.tokens_used_total;
        let details = json!({"tokens_used": used, "max_tokens": max_tokens});
        if used <= max_tokens {
            GateOutcome::pass(details)
        } else {
            GateOutcome::fail(details)
        }
    }
}

/// Gate evaluation engine.
pub struct Verifier {
    schemas: Arc<SchemaRegistry>,
    plugins: BTreeMap<String, Arc<dyn GatePlugin>>,
}

impl Verifier {
    /// Create a verifier with the built-in plugin set.
    pub fn new(schemas: Arc<SchemaRegistry>) -> Self {
        let mut verifier = Self {
            schemas,
            plugins: BTreeMap::new(),
        };
        verifier
            .register_plugin(Arc::new(TokenBudgetPlugin))
            .expect("builtin plugin set has no duplicates");
        verifier
    }

    /// Register a custom gate plugin.
    pub fn register_plugin(&mut self, plugin: Arc<dyn GatePlugin>) -> Result<(), VerifyError> {
        let name = plugin.name().to_string();
        if self.plugins.contains_key(&name) {
            return Err(VerifyError::DuplicatePlugin(name));
        }
        self.plugins.insert(name, plugin);
        Ok(())
    }

    /// Evaluate all of a step's gates and produce its report.
    pub async fn evaluate_step(
        &self,
        step: &Step,
        store: &ArtifactStore,
        cost: CostReport,
    ) -> Vec<GateResult> {
        let mut report = Vec::with_capacity(step.gates.len());
        for gate in &step.gates {
            let outcome = self.evaluate_gate(gate, step, store, &cost).await;
            tracing::debug!(
                step_id = %step.id,
                gate = gate.kind.name(),
                passed = outcome.passed,
                "gate evaluated"
            );
            report.push(GateResult {
                kind: gate.kind.name().to_string(),
                passed: outcome.passed,
                severity: gate.severity,
                details: outcome.details,
            });
        }
        report
    }

    async fn evaluate_gate(
        &self,
        gate: &Gate,
        step: &Step,
        store: &ArtifactStore,
        cost: &CostReport,
    ) -> GateOutcome {
        match &gate.kind {
            GateKind::TestsPass {
                report,
                allow_failures,
            } => self.evaluate_tests_pass(report, *allow_failures, store).await,
            GateKind::DiffLimits { patch, max_lines } => {
                evaluate_diff_limits(patch, *max_lines, store).await
            }
            GateKind::SchemaValid { schema, artifacts } => {
                let targets: &[String] = if artifacts.is_empty() {
                    &step.emits
                } else {
                    artifacts
                };
                self.evaluate_schema_valid(schema, targets, store).await
            }
            GateKind::ArtifactExists { path } => {
                if store.contains(path).await {
                    GateOutcome::pass(json!({"path": path}))
                } else {
                    GateOutcome::fail(json!({"path": path, "reason": "not in artifacts index"}))
                }
            }
            GateKind::Custom { plugin, params } => {
                let Some(implementation) = self.plugins.get(plugin) else {
                    return GateOutcome::fail(json!({
                        "plugin": plugin,
                        "reason": "unknown gate plugin",
                    }));
                };
                let ctx = GateContext {
                    step,
                    store,
                    cost: cost.clone(),
                };
                implementation.evaluate(params, &ctx).await
            }
        }
    }

    async fn evaluate_tests_pass(
        &self,
        report_path: &str,
        allow_failures: u64,
        store: &ArtifactStore,
    ) -> GateOutcome {
        let report = match store.read_json(report_path).await {
            Ok(value) => value,
            Err(e) => {
                return GateOutcome::fail(json!({
                    "report": report_path,
                    "reason": e.to_string(),
                }))
            }
        };

        if let Ok(result) = self.schemas.validate(&report, "test_report") {
            if !result.is_ok() {
                return GateOutcome::fail(json!({
                    "report": report_path,
                    "reason": "report does not match test_report schema",
                    "errors": result.errors().iter().map(|e| e.message.clone()).collect::<Vec<_>>(),
                }));
            }
        }

        let pass_count = report.get("pass_count").and_then(Value::as_u64).unwrap_or(0);
        let failures = report.get("failures").and_then(Value::as_u64).unwrap_or(u64::MAX);
        let details = json!({
            "report": report_path,
            "pass_count": pass_count,
            "failures": failures,
            "allow_failures": allow_failures,
        });
        if pass_count >= 1 && failures <= allow_failures {
            GateOutcome::pass(details)
        } else {
            GateOutcome::fail(details)
        }
    }

    async fn evaluate_schema_valid(
        &self,
        schema: &str,
        artifacts: &[String],
        store: &ArtifactStore,
    ) -> GateOutcome {
        let mut failures = Vec::new();
        for path in artifacts {
            let document = match store.read_json(path).await {
                Ok(value) => value,
                Err(e) => {
                    failures.push(json!({"artifact": path, "reason": e.to_string()}));
                    continue;
                }
            };
            match self.schemas.validate(&document, schema) {
                Ok(result) if result.is_ok() => {}
                Ok(result) => failures.push(json!({
                    "artifact": path,
                    "errors": result
                        .errors()
                        .iter()
                        .map(|e| json!({"path": e.path, "message": e.message}))
                        .collect::<Vec<_>>(),
                })),
                Err(e) => failures.push(json!({"artifact": path, "reason": e.to_string()})),
            }
        }

        let details = json!({
            "schema": schema,
            "artifacts": artifacts,
            "failures": failures,
        });
        if failures.is_empty() {
            GateOutcome::pass(details)
        } else {
            GateOutcome::fail(details)
        }
    }
}

/// Count changed lines in a unified diff, excluding file headers and hunk
/// markers, and compare against the limit.
async fn evaluate_diff_limits(patch: &str, max_lines: u64, store: &ArtifactStore) -> GateOutcome {
    let body = match store.read_text(patch).await {
        Ok(text) => text,
        Err(e) => {
            return GateOutcome::fail(json!({"patch": patch, "reason": e.to_string()}));
        }
    };

    let changed_lines = count_changed_lines(&body);
    let details = json!({
        "patch": patch,
        "changed_lines": changed_lines,
        "max_lines": max_lines,
    });
    if changed_lines <= max_lines {
        GateOutcome::pass(details)
    } else {
        GateOutcome::fail(details)
    }
}

fn count_changed_lines(diff: &str) -> u64 {
    diff.lines()
        .filter(|line| {
            (line.starts_with('+') && !line.starts_with("+++"))
                || (line.starts_with('-') && !line.starts_with("---"))
        })
        .count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActorKind, Gate, GateSeverity, RunId, StepId};

    async fn fixture() -> (tempfile::TempDir, Arc<ArtifactStore>, Verifier) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(
            ArtifactStore::create(dir.path(), RunId::new("run-v"))
                .await
                .expect("store"),
        );
        let verifier = Verifier::new(Arc::new(SchemaRegistry::with_builtin()));
        (dir, store, verifier)
    }

    fn step_with(gates: Vec<Gate>) -> Step {
        Step::new("1.001", "verify me", ActorKind::Diag).with_gates(gates)
    }

    fn empty_cost() -> CostReport {
        CostReport {
            initial_budget: 1_000,
            tokens_used_total: 0,
            remaining: 1_000,
            drain_mode: false,
            per_step: Default::default(),
        }
    }

    #[test]
    fn test_count_changed_lines_excludes_headers() {
        let diff = "\
--- a/src/lib.rs
+++ b/src/lib.rs
@@ -1,3 +1,4 @@
 fn main() {
-    println!(\"old\");
+    println!(\"new\");
+    // extra
 }
";
        assert_eq!(count_changed_lines(diff), 3);
    }

    #[tokio::test]
    async fn test_tests_pass_gate_requires_clean_report() {
        let (_dir, store, verifier) = fixture().await;
        store
            .write_json(
                &StepId::from("1.001"),
                "test_report.json",
                &json!({"pass_count": 12, "failures": 0}),
            )
            .await
            .expect("write");

        let step = step_with(vec![Gate::block(GateKind::TestsPass {
            report: "test_report.json".to_string(),
            allow_failures: 0,
        })]);
        let report = verifier.evaluate_step(&step, &store, empty_cost()).await;
        assert_eq!(report.len(), 1);
        assert!(report[0].passed);
    }

    #[tokio::test]
    async fn test_tests_pass_gate_fails_on_failures() {
        let (_dir, store, verifier) = fixture().await;
        store
            .write_json(
                &StepId::from("1.001"),
                "test_report.json",
                &json!({"pass_count": 10, "failures": 2}),
            )
            .await
            .expect("write");

        let step = step_with(vec![Gate::block(GateKind::TestsPass {
            report: "test_report.json".to_string(),
            allow_failures: 0,
        })]);
        let report = verifier.evaluate_step(&step, &store, empty_cost()).await;
        assert!(!report[0].passed);
        assert!(report[0].blocks());
    }

    #[tokio::test]
    async fn test_tests_pass_gate_fails_when_report_missing() {
        let (_dir, store, verifier) = fixture().await;
        let step = step_with(vec![Gate::block(GateKind::TestsPass {
            report: "test_report.json".to_string(),
            allow_failures: 0,
        })]);
        let report = verifier.evaluate_step(&step, &store, empty_cost()).await;
        assert!(!report[0].passed);
    }

    #[tokio::test]
    async fn test_diff_limits_gate_counts_changed_lines() {
        let (_dir, store, verifier) = fixture().await;
        let mut patch = String::from("--- a/f.rs\n+++ b/f.rs\n@@ -1,50 +1,50 @@\n");
        for i in 0..50 {
            patch.push_str(&format!("+line {i}\n"));
        }
        store
            .write(&StepId::from("1.001"), "patch.diff", patch.as_bytes())
            .await
            .expect("write");

        let ok_step = step_with(vec![Gate::block(GateKind::DiffLimits {
            patch: "patch.diff".to_string(),
            max_lines: 200,
        })]);
        let ok = verifier.evaluate_step(&ok_step, &store, empty_cost()).await;
        assert!(ok[0].passed);
        assert_eq!(ok[0].details["changed_lines"], json!(50));

        let tight_step = step_with(vec![Gate::block(GateKind::DiffLimits {
            patch: "patch.diff".to_string(),
            max_lines: 10,
        })]);
        let tight = verifier
            .evaluate_step(&tight_step, &store, empty_cost())
            .await;
        assert!(!tight[0].passed);
    }

    #[tokio::test]
    async fn test_schema_valid_gate_defaults_to_step_emits() {
        let (_dir, store, verifier) = fixture().await;
        store
            .write_json(
                &StepId::from("1.001"),
                "diagnostics.json",
                &json!({"tool": "ruff", "diagnostics": []}),
            )
            .await
            .expect("write");

        let step = step_with(vec![Gate::block(GateKind::SchemaValid {
            schema: "diagnostics".to_string(),
            artifacts: vec![],
        })])
        .with_emits(vec!["diagnostics.json".to_string()]);
        let report = verifier.evaluate_step(&step, &store, empty_cost()).await;
        assert!(report[0].passed);
    }

    #[tokio::test]
    async fn test_schema_valid_gate_rejects_invalid_artifact() {
        let (_dir, store, verifier) = fixture().await;
        store
            .write_json(
                &StepId::from("1.001"),
                "diagnostics.json",
                &json!({"tool": "ruff"}),
            )
            .await
            .expect("write");

        let step = step_with(vec![Gate::block(GateKind::SchemaValid {
            schema: "diagnostics".to_string(),
            artifacts: vec!["diagnostics.json".to_string()],
        })]);
        let report = verifier.evaluate_step(&step, &store, empty_cost()).await;
        assert!(!report[0].passed);
    }

    #[tokio::test]
    async fn test_artifact_exists_gate() {
        let (_dir, store, verifier) = fixture().await;
        store
            .write(&StepId::from("1.001"), "out.json", b"{}")
            .await
            .expect("write");

        let step = step_with(vec![
            Gate::block(GateKind::ArtifactExists {
                path: "out.json".to_string(),
            }),
            Gate::warn(GateKind::ArtifactExists {
                path: "missing.json".to_string(),
            }),
        ]);
        let report = verifier.evaluate_step(&step, &store, empty_cost()).await;
        assert!(report[0].passed);
        assert!(!report[1].passed);
        assert_eq!(report[1].severity, GateSeverity::Warn);
        assert!(!report[1].blocks());
    }

    #[tokio::test]
    async fn test_custom_gate_unknown_plugin_fails() {
        let (_dir, store, verifier) = fixture().await;
        let step = step_with(vec![Gate::block(GateKind::Custom {
            plugin: "does_not_exist".to_string(),
            params: Value::Null,
        })]);
        let report = verifier.evaluate_step(&step, &store, empty_cost()).await;
        assert!(!report[0].passed);
        assert_eq!(report[0].details["reason"], json!("unknown gate plugin"));
    }

    #[tokio::test]
    async fn test_token_budget_plugin() {
        let (_dir, store, verifier) = fixture().await;
        let step = step_with(vec![Gate::block(GateKind::Custom {
            plugin: "token_budget".to_string(),
            params: json!({"max_tokens": 100}),
        })]);

        let under = CostReport {
            tokens_used_total: 80,
            ..empty_cost()
        };
        let over = CostReport {
            tokens_used_total: 180,
            ..empty_cost()
        };
        assert!(verifier.evaluate_step(&step, &store, under).await[0].passed);
        assert!(!verifier.evaluate_step(&step, &store, over).await[0].passed);
    }
}
