//! Built-in adapter implementations.
//!
//! These adapters are deliberately small and filesystem-only: they produce
//! well-formed artifacts for the declared emit paths so workflows, gates,
//! and budget behavior can be exercised end to end without wrapping real
//! tools.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use runbook_core::adapter::{
    Adapter, AdapterDescriptor, AdapterError, AdapterKind, AdapterResult, CancellationToken,
    StepInvocation,
};
use runbook_core::artifact::StepArtifactWriter;
use runbook_core::types::ActorKind;

fn params_str(params: &Value, key: &str) -> Option<String> {
    params.get(key).and_then(Value::as_str).map(str::to_string)
}

fn params_u64(params: &Value, key: &str) -> Option<u64> {
    params.get(key).and_then(Value::as_u64)
}

/// Emit a diagnostics artifact for every declared path.
///
/// The diagnostic entries come straight from the step's `with.diagnostics`
/// payload (empty by default), so a workflow can stage any finding set it
/// wants downstream steps to react to.
pub struct StaticDiagnosticsAdapter {
    descriptor: AdapterDescriptor,
}

impl StaticDiagnosticsAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            descriptor: AdapterDescriptor::new(name, AdapterKind::Deterministic, ActorKind::Diag)
                .with_capabilities(["lint"])
                .with_side_effects(["fs_write"]),
        }
    }

    /// Build with a fully customized descriptor (factory use).
    pub fn from_descriptor(descriptor: AdapterDescriptor) -> Self {
        Self { descriptor }
    }
}

impl Default for StaticDiagnosticsAdapter {
    fn default() -> Self {
        Self::new("static_diagnostics")
    }
}

#[async_trait]
impl Adapter for StaticDiagnosticsAdapter {
    fn descriptor(&self) -> AdapterDescriptor {
        self.descriptor.clone()
    }

    async fn execute(
        &self,
        invocation: &StepInvocation,
        artifacts: &StepArtifactWriter,
        _cancel: CancellationToken,
    ) -> AdapterResult {
        let tool = params_str(&invocation.params, "tool").unwrap_or_else(|| "static".to_string());
        let diagnostics = invocation
            .params
            .get("diagnostics")
            .cloned()
            .unwrap_or_else(|| json!([]));
        let body = json!({"tool": tool, "diagnostics": diagnostics});

        let mut emitted = Vec::new();
        for path in &invocation.declared_emits {
            if let Err(e) = artifacts.write_json(path, &body).await {
                return AdapterResult::failed(AdapterError::permanent(e.to_string()));
            }
            emitted.push(path.clone());
        }
        AdapterResult::ok().with_emitted(emitted)
    }
}

/// Emit a unified-diff artifact with a configurable number of changed lines.
pub struct TemplatePatchAdapter {
    descriptor: AdapterDescriptor,
}

impl TemplatePatchAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            descriptor: AdapterDescriptor::new(name, AdapterKind::Deterministic, ActorKind::Fixer)
                .with_side_effects(["fs_write"]),
        }
    }

    /// Build with a fully customized descriptor (factory use).
    pub fn from_descriptor(descriptor: AdapterDescriptor) -> Self {
        Self { descriptor }
    }

    fn render_patch(target: &str, lines: u64) -> String {
        let mut patch = format!("--- a/{target}\n+++ b/{target}\n@@ -0,0 +1,{lines} @@\n");
        for i in 0..lines {
            patch.push_str(&format!("+generated line {i}\n"));
        }
        patch
    }
}

impl Default for TemplatePatchAdapter {
    fn default() -> Self {
        Self::new("template_patch")
    }
}

#[async_trait]
impl Adapter for TemplatePatchAdapter {
    fn descriptor(&self) -> AdapterDescriptor {
        self.descriptor.clone()
    }

    async fn execute(
        &self,
        invocation: &StepInvocation,
        artifacts: &StepArtifactWriter,
        _cancel: CancellationToken,
    ) -> AdapterResult {
        let target = params_str(&invocation.params, "target").unwrap_or_else(|| "src/app.py".to_string());
        let lines = params_u64(&invocation.params, "lines").unwrap_or(50);
        let patch = Self::render_patch(&target, lines);

        let mut emitted = Vec::new();
        for path in &invocation.declared_emits {
            if let Err(e) = artifacts.write(path, patch.as_bytes()).await {
                return AdapterResult::failed(AdapterError::permanent(e.to_string()));
            }
            emitted.push(path.clone());
        }
        AdapterResult::ok().with_emitted(emitted)
    }
}

/// Emit a test-report artifact with configurable counts.
pub struct TestReportAdapter {
    descriptor: AdapterDescriptor,
}

impl TestReportAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            descriptor: AdapterDescriptor::new(name, AdapterKind::Deterministic, ActorKind::TestRunner)
                .with_side_effects(["fs_write"]),
        }
    }

    /// Build with a fully customized descriptor (factory use).
    pub fn from_descriptor(descriptor: AdapterDescriptor) -> Self {
        Self { descriptor }
    }
}

impl Default for TestReportAdapter {
    fn default() -> Self {
        Self::new("test_report_writer")
    }
}

#[async_trait]
impl Adapter for TestReportAdapter {
    fn descriptor(&self) -> AdapterDescriptor {
        self.descriptor.clone()
    }

    async fn execute(
        &self,
        invocation: &StepInvocation,
        artifacts: &StepArtifactWriter,
        _cancel: CancellationToken,
    ) -> AdapterResult {
        let body = json!({
            "pass_count": params_u64(&invocation.params, "pass_count").unwrap_or(1),
            "failures": params_u64(&invocation.params, "failures").unwrap_or(0),
            "skipped": params_u64(&invocation.params, "skipped").unwrap_or(0),
        });

        let mut emitted = Vec::new();
        for path in &invocation.declared_emits {
            if let Err(e) = artifacts.write_json(path, &body).await {
                return AdapterResult::failed(AdapterError::permanent(e.to_string()));
            }
            emitted.push(path.clone());
        }
        AdapterResult::ok().with_emitted(emitted)
    }
}

/// Outcome of one scripted call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScriptedOutcome {
    #[default]
    Ok,
    Transient,
    Permanent,
    Budget,
}

/// One entry in a scripted adapter's call plan.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScriptedCall {
    #[serde(default)]
    pub outcome: ScriptedOutcome,
    #[serde(default)]
    pub tokens: u64,
    /// Delay before responding, to rehearse timeouts and cancellation.
    #[serde(default)]
    pub delay_ms: u64,
    /// Skip writing declared emits even on an ok outcome.
    #[serde(default)]
    pub suppress_emits: bool,
}

/// Scripted adapter for rehearsing runs: each call consumes the next entry
/// in its plan (the last entry repeats once the plan is exhausted).
///
/// On an ok outcome it writes every declared emit path; JSON content can be
/// staged per path via `emit_content`, other paths get a small text body.
pub struct ScriptedAdapter {
    descriptor: AdapterDescriptor,
    calls: Mutex<VecDeque<ScriptedCall>>,
    fallback: ScriptedCall,
    emit_content: BTreeMap<String, Value>,
}

impl ScriptedAdapter {
    pub fn new(descriptor: AdapterDescriptor, calls: Vec<ScriptedCall>) -> Self {
        let fallback = calls.last().cloned().unwrap_or_default();
        Self {
            descriptor,
            calls: Mutex::new(calls.into_iter().collect()),
            fallback,
            emit_content: BTreeMap::new(),
        }
    }

    /// Stage JSON content for specific emit paths.
    pub fn with_emit_content(mut self, content: BTreeMap<String, Value>) -> Self {
        self.emit_content = content;
        self
    }

    fn next_call(&self) -> ScriptedCall {
        let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        calls.pop_front().unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl Adapter for ScriptedAdapter {
    fn descriptor(&self) -> AdapterDescriptor {
        self.descriptor.clone()
    }

    async fn execute(
        &self,
        invocation: &StepInvocation,
        artifacts: &StepArtifactWriter,
        cancel: CancellationToken,
    ) -> AdapterResult {
        let call = self.next_call();

        if call.delay_ms > 0 {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(call.delay_ms)) => {}
                _ = cancel.cancelled() => {
                    return AdapterResult::failed(AdapterError::permanent(
                        "cancelled while executing",
                    ));
                }
            }
        }

        match call.outcome {
            ScriptedOutcome::Transient => AdapterResult::failed(AdapterError::transient(
                "scripted transient failure",
            ))
            .with_tokens(call.tokens),
            ScriptedOutcome::Permanent => AdapterResult::failed(AdapterError::permanent(
                "scripted permanent failure",
            ))
            .with_tokens(call.tokens),
            ScriptedOutcome::Budget => {
                AdapterResult::failed(AdapterError::budget("scripted budget failure"))
                    .with_tokens(call.tokens)
            }
            ScriptedOutcome::Ok => {
                let mut emitted = Vec::new();
                if !call.suppress_emits {
                    for path in &invocation.declared_emits {
                        let write = match self.emit_content.get(path) {
                            Some(content) => artifacts.write_json(path, content).await,
                            None if path.ends_with(".json") => {
                                artifacts
                                    .write_json(
                                        path,
                                        &json!({
                                            "step": invocation.step_id,
                                            "attempt": invocation.attempt,
                                        }),
                                    )
                                    .await
                            }
                            None => {
                                artifacts
                                    .write(path, format!("output of {}\n", invocation.step_id).as_bytes())
                                    .await
                            }
                        };
                        if let Err(e) = write {
                            return AdapterResult::failed(AdapterError::permanent(e.to_string()));
                        }
                        emitted.push(path.clone());
                    }
                }
                AdapterResult::ok()
                    .with_tokens(call.tokens)
                    .with_emitted(emitted)
            }
        }
    }
}
