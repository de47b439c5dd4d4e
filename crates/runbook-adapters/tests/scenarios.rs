//! End-to-end workflow scenarios: sequential success, gate failures,
//! budget exhaustion, retries, cancellation, and parallel determinism.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use runbook_adapters::{
    ScriptedAdapter, ScriptedCall, ScriptedOutcome, StaticDiagnosticsAdapter, TemplatePatchAdapter,
};
use runbook_core::adapter::{Adapter, StepInvocation};
use runbook_core::artifact::StepArtifactWriter;
use runbook_core::audit::{AuditEvent, AuditEventKind, FileAuditSink};
use runbook_core::prelude::*;

fn deterministic_registry() -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();
    registry
        .register(Arc::new(StaticDiagnosticsAdapter::default()))
        .expect("register diag");
    registry
        .register(Arc::new(TemplatePatchAdapter::default()))
        .expect("register fixer");
    registry
}

fn ai_editor(calls: Vec<ScriptedCall>, cost: u64) -> Arc<ScriptedAdapter> {
    Arc::new(ScriptedAdapter::new(
        AdapterDescriptor::new("ai_editor", AdapterKind::Ai, ActorKind::Editor)
            .with_estimated_cost(cost),
        calls,
    ))
}

async fn read_log(dir: &tempfile::TempDir, run_id: &RunId) -> Vec<AuditEvent> {
    FileAuditSink::for_run(dir.path(), run_id)
        .await
        .expect("sink")
        .read_all()
        .await
        .expect("read log")
}

fn events_named<'a>(log: &'a [AuditEvent], name: &str) -> Vec<&'a AuditEvent> {
    log.iter().filter(|e| e.kind.name() == name).collect()
}

fn ts_of(log: &[AuditEvent], pred: impl Fn(&AuditEvent) -> bool) -> Option<u64> {
    log.iter().find(|e| pred(e)).map(|e| e.ts)
}

const S1_WORKFLOW: &str = r#"
name: lint-and-fix
policy:
  max_tokens: 1000
  prefer_deterministic: true
steps:
  - id: "1.001"
    name: collect diagnostics
    actor: diag
    emits: [diagnostics.json]
    gates:
      - kind: schema_valid
        schema: diagnostics
  - id: "1.002"
    name: apply fix
    actor: fixer
    with: { lines: 50 }
    emits: [patch.diff]
    gates:
      - kind: diff_limits
        max_lines: 200
"#;

#[tokio::test]
async fn test_s1_sequential_success() {
    let dir = tempfile::tempdir().expect("tempdir");
    let runner = Runner::new(dir.path(), deterministic_registry());

    let summary = runner
        .run_source(
            S1_WORKFLOW,
            BTreeMap::new(),
            PolicyOverrides::default(),
            CancellationToken::new(),
        )
        .await
        .expect("run");

    assert_eq!(summary.status, RunStatus::Succeeded);
    assert_eq!(summary.status.exit_code(), 0);
    assert_eq!(summary.tokens_used_total, 0);
    assert_eq!(summary.budget_remaining, 1000);

    let first = summary.step("1.001").expect("step 1.001");
    let second = summary.step("1.002").expect("step 1.002");
    assert_eq!(first.status, StepStatus::Succeeded);
    assert_eq!(second.status, StepStatus::Succeeded);
    assert!(first.gate_report.iter().all(|g| g.passed));
    assert!(second.gate_report.iter().all(|g| g.passed));
    assert!(summary.artifacts.contains_key("diagnostics.json"));
    assert!(summary.artifacts.contains_key("patch.diff"));

    let log = read_log(&dir, &summary.run_id).await;
    let ended = events_named(&log, "step.ended");
    assert_eq!(ended.len(), 2);
    for event in ended {
        match &event.kind {
            AuditEventKind::StepEnded { emitted, .. } => assert!(!emitted.is_empty()),
            _ => unreachable!(),
        }
    }
}

#[tokio::test]
async fn test_s1_invariants_hold() {
    let dir = tempfile::tempdir().expect("tempdir");
    let runner = Runner::new(dir.path(), deterministic_registry());
    let summary = runner
        .run_source(
            S1_WORKFLOW,
            BTreeMap::new(),
            PolicyOverrides::default(),
            CancellationToken::new(),
        )
        .await
        .expect("run");

    let log = read_log(&dir, &summary.run_id).await;

    // exactly one run.started and one run.ended, and nothing after run.ended
    assert_eq!(events_named(&log, "run.started").len(), 1);
    assert_eq!(events_named(&log, "run.ended").len(), 1);
    assert_eq!(log.last().expect("last event").kind.name(), "run.ended");

    // ts strictly monotonic in file order
    for pair in log.windows(2) {
        assert!(pair[0].ts < pair[1].ts);
    }

    // run.ended totals equal the sum of cost.update deltas
    let delta_sum: u64 = log
        .iter()
        .filter_map(|e| match &e.kind {
            AuditEventKind::CostUpdate { delta, .. } => Some(*delta),
            _ => None,
        })
        .sum();
    match &events_named(&log, "run.ended")[0].kind {
        AuditEventKind::RunEnded {
            tokens_used_total, ..
        } => assert_eq!(*tokens_used_total, delta_sum),
        _ => unreachable!(),
    }

    // every succeeded step's declared emits are catalogued with a digest
    for result in summary.step_results.values() {
        if result.status == StepStatus::Succeeded {
            for path in &result.emitted_paths {
                let descriptor = summary.artifacts.get(path).expect("catalogued");
                assert_eq!(descriptor.digest.len(), 64);
                assert!(descriptor.size_bytes > 0);
            }
        }
    }

    // topological property: 1.001 ended before 1.002 started
    let ended_first = ts_of(&log, |e| {
        matches!(&e.kind, AuditEventKind::StepEnded { step_id, .. } if step_id == &StepId::from("1.001"))
    })
    .expect("1.001 ended");
    let started_second = ts_of(&log, |e| {
        matches!(&e.kind, AuditEventKind::StepStarted { step_id, .. } if step_id == &StepId::from("1.002"))
    })
    .expect("1.002 started");
    assert!(ended_first < started_second);
}

#[tokio::test]
async fn test_s1_idempotent_reruns_produce_identical_digests() {
    let dir = tempfile::tempdir().expect("tempdir");
    let runner = Runner::new(dir.path(), deterministic_registry());

    let first = runner
        .run_source(
            S1_WORKFLOW,
            BTreeMap::new(),
            PolicyOverrides::default(),
            CancellationToken::new(),
        )
        .await
        .expect("first run");
    let second = runner
        .run_source(
            S1_WORKFLOW,
            BTreeMap::new(),
            PolicyOverrides::default(),
            CancellationToken::new(),
        )
        .await
        .expect("second run");

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(first.status, second.status);
    assert_eq!(first.tokens_used_total, second.tokens_used_total);

    let digests =
        |s: &RunSummary| -> BTreeMap<String, String> {
            s.artifacts
                .iter()
                .map(|(path, d)| (path.clone(), d.digest.clone()))
                .collect()
        };
    assert_eq!(digests(&first), digests(&second));
}

#[tokio::test]
async fn test_s2_gate_failure_fails_run_under_fail_fast() {
    let workflow = r#"
name: oversized-fix
policy:
  max_tokens: 1000
  fail_fast: true
steps:
  - id: "1.001"
    name: collect diagnostics
    actor: diag
    emits: [diagnostics.json]
    gates:
      - kind: schema_valid
        schema: diagnostics
  - id: "1.002"
    name: apply fix
    actor: fixer
    with: { lines: 600 }
    emits: [patch.diff]
    gates:
      - kind: diff_limits
        max_lines: 200
"#;
    let dir = tempfile::tempdir().expect("tempdir");
    let runner = Runner::new(dir.path(), deterministic_registry());
    let summary = runner
        .run_source(
            workflow,
            BTreeMap::new(),
            PolicyOverrides::default(),
            CancellationToken::new(),
        )
        .await
        .expect("run");

    assert_eq!(summary.status, RunStatus::Failed);
    assert_eq!(summary.status.exit_code(), 1);

    let failed = summary.step("1.002").expect("step 1.002");
    assert_eq!(failed.status, StepStatus::Failed);
    let error = failed.error.as_ref().expect("error");
    assert_eq!(error.kind, ErrorKind::GateFailed);
    assert!(error.message.contains("diff_limits"));
    assert!(failed.gate_report.iter().any(|g| !g.passed));
}

#[tokio::test]
async fn test_s3_budget_exhaustion_skips_second_step() {
    let workflow = r#"
name: two-ai-edits
policy:
  max_tokens: 1000
  prefer_deterministic: false
steps:
  - id: "1.001"
    name: first edit
    actor: editor
  - id: "1.002"
    name: second edit
    actor: editor
"#;
    let dir = tempfile::tempdir().expect("tempdir");
    let mut registry = AdapterRegistry::new();
    registry
        .register(ai_editor(
            vec![ScriptedCall {
                outcome: ScriptedOutcome::Ok,
                tokens: 550,
                ..ScriptedCall::default()
            }],
            600,
        ))
        .expect("register");
    let runner = Runner::new(dir.path(), registry);

    let summary = runner
        .run_source(
            workflow,
            BTreeMap::new(),
            PolicyOverrides::default(),
            CancellationToken::new(),
        )
        .await
        .expect("run");

    let first = summary.step("1.001").expect("step 1.001");
    assert_eq!(first.status, StepStatus::Succeeded);
    assert_eq!(first.tokens_used, 550);

    let second = summary.step("1.002").expect("step 1.002");
    assert_eq!(second.status, StepStatus::Skipped);
    assert_eq!(
        second.error.as_ref().map(|e| e.kind),
        Some(ErrorKind::BudgetExhausted)
    );

    // no block gates on the skipped step: run succeeds with a logged warning
    assert_eq!(summary.status, RunStatus::Succeeded);
    assert_eq!(summary.tokens_used_total, 550);
    assert_eq!(summary.budget_remaining, 450);

    let log = read_log(&dir, &summary.run_id).await;
    assert!(log.iter().any(|e| matches!(
        &e.kind,
        AuditEventKind::Error { kind, .. } if kind == "BudgetExhausted"
    )));
    // second step never reached an adapter
    assert!(!log.iter().any(|e| matches!(
        &e.kind,
        AuditEventKind::StepStarted { step_id, .. } if step_id == &StepId::from("1.002")
    )));
}

#[tokio::test]
async fn test_s3_budget_skip_with_block_gate_fails_run() {
    let workflow = r#"
name: gated-ai-edits
policy:
  max_tokens: 1000
  prefer_deterministic: false
steps:
  - id: "1.001"
    name: first edit
    actor: editor
  - id: "1.002"
    name: second edit
    actor: editor
    gates:
      - kind: artifact_exists
        path: edit.json
"#;
    let dir = tempfile::tempdir().expect("tempdir");
    let mut registry = AdapterRegistry::new();
    registry
        .register(ai_editor(
            vec![ScriptedCall {
                outcome: ScriptedOutcome::Ok,
                tokens: 550,
                ..ScriptedCall::default()
            }],
            600,
        ))
        .expect("register");
    let runner = Runner::new(dir.path(), registry);

    let summary = runner
        .run_source(
            workflow,
            BTreeMap::new(),
            PolicyOverrides::default(),
            CancellationToken::new(),
        )
        .await
        .expect("run");

    assert_eq!(summary.status, RunStatus::Failed);
}

#[tokio::test]
async fn test_s4_transient_failure_retries_and_succeeds() {
    let workflow = r#"
name: flaky-edit
policy:
  max_tokens: 1000
  prefer_deterministic: false
  retry:
    max_attempts: 2
    backoff_ms: [10]
steps:
  - id: "1.001"
    name: edit
    actor: editor
"#;
    let dir = tempfile::tempdir().expect("tempdir");
    let mut registry = AdapterRegistry::new();
    registry
        .register(ai_editor(
            vec![
                ScriptedCall {
                    outcome: ScriptedOutcome::Transient,
                    tokens: 5,
                    ..ScriptedCall::default()
                },
                ScriptedCall {
                    outcome: ScriptedOutcome::Ok,
                    tokens: 7,
                    ..ScriptedCall::default()
                },
            ],
            100,
        ))
        .expect("register");
    let runner = Runner::new(dir.path(), registry);

    let summary = runner
        .run_source(
            workflow,
            BTreeMap::new(),
            PolicyOverrides::default(),
            CancellationToken::new(),
        )
        .await
        .expect("run");

    assert_eq!(summary.status, RunStatus::Succeeded);
    let step = summary.step("1.001").expect("step");
    assert_eq!(step.status, StepStatus::Succeeded);
    assert_eq!(step.tokens_used, 12);

    let log = read_log(&dir, &summary.run_id).await;
    let started: Vec<&AuditEvent> = log
        .iter()
        .filter(|e| {
            matches!(&e.kind, AuditEventKind::StepStarted { step_id, .. } if step_id == &StepId::from("1.001"))
        })
        .collect();
    assert_eq!(started.len(), 2);
    for event in &started {
        match &event.kind {
            AuditEventKind::StepStarted { adapter, .. } => assert_eq!(adapter, "ai_editor"),
            _ => unreachable!(),
        }
    }

    let ended_statuses: Vec<StepStatus> = log
        .iter()
        .filter_map(|e| match &e.kind {
            AuditEventKind::StepEnded {
                step_id, status, ..
            } if step_id == &StepId::from("1.001") => Some(*status),
            _ => None,
        })
        .collect();
    assert_eq!(ended_statuses, vec![StepStatus::Failed, StepStatus::Succeeded]);
}

/// Adapter that completes its step and flips the run's external cancel flag,
/// so cancellation lands exactly between two steps.
struct CancelOnExecute {
    descriptor: AdapterDescriptor,
    cancel: CancellationToken,
}

#[async_trait]
impl Adapter for CancelOnExecute {
    fn descriptor(&self) -> AdapterDescriptor {
        self.descriptor.clone()
    }

    async fn execute(
        &self,
        invocation: &StepInvocation,
        artifacts: &StepArtifactWriter,
        _cancel: runbook_core::adapter::CancellationToken,
    ) -> AdapterResult {
        for path in &invocation.declared_emits {
            if let Err(e) = artifacts.write(path, b"done\n").await {
                return AdapterResult::failed(runbook_core::adapter::AdapterError::permanent(
                    e.to_string(),
                ));
            }
        }
        self.cancel.cancel();
        AdapterResult::ok().with_emitted(invocation.declared_emits.clone())
    }
}

#[tokio::test]
async fn test_s5_cancellation_aborts_run() {
    let workflow = r#"
name: cancelled-run
policy:
  max_tokens: 1000
steps:
  - id: "1.001"
    name: first
    actor: verifier
  - id: "1.002"
    name: second
    actor: fixer
  - id: "1.003"
    name: third
    actor: fixer
"#;
    let dir = tempfile::tempdir().expect("tempdir");
    let cancel = CancellationToken::new();
    let mut registry = AdapterRegistry::new();
    registry
        .register(Arc::new(CancelOnExecute {
            descriptor: AdapterDescriptor::new(
                "cancelling",
                AdapterKind::Deterministic,
                ActorKind::Verifier,
            ),
            cancel: cancel.clone(),
        }))
        .expect("register");
    registry
        .register(Arc::new(TemplatePatchAdapter::default()))
        .expect("register");
    let runner = Runner::new(dir.path(), registry);

    let summary = runner
        .run_source(workflow, BTreeMap::new(), PolicyOverrides::default(), cancel)
        .await
        .expect("run");

    assert_eq!(summary.status, RunStatus::Aborted);
    assert_eq!(summary.status.exit_code(), 2);
    for id in ["1.002", "1.003"] {
        let step = summary.step(id).expect("step");
        assert_eq!(step.status, StepStatus::Aborted);
        assert_eq!(
            step.error.as_ref().map(|e| e.kind),
            Some(ErrorKind::Cancelled)
        );
    }

    let log = read_log(&dir, &summary.run_id).await;
    let last = log.last().expect("events");
    match &last.kind {
        AuditEventKind::RunEnded { status, .. } => assert_eq!(*status, RunStatus::Aborted),
        other => panic!("expected run.ended last, got {}", other.name()),
    }
    // steps after the cancellation point never started
    assert!(!log.iter().any(|e| matches!(
        &e.kind,
        AuditEventKind::StepStarted { step_id, .. } if step_id == &StepId::from("1.002")
    )));
}

#[tokio::test]
async fn test_s6_parallel_siblings_are_deterministic() {
    let workflow = r#"
name: fanout-join
policy:
  max_tokens: 1000
  max_workers: 2
steps:
  - id: "1.001"
    name: left
    actor: diag
    emits: [left.json]
    depends_on: []
  - id: "1.002"
    name: right
    actor: diag
    emits: [right.json]
    depends_on: []
  - id: "1.003"
    name: join
    actor: fixer
    with: { lines: 5 }
    emits: [patch.diff]
    depends_on: ["1.001", "1.002"]
"#;
    let dir = tempfile::tempdir().expect("tempdir");
    let runner = Runner::new(dir.path(), deterministic_registry());

    let mut digest_sets = Vec::new();
    for _ in 0..2 {
        let summary = runner
            .run_source(
                workflow,
                BTreeMap::new(),
                PolicyOverrides::default(),
                CancellationToken::new(),
            )
            .await
            .expect("run");
        assert_eq!(summary.status, RunStatus::Succeeded);

        let log = read_log(&dir, &summary.run_id).await;
        let join_started = ts_of(&log, |e| {
            matches!(&e.kind, AuditEventKind::StepStarted { step_id, .. } if step_id == &StepId::from("1.003"))
        })
        .expect("join started");
        for sibling in ["1.001", "1.002"] {
            let ended = ts_of(&log, |e| {
                matches!(&e.kind, AuditEventKind::StepEnded { step_id, .. } if step_id == &StepId::from(sibling))
            })
            .expect("sibling ended");
            assert!(ended < join_started);
        }

        let digests: BTreeMap<String, String> = summary
            .artifacts
            .iter()
            .map(|(path, d)| (path.clone(), d.digest.clone()))
            .collect();
        digest_sets.push(digests);
    }
    assert_eq!(digest_sets[0], digest_sets[1]);
}

#[tokio::test]
async fn test_boundary_single_root_step() {
    let workflow = r#"
name: single
steps:
  - id: "1.001"
    name: only
    actor: diag
    emits: [diagnostics.json]
    depends_on: []
"#;
    let dir = tempfile::tempdir().expect("tempdir");
    let runner = Runner::new(dir.path(), deterministic_registry());
    let summary = runner
        .run_source(
            workflow,
            BTreeMap::new(),
            PolicyOverrides::default(),
            CancellationToken::new(),
        )
        .await
        .expect("run");
    assert_eq!(summary.status, RunStatus::Succeeded);
}

#[tokio::test]
async fn test_boundary_first_step_over_budget_fails_without_dispatch() {
    let workflow = r#"
name: too-expensive
policy:
  max_tokens: 500
  prefer_deterministic: false
steps:
  - id: "1.001"
    name: edit
    actor: editor
"#;
    let dir = tempfile::tempdir().expect("tempdir");
    let mut registry = AdapterRegistry::new();
    registry
        .register(ai_editor(
            vec![ScriptedCall {
                outcome: ScriptedOutcome::Ok,
                tokens: 550,
                ..ScriptedCall::default()
            }],
            600,
        ))
        .expect("register");
    let runner = Runner::new(dir.path(), registry);

    let summary = runner
        .run_source(
            workflow,
            BTreeMap::new(),
            PolicyOverrides::default(),
            CancellationToken::new(),
        )
        .await
        .expect("run");

    assert_eq!(summary.status, RunStatus::Failed);
    let step = summary.step("1.001").expect("step");
    assert_eq!(step.status, StepStatus::Skipped);
    assert_eq!(
        step.error.as_ref().map(|e| e.kind),
        Some(ErrorKind::BudgetExhausted)
    );

    let log = read_log(&dir, &summary.run_id).await;
    assert!(events_named(&log, "step.started").is_empty());
    assert_eq!(summary.tokens_used_total, 0);
}

#[tokio::test]
async fn test_boundary_when_false_skips_without_routing() {
    let workflow = r#"
name: conditional
steps:
  - id: "1.001"
    name: collect
    actor: diag
    emits: [diagnostics.json]
  - id: "1.002"
    name: conditional fix
    actor: fixer
    when: { kind: artifact_exists, path: missing.json }
    gates:
      - kind: artifact_exists
        path: patch.diff
"#;
    let dir = tempfile::tempdir().expect("tempdir");
    let runner = Runner::new(dir.path(), deterministic_registry());
    let summary = runner
        .run_source(
            workflow,
            BTreeMap::new(),
            PolicyOverrides::default(),
            CancellationToken::new(),
        )
        .await
        .expect("run");

    let skipped = summary.step("1.002").expect("step");
    assert_eq!(skipped.status, StepStatus::Skipped);
    assert!(skipped.gate_report.is_empty());
    // a when-false skip is not a failure
    assert_eq!(summary.status, RunStatus::Succeeded);

    let log = read_log(&dir, &summary.run_id).await;
    assert!(log.iter().any(|e| matches!(
        &e.kind,
        AuditEventKind::StepSkipped { step_id, reason } if step_id == &StepId::from("1.002") && reason.contains("when")
    )));
    assert!(!log.iter().any(|e| matches!(
        &e.kind,
        AuditEventKind::StepRouted { step_id, .. } if step_id == &StepId::from("1.002")
    )));
    assert!(!log.iter().any(|e| matches!(
        &e.kind,
        AuditEventKind::GateEvaluated { step_id, .. } if step_id == &StepId::from("1.002")
    )));
}

#[tokio::test]
async fn test_boundary_when_true_runs_dependent_step() {
    let workflow = r#"
name: conditional-true
steps:
  - id: "1.001"
    name: collect
    actor: diag
    emits: [diagnostics.json]
  - id: "1.002"
    name: conditional fix
    actor: fixer
    with: { lines: 3 }
    emits: [patch.diff]
    when: { kind: artifact_exists, path: diagnostics.json }
"#;
    let dir = tempfile::tempdir().expect("tempdir");
    let runner = Runner::new(dir.path(), deterministic_registry());
    let summary = runner
        .run_source(
            workflow,
            BTreeMap::new(),
            PolicyOverrides::default(),
            CancellationToken::new(),
        )
        .await
        .expect("run");

    assert_eq!(summary.status, RunStatus::Succeeded);
    assert_eq!(
        summary.step("1.002").expect("step").status,
        StepStatus::Succeeded
    );
}

#[tokio::test]
async fn test_boundary_cycle_is_a_plan_error() {
    let workflow = r#"
name: cyclic
steps:
  - id: "1.001"
    name: a
    actor: diag
    depends_on: ["1.002"]
  - id: "1.002"
    name: b
    actor: diag
    depends_on: ["1.001"]
"#;
    let dir = tempfile::tempdir().expect("tempdir");
    let runner = Runner::new(dir.path(), deterministic_registry());
    let workflow = runner.load_workflow(workflow).expect("load");
    let error = runner.plan(&workflow).expect_err("cycle");
    assert!(matches!(error, runbook_core::plan::PlanError::Cycle { .. }));
    assert_eq!(RunError::from(error).exit_code(), 3);
}

#[tokio::test]
async fn test_validate_artifact_on_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let runner = Runner::new(dir.path(), deterministic_registry());

    let path = dir.path().join("report.json");
    tokio::fs::write(&path, serde_json::to_vec(&json!({"pass_count": 1, "failures": 0})).unwrap())
        .await
        .expect("write");

    let ok = runner
        .validate_artifact(&path, "test_report")
        .await
        .expect("validate");
    assert!(ok.is_ok());

    tokio::fs::write(&path, serde_json::to_vec(&json!({"pass_count": 1})).unwrap())
        .await
        .expect("write");
    let invalid = runner
        .validate_artifact(&path, "test_report")
        .await
        .expect("validate");
    assert!(!invalid.is_ok());
}

#[tokio::test]
async fn test_manifest_written_at_run_root() {
    let dir = tempfile::tempdir().expect("tempdir");
    let runner = Runner::new(dir.path(), deterministic_registry());
    let summary = runner
        .run_source(
            S1_WORKFLOW,
            BTreeMap::new(),
            PolicyOverrides::default(),
            CancellationToken::new(),
        )
        .await
        .expect("run");

    let manifest_path = dir
        .path()
        .join("artifacts")
        .join(summary.run_id.as_str())
        .join("manifest.json");
    let manifest: Value =
        serde_json::from_slice(&tokio::fs::read(&manifest_path).await.expect("manifest"))
            .expect("parse");
    assert_eq!(manifest["run"]["status"], json!("succeeded"));
    assert!(manifest["artifacts"]["diagnostics.json"]["digest"].is_string());
}
