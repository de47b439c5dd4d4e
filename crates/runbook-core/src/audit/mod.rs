//! Append-only audit log.
//!
//! One JSON object per line, stable key set per event kind. Events are
//! stamped with a per-run monotonic `ts` under the append lock, so file
//! order always matches clock order even with concurrent workers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::router::RoutingDecision;
use crate::types::{GateResult, RunId, RunStatus, StepId, StepStatus};

/// Audit log errors.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Event payloads; the `event` discriminator uses the stable dotted names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum AuditEventKind {
    #[serde(rename = "run.started")]
    RunStarted {
        workflow_name: String,
        inputs: BTreeMap<String, Value>,
        budget: u64,
    },

    #[serde(rename = "run.ended")]
    RunEnded {
        status: RunStatus,
        tokens_used_total: u64,
        budget_remaining: u64,
    },

    #[serde(rename = "step.routed")]
    StepRouted {
        step_id: StepId,
        decision: RoutingDecision,
    },

    #[serde(rename = "step.started")]
    StepStarted { step_id: StepId, adapter: String },

    #[serde(rename = "step.ended")]
    StepEnded {
        step_id: StepId,
        status: StepStatus,
        tokens_used: u64,
        duration_ms: u64,
        emitted: Vec<String>,
    },

    #[serde(rename = "step.skipped")]
    StepSkipped { step_id: StepId, reason: String },

    #[serde(rename = "gate.evaluated")]
    GateEvaluated {
        step_id: StepId,
        report: Vec<GateResult>,
    },

    #[serde(rename = "cost.update")]
    CostUpdate {
        step_id: StepId,
        delta: u64,
        remaining: u64,
    },

    #[serde(rename = "error")]
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        step_id: Option<StepId>,
        kind: String,
        message: String,
    },
}

impl AuditEventKind {
    /// Stable discriminator string.
    pub fn name(&self) -> &'static str {
        match self {
            AuditEventKind::RunStarted { .. } => "run.started",
            AuditEventKind::RunEnded { .. } => "run.ended",
            AuditEventKind::StepRouted { .. } => "step.routed",
            AuditEventKind::StepStarted { .. } => "step.started",
            AuditEventKind::StepEnded { .. } => "step.ended",
            AuditEventKind::StepSkipped { .. } => "step.skipped",
            AuditEventKind::GateEvaluated { .. } => "gate.evaluated",
            AuditEventKind::CostUpdate { .. } => "cost.update",
            AuditEventKind::Error { .. } => "error",
        }
    }
}

/// A stamped audit event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Per-run monotonic sequence number.
    pub ts: u64,
    /// Wall-clock time of the append.
    pub at: DateTime<Utc>,
    pub run_id: RunId,
    #[serde(flatten)]
    pub kind: AuditEventKind,
}

/// Sink interface for audit entries.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, event: &AuditEvent) -> Result<(), AuditError>;

    async fn flush(&self) -> Result<(), AuditError>;
}

/// In-memory sink for tests and embedding.
#[derive(Default)]
pub struct MemoryAuditSink {
    entries: std::sync::Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEvent> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, event: &AuditEvent) -> Result<(), AuditError> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
        Ok(())
    }

    async fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

/// File sink appending newline-delimited JSON at `logs/<run_id>.jsonl`.
pub struct FileAuditSink {
    path: PathBuf,
}

impl FileAuditSink {
    /// Create the sink (and the parent directory) for a run.
    pub async fn for_run(base_dir: impl AsRef<Path>, run_id: &RunId) -> Result<Self, AuditError> {
        let dir = base_dir.as_ref().join("logs");
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            path: dir.join(format!("{}.jsonl", run_id)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back all entries (test and tooling helper).
    pub async fn read_all(&self) -> Result<Vec<AuditEvent>, AuditError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let body = tokio::fs::read_to_string(&self.path).await?;
        let mut entries = Vec::new();
        for line in body.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(line)?);
        }
        Ok(entries)
    }
}

#[async_trait]
impl AuditSink for FileAuditSink {
    async fn append(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let json = serde_json::to_string(event)?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(json.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;
        Ok(())
    }

    async fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

struct LogState {
    next_ts: u64,
}

/// Write handle components use to append events.
///
/// Components get this handle, never the sink itself; the handle stamps
/// `ts`/`run_id` and serializes appends so the sequence stays strictly
/// monotonic in file order.
pub struct AuditLog {
    run_id: RunId,
    sink: Arc<dyn AuditSink>,
    state: Mutex<LogState>,
}

impl AuditLog {
    pub fn new(run_id: RunId, sink: Arc<dyn AuditSink>) -> Self {
        Self {
            run_id,
            sink,
            state: Mutex::new(LogState { next_ts: 0 }),
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Stamp and append an event.
    pub async fn append(&self, kind: AuditEventKind) -> Result<AuditEvent, AuditError> {
        let mut state = self.state.lock().await;
        let event = AuditEvent {
            ts: state.next_ts,
            at: Utc::now(),
            run_id: self.run_id.clone(),
            kind,
        };
        self.sink.append(&event).await?;
        state.next_ts += 1;
        Ok(event)
    }

    pub async fn flush(&self) -> Result<(), AuditError> {
        self.sink.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn skipped(step: &str) -> AuditEventKind {
        AuditEventKind::StepSkipped {
            step_id: StepId::from(step),
            reason: "when predicate false".to_string(),
        }
    }

    #[tokio::test]
    async fn test_append_stamps_monotonic_ts() {
        let sink = Arc::new(MemoryAuditSink::new());
        let log = AuditLog::new(RunId::new("run-1"), sink.clone());

        log.append(skipped("1.001")).await.expect("append");
        log.append(skipped("1.002")).await.expect("append");
        log.append(skipped("1.003")).await.expect("append");

        let entries = sink.entries();
        assert_eq!(entries.len(), 3);
        for (i, entry) in entries.iter().enumerate() {
            assert_eq!(entry.ts, i as u64);
            assert_eq!(entry.run_id, RunId::new("run-1"));
        }
    }

    #[tokio::test]
    async fn test_event_serializes_with_dotted_discriminator() {
        let sink = Arc::new(MemoryAuditSink::new());
        let log = AuditLog::new(RunId::new("run-1"), sink.clone());
        log.append(AuditEventKind::RunStarted {
            workflow_name: "lint".to_string(),
            inputs: BTreeMap::new(),
            budget: 1_000,
        })
        .await
        .expect("append");

        let value = serde_json::to_value(&sink.entries()[0]).expect("serialize");
        assert_eq!(value["event"], json!("run.started"));
        assert_eq!(value["workflow_name"], json!("lint"));
        assert_eq!(value["budget"], json!(1000));
        assert_eq!(value["run_id"], json!("run-1"));
        assert_eq!(value["ts"], json!(0));
    }

    #[tokio::test]
    async fn test_file_sink_appends_jsonl_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let run_id = RunId::new("run-file");
        let sink = FileAuditSink::for_run(dir.path(), &run_id).await.expect("sink");
        let log = AuditLog::new(run_id, Arc::new(
            FileAuditSink::for_run(dir.path(), &RunId::new("run-file")).await.expect("sink"),
        ));

        log.append(skipped("1.001")).await.expect("append");
        log.append(AuditEventKind::Error {
            step_id: None,
            kind: "InternalError".to_string(),
            message: "boom".to_string(),
        })
        .await
        .expect("append");
        log.flush().await.expect("flush");

        let entries = sink.read_all().await.expect("read");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind.name(), "step.skipped");
        assert_eq!(entries[1].kind.name(), "error");
        assert!(entries[0].ts < entries[1].ts);
    }

    #[tokio::test]
    async fn test_event_roundtrip() {
        let event = AuditEvent {
            ts: 7,
            at: Utc::now(),
            run_id: RunId::new("run-1"),
            kind: AuditEventKind::StepEnded {
                step_id: StepId::from("1.002"),
                status: StepStatus::Succeeded,
                tokens_used: 42,
                duration_ms: 5,
                emitted: vec!["patch.diff".to_string()],
            },
        };
        let line = serde_json::to_string(&event).expect("serialize");
        let back: AuditEvent = serde_json::from_str(&line).expect("parse");
        assert_eq!(back, event);
    }
}
