//! Run-scoped artifact store.
//!
//! All artifact IO for a run goes through this store. It owns the namespace
//! `artifacts/<run_id>/`, rejects absolute and traversing paths, computes
//! SHA-256 digests on write, and keeps the immutable artifacts index.
//! Adapters receive a [`StepArtifactWriter`] so every write is attributed to
//! its producing step.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::plan::is_safe_relative_path;
use crate::types::{ArtifactDescriptor, RunId, RunSummary, StepId};

/// Artifact store errors.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("invalid artifact path '{0}'")]
    InvalidPath(String),

    #[error("artifact path '{path}' already emitted by step '{produced_by}'")]
    Collision { path: String, produced_by: StepId },

    #[error("artifact '{0}' is not catalogued")]
    NotCatalogued(String),

    #[error("artifact '{path}' is not valid JSON: {reason}")]
    Malformed { path: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Filesystem writer + catalogue for one run's artifacts.
pub struct ArtifactStore {
    run_id: RunId,
    run_root: PathBuf,
    /// Guards both the catalogue and the write path, so writes are
    /// serialized and a descriptor is catalogued before anyone can read it.
    index: Mutex<BTreeMap<String, ArtifactDescriptor>>,
}

impl ArtifactStore {
    /// Create the store and its `artifacts/<run_id>/` root directory.
    pub async fn create(base_dir: impl AsRef<Path>, run_id: RunId) -> Result<Self, ArtifactError> {
        let run_root = base_dir.as_ref().join("artifacts").join(run_id.as_str());
        tokio::fs::create_dir_all(&run_root).await?;
        Ok(Self {
            run_id,
            run_root,
            index: Mutex::new(BTreeMap::new()),
        })
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn run_root(&self) -> &Path {
        &self.run_root
    }

    /// Write an artifact and catalogue it. Collisions and unsafe paths are
    /// rejected; artifacts are immutable once emitted.
    pub async fn write(
        &self,
        produced_by: &StepId,
        rel_path: &str,
        bytes: &[u8],
    ) -> Result<ArtifactDescriptor, ArtifactError> {
        if !is_safe_relative_path(rel_path) {
            return Err(ArtifactError::InvalidPath(rel_path.to_string()));
        }

        let mut index = self.index.lock().await;
        if let Some(existing) = index.get(rel_path) {
            return Err(ArtifactError::Collision {
                path: rel_path.to_string(),
                produced_by: existing.produced_by.clone(),
            });
        }

        let abs_path = self.run_root.join(rel_path);
        if let Some(parent) = abs_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&abs_path, bytes).await?;

        let descriptor = ArtifactDescriptor {
            path: rel_path.to_string(),
            digest: sha256_hex(bytes),
            size_bytes: bytes.len() as u64,
            produced_by: produced_by.clone(),
            mime_hint: mime_hint_for(rel_path),
        };
        index.insert(rel_path.to_string(), descriptor.clone());
        Ok(descriptor)
    }

    /// Serialize a JSON value and write it as an artifact.
    pub async fn write_json(
        &self,
        produced_by: &StepId,
        rel_path: &str,
        value: &Value,
    ) -> Result<ArtifactDescriptor, ArtifactError> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write(produced_by, rel_path, &bytes).await
    }

    /// Read a catalogued artifact's bytes. Non-catalogued paths fail.
    pub async fn read(&self, rel_path: &str) -> Result<Vec<u8>, ArtifactError> {
        {
            let index = self.index.lock().await;
            if !index.contains_key(rel_path) {
                return Err(ArtifactError::NotCatalogued(rel_path.to_string()));
            }
        }
        Ok(tokio::fs::read(self.run_root.join(rel_path)).await?)
    }

    /// Read and parse a catalogued JSON artifact.
    pub async fn read_json(&self, rel_path: &str) -> Result<Value, ArtifactError> {
        let bytes = self.read(rel_path).await?;
        serde_json::from_slice(&bytes).map_err(|e| ArtifactError::Malformed {
            path: rel_path.to_string(),
            reason: e.to_string(),
        })
    }

    /// Read a catalogued artifact as UTF-8 text.
    pub async fn read_text(&self, rel_path: &str) -> Result<String, ArtifactError> {
        let bytes = self.read(rel_path).await?;
        String::from_utf8(bytes).map_err(|e| ArtifactError::Malformed {
            path: rel_path.to_string(),
            reason: e.to_string(),
        })
    }

    pub async fn descriptor(&self, rel_path: &str) -> Option<ArtifactDescriptor> {
        self.index.lock().await.get(rel_path).cloned()
    }

    pub async fn contains(&self, rel_path: &str) -> bool {
        self.index.lock().await.contains_key(rel_path)
    }

    /// Consistent snapshot of the artifacts index.
    pub async fn index_snapshot(&self) -> BTreeMap<String, ArtifactDescriptor> {
        self.index.lock().await.clone()
    }

    /// Write the run-level manifest at the namespace root. The manifest is
    /// metadata about the run, not a step artifact, so it bypasses the
    /// catalogue and its collision rules.
    pub async fn write_manifest(&self, summary: &RunSummary) -> Result<PathBuf, ArtifactError> {
        let path = self.run_root.join("manifest.json");
        let body = serde_json::json!({
            "run": summary,
            "artifacts": summary.artifacts,
        });
        tokio::fs::write(&path, serde_json::to_vec_pretty(&body)?).await?;
        Ok(path)
    }
}

/// Store handle scoped to one producing step.
///
/// This is the only artifact surface adapters see: every write lands inside
/// the run namespace attributed to the owning step, and reads are limited to
/// already-catalogued paths.
#[derive(Clone)]
pub struct StepArtifactWriter {
    store: Arc<ArtifactStore>,
    step_id: StepId,
}

impl StepArtifactWriter {
    pub fn new(store: Arc<ArtifactStore>, step_id: StepId) -> Self {
        Self { store, step_id }
    }

    pub fn step_id(&self) -> &StepId {
        &self.step_id
    }

    pub async fn write(&self, rel_path: &str, bytes: &[u8]) -> Result<ArtifactDescriptor, ArtifactError> {
        self.store.write(&self.step_id, rel_path, bytes).await
    }

    pub async fn write_json(&self, rel_path: &str, value: &Value) -> Result<ArtifactDescriptor, ArtifactError> {
        self.store.write_json(&self.step_id, rel_path, value).await
    }

    pub async fn read(&self, rel_path: &str) -> Result<Vec<u8>, ArtifactError> {
        self.store.read(rel_path).await
    }

    pub async fn read_json(&self, rel_path: &str) -> Result<Value, ArtifactError> {
        self.store.read_json(rel_path).await
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

fn mime_hint_for(path: &str) -> Option<String> {
    let ext = Path::new(path).extension()?.to_str()?;
    let hint = match ext {
        "json" => "application/json",
        "jsonl" => "application/jsonl",
        "diff" | "patch" => "text/x-diff",
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "yaml" | "yml" => "application/yaml",
        _ => return None,
    };
    Some(hint.to_string())
}
