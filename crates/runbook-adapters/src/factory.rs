//! Registry assembly from configuration.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use runbook_core::adapter::{
    Adapter, AdapterDescriptor, AdapterKind, AdapterRegistry, RegistryError,
};
use runbook_core::types::ActorKind;

use crate::builtin::{
    ScriptedAdapter, ScriptedCall, StaticDiagnosticsAdapter, TemplatePatchAdapter,
    TestReportAdapter,
};
use crate::config::{AdapterSpec, RegistryConfig};

/// Adapter factory errors.
#[derive(Debug, Error)]
pub enum AdapterBuildError {
    #[error("unknown adapter kind: {0}")]
    UnknownKind(String),

    #[error("adapter '{name}' has invalid config: {reason}")]
    InvalidConfig { name: String, reason: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Build an adapter registry from a parsed config.
pub fn build_registry(config: &RegistryConfig) -> Result<AdapterRegistry, AdapterBuildError> {
    let mut registry = AdapterRegistry::new();
    for spec in &config.adapters {
        registry.register(build_adapter(spec)?)?;
    }
    Ok(registry)
}

fn build_adapter(spec: &AdapterSpec) -> Result<Arc<dyn Adapter>, AdapterBuildError> {
    let adapter: Arc<dyn Adapter> = match spec.kind.as_str() {
        "static_diagnostics" => Arc::new(StaticDiagnosticsAdapter::from_descriptor(
            descriptor_for(spec, StaticDiagnosticsAdapter::new(&spec.name).descriptor()),
        )),
        "template_patch" => Arc::new(TemplatePatchAdapter::from_descriptor(descriptor_for(
            spec,
            TemplatePatchAdapter::new(&spec.name).descriptor(),
        ))),
        "test_report_writer" => Arc::new(TestReportAdapter::from_descriptor(descriptor_for(
            spec,
            TestReportAdapter::new(&spec.name).descriptor(),
        ))),
        "scripted" => Arc::new(build_scripted(spec)?),
        other => return Err(AdapterBuildError::UnknownKind(other.to_string())),
    };
    Ok(adapter)
}

fn build_scripted(spec: &AdapterSpec) -> Result<ScriptedAdapter, AdapterBuildError> {
    let kind = if spec.config.get("ai").and_then(Value::as_bool).unwrap_or(false) {
        AdapterKind::Ai
    } else {
        AdapterKind::Deterministic
    };
    let descriptor = descriptor_for(spec, AdapterDescriptor::new(&spec.name, kind, ActorKind::Diag));

    let calls: Vec<ScriptedCall> = match spec.config.get("calls") {
        Some(value) => {
            serde_json::from_value(value.clone()).map_err(|e| AdapterBuildError::InvalidConfig {
                name: spec.name.clone(),
                reason: e.to_string(),
            })?
        }
        None => Vec::new(),
    };
    let emit_content: BTreeMap<String, Value> = match spec.config.get("emit_content") {
        Some(value) => {
            serde_json::from_value(value.clone()).map_err(|e| AdapterBuildError::InvalidConfig {
                name: spec.name.clone(),
                reason: e.to_string(),
            })?
        }
        None => BTreeMap::new(),
    };
    Ok(ScriptedAdapter::new(descriptor, calls).with_emit_content(emit_content))
}

/// Overlay spec-level descriptor fields on an implementation's defaults.
fn descriptor_for(spec: &AdapterSpec, base: AdapterDescriptor) -> AdapterDescriptor {
    let mut descriptor = base
        .with_estimated_cost(spec.estimated_cost)
        .with_available(spec.available);
    if !spec.actors.is_empty() {
        descriptor = descriptor.with_actor_kinds(spec.actors.iter().copied());
    }
    if !spec.capabilities.is_empty() {
        descriptor = descriptor.with_capabilities(spec.capabilities.iter().cloned());
    }
    descriptor.name = spec.name.clone();
    descriptor
}
