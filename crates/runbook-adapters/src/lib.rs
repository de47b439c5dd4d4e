//! # Runbook Adapters
//!
//! Built-in adapter collection for runbook workflows (optional).
//!
//! This crate provides:
//! - Fixture-grade deterministic adapters that exercise the kernel contract
//! - A scripted adapter for rehearsing failure and budget scenarios
//! - YAML config loading and registry assembly

mod builtin;
mod config;
mod factory;

// Re-export the core adapter contract.
pub use runbook_core::adapter::{
    Adapter, AdapterDescriptor, AdapterError, AdapterKind, AdapterRegistry, AdapterResult,
    CancellationToken, StepInvocation,
};

pub use builtin::{
    ScriptedAdapter, ScriptedCall, ScriptedOutcome, StaticDiagnosticsAdapter, TemplatePatchAdapter,
    TestReportAdapter,
};
pub use config::{AdapterSpec, RegistryConfig};
pub use factory::{build_registry, AdapterBuildError};
