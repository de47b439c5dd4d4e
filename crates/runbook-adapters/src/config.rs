//! Adapter registry configuration.

use serde::Deserialize;
use serde_json::Value;

use runbook_core::types::ActorKind;

/// Registry config root.
#[derive(Debug, Deserialize)]
pub struct RegistryConfig {
    pub adapters: Vec<AdapterSpec>,
}

impl RegistryConfig {
    /// Parse from YAML text.
    pub fn from_yaml(source: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(source)
    }
}

/// Single adapter definition from config.
#[derive(Debug, Deserialize)]
pub struct AdapterSpec {
    pub name: String,
    /// Built-in implementation kind (`static_diagnostics`, `template_patch`,
    /// `test_report_writer`, `scripted`).
    pub kind: String,
    /// Actor kinds this adapter serves.
    pub actors: Vec<ActorKind>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub estimated_cost: u64,
    #[serde(default = "default_available")]
    pub available: bool,
    /// Implementation-specific configuration.
    #[serde(default)]
    pub config: Value,
}

fn default_available() -> bool {
    true
}
