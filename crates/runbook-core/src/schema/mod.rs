//! Named JSON Schema registry and validation.
//!
//! Schemas are compiled once at registry construction and addressed by
//! logical name (`workflow`, `diagnostics`, `test_report`). The registry is
//! read-only after startup; validation is deterministic and side-effect free.

use jsonschema::{Draft, JSONSchema};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use thiserror::Error;

/// Schema registry errors.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("unknown schema: {0}")]
    UnknownSchema(String),
    #[error("schema '{0}' failed to compile: {1}")]
    Compile(String, String),
    #[error("duplicate schema id: {0}")]
    Duplicate(String),
}

/// One validation failure with the instance path it occurred at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

/// Result of validating a document against a named schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ValidationResult {
    Ok,
    Invalid { errors: Vec<ValidationIssue> },
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, ValidationResult::Ok)
    }

    pub fn errors(&self) -> &[ValidationIssue] {
        match self {
            ValidationResult::Ok => &[],
            ValidationResult::Invalid { errors } => errors,
        }
    }
}

/// Registry of compiled schemas keyed by logical name.
pub struct SchemaRegistry {
    schemas: HashMap<String, JSONSchema>,
}

impl SchemaRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            schemas: HashMap::new(),
        }
    }

    /// Create a registry preloaded with the schemas the kernel itself needs.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for (id, schema) in builtin_schemas() {
            registry
                .register(id, &schema)
                .expect("builtin schemas are valid");
        }
        registry
    }

    /// Compile and register a schema under a logical name.
    pub fn register(&mut self, id: impl Into<String>, schema: &Value) -> Result<(), SchemaError> {
        let id = id.into();
        if self.schemas.contains_key(&id) {
            return Err(SchemaError::Duplicate(id));
        }
        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft202012)
            .compile(schema)
            .map_err(|e| SchemaError::Compile(id.clone(), e.to_string()))?;
        self.schemas.insert(id, compiled);
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.schemas.contains_key(id)
    }

    /// Registered schema names, sorted for stable output.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.schemas.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Validate a document against a named schema.
    pub fn validate(&self, document: &Value, schema_id: &str) -> Result<ValidationResult, SchemaError> {
        let compiled = self
            .schemas
            .get(schema_id)
            .ok_or_else(|| SchemaError::UnknownSchema(schema_id.to_string()))?;

        match compiled.validate(document) {
            Ok(()) => Ok(ValidationResult::Ok),
            Err(errors) => Ok(ValidationResult::Invalid {
                errors: errors
                    .map(|e| ValidationIssue {
                        path: e.instance_path.to_string(),
                        message: e.to_string(),
                    })
                    .collect(),
            }),
        }
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

/// Logical name of the workflow envelope schema.
pub const WORKFLOW_SCHEMA: &str = "workflow";

fn builtin_schemas() -> Vec<(&'static str, Value)> {
    vec![
        (
            WORKFLOW_SCHEMA,
            json!({
                "$schema": "https://json-schema.org/draft/2020-12/schema",
                "type": "object",
                "required": ["name", "steps"],
                "additionalProperties": false,
                "properties": {
                    "name": { "type": "string", "minLength": 1 },
                    "inputs": { "type": "object" },
                    "policy": {
                        "type": "object",
                        "additionalProperties": false,
                        "properties": {
                            "max_tokens": { "type": "integer", "minimum": 0 },
                            "prefer_deterministic": { "type": "boolean" },
                            "fail_fast": { "type": "boolean" },
                            "retry": {
                                "type": "object",
                                "additionalProperties": false,
                                "properties": {
                                    "max_attempts": { "type": "integer", "minimum": 0, "maximum": 5 },
                                    "backoff_ms": {
                                        "type": "array",
                                        "items": { "type": "integer", "minimum": 0 }
                                    }
                                }
                            },
                            "step_timeout_ms": { "type": "integer", "minimum": 1 },
                            "max_workers": { "type": "integer", "minimum": 1 }
                        }
                    },
                    "steps": {
                        "type": "array",
                        "minItems": 1,
                        "items": {
                            "type": "object",
                            "required": ["id", "name", "actor"],
                            "additionalProperties": false,
                            "properties": {
                                "id": { "type": "string", "pattern": "^\\d+\\.\\d{3}$" },
                                "name": { "type": "string", "minLength": 1 },
                                "actor": {
                                    "enum": ["diag", "fixer", "test_runner", "editor", "analyst", "verifier"]
                                },
                                "with": {},
                                "emits": {
                                    "type": "array",
                                    "items": { "type": "string", "minLength": 1 }
                                },
                                "gates": {
                                    "type": "array",
                                    "items": {
                                        "type": "object",
                                        "required": ["kind"],
                                        "properties": { "kind": { "type": "string" } }
                                    }
                                },
                                "when": { "type": "object" },
                                "depends_on": {
                                    "type": "array",
                                    "items": { "type": "string", "pattern": "^\\d+\\.\\d{3}$" }
                                }
                            }
                        }
                    }
                }
            }),
        ),
        (
            "diagnostics",
            json!({
                "$schema": "https://json-schema.org/draft/2020-12/schema",
                "type": "object",
                "required": ["diagnostics"],
                "properties": {
                    "tool": { "type": "string" },
                    "diagnostics": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["file", "message"],
                            "properties": {
                                "file": { "type": "string" },
                                "line": { "type": "integer", "minimum": 0 },
                                "message": { "type": "string" },
                                "severity": { "enum": ["error", "warning", "info"] }
                            }
                        }
                    }
                }
            }),
        ),
        (
            "test_report",
            json!({
                "$schema": "https://json-schema.org/draft/2020-12/schema",
                "type": "object",
                "required": ["pass_count", "failures"],
                "properties": {
                    "pass_count": { "type": "integer", "minimum": 0 },
                    "failures": { "type": "integer", "minimum": 0 },
                    "skipped": { "type": "integer", "minimum": 0 },
                    "duration_ms": { "type": "integer", "minimum": 0 }
                }
            }),
        ),
    ]
}
