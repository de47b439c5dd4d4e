//! Workflow loading and run planning.
//!
//! The loader parses a YAML or JSON document, checks it against the workflow
//! schema, and produces a typed [`Workflow`]. The planner turns a workflow
//! into a [`RunPlan`]: a DAG with resolved dependencies, topological ranks,
//! and parsed `when` predicates. Both are pure.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap, HashSet};
use thiserror::Error;

use crate::schema::{SchemaRegistry, ValidationIssue, WORKFLOW_SCHEMA};
use crate::types::{Step, StepId, Workflow};

/// Workflow loading errors. All of these surface before a run starts and map
/// to exit status 3. Strict-mode violations (unknown keys, unknown actors)
/// are caught by the workflow schema as `Schema` errors; what the schema
/// cannot express (duplicate IDs, retry bounds) surfaces as `Document`.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("workflow parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("workflow failed schema validation: {summary}")]
    Schema {
        summary: String,
        errors: Vec<ValidationIssue>,
    },

    #[error("workflow document invalid: {0}")]
    Document(String),

    #[error("schema registry error: {0}")]
    Registry(#[from] crate::schema::SchemaError),
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("dependency cycle: {}", format_cycle(.cycle))]
    Cycle { cycle: Vec<StepId> },

    #[error("duplicate step ID: {0}")]
    DuplicateStepId(StepId),

    #[error("step '{step}' depends on undefined step '{dependency}'")]
    MissingDependency { step: StepId, dependency: StepId },

    #[error("step '{step}' has unknown predicate kind '{kind}'")]
    UnknownPredicate { step: StepId, kind: String },

    #[error("step '{step}' has malformed `when` predicate: {reason}")]
    MalformedPredicate { step: StepId, reason: String },

    #[error("artifact path '{path}' emitted by both '{first}' and '{second}'")]
    EmitCollision {
        path: String,
        first: StepId,
        second: StepId,
    },

    #[error("step '{step}' declares invalid emit path '{path}'")]
    InvalidEmitPath { step: StepId, path: String },

    #[error("workflow has no steps")]
    EmptyPlan,
}

fn format_cycle(cycle: &[StepId]) -> String {
    cycle
        .iter()
        .map(StepId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Evaluable readiness predicate, parsed from a step's raw `when` spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WhenPredicate {
    Always,
    /// True when the path is present in the (predecessor-scoped) index.
    ArtifactExists { path: String },
    /// True when the JSON pointer into the artifact's content equals a value.
    ArtifactProperty {
        path: String,
        pointer: String,
        equals: Value,
    },
}

impl Default for WhenPredicate {
    fn default() -> Self {
        Self::Always
    }
}

impl WhenPredicate {
    /// Relative artifact path the predicate reads, if any.
    pub fn artifact_path(&self) -> Option<&str> {
        match self {
            WhenPredicate::Always => None,
            WhenPredicate::ArtifactExists { path } => Some(path),
            WhenPredicate::ArtifactProperty { path, .. } => Some(path),
        }
    }
}

/// One planned step with its graph neighborhood.
#[derive(Debug, Clone)]
pub struct PlanNode {
    pub step: Step,
    /// Direct predecessors (resolved `depends_on`).
    pub preds: Vec<StepId>,
    /// Direct successors.
    pub succs: Vec<StepId>,
    /// All transitive predecessors, for provenance-scoped predicate checks.
    pub ancestors: BTreeSet<StepId>,
    /// Topological rank; ties broken by lexicographic step ID.
    pub rank: usize,
    pub when: WhenPredicate,
}

/// The executable DAG produced from a validated workflow.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub workflow: Workflow,
    pub roots: Vec<StepId>,
    pub nodes: BTreeMap<StepId, PlanNode>,
}

impl RunPlan {
    pub fn node(&self, id: &StepId) -> Option<&PlanNode> {
        self.nodes.get(id)
    }

    /// Step IDs in rank order.
    pub fn order(&self) -> Vec<StepId> {
        let mut ids: Vec<&PlanNode> = self.nodes.values().collect();
        ids.sort_by_key(|n| n.rank);
        ids.iter().map(|n| n.step.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Parse a workflow document (YAML or JSON) and validate it.
pub fn load_workflow(source: &str, schemas: &SchemaRegistry) -> Result<Workflow, LoadError> {
    let raw: Value = serde_yaml::from_str(source)?;

    let result = schemas.validate(&raw, WORKFLOW_SCHEMA)?;
    if !result.is_ok() {
        let errors = result.errors().to_vec();
        let summary = errors
            .first()
            .map(|e| e.message.clone())
            .unwrap_or_else(|| "invalid document".to_string());
        return Err(LoadError::Schema { summary, errors });
    }

    let workflow: Workflow =
        serde_json::from_value(raw).map_err(|e| LoadError::Document(e.to_string()))?;
    validate_document(&workflow)?;
    Ok(workflow)
}

/// Structural checks the JSON Schema cannot express.
fn validate_document(workflow: &Workflow) -> Result<(), LoadError> {
    let mut seen = HashSet::new();
    for step in &workflow.steps {
        if !StepId::is_valid_format(step.id.as_str()) {
            return Err(LoadError::Document(format!(
                "step ID '{}' does not match N.NNN",
                step.id
            )));
        }
        if !seen.insert(step.id.clone()) {
            return Err(LoadError::Document(format!("duplicate step ID '{}'", step.id)));
        }
    }
    if workflow.policy.retry.max_attempts > 5 {
        return Err(LoadError::Document(
            "policy.retry.max_attempts must be at most 5".to_string(),
        ));
    }
    Ok(())
}

/// Build a [`RunPlan`] from a validated workflow.
pub fn plan(workflow: &Workflow) -> Result<RunPlan, PlanError> {
    if workflow.steps.is_empty() {
        return Err(PlanError::EmptyPlan);
    }

    let mut ids = HashSet::new();
    for step in &workflow.steps {
        if !ids.insert(step.id.clone()) {
            return Err(PlanError::DuplicateStepId(step.id.clone()));
        }
    }

    // Resolve the sequential default: an omitted depends_on means the
    // previous step in document order; an explicit [] marks a root.
    let mut resolved: Vec<(StepId, Vec<StepId>)> = Vec::with_capacity(workflow.steps.len());
    let mut previous: Option<StepId> = None;
    for step in &workflow.steps {
        let deps = match &step.depends_on {
            Some(deps) => deps.clone(),
            None => previous.clone().into_iter().collect(),
        };
        for dep in &deps {
            if !ids.contains(dep) {
                return Err(PlanError::MissingDependency {
                    step: step.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
        resolved.push((step.id.clone(), deps));
        previous = Some(step.id.clone());
    }

    let preds: HashMap<StepId, Vec<StepId>> = resolved.iter().cloned().collect();
    detect_cycle(&preds)?;

    let mut succs: HashMap<StepId, Vec<StepId>> = HashMap::new();
    for (id, deps) in &resolved {
        succs.entry(id.clone()).or_default();
        for dep in deps {
            succs.entry(dep.clone()).or_default().push(id.clone());
        }
    }
    for list in succs.values_mut() {
        list.sort();
    }

    let ranks = assign_ranks(&preds, &succs);
    let ancestors = transitive_predecessors(&preds, &ranks);

    // Declared emits must be namespace-relative and globally unique.
    let mut emitted: HashMap<String, StepId> = HashMap::new();
    for step in &workflow.steps {
        for path in &step.emits {
            if !is_safe_relative_path(path) {
                return Err(PlanError::InvalidEmitPath {
                    step: step.id.clone(),
                    path: path.clone(),
                });
            }
            if let Some(first) = emitted.insert(path.clone(), step.id.clone()) {
                return Err(PlanError::EmitCollision {
                    path: path.clone(),
                    first,
                    second: step.id.clone(),
                });
            }
        }
    }

    let mut nodes = BTreeMap::new();
    let mut roots = Vec::new();
    for step in &workflow.steps {
        let id = step.id.clone();
        let when = parse_when(step)?;
        let node_preds = preds.get(&id).cloned().unwrap_or_default();
        if node_preds.is_empty() {
            roots.push(id.clone());
        }
        nodes.insert(
            id.clone(),
            PlanNode {
                step: Step {
                    depends_on: Some(node_preds.clone()),
                    ..step.clone()
                },
                preds: node_preds,
                succs: succs.get(&id).cloned().unwrap_or_default(),
                ancestors: ancestors.get(&id).cloned().unwrap_or_default(),
                rank: ranks[&id],
                when,
            },
        );
    }
    roots.sort();

    Ok(RunPlan {
        workflow: workflow.clone(),
        roots,
        nodes,
    })
}

fn parse_when(step: &Step) -> Result<WhenPredicate, PlanError> {
    let Some(raw) = &step.when else {
        return Ok(WhenPredicate::Always);
    };
    let kind = raw
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| PlanError::MalformedPredicate {
            step: step.id.clone(),
            reason: "missing 'kind'".to_string(),
        })?;
    match kind {
        "always" | "artifact_exists" | "artifact_property" => {
            serde_json::from_value(raw.clone()).map_err(|e| PlanError::MalformedPredicate {
                step: step.id.clone(),
                reason: e.to_string(),
            })
        }
        other => Err(PlanError::UnknownPredicate {
            step: step.id.clone(),
            kind: other.to_string(),
        }),
    }
}

/// DFS cycle detection over the dependency edges; returns the cycle path.
fn detect_cycle(preds: &HashMap<StepId, Vec<StepId>>) -> Result<(), PlanError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InStack,
        Done,
    }

    fn visit(
        id: &StepId,
        preds: &HashMap<StepId, Vec<StepId>>,
        marks: &mut HashMap<StepId, Mark>,
        stack: &mut Vec<StepId>,
    ) -> Option<Vec<StepId>> {
        marks.insert(id.clone(), Mark::InStack);
        stack.push(id.clone());

        for dep in preds.get(id).map(Vec::as_slice).unwrap_or(&[]) {
            match marks.get(dep).copied().unwrap_or(Mark::Unvisited) {
                Mark::Done => {}
                Mark::InStack => {
                    let start = stack.iter().position(|s| s == dep).unwrap_or(0);
                    let mut cycle: Vec<StepId> = stack[start..].to_vec();
                    cycle.push(dep.clone());
                    return Some(cycle);
                }
                Mark::Unvisited => {
                    if let Some(cycle) = visit(dep, preds, marks, stack) {
                        return Some(cycle);
                    }
                }
            }
        }

        stack.pop();
        marks.insert(id.clone(), Mark::Done);
        None
    }

    let mut marks: HashMap<StepId, Mark> = HashMap::new();
    let mut ordered: Vec<&StepId> = preds.keys().collect();
    ordered.sort();
    for id in ordered {
        if marks.get(id).copied().unwrap_or(Mark::Unvisited) == Mark::Unvisited {
            let mut stack = Vec::new();
            if let Some(cycle) = visit(id, preds, &mut marks, &mut stack) {
                return Err(PlanError::Cycle { cycle });
            }
        }
    }
    Ok(())
}

/// Kahn's algorithm with a lexicographic tie-break, so ranks are total and
/// reproducible.
fn assign_ranks(
    preds: &HashMap<StepId, Vec<StepId>>,
    succs: &HashMap<StepId, Vec<StepId>>,
) -> HashMap<StepId, usize> {
    let mut in_degree: HashMap<StepId, usize> =
        preds.iter().map(|(id, deps)| (id.clone(), deps.len())).collect();
    let mut heap: BinaryHeap<Reverse<StepId>> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| Reverse(id.clone()))
        .collect();

    let mut ranks = HashMap::new();
    let mut next_rank = 0usize;
    while let Some(Reverse(id)) = heap.pop() {
        ranks.insert(id.clone(), next_rank);
        next_rank += 1;
        for succ in succs.get(&id).map(Vec::as_slice).unwrap_or(&[]) {
            if let Some(degree) = in_degree.get_mut(succ) {
                *degree -= 1;
                if *degree == 0 {
                    heap.push(Reverse(succ.clone()));
                }
            }
        }
    }
    ranks
}

/// Transitive predecessor closure, computed in rank order.
fn transitive_predecessors(
    preds: &HashMap<StepId, Vec<StepId>>,
    ranks: &HashMap<StepId, usize>,
) -> HashMap<StepId, BTreeSet<StepId>> {
    let mut order: Vec<&StepId> = preds.keys().collect();
    order.sort_by_key(|id| ranks.get(*id).copied().unwrap_or(usize::MAX));

    let mut closure: HashMap<StepId, BTreeSet<StepId>> = HashMap::new();
    for id in order {
        let mut set = BTreeSet::new();
        for dep in preds.get(id).map(Vec::as_slice).unwrap_or(&[]) {
            set.insert(dep.clone());
            if let Some(upstream) = closure.get(dep) {
                set.extend(upstream.iter().cloned());
            }
        }
        closure.insert(id.clone(), set);
    }
    closure
}

/// Forward-slash relative path that stays inside the namespace.
pub(crate) fn is_safe_relative_path(path: &str) -> bool {
    if path.is_empty() || path.starts_with('/') || path.contains('\\') || path.contains("//") {
        return false;
    }
    path.split('/')
        .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
}
