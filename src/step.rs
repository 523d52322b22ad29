//! Step normalization and reference marking
//!
//! Raw config steps become [`StepSpec`]s: the method chain is normalized,
//! reference strings in parameters are rewritten to [`Value::Ref`]
//! markers, and outputs are resolved (including auto-synthesis for steps
//! that are referenced but declare nothing).

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use tracing::{info, warn};

use crate::config::{OutputConfig, OutputKindConfig, PipelineConfig, StepConfig};
use crate::error::{GraphError, Result};
use crate::graph::{DepKind, DependencyEdge, DependencyGraph};
use crate::value::{dataset_name, Params, Reference, Value};

/// Output routing: datasets flow through the scheduler tuple, parameters
/// are catalog-and-reference only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Dataset,
    Parameter,
}

impl From<OutputKindConfig> for OutputKind {
    fn from(kind: OutputKindConfig) -> Self {
        match kind {
            OutputKindConfig::Dataset => OutputKind::Dataset,
            OutputKindConfig::Parameter => OutputKind::Parameter,
        }
    }
}

/// One declared (or synthesized) step output.
#[derive(Debug, Clone)]
pub struct OutputSpec {
    pub name: String,
    /// Remaps a key of a map-returning method onto this output.
    pub source_key: Option<String>,
    pub kind: OutputKind,
    pub primary: bool,
}

/// Normalized step, ready for planning and execution.
#[derive(Debug, Clone)]
pub struct StepSpec {
    pub name: String,
    pub component: String,
    /// `"auto"` defers engine selection to the method handle.
    pub engine: String,
    pub methods: Vec<String>,
    /// User parameters with references marked.
    pub parameters: Params,
    pub outputs: Vec<OutputSpec>,
    pub depends_on: Vec<String>,
    pub cache_ttl: Option<Duration>,
    pub timeout: Option<Duration>,
    pub retry_count: Option<u32>,
    pub retry_delay: Option<Duration>,
}

impl StepSpec {
    /// Dataset names this step is planned to produce (dataset kind only).
    pub fn planned_datasets(&self) -> Vec<String> {
        self.outputs
            .iter()
            .filter(|o| o.kind == OutputKind::Dataset)
            .map(|o| dataset_name(&self.name, &o.name))
            .collect()
    }

    /// Dataset names for parameter-kind outputs.
    pub fn parameter_datasets(&self) -> Vec<String> {
        self.outputs
            .iter()
            .filter(|o| o.kind == OutputKind::Parameter)
            .map(|o| dataset_name(&self.name, &o.name))
            .collect()
    }

    /// Name of the primary output, if any.
    pub fn primary_output(&self) -> Option<&str> {
        self.outputs
            .iter()
            .find(|o| o.primary)
            .map(|o| o.name.as_str())
    }

    /// All references mentioned in this step's parameters, in parameter
    /// order.
    pub fn references(&self) -> Vec<Reference> {
        let mut out = Vec::new();
        for value in self.parameters.values() {
            collect_refs(value, &mut out);
        }
        out
    }

    /// Upstream dataset names feeding this step, deduplicated in
    /// first-mention order.
    pub fn input_datasets(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for reference in self.references() {
            let ds = reference.dataset();
            if seen.insert(ds.clone()) {
                out.push(ds);
            }
        }
        out
    }
}

/// Collect every reference inside plain list/map trees. Opaque artifacts
/// are never walked.
pub fn collect_refs(value: &Value, out: &mut Vec<Reference>) {
    match value {
        Value::Ref(r) => out.push(r.clone()),
        Value::List(items) => {
            for item in items {
                collect_refs(item, out);
            }
        }
        Value::Map(m) => {
            for item in m.values() {
                collect_refs(item, out);
            }
        }
        _ => {}
    }
}

/// Rewrite reference-shaped strings into `Ref` markers, recursing through
/// lists and maps.
pub fn mark_references(value: Value) -> Value {
    match value {
        Value::Str(s) => match Reference::parse(&s) {
            Some(r) => Value::Ref(r),
            None => Value::Str(s),
        },
        Value::List(items) => Value::List(items.into_iter().map(mark_references).collect()),
        Value::Map(m) => Value::Map(
            m.into_iter()
                .map(|(k, v)| (k, mark_references(v)))
                .collect(),
        ),
        other => other,
    }
}

/// Normalize all raw steps, marking references and synthesizing outputs
/// for referenced steps that declare none.
pub fn parse_steps(pipeline: &PipelineConfig) -> Result<Vec<StepSpec>> {
    // Pre-scan: which outputs does each step get referenced for?
    let mut referenced: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for raw in &pipeline.steps {
        for value in raw.parameters.values() {
            let marked = mark_references(Value::from_yaml(value));
            let mut refs = Vec::new();
            collect_refs(&marked, &mut refs);
            for r in refs {
                referenced.entry(r.step).or_default().insert(r.output);
            }
        }
    }

    let mut steps = Vec::with_capacity(pipeline.steps.len());
    for raw in &pipeline.steps {
        steps.push(parse_step(raw, &referenced)?);
    }
    Ok(steps)
}

fn parse_step(
    raw: &StepConfig,
    referenced: &BTreeMap<String, BTreeSet<String>>,
) -> Result<StepSpec> {
    let mut parameters = Params::new();
    for (key, value) in &raw.parameters {
        parameters.insert(key.clone(), mark_references(Value::from_yaml(value)));
    }

    let mut outputs: Vec<OutputSpec> = raw
        .outputs
        .parameters
        .iter()
        .map(|o| match o {
            OutputConfig::Name(name) => OutputSpec {
                name: name.clone(),
                source_key: None,
                kind: OutputKind::Dataset,
                primary: false,
            },
            OutputConfig::Full { name, from, kind } => OutputSpec {
                name: name.clone(),
                source_key: from.clone(),
                kind: (*kind).into(),
                primary: false,
            },
        })
        .collect();

    // Graceful completion: a referenced step without declared outputs
    // gets the union of its referenced output names.
    if outputs.is_empty() {
        if let Some(names) = referenced.get(&raw.name) {
            info!(
                step = %raw.name,
                outputs = ?names,
                "auto-synthesized implicit outputs from downstream references"
            );
            outputs.extend(names.iter().map(|name| OutputSpec {
                name: name.clone(),
                source_key: None,
                kind: OutputKind::Dataset,
                primary: false,
            }));
        }
    }

    // First dataset output is primary.
    if let Some(first) = outputs.iter_mut().find(|o| o.kind == OutputKind::Dataset) {
        first.primary = true;
    }

    Ok(StepSpec {
        name: raw.name.clone(),
        component: raw.component.clone(),
        engine: raw.engine.clone(),
        methods: raw.method.names(),
        parameters,
        outputs,
        depends_on: raw.depends_on.clone(),
        cache_ttl: raw.cache_ttl.map(Duration::from_secs),
        timeout: raw.timeout.map(Duration::from_secs),
        retry_count: raw.retry_count,
        retry_delay: raw.retry_delay.map(Duration::from_secs),
    })
}

/// Build the dependency graph: DATA edges from references, EXPLICIT edges
/// from `depends_on`. Edges to undeclared steps fail in strict mode and
/// warn in lax mode.
pub fn build_graph(steps: &[StepSpec], strict: bool) -> Result<DependencyGraph> {
    let known: BTreeSet<&str> = steps.iter().map(|s| s.name.as_str()).collect();
    let mut graph = DependencyGraph::new();

    for step in steps {
        graph.add_node(step.name.clone());
    }

    for step in steps {
        for reference in step.references() {
            if !known.contains(reference.step.as_str()) {
                if strict {
                    return Err(GraphError::MissingDependency {
                        node: step.name.clone(),
                        missing: vec![reference.step.clone()],
                    }
                    .into());
                }
                warn!(
                    step = %step.name,
                    missing = %reference.step,
                    "reference to undeclared step ignored (lax mode)"
                );
                continue;
            }
            if reference.step == step.name {
                continue;
            }
            graph.add_edge(
                DependencyEdge::new(reference.step.clone(), step.name.clone(), DepKind::Data)
                    .with_metadata("dataset", reference.dataset()),
            );
        }

        for dep in &step.depends_on {
            if !known.contains(dep.as_str()) {
                if strict {
                    return Err(GraphError::MissingDependency {
                        node: step.name.clone(),
                        missing: vec![dep.clone()],
                    }
                    .into());
                }
                warn!(
                    step = %step.name,
                    missing = %dep,
                    "depends_on target not declared, ignored (lax mode)"
                );
                continue;
            }
            graph.add_edge(
                DependencyEdge::new(dep.clone(), step.name.clone(), DepKind::Explicit)
                    .with_metadata("declared_in", "depends_on"),
            );
        }
    }

    Ok(graph)
}
