//! Parameter binding and output capture
//!
//! Binding starts from the user parameter map (references already
//! resolved), injects the chain-slot value for non-first methods, matches
//! declared inputs by name, offers aggregate `inputs` / `inputs_map`
//! forms, and finally trims unknown keys unless the callable accepts an
//! open tail. Capture normalizes a method's return value against the
//! step's declared outputs.

use std::collections::BTreeMap;

use tracing::warn;

use crate::error::ExecError;
use crate::registry::record::Invocable;
use crate::step::{OutputKind, StepSpec};
use crate::value::{Params, Value};

/// Suffixes stripped when inferring a source key for a map output.
const OUTPUT_KEY_SUFFIXES: [&str; 8] = [
    "full", "only", "part", "data", "df", "dataset", "stats", "main",
];

/// Upstream artifacts for one step, keyed by dataset name in declared
/// order.
#[derive(Debug, Clone, Default)]
pub struct ResolvedInputs {
    pub ordered: Vec<(String, Value)>,
}

impl ResolvedInputs {
    pub fn names(&self) -> Vec<String> {
        self.ordered.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.ordered
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

/// Bind the final call parameters for one method invocation.
///
/// `chain` carries the previous method's return value for non-first chain
/// positions; `strict_params` disables all implicit injection.
pub fn bind_call_params(
    callable: &dyn Invocable,
    method: &str,
    base: &Params,
    inputs: &ResolvedInputs,
    chain: Option<&Value>,
    strict_params: bool,
) -> Result<Params, ExecError> {
    let specs = callable.parameters();
    let mut params = base.clone();

    // Chain slot: inject into the single unbound required parameter, or
    // an unbound `data` parameter, or nowhere.
    if let Some(prev) = chain {
        if !strict_params {
            let unbound_required: Vec<&str> = specs
                .iter()
                .filter(|p| p.required && !params.contains_key(&p.name))
                .map(|p| p.name.as_str())
                .collect();
            if unbound_required.len() == 1 {
                params.insert(unbound_required[0].to_string(), prev.clone());
            } else if specs.iter().any(|p| p.name == "data") && !params.contains_key("data") {
                params.insert("data".to_string(), prev.clone());
            }
        }
    }

    // Declared inputs matching parameter names.
    for (name, value) in &inputs.ordered {
        if specs.iter().any(|p| &p.name == name) && !params.contains_key(name) {
            params.insert(name.clone(), value.clone());
        }
    }

    // Aggregate forms for multi-input steps.
    if inputs.len() > 1 {
        if specs.iter().any(|p| p.name == "inputs") && !params.contains_key("inputs") {
            params.insert(
                "inputs".to_string(),
                Value::List(inputs.ordered.iter().map(|(_, v)| v.clone()).collect()),
            );
        }
        if specs.iter().any(|p| p.name == "inputs_map") && !params.contains_key("inputs_map") {
            let map: BTreeMap<String, Value> = inputs
                .ordered
                .iter()
                .map(|(n, v)| (n.clone(), v.clone()))
                .collect();
            params.insert("inputs_map".to_string(), Value::Map(map));
        }
    }

    // Unknown keys pass through only for open-tailed callables.
    if !callable.accepts_extra() {
        params.retain(|key, _| specs.iter().any(|p| &p.name == key));
    }

    // Every required parameter must be bound by now.
    for spec in specs {
        if spec.required && !params.contains_key(&spec.name) {
            return Err(ExecError::UnboundParameter {
                method: method.to_string(),
                parameter: spec.name.clone(),
            });
        }
    }

    Ok(params)
}

/// Normalized result of output capture.
#[derive(Debug, Clone, Default)]
pub struct CapturedOutputs {
    /// Every produced output by name (datasets and parameters).
    pub produced: BTreeMap<String, Value>,
    pub primary_output: Option<String>,
    /// Dataset-kind values in declared order.
    pub datasets: Vec<(String, Value)>,
}

/// Map a method chain's final value onto the step's declared outputs.
///
/// Map returns pull values by explicit source key, same-name key,
/// suffix-stripped key, then the next unused key; sequences map by
/// position when at least two outputs are declared; anything else goes to
/// the first output. Missing values become `Null` with a warning, or an
/// error under `strict_outputs`.
pub fn capture_outputs(
    step: &StepSpec,
    raw: Value,
    strict_outputs: bool,
) -> Result<CapturedOutputs, ExecError> {
    let mut captured = CapturedOutputs {
        primary_output: step.primary_output().map(str::to_string),
        ..CapturedOutputs::default()
    };
    if step.outputs.is_empty() {
        return Ok(captured);
    }

    match raw {
        Value::Map(result) => {
            let mut used: Vec<String> = Vec::new();
            for spec in &step.outputs {
                let source_key = spec
                    .source_key
                    .as_ref()
                    .filter(|k| result.contains_key(*k))
                    .cloned()
                    .or_else(|| infer_source_key(&spec.name, &result, &used));

                let value = match &source_key {
                    Some(key) => result.get(key).cloned().unwrap_or(Value::Null),
                    None => Value::Null,
                };
                if let Some(key) = source_key {
                    used.push(key);
                } else {
                    if strict_outputs {
                        return Err(ExecError::Execution {
                            method: step.methods.last().cloned().unwrap_or_default(),
                            message: format!(
                                "no key in result maps onto declared output '{}' (available: {:?})",
                                spec.name,
                                result.keys().collect::<Vec<_>>()
                            ),
                        });
                    }
                    warn!(
                        step = %step.name,
                        output = %spec.name,
                        available = ?result.keys().collect::<Vec<_>>(),
                        "no source key maps onto output, using null"
                    );
                }
                push_output(&mut captured, spec.kind, &spec.name, value);
            }
        }
        Value::List(items) if step.outputs.len() >= 2 => {
            for (idx, spec) in step.outputs.iter().enumerate() {
                let value = match items.get(idx) {
                    Some(v) => v.clone(),
                    None => {
                        if strict_outputs {
                            return Err(ExecError::Execution {
                                method: step.methods.last().cloned().unwrap_or_default(),
                                message: format!(
                                    "sequence result has no element for output #{idx} '{}'",
                                    spec.name
                                ),
                            });
                        }
                        warn!(
                            step = %step.name,
                            position = idx,
                            "sequence result too short, using null"
                        );
                        Value::Null
                    }
                };
                push_output(&mut captured, spec.kind, &spec.name, value);
            }
        }
        scalar => {
            // Whole result goes to the first declared output.
            let spec = &step.outputs[0];
            push_output(&mut captured, spec.kind, &spec.name, scalar);
        }
    }

    Ok(captured)
}

fn push_output(captured: &mut CapturedOutputs, kind: OutputKind, name: &str, value: Value) {
    if kind == OutputKind::Dataset {
        captured.datasets.push((name.to_string(), value.clone()));
    }
    captured.produced.insert(name.to_string(), value);
}

/// Infer which result key feeds an output: same name, suffix-stripped
/// name, else the next unused key.
fn infer_source_key(
    output: &str,
    result: &BTreeMap<String, Value>,
    used: &[String],
) -> Option<String> {
    if result.contains_key(output) {
        return Some(output.to_string());
    }

    let mut base = output.to_string();
    for _ in 0..2 {
        match base.rsplit_once('_') {
            Some((head, tail)) if OUTPUT_KEY_SUFFIXES.contains(&tail) => {
                base = head.to_string();
            }
            _ => break,
        }
    }
    if base != output && result.contains_key(&base) {
        return Some(base);
    }

    result
        .keys()
        .find(|k| !used.contains(*k))
        .map(|k| k.to_string())
}

/// Compact artifact summary for node metrics.
pub fn summarize(name: &str, value: &Value) -> Value {
    let mut out = BTreeMap::new();
    out.insert("name".to_string(), Value::Str(name.to_string()));
    out.insert(
        "type".to_string(),
        Value::Str(value.type_tag().to_string()),
    );
    match value {
        Value::Table(t) => {
            let (rows, cols) = t.shape();
            out.insert("rows".to_string(), Value::Int(rows as i64));
            out.insert("cols".to_string(), Value::Int(cols as i64));
            out.insert(
                "columns_sample".to_string(),
                Value::List(
                    t.columns
                        .iter()
                        .take(10)
                        .map(|c| Value::Str(c.clone()))
                        .collect(),
                ),
            );
        }
        Value::List(items) => {
            out.insert("length".to_string(), Value::Int(items.len() as i64));
        }
        Value::Map(m) => {
            out.insert(
                "keys".to_string(),
                Value::List(m.keys().take(15).map(|k| Value::Str(k.clone())).collect()),
            );
        }
        _ => {}
    }
    Value::Map(out)
}
