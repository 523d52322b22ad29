//! Tagged value union passed between steps
//!
//! Every artifact and parameter in a pipeline is a [`Value`]. References
//! (`steps.X.outputs.parameters.Y`) are a first-class variant so they keep
//! their identity through signature computation; tables and raw bytes are
//! the opaque artifact carriers.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize, Serializer};
use sha2::{Digest, Sha256};

/// Reference string syntax: `steps.<step>.outputs.parameters.<name>`.
/// Any other dotted form is a literal string.
pub static REF_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^steps\.([^.]+)\.outputs\.parameters\.([^.]+)$").unwrap());

/// Named parameter map handed to method invocations.
pub type Params = BTreeMap<String, Value>;

/// Canonical dataset name for a step output: `<step>__<output>`, dashes
/// normalized to underscores.
pub fn dataset_name(step: &str, output: &str) -> String {
    format!("{step}__{output}").replace('-', "_")
}

/// Short stable hash of a reference string (used as the reference identity
/// inside signatures and the run-time reference table).
pub fn hash_reference(raw: &str) -> String {
    let digest = Sha256::digest(raw.as_bytes());
    let hex = format!("{digest:x}");
    hex[..16].to_string()
}

// ============================================================================
// REFERENCE
// ============================================================================

/// A cross-step output reference, rewritten from its string form during
/// step parsing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    pub step: String,
    pub output: String,
    pub hash: String,
}

impl Reference {
    /// Parse a reference string; returns `None` for anything that is not
    /// exactly the `steps.<step>.outputs.parameters.<name>` form.
    pub fn parse(raw: &str) -> Option<Reference> {
        let caps = REF_PATTERN.captures(raw.trim())?;
        let step = caps.get(1)?.as_str().to_string();
        let output = caps.get(2)?.as_str().to_string();
        let hash = hash_reference(raw.trim());
        Some(Reference { step, output, hash })
    }

    /// Construct from parts, deriving the hash from the string form.
    pub fn new(step: impl Into<String>, output: impl Into<String>) -> Reference {
        let step = step.into();
        let output = output.into();
        let hash = hash_reference(&format!("steps.{step}.outputs.parameters.{output}"));
        Reference { step, output, hash }
    }

    /// Dataset name this reference resolves through.
    pub fn dataset(&self) -> String {
        dataset_name(&self.step, &self.output)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "steps.{}.outputs.parameters.{}", self.step, self.output)
    }
}

// ============================================================================
// TABLE (opaque tabular artifact)
// ============================================================================

/// Lightweight tabular artifact: named columns plus row-major values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Table {
        Table {
            columns,
            rows: Vec::new(),
        }
    }

    /// (rows, columns) shape.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.columns.len())
    }

    pub fn push_row(&mut self, row: Vec<Value>) {
        self.rows.push(row);
    }

    /// First `n` rows (borrowed), for sampling.
    pub fn head(&self, n: usize) -> &[Vec<Value>] {
        &self.rows[..self.rows.len().min(n)]
    }
}

// ============================================================================
// VALUE
// ============================================================================

/// Dynamic value passed through parameters, catalogs, and artifacts.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// Cross-step output reference; carries identity, not the value.
    Ref(Reference),
    /// Opaque tabular artifact.
    Table(Arc<Table>),
    /// Opaque binary artifact.
    Bytes(Arc<Vec<u8>>),
}

impl Value {
    pub fn type_tag(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Map(_) => "map",
            Value::Ref(_) => "ref",
            Value::Table(_) => "table",
            Value::Bytes(_) => "bytes",
        }
    }

    pub fn table(t: Table) -> Value {
        Value::Table(Arc::new(t))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    /// Deterministic canonical text used in signatures and fingerprints.
    /// Map keys are emitted in sorted order; references render as their
    /// identity marker, never their value.
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        self.write_canonical(&mut out);
        out
    }

    fn write_canonical(&self, out: &mut String) {
        match self {
            Value::Null => out.push_str("null"),
            Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Value::Int(i) => out.push_str(&i.to_string()),
            Value::Float(f) => out.push_str(&format!("{f}")),
            Value::Str(s) => out.push_str(&format!("{s:?}")),
            Value::List(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    item.write_canonical(out);
                }
                out.push(']');
            }
            Value::Map(m) => {
                out.push('{');
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&format!("{k:?}:"));
                    v.write_canonical(out);
                }
                out.push('}');
            }
            Value::Ref(r) => {
                out.push_str(&format!("{{__ref__:{r},hash:{}}}", r.hash));
            }
            Value::Table(t) => {
                let (rows, cols) = t.shape();
                out.push_str(&format!("table({rows}x{cols})["));
                out.push_str(&t.columns.join(","));
                out.push(']');
            }
            Value::Bytes(b) => out.push_str(&format!("bytes({})", b.len())),
        }
    }

    /// Convert a parsed YAML node into a [`Value`]. Strings stay literal
    /// here; reference marking is a separate parsing pass.
    pub fn from_yaml(node: &serde_yaml::Value) -> Value {
        match node {
            serde_yaml::Value::Null => Value::Null,
            serde_yaml::Value::Bool(b) => Value::Bool(*b),
            serde_yaml::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_yaml::Value::String(s) => Value::Str(s.clone()),
            serde_yaml::Value::Sequence(items) => {
                Value::List(items.iter().map(Value::from_yaml).collect())
            }
            serde_yaml::Value::Mapping(m) => {
                let mut out = BTreeMap::new();
                for (k, v) in m {
                    let key = match k.as_str() {
                        Some(s) => s.to_string(),
                        None => serde_yaml::to_string(k)
                            .map(|s| s.trim().to_string())
                            .unwrap_or_default(),
                    };
                    out.insert(key, Value::from_yaml(v));
                }
                Value::Map(out)
            }
            serde_yaml::Value::Tagged(tagged) => Value::from_yaml(&tagged.value),
        }
    }

    /// Convert a JSON node back into a [`Value`]. Strings in exact
    /// reference form round-trip to [`Value::Ref`]; the `__table__` and
    /// `__bytes__` envelopes restore opaque artifacts.
    pub fn from_json(node: serde_json::Value) -> Value {
        match node {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => match Reference::parse(&s) {
                Some(r) => Value::Ref(r),
                None => Value::Str(s),
            },
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(mut obj) => {
                if obj.len() == 1 {
                    if let Some(table) = obj.remove("__table__") {
                        if let Ok(t) = serde_json::from_value::<Table>(table) {
                            return Value::Table(Arc::new(t));
                        }
                        return Value::Null;
                    }
                    if let Some(bytes) = obj.remove("__bytes__") {
                        if let Ok(b) = serde_json::from_value::<Vec<u8>>(bytes) {
                            return Value::Bytes(Arc::new(b));
                        }
                        return Value::Null;
                    }
                }
                let mut out = BTreeMap::new();
                for (k, v) in obj {
                    out.insert(k, Value::from_json(v));
                }
                Value::Map(out)
            }
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::Str(s) => serializer.serialize_str(s),
            Value::List(items) => items.serialize(serializer),
            Value::Map(m) => m.serialize(serializer),
            // References persist as their string form.
            Value::Ref(r) => serializer.serialize_str(&r.to_string()),
            Value::Table(t) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("__table__", t.as_ref())?;
                map.end()
            }
            Value::Bytes(b) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("__bytes__", b.as_slice())?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = serde_json::Value::deserialize(deserializer)?;
        Ok(Value::from_json(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_parses_exact_form() {
        let r = Reference::parse("steps.load.outputs.parameters.rows").unwrap();
        assert_eq!(r.step, "load");
        assert_eq!(r.output, "rows");
        assert_eq!(r.hash.len(), 16);
    }

    #[test]
    fn reference_rejects_other_dotted_forms() {
        assert!(Reference::parse("steps.load.outputs.rows").is_none());
        assert!(Reference::parse("steps.load.outputs.parameters.a.b").is_none());
        assert!(Reference::parse("tasks.load.outputs.parameters.rows").is_none());
        assert!(Reference::parse("plain string").is_none());
    }

    #[test]
    fn reference_hashes_are_injective_per_target() {
        let a = Reference::new("a", "out");
        let b = Reference::new("b", "out");
        let c = Reference::new("a", "other");
        assert_ne!(a.hash, b.hash);
        assert_ne!(a.hash, c.hash);
    }

    #[test]
    fn dataset_name_normalizes_dashes() {
        assert_eq!(dataset_name("load-data", "rows"), "load_data__rows");
    }

    #[test]
    fn canonical_sorts_map_keys() {
        let mut m = BTreeMap::new();
        m.insert("zeta".to_string(), Value::Int(1));
        m.insert("alpha".to_string(), Value::Bool(true));
        let v = Value::Map(m);
        assert_eq!(v.canonical(), "{\"alpha\":true,\"zeta\":1}");
    }

    #[test]
    fn canonical_renders_ref_identity() {
        let r = Reference::new("a", "out");
        let text = Value::Ref(r.clone()).canonical();
        assert!(text.contains("steps.a.outputs.parameters.out"));
        assert!(text.contains(&r.hash));
    }

    #[test]
    fn json_round_trip_preserves_reference_string_form() {
        let v = Value::Ref(Reference::new("a", "out"));
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, "\"steps.a.outputs.parameters.out\"");
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn json_round_trip_table() {
        let mut t = Table::new(vec!["x".into(), "y".into()]);
        t.push_row(vec![Value::Int(1), Value::Str("a".into())]);
        let v = Value::table(t);
        let json = serde_json::to_string(&v).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn yaml_conversion_keeps_strings_literal() {
        let node: serde_yaml::Value =
            serde_yaml::from_str("steps.a.outputs.parameters.out").unwrap();
        assert_eq!(
            Value::from_yaml(&node),
            Value::Str("steps.a.outputs.parameters.out".into())
        );
    }
}
