//! Method records and the invocation seam
//!
//! A [`MethodRecord`] is the immutable catalog entry for one concrete
//! implementation; [`Invocable`] is the trait every engine implements.
//! Parameter binding works against declared [`ParameterSpec`]s, never
//! reflection.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::value::{Params, Value};
use crate::version::{parse_version, ParsedVersion};

/// Error type produced by user method implementations.
pub type MethodError = Box<dyn std::error::Error + Send + Sync>;

/// Result of a method invocation.
pub type MethodResult = std::result::Result<Value, MethodError>;

// ============================================================================
// PARAMETER SPECS
// ============================================================================

/// Declared parameter of an invocable implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSpec {
    pub name: String,
    /// No default exists; binding must supply a value.
    pub required: bool,
    /// Annotated as a collection (accepts a list as a single argument).
    pub collection: bool,
}

impl ParameterSpec {
    pub fn required(name: impl Into<String>) -> ParameterSpec {
        ParameterSpec {
            name: name.into(),
            required: true,
            collection: false,
        }
    }

    pub fn optional(name: impl Into<String>) -> ParameterSpec {
        ParameterSpec {
            name: name.into(),
            required: false,
            collection: false,
        }
    }

    pub fn collection(name: impl Into<String>) -> ParameterSpec {
        ParameterSpec {
            name: name.into(),
            required: true,
            collection: true,
        }
    }
}

// ============================================================================
// INVOCABLE
// ============================================================================

/// The seam between the engine and concrete implementations. Invocations
/// receive a named parameter map and return a single [`Value`].
pub trait Invocable: Send + Sync {
    fn invoke(&self, args: Params) -> MethodResult;

    /// Declared parameters, in positional order.
    fn parameters(&self) -> &[ParameterSpec];

    /// Whether unknown parameters are passed through instead of dropped.
    fn accepts_extra(&self) -> bool {
        false
    }
}

/// Closure-backed [`Invocable`], the common way engines register methods.
pub struct FnMethod {
    params: Vec<ParameterSpec>,
    accepts_extra: bool,
    func: Arc<dyn Fn(Params) -> MethodResult + Send + Sync>,
}

impl FnMethod {
    pub fn new<F>(func: F) -> FnMethod
    where
        F: Fn(Params) -> MethodResult + Send + Sync + 'static,
    {
        FnMethod {
            params: Vec::new(),
            accepts_extra: false,
            func: Arc::new(func),
        }
    }

    /// Append a declared parameter (builder style).
    pub fn param(mut self, spec: ParameterSpec) -> FnMethod {
        self.params.push(spec);
        self
    }

    /// Accept and pass through unknown parameters.
    pub fn with_extra(mut self) -> FnMethod {
        self.accepts_extra = true;
        self
    }
}

impl Invocable for FnMethod {
    fn invoke(&self, args: Params) -> MethodResult {
        (self.func)(args)
    }

    fn parameters(&self) -> &[ParameterSpec] {
        &self.params
    }

    fn accepts_extra(&self) -> bool {
        self.accepts_extra
    }
}

// ============================================================================
// METHOD RECORD
// ============================================================================

/// Immutable catalog entry: one `(component, engine, method)` binding.
#[derive(Clone)]
pub struct MethodRecord {
    pub component_type: String,
    pub engine_type: String,
    pub method_name: String,
    pub description: String,
    pub version: String,
    pub priority: i32,
    pub deprecated: bool,
    pub tags: BTreeSet<String>,
    /// Textual signature, diagnostic only.
    pub signature: String,
    pub module_path: String,
    pub callable: Arc<dyn Invocable>,
    pub registered_at: DateTime<Utc>,
}

impl MethodRecord {
    pub fn new(
        component: impl Into<String>,
        engine: impl Into<String>,
        method: impl Into<String>,
        callable: Arc<dyn Invocable>,
    ) -> MethodRecord {
        MethodRecord {
            component_type: component.into(),
            engine_type: engine.into(),
            method_name: method.into(),
            description: String::new(),
            version: "1.0.0".to_string(),
            priority: 0,
            deprecated: false,
            tags: BTreeSet::new(),
            signature: String::new(),
            module_path: String::new(),
            callable,
            registered_at: Utc::now(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> MethodRecord {
        self.version = version.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> MethodRecord {
        self.priority = priority;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> MethodRecord {
        self.description = description.into();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> MethodRecord
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_module_path(mut self, path: impl Into<String>) -> MethodRecord {
        self.module_path = path.into();
        self
    }

    pub fn deprecated(mut self) -> MethodRecord {
        self.deprecated = true;
        self
    }

    /// Canonical identity: `component::engine::method`.
    pub fn full_key(&self) -> String {
        format!(
            "{}::{}::{}",
            self.component_type, self.engine_type, self.method_name
        )
    }

    pub fn parsed_version(&self) -> ParsedVersion {
        parse_version(&self.version)
    }
}

impl fmt::Debug for MethodRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodRecord")
            .field("full_key", &self.full_key())
            .field("version", &self.version)
            .field("priority", &self.priority)
            .field("deprecated", &self.deprecated)
            .field("tags", &self.tags)
            .finish()
    }
}

/// Build the full key without constructing a record.
pub fn full_key(component: &str, engine: &str, method: &str) -> String {
    format!("{component}::{engine}::{method}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Arc<dyn Invocable> {
        Arc::new(FnMethod::new(|_| Ok(Value::Null)))
    }

    #[test]
    fn full_key_joins_with_double_colon() {
        let rec = MethodRecord::new("data_engine", "pandas", "aggregate", noop());
        assert_eq!(rec.full_key(), "data_engine::pandas::aggregate");
    }

    #[test]
    fn builder_sets_metadata() {
        let rec = MethodRecord::new("c", "e", "m", noop())
            .with_version("2.1.0")
            .with_priority(5)
            .with_tags(["fast", "beta"])
            .deprecated();
        assert_eq!(rec.parsed_version(), (2, 1, 0));
        assert_eq!(rec.priority, 5);
        assert!(rec.deprecated);
        assert!(rec.tags.contains("fast"));
    }

    #[test]
    fn fn_method_invokes_closure() {
        let double = FnMethod::new(|args: Params| {
            let x = args.get("x").and_then(Value::as_int).unwrap_or(0);
            Ok(Value::Int(x * 2))
        })
        .param(ParameterSpec::required("x"));

        let mut args = Params::new();
        args.insert("x".into(), Value::Int(21));
        assert_eq!(double.invoke(args).unwrap(), Value::Int(42));
        assert_eq!(double.parameters().len(), 1);
        assert!(!double.accepts_extra());
    }
}
