//! Unified error layering
//!
//! Each subsystem owns a small `thiserror` enum; [`StratusError`] wraps
//! them for the public API and the CLI entry point. Error kinds map onto
//! the engine's failure policies: registry and graph errors are fatal to
//! the run, execution errors are retryable per step configuration, cache
//! I/O failures are logged and never surface here.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, StratusError>;

// ============================================================================
// REGISTRY ERRORS
// ============================================================================

#[derive(Error, Debug)]
pub enum RegistryError {
    /// No candidates registered for `(component, method)`.
    #[error("no implementation registered for {component}.{method}")]
    MethodNotFound { component: String, method: String },

    /// `engine_override` named an engine absent from the candidate set,
    /// or a fixed-engine lookup missed.
    #[error("engine '{engine}' not registered for {component}.{method}")]
    EngineNotFound {
        component: String,
        method: String,
        engine: String,
    },

    /// Registration collision under `conflict_mode = error`.
    #[error("registration conflict: {0}")]
    Conflict(String),

    /// Unknown strategy name or `engine_override` without an engine.
    #[error("strategy error: {0}")]
    Strategy(String),
}

// ============================================================================
// EXECUTION ERRORS
// ============================================================================

#[derive(Error, Debug)]
pub enum ExecError {
    /// The underlying callable failed.
    #[error("method '{method}' failed: {message}")]
    Execution { method: String, message: String },

    /// Input-style validation rejected the call.
    #[error("input style violation for '{method}': {message}")]
    InputStyle { method: String, message: String },

    /// A required parameter was left unbound after binding.
    #[error("method '{method}' has unbound required parameter '{parameter}'")]
    UnboundParameter { method: String, parameter: String },

    /// A referenced `(step, output)` was not present at invocation time.
    #[error("unresolved reference '{reference}': upstream step output not found")]
    ReferenceResolution { reference: String },

    /// A step exceeded its configured timeout.
    #[error("step '{step}' timed out after {seconds}s")]
    Timeout { step: String, seconds: u64 },
}

impl ExecError {
    /// Retries apply only to the execution-error kind: callable failures,
    /// input-style rejections, and unbound required parameters.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecError::Execution { .. }
                | ExecError::InputStyle { .. }
                | ExecError::UnboundParameter { .. }
        )
    }
}

// ============================================================================
// GRAPH ERRORS
// ============================================================================

#[derive(Error, Debug)]
pub enum GraphError {
    /// The dependency graph contains a cycle; one cycle path is reported.
    #[error("cyclic dependency detected: {}", path.join(" -> "))]
    Cycle { path: Vec<String> },

    /// A step depends on an undeclared step (strict mode).
    #[error("step '{node}' depends on missing step(s): {}", missing.join(", "))]
    MissingDependency { node: String, missing: Vec<String> },
}

// ============================================================================
// CACHE ERRORS (non-fatal; logged at the call site)
// ============================================================================

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache {operation} failed for '{path}': {source}")]
    Io {
        operation: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cache {operation} failed for '{path}': {source}")]
    Serde {
        operation: &'static str,
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

// ============================================================================
// TOP-LEVEL ERROR
// ============================================================================

/// Top-level error type wrapping the subsystem enums, providing a single
/// surface for the orchestrator API and the CLI.
#[derive(Error, Debug)]
pub enum StratusError {
    #[error("{0}")]
    Registry(#[from] RegistryError),

    #[error("{0}")]
    Execution(#[from] ExecError),

    #[error("{0}")]
    Graph(#[from] GraphError),

    #[error("{0}")]
    Cache(#[from] CacheError),

    /// Structural problems in the pipeline configuration.
    #[error("invalid pipeline config: {0}")]
    Config(String),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl StratusError {
    pub fn other(msg: impl Into<String>) -> Self {
        StratusError::Other(msg.into())
    }

    /// Whether a step-level retry is worth attempting for this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StratusError::Execution(e) if e.is_retryable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_execution_kind_is_retryable() {
        let exec = StratusError::from(ExecError::Execution {
            method: "m".into(),
            message: "boom".into(),
        });
        assert!(exec.is_retryable());

        let unbound = StratusError::from(ExecError::UnboundParameter {
            method: "m".into(),
            parameter: "x".into(),
        });
        assert!(unbound.is_retryable());

        let missing = StratusError::from(RegistryError::MethodNotFound {
            component: "c".into(),
            method: "m".into(),
        });
        assert!(!missing.is_retryable());

        let reference = StratusError::from(ExecError::ReferenceResolution {
            reference: "steps.a.outputs.parameters.x".into(),
        });
        assert!(!reference.is_retryable());
    }

    #[test]
    fn cycle_error_reports_path() {
        let err = GraphError::Cycle {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "cyclic dependency detected: a -> b -> a");
    }
}
