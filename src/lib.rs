//! # Stratus
//!
//! Configuration-driven data-processing orchestrator.
//!
//! Users describe a workflow as an ordered list of named *steps*, each
//! referencing a logical `component`, a `method` (or method chain), and
//! an optional `engine`. Steps pass typed artifacts to one another via
//! named outputs and `steps.<step>.outputs.parameters.<name>` references.
//!
//! ## Engine overview
//!
//! | Subsystem | Role |
//! |-----------|------|
//! | [`registry`] | Process catalog of implementations, selection strategies, deferred method handles |
//! | [`graph`] + [`scheduler`] | DAG construction, cycle detection, layered parallel execution |
//! | [`fingerprint`] + [`cache`] | Content-addressed step signatures, on-disk artifact store |
//! | [`hooks`] + [`middleware`] | Event bus and onion-model interceptors for behavioral extension |
//!
//! Control flow: load config, parse steps, build the DAG, plan layers,
//! then per layer: resolve references, check the cache, execute method
//! chains, capture outputs, persist.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stratus::{ConfigFile, FnMethod, MethodRecord, Orchestrator, Value};
//!
//! let orchestrator = Orchestrator::new();
//! orchestrator.registry().register(MethodRecord::new(
//!     "datahub",
//!     "fs",
//!     "load",
//!     Arc::new(FnMethod::new(|_| Ok(Value::Int(42)))),
//! ))?;
//!
//! let config = ConfigFile::load("pipeline.yaml")?;
//! let result = orchestrator.run(&config).await?;
//! println!("{}", result.overall_status);
//! # Ok::<(), stratus::StratusError>(())
//! ```
//!
//! ## Modules
//!
//! - [`config`] - YAML pipeline configuration shapes
//! - [`step`] - step normalization and reference marking
//! - [`graph`] - dependency graph and execution planning
//! - [`scheduler`] - layered concurrent execution
//! - [`registry`] - method records, selection, handles, metrics
//! - [`cache`] - persistent artifact store
//! - [`hooks`] / [`middleware`] - extension seams
//! - [`value`] / [`fingerprint`] - the data plane

pub mod binding;
pub mod cache;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod graph;
pub mod hooks;
pub mod middleware;
pub mod orchestrator;
pub mod registry;
pub mod result;
pub mod scheduler;
pub mod settings;
pub mod step;
pub mod value;
pub mod version;

pub use config::{ConfigFile, OrchestrationConfig, PipelineConfig};
pub use error::{ExecError, GraphError, RegistryError, Result, StratusError};
pub use fingerprint::fingerprint;
pub use graph::{DepKind, DependencyEdge, DependencyGraph, ExecutionLayer, ExecutionPlan};
pub use hooks::HookBus;
pub use middleware::{FnMiddleware, Middleware, MiddlewareChain, Next};
pub use orchestrator::{Describe, Orchestrator, Plugin, SystemStatus};
pub use registry::{
    FnMethod, Invocable, MethodHandle, MethodRecord, MethodModule, ParameterSpec, Registry,
    ScanOptions, Strategy,
};
pub use result::{CacheStats, RunResult, StepLineage, StepStatus};
pub use settings::{ConflictMode, InputStyle, Settings};
pub use step::{OutputKind, OutputSpec, StepSpec};
pub use value::{dataset_name, Params, Reference, Table, Value};
pub use version::parse_version;
