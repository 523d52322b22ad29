//! Orchestrator facade
//!
//! The public entry point. Owns the registry, hook bus, middleware
//! chain, and artifact store for its lifetime and composes them into the
//! scheduler for each run. Behavioral extensions hang off the hook bus
//! and middleware chain; there is no subclassing surface.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::cache::ArtifactStore;
use crate::config::ConfigFile;
use crate::error::{Result, StratusError};
use crate::hooks::{HookBus, HookStats};
use crate::middleware::{Middleware, MiddlewareChain};
use crate::registry::handle::CandidateInfo;
use crate::registry::record::full_key;
use crate::registry::{
    MethodExecutor, MethodRecord, MetricsSnapshot, Registry, Strategy,
};
use crate::result::RunResult;
use crate::scheduler::Scheduler;
use crate::settings::Settings;
use crate::step::{build_graph, parse_steps};
use crate::value::{Params, Value};

/// Named behavioral extension registered against the hook bus.
pub struct Plugin {
    pub name: String,
    register: Box<dyn Fn(&HookBus) + Send + Sync>,
}

impl Plugin {
    pub fn new<F>(name: impl Into<String>, register: F) -> Plugin
    where
        F: Fn(&HookBus) + Send + Sync + 'static,
    {
        Plugin {
            name: name.into(),
            register: Box::new(register),
        }
    }
}

/// Introspection result for one `(component, method)` capability.
#[derive(Debug, Clone, Serialize)]
pub struct Describe {
    pub status: String,
    pub component: String,
    pub method: String,
    pub implementations: Vec<CandidateInfo>,
    pub selected: Option<CandidateInfo>,
}

/// System-level status for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub components: Vec<String>,
    pub registered_methods: usize,
    pub registry: MetricsSnapshot,
    pub hooks: BTreeMap<String, HookStats>,
}

/// Public API facade.
pub struct Orchestrator {
    registry: Arc<Registry>,
    hooks: Arc<HookBus>,
    middleware: MiddlewareChain,
    settings: Settings,
}

impl Default for Orchestrator {
    fn default() -> Self {
        Orchestrator::new()
    }
}

impl Orchestrator {
    /// Fresh orchestrator with its own registry and hook bus, settings
    /// read from the environment.
    pub fn new() -> Orchestrator {
        let settings = Settings::from_env();
        let hooks = Arc::new(HookBus::new());
        let registry = Arc::new(Registry::new(settings.clone(), hooks.clone()));
        Orchestrator {
            registry,
            hooks,
            middleware: MiddlewareChain::new(),
            settings,
        }
    }

    /// Orchestrator over an existing registry (e.g. the process-wide
    /// one); shares its hook bus and settings.
    pub fn with_registry(registry: Arc<Registry>) -> Orchestrator {
        let hooks = registry.hooks().clone();
        let settings = registry.settings().clone();
        Orchestrator {
            registry,
            hooks,
            middleware: MiddlewareChain::new(),
            settings,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn hooks(&self) -> &Arc<HookBus> {
        &self.hooks
    }

    /// Append a middleware layer; the first added is outermost.
    pub fn add_middleware(&mut self, layer: Arc<dyn Middleware>) {
        self.middleware.add(layer);
    }

    /// Register plugins against the hook bus. Names in `DISABLE_PLUGINS`
    /// are skipped. Idempotency is the plugin author's contract; calling
    /// this twice registers handlers twice.
    pub fn register_plugins(&self, plugins: &[Plugin]) -> usize {
        let mut registered = 0;
        for plugin in plugins {
            if self.settings.disabled_plugins.contains(&plugin.name) {
                info!(plugin = %plugin.name, "plugin disabled, skipping");
                continue;
            }
            (plugin.register)(&self.hooks);
            info!(plugin = %plugin.name, "plugin registered");
            registered += 1;
        }
        registered
    }

    // ------------------------------------------------------------------
    // Pipeline runs
    // ------------------------------------------------------------------

    /// Run a parsed pipeline configuration to completion.
    pub async fn run(&self, config: &ConfigFile) -> Result<RunResult> {
        let pipeline = &config.pipeline;
        let steps = parse_steps(pipeline)?;
        let graph = build_graph(&steps, pipeline.options.strict_dependencies)?;
        for warning in graph.validate(pipeline.options.strict_dependencies)? {
            tracing::warn!("{warning}");
        }
        let plan = graph.build_plan()?;

        let store = Arc::new(ArtifactStore::new(
            pipeline.options.cache.root.clone(),
            pipeline.options.cache.persist,
        ));
        let scheduler = Scheduler::new(
            self.registry.clone(),
            self.hooks.clone(),
            self.middleware.clone(),
            self.settings.clone(),
            store,
            pipeline.orchestration.clone(),
            pipeline.options.clone(),
        );
        scheduler.run(&pipeline.name, steps, &graph, plan).await
    }

    /// Convenience: parse a YAML document and run it.
    pub async fn run_yaml(&self, text: &str) -> Result<RunResult> {
        let config = ConfigFile::from_yaml(text)?;
        self.run(&config).await
    }

    /// Convenience: load a YAML file and run it.
    pub async fn run_file(&self, path: impl AsRef<Path>) -> Result<RunResult> {
        let config = ConfigFile::load(path)?;
        self.run(&config).await
    }

    // ------------------------------------------------------------------
    // Direct execution facade
    // ------------------------------------------------------------------

    /// Select and invoke a method through the middleware chain.
    pub fn execute(
        &self,
        component: &str,
        method: &str,
        args: Params,
        strategy: &Strategy,
    ) -> Result<Value> {
        let record = self.registry.select(component, method, strategy)?;
        self.invoke_record(component, method, record, args)
    }

    /// Invoke a specific `(component, engine, method)` binding.
    pub fn execute_with_engine(
        &self,
        component: &str,
        engine: &str,
        method: &str,
        args: Params,
    ) -> Result<Value> {
        let key = full_key(component, engine, method);
        let record = self.registry.lookup(&key).ok_or_else(|| {
            StratusError::from(crate::error::RegistryError::EngineNotFound {
                component: component.to_string(),
                method: method.to_string(),
                engine: engine.to_string(),
            })
        })?;
        self.invoke_record(component, method, record, args)
    }

    fn invoke_record(
        &self,
        component: &str,
        method: &str,
        record: Arc<MethodRecord>,
        args: Params,
    ) -> Result<Value> {
        let executor = MethodExecutor::new(
            self.registry.metrics().clone(),
            self.settings.input_style,
        );
        let core = move |a: Params| -> Result<Value> {
            executor.execute(&record, a).map_err(Into::into)
        };
        self.middleware.invoke(component, method, args, &core)
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Candidate implementations and the default selection for a
    /// capability.
    pub fn describe(&self, component: &str, method: &str) -> Describe {
        let candidates = self.registry.candidates(component, method);
        if candidates.is_empty() {
            return Describe {
                status: "not_found".to_string(),
                component: component.to_string(),
                method: method.to_string(),
                implementations: Vec::new(),
                selected: None,
            };
        }
        let implementations: Vec<CandidateInfo> = candidates
            .iter()
            .map(|c| CandidateInfo {
                engine_type: c.engine_type.clone(),
                version: c.version.clone(),
                priority: c.priority,
                deprecated: c.deprecated,
            })
            .collect();
        let selected = self
            .registry
            .select(component, method, &Strategy::Default)
            .ok()
            .map(|c| CandidateInfo {
                engine_type: c.engine_type.clone(),
                version: c.version.clone(),
                priority: c.priority,
                deprecated: c.deprecated,
            });
        Describe {
            status: "ok".to_string(),
            component: component.to_string(),
            method: method.to_string(),
            implementations,
            selected,
        }
    }

    /// Filtered listing of registered records.
    pub fn list_methods(
        &self,
        component: Option<&str>,
        engine: Option<&str>,
    ) -> Vec<Arc<MethodRecord>> {
        self.registry.list(component, engine)
    }

    /// Execution metrics, hook stats, and registry shape.
    pub fn stats(&self) -> SystemStatus {
        SystemStatus {
            components: self.registry.components(),
            registered_methods: self.registry.len(),
            registry: self.registry.metrics().snapshot(),
            hooks: self.hooks.stats(),
        }
    }

    /// Delete the persistent cache under a store base directory.
    pub fn clear_cache(base: impl AsRef<Path>) {
        ArtifactStore::new(base.as_ref(), true).clear();
    }
}
