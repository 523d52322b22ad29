//! Layered step execution
//!
//! The scheduler walks the execution plan layer by layer. Steps inside a
//! layer run concurrently under a semaphore sized by `max_workers`
//! (sequential mode collapses to one permit). Each step resolves its
//! references, computes its signature, consults the cache, runs its
//! method chain through the middleware stack, captures outputs into the
//! catalog, and persists what it produced.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::binding::{bind_call_params, capture_outputs, summarize, ResolvedInputs};
use crate::cache::ArtifactStore;
use crate::config::{OrchestrationConfig, PipelineOptions};
use crate::error::{ExecError, RegistryError, Result, StratusError};
use crate::fingerprint::fingerprint;
use crate::graph::{DependencyGraph, ExecutionPlan};
use crate::hooks::HookBus;
use crate::middleware::MiddlewareChain;
use crate::registry::record::full_key;
use crate::registry::{MethodExecutor, MethodHandle, Registry};
use crate::result::{
    CacheStats, NodeMetrics, RunMetrics, RunOutputs, RunResult, StepLineage, StepStatus,
};
use crate::settings::Settings;
use crate::step::{OutputKind, StepSpec};
use crate::value::{dataset_name, Params, Reference, Value};

/// Terminal per-step state tracked during a run.
#[derive(Debug, Clone)]
enum StepState {
    Completed { cached: bool },
    Failed(String),
    Skipped(String),
}

/// Per-run mutable state shared across worker tasks. Discarded at run
/// completion except for what the store persists.
pub struct RunContext {
    /// dataset name -> artifact
    catalog: DashMap<String, Value>,
    /// dataset name -> fingerprint
    fingerprints: DashMap<String, String>,
    /// step name -> signature
    signatures: Mutex<BTreeMap<String, String>>,
    /// reference string -> value
    references: DashMap<String, Value>,
    /// reference hash -> value
    reference_registry: DashMap<String, Value>,
    /// dataset name -> producing step
    producers: DashMap<String, String>,
    lineage: Mutex<BTreeMap<String, StepLineage>>,
    node_metrics: Mutex<BTreeMap<String, NodeMetrics>>,
    states: DashMap<String, StepState>,
}

impl RunContext {
    fn new() -> RunContext {
        RunContext {
            catalog: DashMap::new(),
            fingerprints: DashMap::new(),
            signatures: Mutex::new(BTreeMap::new()),
            references: DashMap::new(),
            reference_registry: DashMap::new(),
            producers: DashMap::new(),
            lineage: Mutex::new(BTreeMap::new()),
            node_metrics: Mutex::new(BTreeMap::new()),
            states: DashMap::new(),
        }
    }

    /// Register a produced output as resolvable by reference (both the
    /// string form and its hash).
    fn register_reference(&self, step: &str, output: &str, value: &Value) {
        let reference = Reference::new(step, output);
        self.references
            .insert(reference.to_string(), value.clone());
        self.reference_registry
            .insert(reference.hash.clone(), value.clone());
    }

    /// Resolve a reference marker: hash table first, then the string
    /// form, then the catalog by dataset name.
    fn resolve_reference(&self, reference: &Reference) -> std::result::Result<Value, ExecError> {
        if let Some(v) = self.reference_registry.get(&reference.hash) {
            return Ok(v.value().clone());
        }
        let text = reference.to_string();
        if let Some(v) = self.references.get(&text) {
            return Ok(v.value().clone());
        }
        if let Some(v) = self.catalog.get(&reference.dataset()) {
            let value = v.value().clone();
            drop(v);
            self.register_reference(&reference.step, &reference.output, &value);
            return Ok(value);
        }
        Err(ExecError::ReferenceResolution { reference: text })
    }

    fn resolve_value(&self, value: &Value) -> std::result::Result<Value, ExecError> {
        match value {
            Value::Ref(r) => self.resolve_reference(r),
            Value::List(items) => Ok(Value::List(
                items
                    .iter()
                    .map(|v| self.resolve_value(v))
                    .collect::<std::result::Result<_, _>>()?,
            )),
            Value::Map(m) => {
                let mut out = BTreeMap::new();
                for (k, v) in m {
                    out.insert(k.clone(), self.resolve_value(v)?);
                }
                Ok(Value::Map(out))
            }
            other => Ok(other.clone()),
        }
    }
}

/// Everything immutable the workers share.
struct Shared {
    registry: Arc<Registry>,
    hooks: Arc<HookBus>,
    middleware: MiddlewareChain,
    executor: MethodExecutor,
    settings: Settings,
    store: Arc<ArtifactStore>,
    orchestration: OrchestrationConfig,
    options: PipelineOptions,
}

/// Layer-by-layer executor over a built plan.
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<Registry>,
        hooks: Arc<HookBus>,
        middleware: MiddlewareChain,
        settings: Settings,
        store: Arc<ArtifactStore>,
        orchestration: OrchestrationConfig,
        options: PipelineOptions,
    ) -> Scheduler {
        let executor = MethodExecutor::new(registry.metrics().clone(), settings.input_style);
        Scheduler {
            shared: Arc::new(Shared {
                registry,
                hooks,
                middleware,
                executor,
                settings,
                store,
                orchestration,
                options,
            }),
        }
    }

    /// Execute the plan. Step failures abort the run unless `soft_fail`
    /// marks dependents as skipped instead.
    pub async fn run(
        &self,
        flow_name: &str,
        steps: Vec<StepSpec>,
        graph: &DependencyGraph,
        plan: ExecutionPlan,
    ) -> Result<RunResult> {
        let shared = self.shared.clone();
        let started_at = Utc::now();
        let flow_start = Instant::now();
        let deadline = Duration::from_secs(shared.orchestration.timeout);
        let soft_fail = shared.orchestration.soft_fail;

        let ctx = Arc::new(RunContext::new());
        self.warm_from_store(&ctx);

        let mut flow_payload = BTreeMap::new();
        flow_payload.insert(
            "started_at".to_string(),
            Value::Str(started_at.to_rfc3339()),
        );
        shared
            .hooks
            .emit("before_flow", flow_name, &Value::Map(flow_payload));

        info!(
            flow = flow_name,
            layers = plan.depth(),
            nodes = plan.total_nodes,
            max_parallelism = plan.max_parallelism(),
            workers = shared.orchestration.effective_workers(),
            "execution plan ready"
        );

        let step_map: BTreeMap<String, Arc<StepSpec>> = steps
            .into_iter()
            .map(|s| (s.name.clone(), Arc::new(s)))
            .collect();
        let handle_map: BTreeMap<String, Arc<Vec<MethodHandle>>> = step_map
            .values()
            .map(|s| (s.name.clone(), Arc::new(build_handles(s, &shared.settings))))
            .collect();
        let predecessors: BTreeMap<String, BTreeSet<String>> = step_map
            .keys()
            .map(|name| (name.clone(), graph.predecessors(name)))
            .collect();

        // With lazy binding disabled, engines bind up front; resolution
        // failures still surface per step at execution time.
        if !shared.settings.lazy_enabled {
            for handles in handle_map.values() {
                for handle in handles.iter() {
                    if let Ok(engine) = handle.resolve(&shared.registry) {
                        debug!(
                            handle = %handle.identity(),
                            engine = %engine,
                            "eagerly bound"
                        );
                    }
                }
            }
        }

        let semaphore = Arc::new(Semaphore::new(shared.orchestration.effective_workers()));
        let mut aborted: Option<String> = None;

        'layers: for layer in &plan.layers {
            if flow_start.elapsed() > deadline {
                warn!(flow = flow_name, "flow deadline exceeded, refusing to start new steps");
                for name in plan
                    .layers
                    .iter()
                    .skip(layer.index)
                    .flat_map(|l| l.nodes.iter())
                {
                    mark_skipped(&ctx, &step_map[name], "flow_timeout");
                }
                aborted = Some(format!(
                    "flow deadline of {}s exceeded",
                    shared.orchestration.timeout
                ));
                break 'layers;
            }

            let mut join_set: JoinSet<()> = JoinSet::new();
            for name in &layer.nodes {
                let step = step_map[name].clone();

                // Dependents of failed or skipped steps never start.
                let blocked = predecessors
                    .get(name)
                    .map(|preds| {
                        preds.iter().any(|p| {
                            matches!(
                                ctx.states.get(p).map(|s| s.value().clone()),
                                Some(StepState::Failed(_)) | Some(StepState::Skipped(_))
                            )
                        })
                    })
                    .unwrap_or(false);
                if blocked {
                    mark_skipped(&ctx, &step, "dependency_failed");
                    continue;
                }

                let shared = shared.clone();
                let ctx = ctx.clone();
                let handles = handle_map[name].clone();
                let semaphore = semaphore.clone();
                join_set.spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .expect("semaphore never closed");
                    run_step(shared, ctx, step, handles).await;
                });
            }

            while let Some(joined) = join_set.join_next().await {
                if let Err(err) = joined {
                    warn!(error = %err, "step task join failed");
                }
            }

            if !soft_fail {
                let failure = layer.nodes.iter().find_map(|name| {
                    match ctx.states.get(name).map(|s| s.value().clone()) {
                        Some(StepState::Failed(msg)) => Some((name.clone(), msg)),
                        _ => None,
                    }
                });
                if let Some((name, msg)) = failure {
                    aborted = Some(format!("step '{name}' failed: {msg}"));
                    break 'layers;
                }
            }
        }

        let finished_at = Utc::now();
        let any_failed = ctx
            .states
            .iter()
            .any(|entry| matches!(entry.value(), StepState::Failed(_)));
        let overall_status = if aborted.is_some() {
            "failed".to_string()
        } else if any_failed {
            "completed_with_failures".to_string()
        } else {
            "completed".to_string()
        };
        let status = if aborted.is_some() {
            "failed".to_string()
        } else {
            "completed".to_string()
        };

        if let Some(reason) = &aborted {
            warn!(flow = flow_name, reason = %reason, "run aborted");
        }

        let node_metrics = ctx.node_metrics.lock().clone();
        let cache_stats =
            CacheStats::from_node_metrics(&node_metrics, ctx.fingerprints.len());

        let mut by_reference: Vec<String> =
            ctx.references.iter().map(|e| e.key().clone()).collect();
        by_reference.sort();

        let result = RunResult {
            status,
            executed_steps: plan.flatten(),
            outputs: RunOutputs {
                by_reference,
                registry_size: ctx.reference_registry.len(),
            },
            metrics: RunMetrics { cache: cache_stats },
            lineage: ctx.lineage.lock().clone(),
            node_metrics,
            started_at: started_at.to_rfc3339(),
            finished_at: finished_at.to_rfc3339(),
            overall_status,
        };

        let mut after_payload = BTreeMap::new();
        after_payload.insert(
            "status".to_string(),
            Value::Str(result.overall_status.clone()),
        );
        after_payload.insert(
            "cache_hits".to_string(),
            Value::Int(result.metrics.cache.cache_hits as i64),
        );
        shared
            .hooks
            .emit("after_flow", flow_name, &Value::Map(after_payload));

        Ok(result)
    }

    /// Seed the run context from the persistent store.
    fn warm_from_store(&self, ctx: &RunContext) {
        let loaded = self.shared.store.load_all();
        *ctx.signatures.lock() = loaded.signatures;
        for (dataset, value, fp) in loaded.datasets {
            // Datasets named <step>__<output> are resolvable by reference.
            if let Some((step, output)) = dataset.split_once("__") {
                ctx.register_reference(step, output, &value);
            }
            ctx.fingerprints.insert(dataset.clone(), fp);
            ctx.catalog.insert(dataset, value);
        }
    }
}

fn build_handles(step: &StepSpec, settings: &Settings) -> Vec<MethodHandle> {
    step.methods
        .iter()
        .map(|method| {
            if step.engine == "auto" {
                MethodHandle::auto(&step.component, method, settings.handle_resolve_ttl)
            } else {
                MethodHandle::fixed(&step.component, method, &step.engine)
            }
        })
        .collect()
}

fn mark_skipped(ctx: &RunContext, step: &StepSpec, reason: &str) {
    info!(step = %step.name, reason, "step skipped");
    ctx.states
        .insert(step.name.clone(), StepState::Skipped(reason.to_string()));
    ctx.lineage.lock().insert(
        step.name.clone(),
        StepLineage {
            inputs: step.input_datasets(),
            applied_inputs: Vec::new(),
            outputs: Vec::new(),
            primary_output: step.primary_output().map(str::to_string),
            cached: false,
            signature: None,
            duration_sec: 0.0,
            status: StepStatus::Skipped,
            error: None,
            skip_reason: Some(reason.to_string()),
        },
    );
}

/// Drive one step: timeout wrapper, state recording, failure snapshot.
async fn run_step(
    shared: Arc<Shared>,
    ctx: Arc<RunContext>,
    step: Arc<StepSpec>,
    handles: Arc<Vec<MethodHandle>>,
) {
    let start = Instant::now();
    let step_timeout = step.timeout;

    let blocking = {
        let shared = shared.clone();
        let ctx = ctx.clone();
        let step = step.clone();
        tokio::task::spawn_blocking(move || execute_step(&shared, &ctx, &step, &handles))
    };

    let outcome: Result<bool> = match step_timeout {
        Some(limit) => match tokio::time::timeout(limit, blocking).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(StratusError::other(format!(
                "step task panicked: {join_err}"
            ))),
            Err(_) => Err(ExecError::Timeout {
                step: step.name.clone(),
                seconds: limit.as_secs(),
            }
            .into()),
        },
        None => match blocking.await {
            Ok(result) => result,
            Err(join_err) => Err(StratusError::other(format!(
                "step task panicked: {join_err}"
            ))),
        },
    };

    match outcome {
        Ok(cached) => {
            ctx.states
                .insert(step.name.clone(), StepState::Completed { cached });
        }
        Err(err) => {
            let message = err.to_string();
            warn!(step = %step.name, error = %message, "step failed");

            let duration = start.elapsed().as_secs_f64();
            let signature = ctx.signatures.lock().get(&step.name).cloned();
            ctx.node_metrics.lock().insert(
                step.name.clone(),
                NodeMetrics {
                    duration_sec: duration,
                    outputs: Vec::new(),
                    cached: false,
                    signature: signature.clone(),
                    error: Some(message.clone()),
                },
            );
            ctx.lineage.lock().insert(
                step.name.clone(),
                StepLineage {
                    inputs: step.input_datasets(),
                    applied_inputs: Vec::new(),
                    outputs: Vec::new(),
                    primary_output: step.primary_output().map(str::to_string),
                    cached: false,
                    signature,
                    duration_sec: duration,
                    status: StepStatus::Failed,
                    error: Some(message.clone()),
                    skip_reason: None,
                },
            );
            ctx.states
                .insert(step.name.clone(), StepState::Failed(message.clone()));

            write_failure_snapshot(&shared, &ctx, &step, &message);

            let mut payload = BTreeMap::new();
            payload.insert("error".to_string(), Value::Str(message.clone()));
            payload.insert("failed".to_string(), Value::Bool(true));
            shared
                .hooks
                .emit("after_step", &step.name, &Value::Map(payload.clone()));
            shared
                .hooks
                .emit("on_failure", &step.name, &Value::Map(payload));
        }
    }
}

fn write_failure_snapshot(shared: &Shared, ctx: &RunContext, step: &StepSpec, error: &str) {
    let mut snapshot = BTreeMap::new();
    snapshot.insert("step".to_string(), Value::Str(step.name.clone()));
    snapshot.insert("error".to_string(), Value::Str(error.to_string()));
    snapshot.insert(
        "methods".to_string(),
        Value::List(step.methods.iter().map(|m| Value::Str(m.clone())).collect()),
    );
    snapshot.insert(
        "parameters".to_string(),
        Value::Str(Value::Map(step.parameters.clone()).canonical()),
    );
    snapshot.insert(
        "inputs".to_string(),
        Value::List(
            step.input_datasets()
                .into_iter()
                .map(Value::Str)
                .collect(),
        ),
    );
    snapshot.insert(
        "signature".to_string(),
        match ctx.signatures.lock().get(&step.name) {
            Some(sig) => Value::Str(sig.clone()),
            None => Value::Null,
        },
    );
    shared
        .store
        .write_failure_snapshot(&step.name, &Value::Map(snapshot));
}

/// Synchronous step body. Returns whether the step was a cache hit.
fn execute_step(
    shared: &Shared,
    ctx: &RunContext,
    step: &StepSpec,
    handles: &[MethodHandle],
) -> Result<bool> {
    let start = Instant::now();
    let planned = step.planned_datasets();
    let input_names = step.input_datasets();

    let mut before = BTreeMap::new();
    before.insert(
        "planned_outputs".to_string(),
        Value::List(planned.iter().cloned().map(Value::Str).collect()),
    );
    before.insert(
        "inputs".to_string(),
        Value::List(input_names.iter().cloned().map(Value::Str).collect()),
    );
    shared
        .hooks
        .emit("before_step", &step.name, &Value::Map(before));

    // Resolve reference markers against upstream outputs.
    let mut resolved_params = Params::new();
    for (key, value) in &step.parameters {
        resolved_params.insert(key.clone(), ctx.resolve_value(value)?);
    }

    // Upstream artifacts in declared order.
    let mut inputs = ResolvedInputs::default();
    for name in &input_names {
        match ctx.catalog.get(name) {
            Some(value) => inputs.ordered.push((name.clone(), value.value().clone())),
            None => warn!(step = %step.name, dataset = %name, "declared input missing from catalog"),
        }
    }

    let signature = compute_signature(shared, step, handles, &inputs);
    let last_signature = ctx.signatures.lock().get(&step.name).cloned();
    let outputs_present =
        !planned.is_empty() && planned.iter().all(|o| ctx.catalog.contains_key(o));

    // Per-step TTL: a matching signature older than the TTL is a miss.
    let ttl_expired = match step.cache_ttl {
        Some(ttl) if !ttl.is_zero() => shared
            .store
            .signature_age()
            .map(|age| age > ttl)
            .unwrap_or(false),
        _ => false,
    };

    debug!(
        step = %step.name,
        outputs_present,
        ttl_expired,
        matches = last_signature.as_deref() == Some(signature.as_str()),
        "cache check"
    );

    if outputs_present && last_signature.as_deref() == Some(signature.as_str()) && !ttl_expired {
        return Ok(cache_hit(shared, ctx, step, &inputs, &planned, signature, start));
    }

    if outputs_present && !ttl_expired {
        if let Some(old) = &last_signature {
            log_cache_diff(&step.name, old, &signature);
        }
    }
    if ttl_expired && last_signature.as_deref() == Some(signature.as_str()) {
        warn!(step = %step.name, "stale cache hit: signature matches but TTL expired, recomputing");
    }

    // Method chain with step-level retries on execution errors.
    let attempts = 1 + step
        .retry_count
        .unwrap_or(shared.orchestration.retry_count);
    let retry_delay = step
        .retry_delay
        .unwrap_or(Duration::from_secs(shared.orchestration.retry_delay));

    let mut final_value = Value::Null;
    for attempt in 1..=attempts {
        match run_chain(shared, ctx, step, handles, &resolved_params, &inputs) {
            Ok(value) => {
                final_value = value;
                break;
            }
            Err(err) if err.is_retryable() && attempt < attempts => {
                warn!(
                    step = %step.name,
                    attempt,
                    attempts,
                    error = %err,
                    "step attempt failed, retrying"
                );
                std::thread::sleep(retry_delay);
            }
            Err(err) => return Err(err),
        }
    }

    // Capture into catalog + reference tables.
    let captured = capture_outputs(step, final_value, shared.options.strict_outputs)?;
    let mut persisted: Vec<(String, Value, String)> = Vec::new();
    let mut produced_datasets: Vec<String> = Vec::new();

    for spec in &step.outputs {
        let Some(value) = captured.produced.get(&spec.name) else {
            continue;
        };
        let ds = dataset_name(&step.name, &spec.name);
        ctx.catalog.insert(ds.clone(), value.clone());
        ctx.producers.insert(ds.clone(), step.name.clone());
        ctx.register_reference(&step.name, &spec.name, value);

        if spec.kind == OutputKind::Dataset {
            let fp = fingerprint(value);
            ctx.fingerprints.insert(ds.clone(), fp.clone());
            produced_datasets.push(ds.clone());
            persisted.push((ds, value.clone(), fp));
        }
    }

    let signatures_snapshot = {
        let mut signatures = ctx.signatures.lock();
        signatures.insert(step.name.clone(), signature.clone());
        signatures.clone()
    };
    shared.store.record(&signatures_snapshot, &persisted);

    let duration = start.elapsed().as_secs_f64();
    let summaries: Vec<Value> = produced_datasets
        .iter()
        .filter_map(|ds| ctx.catalog.get(ds).map(|v| summarize(ds, v.value())))
        .collect();

    ctx.node_metrics.lock().insert(
        step.name.clone(),
        NodeMetrics {
            duration_sec: duration,
            outputs: summaries,
            cached: false,
            signature: Some(signature.clone()),
            error: None,
        },
    );
    ctx.lineage.lock().insert(
        step.name.clone(),
        StepLineage {
            inputs: input_names.clone(),
            applied_inputs: inputs.names(),
            outputs: produced_datasets.clone(),
            primary_output: captured.primary_output.clone(),
            cached: false,
            signature: Some(signature.clone()),
            duration_sec: duration,
            status: StepStatus::Completed,
            error: None,
            skip_reason: None,
        },
    );

    let mut payload = BTreeMap::new();
    payload.insert("duration_sec".to_string(), Value::Float(duration));
    payload.insert(
        "produced".to_string(),
        Value::List(produced_datasets.into_iter().map(Value::Str).collect()),
    );
    payload.insert("signature".to_string(), Value::Str(signature));
    payload.insert("cached".to_string(), Value::Bool(false));
    shared
        .hooks
        .emit("after_step", &step.name, &Value::Map(payload));

    Ok(false)
}

/// Record a cache hit: reuse catalog values, no execution.
fn cache_hit(
    shared: &Shared,
    ctx: &RunContext,
    step: &StepSpec,
    inputs: &ResolvedInputs,
    planned: &[String],
    signature: String,
    start: Instant,
) -> bool {
    info!(step = %step.name, "cache hit (signature matched), skipping execution");
    let duration = start.elapsed().as_secs_f64();

    for ds in planned {
        ctx.producers
            .entry(ds.clone())
            .or_insert_with(|| step.name.clone());
    }
    // Cached outputs stay referenceable for downstream steps.
    for spec in &step.outputs {
        let ds = dataset_name(&step.name, &spec.name);
        if let Some(value) = ctx.catalog.get(&ds) {
            ctx.register_reference(&step.name, &spec.name, &value);
        }
    }

    let summaries: Vec<Value> = planned
        .iter()
        .filter_map(|ds| ctx.catalog.get(ds).map(|v| summarize(ds, v.value())))
        .collect();

    ctx.node_metrics.lock().insert(
        step.name.clone(),
        NodeMetrics {
            duration_sec: duration,
            outputs: summaries,
            cached: true,
            signature: Some(signature.clone()),
            error: None,
        },
    );
    ctx.lineage.lock().insert(
        step.name.clone(),
        StepLineage {
            inputs: step.input_datasets(),
            applied_inputs: inputs.names(),
            outputs: planned.to_vec(),
            primary_output: step.primary_output().map(str::to_string),
            cached: true,
            signature: Some(signature.clone()),
            duration_sec: duration,
            status: StepStatus::Completed,
            error: None,
            skip_reason: None,
        },
    );

    let mut payload = BTreeMap::new();
    payload.insert("signature".to_string(), Value::Str(signature));
    payload.insert("cached".to_string(), Value::Bool(true));
    shared
        .hooks
        .emit("on_cache_hit", &step.name, &Value::Map(payload));

    true
}

/// Execute the step's method chain, threading the chain slot through
/// non-first methods.
fn run_chain(
    shared: &Shared,
    _ctx: &RunContext,
    step: &StepSpec,
    handles: &[MethodHandle],
    resolved_params: &Params,
    inputs: &ResolvedInputs,
) -> Result<Value> {
    let mut chain_value: Option<Value> = None;

    for (index, method) in step.methods.iter().enumerate() {
        let handle = &handles[index];
        let engine = handle.resolve(&shared.registry)?;
        let record = shared
            .registry
            .lookup(&full_key(&step.component, &engine, method))
            .ok_or_else(|| RegistryError::EngineNotFound {
                component: step.component.clone(),
                method: method.clone(),
                engine: engine.clone(),
            })?;

        debug!(
            step = %step.name,
            method = %method,
            engine = %engine,
            position = index + 1,
            total = step.methods.len(),
            "invoking chain method"
        );

        let bound = bind_call_params(
            record.callable.as_ref(),
            method,
            resolved_params,
            inputs,
            if index > 0 { chain_value.as_ref() } else { None },
            shared.settings.strict_params,
        )?;

        // Middleware wraps each invocation; the registry executor is the
        // terminal next.
        let record_for_core = record.clone();
        let core = move |args: Params| -> Result<Value> {
            shared
                .executor
                .execute(&record_for_core, args)
                .map_err(Into::into)
        };
        let value = shared
            .middleware
            .invoke(&step.component, method, bound, &core)?;
        chain_value = Some(value);
    }

    Ok(chain_value.unwrap_or(Value::Null))
}

/// Signature = methods `|` # handle metas `;` # canonical params # sorted
/// upstream fingerprints.
fn compute_signature(
    shared: &Shared,
    step: &StepSpec,
    handles: &[MethodHandle],
    inputs: &ResolvedInputs,
) -> String {
    let methods_joined = step.methods.join("|");
    let method_meta = handles
        .iter()
        .map(|h| h.predict_signature(&shared.registry))
        .collect::<Vec<_>>()
        .join(";");
    let params = Value::Map(step.parameters.clone()).canonical();

    let mut fps: Vec<String> = inputs
        .ordered
        .iter()
        .map(|(name, value)| format!("{name}:{}", fingerprint(value)))
        .collect();
    fps.sort();

    format!("{methods_joined}#{method_meta}#{params}#{}", fps.join("|"))
}

/// Explain which signature parts changed (diagnostics on cache miss with
/// outputs already present).
fn log_cache_diff(step: &str, old: &str, new: &str) {
    if old == new {
        return;
    }
    let split = |sig: &str| -> Vec<String> {
        sig.splitn(4, '#').map(str::to_string).collect()
    };
    let old_parts = split(old);
    let new_parts = split(new);
    let labels = ["method_chain", "method_meta", "parameters", "upstream"];
    let mut reasons = Vec::new();
    for (i, label) in labels.iter().enumerate() {
        if old_parts.get(i) != new_parts.get(i) {
            reasons.push(*label);
        }
    }
    info!(
        step,
        reason = reasons.join(","),
        "cache miss (signature changed)"
    );
}
