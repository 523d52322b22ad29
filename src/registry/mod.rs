//! Method registry
//!
//! The canonical catalog of [`MethodRecord`]s, indexed by full key and by
//! `component -> method -> engine`. Registration is write-rare and lookup
//! is read-frequent, so the index sits behind a read-write lock. A
//! process-wide instance is available with an explicit reset for tests.

pub mod executor;
pub mod handle;
pub mod metrics;
pub mod record;
pub mod scanner;
pub mod strategy;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::warn;

use crate::error::RegistryError;
use crate::hooks::HookBus;
use crate::settings::{ConflictMode, Settings};
use crate::value::Value;

pub use executor::MethodExecutor;
pub use handle::MethodHandle;
pub use metrics::{MetricsRecorder, MetricsSnapshot};
pub use record::{FnMethod, Invocable, MethodRecord, ParameterSpec};
pub use scanner::{MethodModule, ScanOptions};
pub use strategy::Strategy;

/// Loader callback re-run on [`Registry::refresh`].
pub type Loader = Arc<dyn Fn(&Registry) + Send + Sync>;

#[derive(Default)]
struct RegistryIndex {
    by_full_key: HashMap<String, Arc<MethodRecord>>,
    /// component -> method -> engine -> record
    by_component: HashMap<String, HashMap<String, HashMap<String, Arc<MethodRecord>>>>,
}

impl RegistryIndex {
    fn add(&mut self, record: Arc<MethodRecord>) {
        self.by_full_key
            .insert(record.full_key(), record.clone());
        self.by_component
            .entry(record.component_type.clone())
            .or_default()
            .entry(record.method_name.clone())
            .or_default()
            .insert(record.engine_type.clone(), record);
    }

    fn clear(&mut self) {
        self.by_full_key.clear();
        self.by_component.clear();
    }
}

/// Thread-safe method catalog.
pub struct Registry {
    settings: Settings,
    hooks: Arc<HookBus>,
    index: RwLock<RegistryIndex>,
    metrics: Arc<MetricsRecorder>,
    loaders: Mutex<Vec<Loader>>,
}

impl Registry {
    pub fn new(settings: Settings, hooks: Arc<HookBus>) -> Registry {
        Registry {
            settings,
            hooks,
            index: RwLock::new(RegistryIndex::default()),
            metrics: Arc::new(MetricsRecorder::new()),
            loaders: Mutex::new(Vec::new()),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn hooks(&self) -> &Arc<HookBus> {
        &self.hooks
    }

    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Insert a record. On full-key collision the configured conflict
    /// mode decides: `warn` overwrites, `error` fails, `ignore` keeps the
    /// existing record and returns `false`.
    pub fn register(&self, record: MethodRecord) -> Result<bool, RegistryError> {
        let full_key = record.full_key();
        let record = Arc::new(record);

        {
            let mut index = self.index.write();
            if index.by_full_key.contains_key(&full_key) {
                match self.settings.conflict_mode {
                    ConflictMode::Error => {
                        return Err(RegistryError::Conflict(full_key));
                    }
                    ConflictMode::Ignore => return Ok(false),
                    ConflictMode::Warn => {
                        warn!(%full_key, "registration conflict, overwriting");
                    }
                }
            }
            index.add(record.clone());
        }

        let mut payload = std::collections::BTreeMap::new();
        payload.insert(
            "component".to_string(),
            Value::Str(record.component_type.clone()),
        );
        payload.insert(
            "engine_type".to_string(),
            Value::Str(record.engine_type.clone()),
        );
        payload.insert(
            "method".to_string(),
            Value::Str(record.method_name.clone()),
        );
        payload.insert("version".to_string(), Value::Str(record.version.clone()));
        self.hooks
            .emit("after_method_registered", &full_key, &Value::Map(payload));

        Ok(true)
    }

    /// Register every eligible callable of a module; see [`scanner`].
    pub fn scan(
        &self,
        module: &MethodModule,
        component: &str,
        engine: &str,
        opts: &ScanOptions,
    ) -> usize {
        scanner::scan(self, module, component, engine, opts)
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    pub fn lookup(&self, full_key: &str) -> Option<Arc<MethodRecord>> {
        self.index.read().by_full_key.get(full_key).cloned()
    }

    /// All registered engines for `(component, method)`, sorted by engine
    /// name for deterministic selection.
    pub fn candidates(&self, component: &str, method: &str) -> Vec<Arc<MethodRecord>> {
        let index = self.index.read();
        let mut out: Vec<Arc<MethodRecord>> = index
            .by_component
            .get(component)
            .and_then(|methods| methods.get(method))
            .map(|engines| engines.values().cloned().collect())
            .unwrap_or_default();
        out.sort_by(|a, b| a.engine_type.cmp(&b.engine_type));
        out
    }

    /// Filtered listing of all records, sorted by full key.
    pub fn list(&self, component: Option<&str>, engine: Option<&str>) -> Vec<Arc<MethodRecord>> {
        let index = self.index.read();
        let mut out: Vec<Arc<MethodRecord>> = index
            .by_full_key
            .values()
            .filter(|rec| component.map_or(true, |c| rec.component_type == c))
            .filter(|rec| engine.map_or(true, |e| rec.engine_type == e))
            .cloned()
            .collect();
        out.sort_by_key(|rec| rec.full_key());
        out
    }

    /// Registered component names, sorted.
    pub fn components(&self) -> Vec<String> {
        let index = self.index.read();
        let mut out: Vec<String> = index.by_component.keys().cloned().collect();
        out.sort();
        out
    }

    /// Method names exposed by a component, sorted.
    pub fn methods_of(&self, component: &str) -> Vec<String> {
        let index = self.index.read();
        let mut out: Vec<String> = index
            .by_component
            .get(component)
            .map(|methods| methods.keys().cloned().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    pub fn len(&self) -> usize {
        self.index.read().by_full_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------

    /// Pick the best implementation for `(component, method)` under a
    /// strategy.
    pub fn select(
        &self,
        component: &str,
        method: &str,
        strategy: &Strategy,
    ) -> Result<Arc<MethodRecord>, RegistryError> {
        let candidates = self.candidates(component, method);
        strategy.select(component, method, &candidates)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Drop every record.
    pub fn clear(&self) {
        self.index.write().clear();
    }

    /// Register a loader re-run on [`Registry::refresh`].
    pub fn add_loader(&self, loader: Loader) {
        self.loaders.lock().push(loader);
    }

    /// Full reload: clear the index, re-run loaders, announce the refresh.
    pub fn refresh(&self) {
        self.clear();
        let loaders: Vec<Loader> = self.loaders.lock().clone();
        for loader in loaders {
            loader(self);
        }
        let mut payload = std::collections::BTreeMap::new();
        payload.insert("mode".to_string(), Value::Str("full".to_string()));
        self.hooks
            .emit("after_registry_refresh", "registry", &Value::Map(payload));
    }
}

// ============================================================================
// PROCESS-WIDE INSTANCE
// ============================================================================

static GLOBAL_REGISTRY: Mutex<Option<Arc<Registry>>> = Mutex::new(None);

/// Lazily-initialized process-wide registry, wired to the process-wide
/// hook bus and environment settings.
pub fn global() -> Arc<Registry> {
    let mut slot = GLOBAL_REGISTRY.lock();
    slot.get_or_insert_with(|| {
        Arc::new(Registry::new(Settings::from_env(), crate::hooks::global()))
    })
    .clone()
}

/// Drop the process-wide registry (tests).
pub fn reset_global() {
    *GLOBAL_REGISTRY.lock() = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::record::FnMethod;

    fn noop() -> Arc<dyn Invocable> {
        Arc::new(FnMethod::new(|_| Ok(Value::Null)))
    }

    fn registry_with(mode: ConflictMode) -> Registry {
        let settings = Settings {
            conflict_mode: mode,
            ..Settings::default()
        };
        Registry::new(settings, Arc::new(HookBus::new()))
    }

    #[test]
    fn register_and_lookup_round_trip() {
        let reg = registry_with(ConflictMode::Warn);
        reg.register(MethodRecord::new("datahub", "fs", "load", noop()))
            .unwrap();
        let rec = reg.lookup("datahub::fs::load").unwrap();
        assert_eq!(rec.engine_type, "fs");
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn conflict_warn_overwrites() {
        let reg = registry_with(ConflictMode::Warn);
        reg.register(MethodRecord::new("c", "e", "m", noop()).with_version("1.0.0"))
            .unwrap();
        assert!(reg
            .register(MethodRecord::new("c", "e", "m", noop()).with_version("2.0.0"))
            .unwrap());
        assert_eq!(reg.lookup("c::e::m").unwrap().version, "2.0.0");
    }

    #[test]
    fn conflict_error_fails() {
        let reg = registry_with(ConflictMode::Error);
        reg.register(MethodRecord::new("c", "e", "m", noop())).unwrap();
        let err = reg
            .register(MethodRecord::new("c", "e", "m", noop()))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Conflict(_)));
    }

    #[test]
    fn conflict_ignore_keeps_existing() {
        let reg = registry_with(ConflictMode::Ignore);
        reg.register(MethodRecord::new("c", "e", "m", noop()).with_version("1.0.0"))
            .unwrap();
        assert!(!reg
            .register(MethodRecord::new("c", "e", "m", noop()).with_version("2.0.0"))
            .unwrap());
        assert_eq!(reg.lookup("c::e::m").unwrap().version, "1.0.0");
    }

    #[test]
    fn candidates_are_sorted_by_engine() {
        let reg = registry_with(ConflictMode::Warn);
        reg.register(MethodRecord::new("c", "zeta", "m", noop())).unwrap();
        reg.register(MethodRecord::new("c", "alpha", "m", noop())).unwrap();
        let engines: Vec<String> = reg
            .candidates("c", "m")
            .iter()
            .map(|r| r.engine_type.clone())
            .collect();
        assert_eq!(engines, vec!["alpha", "zeta"]);
    }

    #[test]
    fn list_filters_by_component_and_engine() {
        let reg = registry_with(ConflictMode::Warn);
        reg.register(MethodRecord::new("a", "x", "m1", noop())).unwrap();
        reg.register(MethodRecord::new("a", "y", "m2", noop())).unwrap();
        reg.register(MethodRecord::new("b", "x", "m3", noop())).unwrap();

        assert_eq!(reg.list(None, None).len(), 3);
        assert_eq!(reg.list(Some("a"), None).len(), 2);
        assert_eq!(reg.list(Some("a"), Some("x")).len(), 1);
        assert_eq!(reg.list(None, Some("x")).len(), 2);
    }

    #[test]
    fn registration_emits_hook() {
        let hooks = Arc::new(HookBus::new());
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let seen_clone = seen.clone();
        hooks
            .register("after_method_registered", move |event| {
                seen_clone.lock().push(event.subject.to_string());
                Ok(())
            })
            .unwrap();

        let reg = Registry::new(Settings::default(), hooks);
        reg.register(MethodRecord::new("c", "e", "m", noop())).unwrap();
        assert_eq!(seen.lock().as_slice(), ["c::e::m".to_string()]);
    }

    #[test]
    fn refresh_reruns_loaders_and_emits() {
        let hooks = Arc::new(HookBus::new());
        let refreshed = Arc::new(Mutex::new(0u32));
        let refreshed_clone = refreshed.clone();
        hooks
            .register("after_registry_refresh", move |_| {
                *refreshed_clone.lock() += 1;
                Ok(())
            })
            .unwrap();

        let reg = Registry::new(Settings::default(), hooks);
        reg.add_loader(Arc::new(|r: &Registry| {
            let _ = r.register(MethodRecord::new("c", "e", "m", Arc::new(FnMethod::new(|_| Ok(Value::Null)))));
        }));

        reg.refresh();
        assert_eq!(reg.len(), 1);
        assert_eq!(*refreshed.lock(), 1);
    }

    #[test]
    fn concurrent_registration_loses_nothing() {
        let reg = Arc::new(registry_with(ConflictMode::Warn));
        let mut handles = Vec::new();
        for t in 0..8 {
            let reg = reg.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..50 {
                    let method = format!("m{t}_{i}");
                    reg.register(MethodRecord::new("c", "e", method, {
                        let f: Arc<dyn Invocable> =
                            Arc::new(FnMethod::new(|_| Ok(Value::Null)));
                        f
                    }))
                    .unwrap();
                    // Interleave reads; listings must stay consistent.
                    let _ = reg.list(Some("c"), None);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(reg.len(), 8 * 50);
    }

    #[test]
    fn global_registry_resets() {
        reset_global();
        let a = global();
        a.register(MethodRecord::new("c", "e", "m", noop())).unwrap();
        reset_global();
        assert!(global().is_empty());
    }
}
