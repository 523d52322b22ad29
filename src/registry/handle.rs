//! Deferred method binding
//!
//! A step holds one [`MethodHandle`] per method in its chain. The handle
//! resolves `(component, method)` to a concrete engine at execution time,
//! caching the choice for a short TTL so repeated resolution inside one
//! layer stays cheap. Construction never touches the registry.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::RegistryError;
use crate::registry::record::full_key;
use crate::registry::strategy::Strategy;
use crate::registry::Registry;

/// Resolution mode: policy-driven or pinned to a named engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleMode {
    Auto { strategy: Strategy },
    Fixed { engine: String },
}

/// One candidate as seen during resolution (diagnostic surface).
#[derive(Debug, Clone, Serialize)]
pub struct CandidateInfo {
    pub engine_type: String,
    pub version: String,
    pub priority: i32,
    pub deprecated: bool,
}

/// Last resolution outcome, kept for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct Explain {
    pub component: String,
    pub method: String,
    pub strategy: String,
    pub reason: String,
    pub selected: Option<CandidateInfo>,
    pub candidates: Vec<CandidateInfo>,
}

#[derive(Default)]
struct HandleState {
    engine: Option<String>,
    resolved_at: Option<Instant>,
    explain: Option<Explain>,
}

/// Lazily-resolving binder from `(component, method)` to an engine.
pub struct MethodHandle {
    component: String,
    method: String,
    mode: HandleMode,
    ttl: Duration,
    state: Mutex<HandleState>,
}

impl MethodHandle {
    /// Policy-driven handle using the default strategy.
    pub fn auto(component: impl Into<String>, method: impl Into<String>, ttl: Duration) -> Self {
        Self::auto_with_strategy(component, method, Strategy::Default, ttl)
    }

    pub fn auto_with_strategy(
        component: impl Into<String>,
        method: impl Into<String>,
        strategy: Strategy,
        ttl: Duration,
    ) -> Self {
        MethodHandle {
            component: component.into(),
            method: method.into(),
            mode: HandleMode::Auto { strategy },
            ttl,
            state: Mutex::new(HandleState::default()),
        }
    }

    /// Handle pinned to a named engine.
    pub fn fixed(
        component: impl Into<String>,
        method: impl Into<String>,
        engine: impl Into<String>,
    ) -> Self {
        MethodHandle {
            component: component.into(),
            method: method.into(),
            mode: HandleMode::Fixed {
                engine: engine.into(),
            },
            ttl: Duration::ZERO,
            state: Mutex::new(HandleState::default()),
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Resolve to an engine type, reusing a cached choice while the TTL
    /// holds and the chosen record is still registered.
    pub fn resolve(&self, registry: &Registry) -> Result<String, RegistryError> {
        let mut state = self.state.lock();

        if let HandleMode::Fixed { engine } = &self.mode {
            state.engine = Some(engine.clone());
            if state.explain.is_none() {
                state.explain = Some(Explain {
                    component: self.component.clone(),
                    method: self.method.clone(),
                    strategy: "fixed".to_string(),
                    reason: "fixed_engine".to_string(),
                    selected: None,
                    candidates: Vec::new(),
                });
            }
            return Ok(engine.clone());
        }

        if let Some(engine) = self.cached_engine(&state, registry) {
            return Ok(engine);
        }

        match self.select(registry) {
            Ok((engine, explain)) => {
                state.engine = Some(engine.clone());
                state.resolved_at = Some(Instant::now());
                state.explain = Some(explain);
                Ok(engine)
            }
            Err(err) => {
                state.engine = None;
                state.resolved_at = None;
                Err(err)
            }
        }
    }

    /// Predicted cache signature `method@engine:version:priority` for the
    /// engine this handle would (or did) pick. Never fails; an
    /// unresolvable selection yields the `unknown` form.
    pub fn predict_signature(&self, registry: &Registry) -> String {
        let state = self.state.lock();

        if let Some(explain) = state
            .explain
            .as_ref()
            .filter(|_| self.cached_engine(&state, registry).is_some())
        {
            if let Some(sel) = &explain.selected {
                return format!(
                    "{}@{}:{}:{}",
                    self.method, sel.engine_type, sel.version, sel.priority
                );
            }
        }
        drop(state);

        if let HandleMode::Fixed { engine } = &self.mode {
            return match registry.lookup(&full_key(&self.component, engine, &self.method)) {
                Some(rec) => format!(
                    "{}@{}:{}:{}",
                    self.method, engine, rec.version, rec.priority
                ),
                None => format!("{}@{}:unknown:0", self.method, engine),
            };
        }

        match self.select(registry) {
            Ok((_, explain)) => match explain.selected {
                Some(sel) => format!(
                    "{}@{}:{}:{}",
                    self.method, sel.engine_type, sel.version, sel.priority
                ),
                None => format!("{}@unknown:unknown:0", self.method),
            },
            Err(_) => format!("{}@unknown:unknown:0", self.method),
        }
    }

    /// Last resolution outcome, if any.
    pub fn explain(&self) -> Option<Explain> {
        self.state.lock().explain.clone()
    }

    /// Debug identity string.
    pub fn identity(&self) -> String {
        let base = format!("{}.{}", self.component, self.method);
        match &self.mode {
            HandleMode::Fixed { engine } => format!("{base}@fixed:{engine}"),
            HandleMode::Auto { .. } => match &self.state.lock().engine {
                Some(engine) => format!("{base}@auto:{engine}"),
                None => format!("{base}@unresolved"),
            },
        }
    }

    /// Drop the cached resolution (hot-swap support).
    pub fn invalidate(&self) {
        let mut state = self.state.lock();
        state.engine = None;
        state.resolved_at = None;
        state.explain = None;
    }

    fn cached_engine(&self, state: &HandleState, registry: &Registry) -> Option<String> {
        let engine = state.engine.as_ref()?;
        let resolved_at = state.resolved_at?;
        if self.ttl.is_zero() || resolved_at.elapsed() >= self.ttl {
            return None;
        }
        registry
            .lookup(&full_key(&self.component, engine, &self.method))
            .map(|_| engine.clone())
    }

    fn select(&self, registry: &Registry) -> Result<(String, Explain), RegistryError> {
        let HandleMode::Auto { strategy } = &self.mode else {
            unreachable!("select is only called in auto mode");
        };

        let candidates = registry.candidates(&self.component, &self.method);
        let infos: Vec<CandidateInfo> = candidates
            .iter()
            .map(|c| CandidateInfo {
                engine_type: c.engine_type.clone(),
                version: c.version.clone(),
                priority: c.priority,
                deprecated: c.deprecated,
            })
            .collect();

        let chosen = strategy.select(&self.component, &self.method, &candidates)?;
        let explain = Explain {
            component: self.component.clone(),
            method: self.method.clone(),
            strategy: format!("{strategy:?}"),
            reason: "strategy".to_string(),
            selected: Some(CandidateInfo {
                engine_type: chosen.engine_type.clone(),
                version: chosen.version.clone(),
                priority: chosen.priority,
                deprecated: chosen.deprecated,
            }),
            candidates: infos,
        };
        Ok((chosen.engine_type.clone(), explain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::HookBus;
    use crate::registry::record::{FnMethod, MethodRecord};
    use crate::settings::Settings;
    use crate::value::Value;
    use std::sync::Arc;

    fn registry() -> Registry {
        Registry::new(Settings::default(), Arc::new(HookBus::new()))
    }

    fn noop() -> Arc<dyn crate::registry::record::Invocable> {
        Arc::new(FnMethod::new(|_| Ok(Value::Null)))
    }

    #[test]
    fn fixed_handle_resolves_without_registry_state() {
        let reg = registry();
        let handle = MethodHandle::fixed("comp", "m", "pandas");
        assert_eq!(handle.resolve(&reg).unwrap(), "pandas");
        assert_eq!(handle.identity(), "comp.m@fixed:pandas");
    }

    #[test]
    fn auto_handle_selects_best_candidate() {
        let reg = registry();
        reg.register(MethodRecord::new("comp", "slow", "m", noop()).with_priority(0))
            .unwrap();
        reg.register(MethodRecord::new("comp", "fast", "m", noop()).with_priority(9))
            .unwrap();

        let handle = MethodHandle::auto("comp", "m", Duration::from_secs(5));
        assert_eq!(handle.resolve(&reg).unwrap(), "fast");
        let explain = handle.explain().unwrap();
        assert_eq!(explain.candidates.len(), 2);
        assert_eq!(explain.selected.unwrap().engine_type, "fast");
    }

    #[test]
    fn auto_handle_fails_without_candidates() {
        let reg = registry();
        let handle = MethodHandle::auto("comp", "missing", Duration::from_secs(5));
        assert!(handle.resolve(&reg).is_err());
        assert_eq!(handle.identity(), "comp.missing@unresolved");
    }

    #[test]
    fn cache_is_dropped_when_record_disappears() {
        let reg = registry();
        reg.register(MethodRecord::new("comp", "only", "m", noop()))
            .unwrap();
        let handle = MethodHandle::auto("comp", "m", Duration::from_secs(60));
        assert_eq!(handle.resolve(&reg).unwrap(), "only");

        reg.clear();
        assert!(handle.resolve(&reg).is_err());
    }

    #[test]
    fn predict_signature_includes_version_and_priority() {
        let reg = registry();
        reg.register(
            MethodRecord::new("comp", "pandas", "m", noop())
                .with_version("2.1.0")
                .with_priority(3),
        )
        .unwrap();

        let auto = MethodHandle::auto("comp", "m", Duration::from_secs(5));
        assert_eq!(auto.predict_signature(&reg), "m@pandas:2.1.0:3");

        let fixed = MethodHandle::fixed("comp", "m", "pandas");
        assert_eq!(fixed.predict_signature(&reg), "m@pandas:2.1.0:3");

        let missing = MethodHandle::fixed("comp", "m", "polars");
        assert_eq!(missing.predict_signature(&reg), "m@polars:unknown:0");
    }

    #[test]
    fn invalidate_clears_cached_state() {
        let reg = registry();
        reg.register(MethodRecord::new("comp", "e", "m", noop()))
            .unwrap();
        let handle = MethodHandle::auto("comp", "m", Duration::from_secs(60));
        handle.resolve(&reg).unwrap();
        handle.invalidate();
        assert!(handle.explain().is_none());
    }
}
