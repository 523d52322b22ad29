//! Named-event hook bus
//!
//! Handlers run serially in registration order; a failing or panicking
//! handler is logged and counted without disturbing siblings or the main
//! flow. One bus per orchestrator; a process-wide instance is available
//! for plugin-style wiring and can be reset in tests.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::value::Value;

/// Events the bus dispatches.
pub const SUPPORTED_EVENTS: [&str; 8] = [
    "before_flow",
    "after_flow",
    "before_step",
    "after_step",
    "on_cache_hit",
    "on_failure",
    "after_method_registered",
    "after_registry_refresh",
];

/// Payload handed to handlers: the event name, the subject (step name,
/// flow name, or full key), and an event-specific value.
#[derive(Debug)]
pub struct HookEvent<'a> {
    pub event: &'a str,
    pub subject: &'a str,
    pub payload: &'a Value,
}

/// Handlers may fail; failures are isolated and counted.
pub type HookResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

type Handler = Arc<dyn Fn(&HookEvent) -> HookResult + Send + Sync>;

/// Per-event dispatch statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HookStats {
    pub handler_count: usize,
    pub call_count: u64,
    pub error_count: u64,
    pub total_time_ms: f64,
}

#[derive(Default)]
struct BusState {
    handlers: BTreeMap<String, Vec<Handler>>,
    stats: BTreeMap<String, HookStats>,
}

/// Thread-safe named-event broadcast.
#[derive(Default)]
pub struct HookBus {
    state: Mutex<BusState>,
}

impl HookBus {
    pub fn new() -> HookBus {
        HookBus::default()
    }

    /// Register a handler for a supported event.
    pub fn register<F>(&self, event: &str, handler: F) -> Result<(), String>
    where
        F: Fn(&HookEvent) -> HookResult + Send + Sync + 'static,
    {
        if !SUPPORTED_EVENTS.contains(&event) {
            return Err(format!(
                "unsupported hook event '{event}' (supported: {})",
                SUPPORTED_EVENTS.join(", ")
            ));
        }
        let mut state = self.state.lock();
        state
            .handlers
            .entry(event.to_string())
            .or_default()
            .push(Arc::new(handler));
        Ok(())
    }

    /// Dispatch an event to all handlers in registration order. Returns
    /// the number of handlers that completed successfully.
    pub fn emit(&self, event: &str, subject: &str, payload: &Value) -> usize {
        // Snapshot the handler list so handlers may register or emit
        // without deadlocking against this dispatch.
        let handlers: Vec<Handler> = {
            let state = self.state.lock();
            match state.handlers.get(event) {
                Some(handlers) if !handlers.is_empty() => handlers.clone(),
                _ => return 0,
            }
        };

        let hook_event = HookEvent {
            event,
            subject,
            payload,
        };

        let mut success = 0usize;
        let mut calls = 0u64;
        let mut errors = 0u64;
        let mut elapsed_ms = 0.0f64;

        for handler in &handlers {
            let start = Instant::now();
            let outcome = catch_unwind(AssertUnwindSafe(|| handler(&hook_event)));
            elapsed_ms += start.elapsed().as_secs_f64() * 1000.0;
            calls += 1;
            match outcome {
                Ok(Ok(())) => success += 1,
                Ok(Err(err)) => {
                    errors += 1;
                    debug!(event, subject, error = %err, "hook handler failed (ignored)");
                }
                Err(_) => {
                    errors += 1;
                    debug!(event, subject, "hook handler panicked (ignored)");
                }
            }
        }

        let mut state = self.state.lock();
        let handler_count = state.handlers.get(event).map(|h| h.len()).unwrap_or(0);
        let stats = state.stats.entry(event.to_string()).or_default();
        stats.handler_count = handler_count;
        stats.call_count += calls;
        stats.error_count += errors;
        stats.total_time_ms += elapsed_ms;

        success
    }

    /// Per-event dispatch statistics.
    pub fn stats(&self) -> BTreeMap<String, HookStats> {
        let state = self.state.lock();
        let mut out = state.stats.clone();
        for (event, handlers) in &state.handlers {
            out.entry(event.clone()).or_default().handler_count = handlers.len();
        }
        out
    }

    /// Remove handlers for one event, or all handlers.
    pub fn clear(&self, event: Option<&str>) {
        let mut state = self.state.lock();
        match event {
            Some(name) => {
                state.handlers.remove(name);
            }
            None => state.handlers.clear(),
        }
    }
}

// ============================================================================
// PROCESS-WIDE INSTANCE
// ============================================================================

static GLOBAL_BUS: Mutex<Option<Arc<HookBus>>> = Mutex::new(None);

/// Lazily-initialized process-wide bus.
pub fn global() -> Arc<HookBus> {
    let mut slot = GLOBAL_BUS.lock();
    slot.get_or_insert_with(|| Arc::new(HookBus::new())).clone()
}

/// Drop the process-wide bus (tests).
pub fn reset_global() {
    *GLOBAL_BUS.lock() = None;
}
