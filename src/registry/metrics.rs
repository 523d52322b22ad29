//! Per-method execution metrics

use std::collections::BTreeMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

/// Counters for one method (keyed by full key).
#[derive(Debug, Clone, Default, Serialize)]
pub struct MethodStats {
    pub success_calls: u64,
    pub failed_calls: u64,
    pub total_calls: u64,
    pub total_time_sec: f64,
    pub avg_time_sec: f64,
    pub last_duration_sec: f64,
    pub last_error: Option<String>,
}

/// Snapshot of all method metrics plus aggregates.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub execution_stats: BTreeMap<String, MethodStats>,
    pub total_calls: u64,
    pub success_rate: f64,
}

/// Thread-safe recorder shared by all executors.
#[derive(Default)]
pub struct MetricsRecorder {
    stats: Mutex<BTreeMap<String, MethodStats>>,
}

impl MetricsRecorder {
    pub fn new() -> MetricsRecorder {
        MetricsRecorder::default()
    }

    pub fn record_success(&self, full_key: &str, duration: Duration) {
        let mut stats = self.stats.lock();
        let entry = stats.entry(full_key.to_string()).or_default();
        entry.success_calls += 1;
        Self::finish(entry, duration);
    }

    pub fn record_error(&self, full_key: &str, duration: Duration, error: &str) {
        let mut stats = self.stats.lock();
        let entry = stats.entry(full_key.to_string()).or_default();
        entry.failed_calls += 1;
        entry.last_error = Some(error.to_string());
        Self::finish(entry, duration);
    }

    fn finish(entry: &mut MethodStats, duration: Duration) {
        let secs = duration.as_secs_f64();
        entry.total_calls += 1;
        entry.total_time_sec += secs;
        entry.last_duration_sec = secs;
        entry.avg_time_sec = entry.total_time_sec / entry.total_calls as f64;
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let stats = self.stats.lock().clone();
        let total_calls: u64 = stats.values().map(|s| s.total_calls).sum();
        let success_calls: u64 = stats.values().map(|s| s.success_calls).sum();
        let success_rate = if total_calls > 0 {
            success_calls as f64 / total_calls as f64 * 100.0
        } else {
            0.0
        };
        MetricsSnapshot {
            execution_stats: stats,
            total_calls,
            success_rate,
        }
    }
}
