//! Run result assembly
//!
//! The structures returned from a pipeline run: per-step lineage and
//! metrics, cache statistics, and the top-level [`RunResult`]. Everything
//! serializes to JSON for reporting.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::value::Value;

/// Terminal state of one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Failed,
    Skipped,
}

/// Provenance record for one step.
#[derive(Debug, Clone, Serialize)]
pub struct StepLineage {
    pub inputs: Vec<String>,
    pub applied_inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub primary_output: Option<String>,
    pub cached: bool,
    pub signature: Option<String>,
    pub duration_sec: f64,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
}

/// Timing and output summaries for one step.
#[derive(Debug, Clone, Serialize)]
pub struct NodeMetrics {
    pub duration_sec: f64,
    pub outputs: Vec<Value>,
    pub cached: bool,
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregated cache behavior for the run.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub node_total: usize,
    pub cache_hits: usize,
    pub cache_miss: usize,
    pub cache_hit_rate: Option<f64>,
    pub total_execution_time_sec: f64,
    pub dataset_fingerprint_count: usize,
}

impl CacheStats {
    /// Derive cache stats from per-node metrics; execution time counts
    /// only non-cached nodes.
    pub fn from_node_metrics(
        node_metrics: &BTreeMap<String, NodeMetrics>,
        fingerprint_count: usize,
    ) -> CacheStats {
        let node_total = node_metrics.len();
        let cache_hits = node_metrics.values().filter(|m| m.cached).count();
        let total_execution_time_sec: f64 = node_metrics
            .values()
            .filter(|m| !m.cached)
            .map(|m| m.duration_sec)
            .sum();
        CacheStats {
            node_total,
            cache_hits,
            cache_miss: node_total - cache_hits,
            cache_hit_rate: if node_total > 0 {
                Some(cache_hits as f64 / node_total as f64)
            } else {
                None
            },
            total_execution_time_sec: (total_execution_time_sec * 10_000.0).round() / 10_000.0,
            dataset_fingerprint_count: fingerprint_count,
        }
    }
}

/// Reference-level view of what the run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutputs {
    pub by_reference: Vec<String>,
    pub registry_size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunMetrics {
    pub cache: CacheStats,
}

/// Final result of a pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub status: String,
    pub executed_steps: Vec<String>,
    pub outputs: RunOutputs,
    pub metrics: RunMetrics,
    pub lineage: BTreeMap<String, StepLineage>,
    pub node_metrics: BTreeMap<String, NodeMetrics>,
    pub started_at: String,
    pub finished_at: String,
    pub overall_status: String,
}

impl RunResult {
    pub fn cache_stats(&self) -> &CacheStats {
        &self.metrics.cache
    }

    pub fn succeeded(&self) -> bool {
        self.overall_status == "completed"
    }
}
