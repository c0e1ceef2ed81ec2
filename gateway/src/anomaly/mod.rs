//! Anomaly scan engine
//!
//! On demand, per database: pick metric candidates from the cached schema,
//! synthesize period-over-period comparison queries, run them through the
//! guarded executor, classify the shifts and persist alerts.

pub mod candidates;
pub mod engine;
pub mod heuristics;
pub mod rewrite;
pub mod synthesis;
pub mod worker;

pub use candidates::CandidatePolicy;
pub use engine::{ScanEngine, ScanReport};
pub use rewrite::{AlertEnhancer, AnthropicClient, HeuristicEnhancer, LlmAlertRewriter, LlmClient};
pub use synthesis::ComparisonQuery;
pub use worker::{ScanFailure, ScanWorker};

use serde::{Deserialize, Serialize};

/// Configuration for anomaly scans
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Comparison queries synthesized per scan; later candidates are dropped
    pub max_queries: usize,

    /// Numeric columns considered per table
    pub max_metrics_per_table: usize,

    /// Tables with a larger row estimate are skipped
    pub max_table_rows: i64,

    /// Background scans running at once
    pub worker_concurrency: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_queries: 10,
            max_metrics_per_table: 3,
            max_table_rows: 10_000_000,
            worker_concurrency: 2,
        }
    }
}
