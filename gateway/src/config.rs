//! Configuration for the gateway
//!
//! Values come from built-in defaults, an optional file (format chosen by
//! extension) and `GUARDED_QUERY_*` environment variables, in that order.
//! Nested keys use `__`, e.g. `GUARDED_QUERY_EXECUTOR__STATEMENT_TIMEOUT_SECS=10`.

use crate::anomaly::rewrite::EnhancementConfig;
use crate::anomaly::ScanConfig;
use crate::error::Result;
use crate::executor::ExecutorConfig;
use guarded_query_core::GuardrailConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "GUARDED_QUERY";

/// Gateway configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// SQLite file holding the audit log, scans and alerts (`:memory:` allowed)
    pub store_path: String,

    /// JSON catalog of databases, permissions and cached schemas
    pub catalog_path: Option<PathBuf>,

    /// Executor configuration
    pub executor: ExecutorConfig,

    /// Guardrail configuration
    pub guardrail: GuardrailConfig,

    /// Anomaly scan configuration
    pub scan: ScanConfig,

    /// Language-model rewrite configuration
    pub enhancement: EnhancementConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            store_path: "guarded-query.db".to_string(),
            catalog_path: None,
            executor: ExecutorConfig::default(),
            guardrail: GuardrailConfig::default(),
            scan: ScanConfig::default(),
            enhancement: EnhancementConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from an optional file overlaid with the environment
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Create a configuration for local development
    pub fn for_development() -> Self {
        Self {
            store_path: "guarded-query-dev.db".to_string(),
            catalog_path: Some(PathBuf::from("catalog.json")),
            executor: ExecutorConfig {
                slow_query_ms: 1000,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Create a configuration for tests
    pub fn for_testing() -> Self {
        Self {
            store_path: ":memory:".to_string(),
            catalog_path: None,
            executor: ExecutorConfig {
                statement_timeout_secs: 5,
                pool_idle_ttl_secs: 1,
                reap_interval_secs: 1,
                connect_timeout_secs: 2,
                ..Default::default()
            },
            enhancement: EnhancementConfig {
                enabled: false,
                timeout_secs: 1,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.executor.statement_timeout_secs, 30);
        assert_eq!(config.executor.default_max_rows, 1000);
        assert_eq!(config.executor.pool_idle_ttl_secs, 300);
        assert_eq!(config.executor.reap_interval_secs, 60);
        assert_eq!(config.guardrail.max_query_length, 5000);
        assert_eq!(config.scan.max_queries, 10);
        assert_eq!(config.scan.max_metrics_per_table, 3);
        assert!(!config.enhancement.enabled);
    }

    #[test]
    fn test_presets() {
        assert_eq!(GatewayConfig::for_testing().store_path, ":memory:");
        assert_eq!(GatewayConfig::for_development().executor.slow_query_ms, 1000);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "store_path = \"/tmp/audit.db\"\n[executor]\nstatement_timeout_secs = 12\n[scan]\nmax_queries = 4"
        )
        .unwrap();

        let config = GatewayConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.store_path, "/tmp/audit.db");
        assert_eq!(config.executor.statement_timeout_secs, 12);
        assert_eq!(config.executor.default_max_rows, 1000);
        assert_eq!(config.scan.max_queries, 4);
        assert_eq!(config.scan.max_metrics_per_table, 3);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(GatewayConfig::load(Some("/nonexistent/guarded-query.toml")).is_err());
    }
}
