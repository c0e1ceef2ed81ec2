//! Scan lifecycle and pipeline

use futures_util::stream::{self, StreamExt};
use guarded_query_core::{AnomalyAlert, AnomalyScan, ScanStatus};
use log::{debug, error, info, warn};
use std::collections::BTreeSet;
use std::sync::Arc;

use super::candidates::CandidatePolicy;
use super::heuristics;
use super::rewrite::AlertEnhancer;
use super::synthesis::{self, ComparisonQuery};
use super::ScanConfig;
use crate::collaborators::{PermissionStore, SchemaCache};
use crate::error::{to_scan_error, Result};
use crate::executor::{GuardedExecutor, QueryResult};
use crate::store::AnomalyStore;

/// Final scan record and the alerts it persisted
#[derive(Debug, Clone)]
pub struct ScanReport {
    /// Scan record in its terminal state
    pub scan: AnomalyScan,

    /// Alerts persisted by the scan
    pub alerts: Vec<AnomalyAlert>,
}

struct PipelineOutput {
    tables_scanned: u32,
    queries_run: u32,
    alerts: Vec<AnomalyAlert>,
}

/// Runs anomaly scans against external databases through the guarded executor
pub struct ScanEngine {
    executor: Arc<GuardedExecutor>,
    schema: Arc<dyn SchemaCache>,
    permissions: Arc<dyn PermissionStore>,
    store: Arc<dyn AnomalyStore>,
    enhancer: Arc<dyn AlertEnhancer>,
    policy: CandidatePolicy,
    config: ScanConfig,
}

impl ScanEngine {
    /// Create an engine
    pub fn new(
        executor: Arc<GuardedExecutor>,
        schema: Arc<dyn SchemaCache>,
        permissions: Arc<dyn PermissionStore>,
        store: Arc<dyn AnomalyStore>,
        enhancer: Arc<dyn AlertEnhancer>,
        config: ScanConfig,
    ) -> Self {
        Self {
            executor,
            schema,
            permissions,
            store,
            enhancer,
            policy: CandidatePolicy::new(config.max_table_rows, config.max_metrics_per_table),
            config,
        }
    }

    /// Replace the candidate selection policy
    pub fn with_policy(mut self, policy: CandidatePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Get the configuration
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Run one scan to completion or failure
    ///
    /// Pipeline failures end in a `failed` scan inside an `Ok` report. `Err` is
    /// returned only when the scan record itself cannot be persisted.
    pub async fn run_scan(&self, database_id: &str) -> Result<ScanReport> {
        let mut scan = AnomalyScan::new(database_id);
        self.store.create_scan(&scan).await?;
        scan.begin()?;
        self.store.update_scan(&scan).await?;
        info!("Scan {} started for {}", scan.id, database_id);

        let (alerts, outcome) = match self.pipeline(&scan).await {
            Ok(output) => {
                scan.complete(output.tables_scanned, output.queries_run, output.alerts.len() as u32)?;
                (output.alerts, "completed")
            }
            Err(e) => {
                warn!("Scan {} for {} failed: {}", scan.id, database_id, e);
                scan.fail(e.to_string())?;
                (Vec::new(), "failed")
            }
        };

        if let Err(e) = self.store.update_scan(&scan).await {
            error!("Failed to finalize scan {}: {}", scan.id, e);
            return Err(e);
        }
        metrics::counter!("anomaly_scans_total", 1, "status" => outcome);

        if scan.status == ScanStatus::Completed {
            info!(
                "Scan {} completed: {} table(s), {} quer(ies), {} alert(s)",
                scan.id, scan.tables_scanned, scan.queries_run, scan.alerts_found
            );
        }

        Ok(ScanReport { scan, alerts })
    }

    async fn pipeline(&self, scan: &AnomalyScan) -> Result<PipelineOutput> {
        let database_id = scan.database_id.as_str();

        let schema = self
            .schema
            .get_schema(database_id)
            .await?
            .ok_or_else(|| to_scan_error(format!("No cached schema for database '{}'", database_id)))?;

        let auth = self.permissions.authorization_context(database_id).await?;
        if auth.is_empty() {
            return Err(to_scan_error(format!(
                "No tables are authorized for database '{}'",
                database_id
            )));
        }

        let candidates = self.policy.select(&schema, &auth);
        let queries = synthesis::synthesize(&candidates, self.config.max_queries);
        debug!(
            "Scan {}: {} candidate(s), {} comparison quer(ies)",
            scan.id,
            candidates.len(),
            queries.len()
        );

        let results = self.run_queries(database_id, &queries).await;

        let mut tables = BTreeSet::new();
        let mut detected = Vec::new();
        for (query, result) in &results {
            if heuristics::extract_periods(result).is_some() {
                tables.insert(query.candidate.table.clone());
            }
            if let Some(alert) = heuristics::detect(query, result, scan.id, database_id) {
                detected.push(alert);
            }
        }

        let alerts = self.enhancer.enhance(detected).await;
        for alert in &alerts {
            self.store.insert_alert(alert).await?;
            metrics::counter!("anomaly_alerts_total", 1, "severity" => alert.severity.as_str());
        }

        Ok(PipelineOutput {
            tables_scanned: tables.len() as u32,
            queries_run: queries.len() as u32,
            alerts,
        })
    }

    /// Run comparison queries, dropping the ones that fail
    ///
    /// At most `pool_max_size` queries are in flight so none of them waits on
    /// the pool long enough to time out.
    async fn run_queries<'q>(
        &self,
        database_id: &str,
        queries: &'q [ComparisonQuery],
    ) -> Vec<(&'q ComparisonQuery, QueryResult)> {
        let concurrency = self.executor.config().pool_max_size.max(1);
        let outcomes: Vec<_> = stream::iter(queries)
            .map(|query| self.executor.execute(database_id, &query.sql, &[]))
            .boxed()
            .buffered(concurrency)
            .collect()
            .await;

        queries
            .iter()
            .zip(outcomes)
            .filter_map(|(query, outcome)| match outcome.result {
                Some(result) if outcome.validation.valid => Some((query, result)),
                _ => {
                    debug!(
                        "Skipping {}.{} ({}-day): {}",
                        query.candidate.table,
                        query.candidate.numeric_column,
                        query.window_days,
                        outcome.validation.error_summary()
                    );
                    None
                }
            })
            .collect()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{fixture, fixture_from, fixture_with, orders_spike};
    use super::*;
    use crate::anomaly::rewrite::HeuristicEnhancer;
    use crate::executor::testing::FakeFactory;
    use crate::executor::ExecutorConfig;
    use crate::error::GatewayError;
    use crate::store::AlertFilter;
    use async_trait::async_trait;
    use guarded_query_core::{ColumnSchema, SchemaSnapshot, Severity, TableSchema};
    use std::time::Duration;

    #[tokio::test]
    async fn test_scan_detects_spike() {
        let fx = fixture(orders_spike);
        let report = fx.engine.run_scan("shop").await.unwrap();

        assert_eq!(report.scan.status, ScanStatus::Completed);
        assert_eq!(report.scan.queries_run, 4);
        assert_eq!(report.scan.tables_scanned, 2);
        assert_eq!(report.scan.alerts_found, 1);
        assert!(report.scan.completed_at.is_some());

        let alert = &report.alerts[0];
        assert_eq!(alert.severity, Severity::Critical);
        assert_eq!(alert.table_name, "orders");
        assert_eq!(alert.column_name, "amount");
        assert_eq!(alert.current_value, 150.0);
        assert_eq!(alert.previous_value, 100.0);
        assert_eq!(alert.change_percent, 50.0);
        assert_eq!(alert.scan_id, report.scan.id);

        let stored = fx.store.list_alerts("shop", AlertFilter::default()).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, alert.id);

        let latest = fx.store.latest_scan("shop").await.unwrap().unwrap();
        assert_eq!(latest.id, report.scan.id);
        assert_eq!(latest.status, ScanStatus::Completed);
        assert_eq!(latest.alerts_found, 1);

        // every comparison went through the guarded path
        assert_eq!(fx.factory.statements().len(), 4);
        assert!(fx.factory.statements().iter().all(|sql| sql.ends_with("LIMIT 2")));
    }

    #[tokio::test]
    async fn test_row_caps_do_not_truncate_comparisons() {
        let fx = fixture(orders_spike);
        fx.catalog.set_row_limit("shop", "orders", 1).unwrap();

        let report = fx.engine.run_scan("shop").await.unwrap();
        assert_eq!(report.scan.tables_scanned, 2);
        assert_eq!(report.alerts.len(), 1);
        assert!(fx.factory.statements().iter().all(|sql| !sql.ends_with("LIMIT 1")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_comparison_queries_wait_for_pool_capacity() {
        let factory = FakeFactory::new(orders_spike).with_delay(Duration::from_secs(5));
        let config = ExecutorConfig {
            pool_max_size: 2,
            ..ExecutorConfig::default()
        };
        let fx = fixture_from(factory, Arc::new(HeuristicEnhancer), config);

        let report = fx.engine.run_scan("shop").await.unwrap();
        assert_eq!(report.scan.status, ScanStatus::Completed);
        assert_eq!(report.scan.queries_run, 4);
        assert_eq!(report.scan.tables_scanned, 2);
        assert_eq!(report.alerts.len(), 1);
        assert_eq!(fx.factory.statements().len(), 4);
        assert!(fx.factory.peak_in_flight() <= 2);
    }

    #[tokio::test]
    async fn test_failed_query_does_not_abort_scan() {
        let fx = fixture(|sql| {
            if sql.contains("\"refunds\"") {
                Err(GatewayError::Database("permission denied for table refunds".into()))
            } else {
                orders_spike(sql)
            }
        });
        let report = fx.engine.run_scan("shop").await.unwrap();

        assert_eq!(report.scan.status, ScanStatus::Completed);
        assert_eq!(report.scan.queries_run, 4);
        assert_eq!(report.scan.tables_scanned, 1);
        assert_eq!(report.alerts.len(), 1);
    }

    #[tokio::test]
    async fn test_no_candidates_completes_empty() {
        let fx = fixture(orders_spike);
        fx.catalog
            .set_schema(
                "shop",
                Some(SchemaSnapshot {
                    tables: vec![TableSchema {
                        name: "orders".to_string(),
                        columns: vec![ColumnSchema::new("note", "text", false)],
                        row_count_estimate: Some(5),
                    }],
                }),
            )
            .unwrap();

        let report = fx.engine.run_scan("shop").await.unwrap();
        assert_eq!(report.scan.status, ScanStatus::Completed);
        assert_eq!(
            (report.scan.tables_scanned, report.scan.queries_run, report.scan.alerts_found),
            (0, 0, 0)
        );
        assert_eq!(fx.factory.created(), 0);
    }

    #[tokio::test]
    async fn test_missing_schema_fails_scan() {
        let fx = fixture(orders_spike);
        fx.catalog.set_schema("shop", None).unwrap();

        let report = fx.engine.run_scan("shop").await.unwrap();
        assert_eq!(report.scan.status, ScanStatus::Failed);
        assert!(report.scan.error.as_deref().unwrap().contains("No cached schema"));
        assert!(report.scan.completed_at.is_some());
        assert!(report.alerts.is_empty());

        let stored = fx.store.get_scan(report.scan.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ScanStatus::Failed);
    }

    #[tokio::test]
    async fn test_no_authorized_tables_fails_scan() {
        let fx = fixture(orders_spike);
        fx.catalog.set_allowed_tables("shop", Vec::<String>::new()).unwrap();

        let report = fx.engine.run_scan("shop").await.unwrap();
        assert_eq!(report.scan.status, ScanStatus::Failed);
        assert!(report.scan.error.as_deref().unwrap().contains("No tables are authorized"));
        assert_eq!(fx.factory.created(), 0);
    }

    #[tokio::test]
    async fn test_query_cap_drops_later_candidates() {
        let fx = fixture(orders_spike);
        let mut engine = fx.engine;
        engine.config.max_queries = 3;

        let report = engine.run_scan("shop").await.unwrap();
        assert_eq!(report.scan.queries_run, 3);
        assert_eq!(fx.factory.statements().len(), 3);
    }

    struct Renamer;

    #[async_trait]
    impl AlertEnhancer for Renamer {
        async fn enhance(&self, alerts: Vec<AnomalyAlert>) -> Vec<AnomalyAlert> {
            alerts
                .into_iter()
                .map(|mut alert| {
                    alert.metric_name = "Weekly revenue".to_string();
                    alert
                })
                .collect()
        }
    }

    #[tokio::test]
    async fn test_enhanced_alerts_are_persisted() {
        let fx = fixture_with(orders_spike, Arc::new(Renamer));
        let report = fx.engine.run_scan("shop").await.unwrap();

        let stored = fx.store.alerts_for_scan(report.scan.id).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].metric_name, "Weekly revenue");
        assert_eq!(stored[0].current_value, 150.0);
    }
}
