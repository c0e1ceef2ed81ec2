//! Pooled guarded-query executor
//!
//! The only component that holds live connections to external databases. Every
//! statement is validated, capped, run on a pooled session with a statement
//! timeout, and audited whatever the outcome.

pub mod postgres;
pub mod registry;

pub use postgres::{PostgresPool, PostgresPoolFactory};
pub use registry::{spawn_reaper, PoolRegistry, ReaperHandle};

use async_trait::async_trait;
use guarded_query_core::utils::Timer;
use guarded_query_core::{
    enforce_limit, AuditRecord, AuthorizationContext, ConnectionDescriptor, QueryValidation,
    SqlGuardrail,
};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::collaborators::{ConnectionDirectory, CredentialVault, PermissionStore};
use crate::error::{GatewayError, Result};
use crate::store::AuditLog;

/// Configuration for the executor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Server-side statement timeout in seconds
    pub statement_timeout_secs: u64,

    /// Row cap injected when no per-table limit is lower
    pub default_max_rows: u32,

    /// Idle time after which a pool is reclaimed
    pub pool_idle_ttl_secs: u64,

    /// Interval of the idle-pool sweep
    pub reap_interval_secs: u64,

    /// Maximum connections per pool
    pub pool_max_size: usize,

    /// Connect and checkout timeout in seconds
    pub connect_timeout_secs: u64,

    /// Execution time above which a query is logged as slow
    pub slow_query_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            statement_timeout_secs: 30,
            default_max_rows: 1000,
            pool_idle_ttl_secs: 300,
            reap_interval_secs: 60,
            pool_max_size: 5,
            connect_timeout_secs: 10,
            slow_query_ms: 5000,
        }
    }
}

/// Column names and decoded rows returned by a pool
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRows {
    /// Column names in select-list order
    pub columns: Vec<String>,

    /// Rows keyed by column name
    pub rows: Vec<Map<String, Value>>,
}

/// Successful query result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    /// Column names in select-list order
    pub columns: Vec<String>,

    /// Rows keyed by column name
    pub rows: Vec<Map<String, Value>>,

    /// Number of rows returned
    pub row_count: u64,

    /// Wall-clock execution time
    pub execution_time_ms: u64,

    /// Always false; the injected `LIMIT` bounds the result instead
    pub truncated: bool,
}

/// Result of one guarded execution
///
/// `result` is present only when validation passed and the statement ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// Rows, when the statement ran
    pub result: Option<QueryResult>,

    /// Validation report, including any execution error
    pub validation: QueryValidation,
}

impl ExecutionOutcome {
    /// An outcome without rows
    pub fn failed(validation: QueryValidation) -> Self {
        Self {
            result: None,
            validation,
        }
    }

    /// Whether the statement ran and returned rows
    pub fn is_success(&self) -> bool {
        self.result.is_some() && self.validation.valid
    }
}

/// A pool of sessions against one external database
#[async_trait]
pub trait QueryPool: Send + Sync {
    /// Run a read statement on a pooled session bounded by `timeout`
    async fn run_select(&self, sql: &str, params: &[Value], timeout: Duration) -> Result<QueryRows>;
}

/// Creates pools from connection descriptors
#[async_trait]
pub trait PoolFactory: Send + Sync {
    /// Create a pool; connections may be opened lazily
    async fn create_pool(&self, descriptor: ConnectionDescriptor) -> Result<Arc<dyn QueryPool>>;
}

/// Validates, executes and audits read queries against external databases
pub struct GuardedExecutor {
    config: ExecutorConfig,
    guardrail: SqlGuardrail,
    directory: Arc<dyn ConnectionDirectory>,
    permissions: Arc<dyn PermissionStore>,
    vault: Arc<dyn CredentialVault>,
    factory: Arc<dyn PoolFactory>,
    audit: Arc<dyn AuditLog>,
    registry: Arc<PoolRegistry>,
    _reaper: Option<ReaperHandle>,
}

impl GuardedExecutor {
    /// Create an executor and start its idle-pool reaper
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ExecutorConfig,
        guardrail: SqlGuardrail,
        directory: Arc<dyn ConnectionDirectory>,
        permissions: Arc<dyn PermissionStore>,
        vault: Arc<dyn CredentialVault>,
        factory: Arc<dyn PoolFactory>,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        let registry = Arc::new(PoolRegistry::new(Duration::from_secs(config.pool_idle_ttl_secs)));
        let reaper = spawn_reaper(&registry, Duration::from_secs(config.reap_interval_secs.max(1)));

        Self {
            config,
            guardrail,
            directory,
            permissions,
            vault,
            factory,
            audit,
            registry,
            _reaper: reaper,
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Get the validator
    pub fn guardrail(&self) -> &SqlGuardrail {
        &self.guardrail
    }

    /// Get the pool registry
    pub fn registry(&self) -> &Arc<PoolRegistry> {
        &self.registry
    }

    /// Validate and run a read query
    ///
    /// Never returns an error: validation, connectivity and execution failures
    /// are all reported in the outcome's validation.
    pub async fn execute(&self, database_id: &str, sql: &str, params: &[Value]) -> ExecutionOutcome {
        let auth = match self.resolve(database_id).await {
            Ok(auth) => auth,
            Err(message) => {
                warn!("Refusing query for {}: {}", database_id, message);
                record_execution("unresolved");
                return ExecutionOutcome::failed(QueryValidation::failure(message));
            }
        };

        if auth.is_empty() {
            let validation =
                QueryValidation::failure(format!("No tables are authorized for database '{}'", database_id));
            self.reject(database_id, sql, params, &validation).await;
            return ExecutionOutcome::failed(validation);
        }

        let tables = self.guardrail.referenced_tables(sql);
        let max_rows = auth.effective_row_limit(&tables, self.config.default_max_rows);
        let validation = self.guardrail.validate(sql, &auth, max_rows);
        if !validation.valid {
            self.reject(database_id, sql, params, &validation).await;
            return ExecutionOutcome::failed(validation);
        }

        let limited = enforce_limit(sql, max_rows);
        let timer = Timer::new(format!("query[{}]", database_id))
            .with_warning_threshold(Duration::from_millis(self.config.slow_query_ms));

        match self.run(database_id, &limited, params).await {
            Ok(rows) => {
                let elapsed_ms = timer.finish("completed");
                let row_count = rows.rows.len() as u64;
                self.append(AuditRecord::succeeded(database_id, &limited, params, row_count, elapsed_ms))
                    .await;
                record_execution("success");
                metrics::histogram!("guarded_query_execution_ms", elapsed_ms as f64);
                debug!("Query on {} returned {} row(s)", database_id, row_count);

                ExecutionOutcome {
                    result: Some(QueryResult {
                        columns: rows.columns,
                        rows: rows.rows,
                        row_count,
                        execution_time_ms: elapsed_ms,
                        truncated: false,
                    }),
                    validation,
                }
            }
            Err(e) => {
                let elapsed_ms = timer.finish("failed");
                let message = e.to_string();
                warn!("Query on {} failed: {}", database_id, message);
                self.append(AuditRecord::failed(database_id, &limited, params, &message, Some(elapsed_ms)))
                    .await;
                record_execution("error");

                let mut failed = validation;
                failed.add_error(format!("Query execution failed: {}", message));
                ExecutionOutcome::failed(failed)
            }
        }
    }

    async fn resolve(&self, database_id: &str) -> std::result::Result<AuthorizationContext, String> {
        match self.directory.get_connection(database_id).await {
            Ok(Some(_)) => {}
            Ok(None) => return Err(format!("Unknown database '{}'", database_id)),
            Err(e) => return Err(format!("Failed to resolve database '{}': {}", database_id, e)),
        }
        self.permissions
            .authorization_context(database_id)
            .await
            .map_err(|e| format!("Failed to load permissions for '{}': {}", database_id, e))
    }

    async fn run(&self, database_id: &str, sql: &str, params: &[Value]) -> Result<QueryRows> {
        let pool = self
            .registry
            .acquire(database_id, || self.create_pool(database_id))
            .await?;
        pool.run_select(sql, params, Duration::from_secs(self.config.statement_timeout_secs))
            .await
    }

    async fn create_pool(&self, database_id: &str) -> Result<Arc<dyn QueryPool>> {
        let stored = self
            .directory
            .get_connection(database_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("database '{}'", database_id)))?;
        let password = self.vault.decrypt(&stored.password_secret).await?;
        info!(
            "Opening pool for {} at {}:{}/{}",
            database_id, stored.host, stored.port, stored.database
        );
        self.factory.create_pool(stored.into_descriptor(password)).await
    }

    async fn reject(&self, database_id: &str, sql: &str, params: &[Value], validation: &QueryValidation) {
        debug!("Rejected query for {}: {}", database_id, validation.error_summary());
        self.append(AuditRecord::rejected(database_id, sql, params, &validation.error_summary()))
            .await;
        record_execution("rejected");
    }

    async fn append(&self, record: AuditRecord) {
        if let Err(e) = self.audit.append(&record).await {
            error!("Failed to write audit record {}: {}", record.id, e);
        }
    }
}

fn record_execution(status: &'static str) {
    metrics::counter!("guarded_query_executions_total", 1, "status" => status);
}
