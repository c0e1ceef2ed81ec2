//! Query gateway facade
//!
//! The inbound surface used by the CLI and the HTTP server: guarded queries,
//! foreground and background scans, and alert triage.

use guarded_query_core::{AnomalyAlert, AnomalyScan, AuditRecord, QueryValidation, SqlGuardrail};
use log::{info, warn};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::anomaly::{
    AlertEnhancer, AnthropicClient, HeuristicEnhancer, LlmAlertRewriter, ScanEngine, ScanFailure,
    ScanReport, ScanWorker,
};
use crate::catalog::StaticCatalog;
use crate::collaborators::{ConnectionDirectory, CredentialVault, PermissionStore, SchemaCache};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, Result};
use crate::executor::{ExecutionOutcome, GuardedExecutor, PoolFactory, PostgresPoolFactory};
use crate::store::{AlertFilter, AnomalyStore, AuditLog, SqliteStore};
use crate::vault::EnvCredentialVault;

/// Systems the gateway reads from but does not own
#[derive(Clone)]
pub struct Collaborators {
    /// Resolves database ids to connection details
    pub directory: Arc<dyn ConnectionDirectory>,

    /// Table grants, masks and row caps
    pub permissions: Arc<dyn PermissionStore>,

    /// Cached schemas
    pub schema: Arc<dyn SchemaCache>,

    /// Secret decryption
    pub vault: Arc<dyn CredentialVault>,
}

impl Collaborators {
    /// Serve everything from a static catalog and environment secrets
    pub fn from_catalog(catalog: Arc<StaticCatalog>) -> Self {
        Self {
            directory: catalog.clone(),
            permissions: catalog.clone(),
            schema: catalog,
            vault: Arc::new(EnvCredentialVault::new()),
        }
    }
}

/// Point-in-time gateway status
#[derive(Debug, Clone, Serialize)]
pub struct GatewayStatus {
    /// Crate version
    pub version: &'static str,

    /// Live connection pools
    pub open_pools: usize,

    /// Idle time after which a pool is reclaimed
    pub pool_idle_ttl_secs: u64,

    /// Whether alert wording is rewritten by a language model
    pub enhancement_enabled: bool,
}

/// Guarded query gateway
pub struct QueryGateway {
    config: GatewayConfig,
    collaborators: Collaborators,
    audit: Arc<dyn AuditLog>,
    anomalies: Arc<dyn AnomalyStore>,
    executor: Arc<GuardedExecutor>,
    engine: Arc<ScanEngine>,
    worker: ScanWorker,
    failures: Mutex<Option<mpsc::UnboundedReceiver<ScanFailure>>>,
}

impl QueryGateway {
    /// Assemble a gateway; must be called inside a Tokio runtime
    pub fn new<S>(
        config: GatewayConfig,
        collaborators: Collaborators,
        factory: Arc<dyn PoolFactory>,
        store: Arc<S>,
        enhancer: Arc<dyn AlertEnhancer>,
    ) -> Self
    where
        S: AuditLog + AnomalyStore + 'static,
    {
        let audit: Arc<dyn AuditLog> = store.clone();
        let anomalies: Arc<dyn AnomalyStore> = store;

        let executor = Arc::new(GuardedExecutor::new(
            config.executor.clone(),
            SqlGuardrail::new(config.guardrail.clone()),
            collaborators.directory.clone(),
            collaborators.permissions.clone(),
            collaborators.vault.clone(),
            factory,
            audit.clone(),
        ));
        let engine = Arc::new(ScanEngine::new(
            executor.clone(),
            collaborators.schema.clone(),
            collaborators.permissions.clone(),
            anomalies.clone(),
            enhancer,
            config.scan.clone(),
        ));
        let (worker, failures) = ScanWorker::spawn(engine.clone(), config.scan.worker_concurrency);

        Self {
            config,
            collaborators,
            audit,
            anomalies,
            executor,
            engine,
            worker,
            failures: Mutex::new(Some(failures)),
        }
    }

    /// Build a gateway from configuration: static catalog, SQLite store and Postgres pools
    pub fn from_config(config: GatewayConfig) -> Result<Self> {
        let catalog = match &config.catalog_path {
            Some(path) => StaticCatalog::load(path)?,
            None => {
                warn!("No catalog configured; every database id is unknown");
                StaticCatalog::new()
            }
        };
        let store = Arc::new(SqliteStore::open(&config.store_path)?);
        let factory = Arc::new(PostgresPoolFactory::new(
            config.executor.pool_max_size,
            Duration::from_secs(config.executor.connect_timeout_secs),
        ));
        let enhancer = build_enhancer(&config);

        info!("Gateway store at {}", config.store_path);
        Ok(Self::new(
            config,
            Collaborators::from_catalog(Arc::new(catalog)),
            factory,
            store,
            enhancer,
        ))
    }

    /// Get the configuration
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Get the executor
    pub fn executor(&self) -> &Arc<GuardedExecutor> {
        &self.executor
    }

    /// Validate a statement against a database's permissions without running it
    pub async fn validate(&self, database_id: &str, sql: &str) -> Result<QueryValidation> {
        if self.collaborators.directory.get_connection(database_id).await?.is_none() {
            return Err(GatewayError::NotFound(format!("database '{}'", database_id)));
        }
        let auth = self.collaborators.permissions.authorization_context(database_id).await?;
        let guardrail = self.executor.guardrail();
        let max_rows = auth.effective_row_limit(
            &guardrail.referenced_tables(sql),
            self.config.executor.default_max_rows,
        );
        Ok(guardrail.validate(sql, &auth, max_rows))
    }

    /// Validate, run and audit a read query
    pub async fn validate_and_execute(&self, database_id: &str, sql: &str, params: &[Value]) -> ExecutionOutcome {
        self.executor.execute(database_id, sql, params).await
    }

    /// Run a scan and wait for it
    pub async fn run_scan(&self, database_id: &str) -> Result<ScanReport> {
        self.engine.run_scan(database_id).await
    }

    /// Queue a scan without waiting for it
    pub async fn submit_scan(&self, database_id: &str) -> Result<()> {
        self.worker.submit(database_id).await
    }

    /// Take the receiver of background scan failures; only the first call gets it
    pub fn take_scan_failures(&self) -> Option<mpsc::UnboundedReceiver<ScanFailure>> {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Most recent scan of a database
    pub async fn get_latest_scan(&self, database_id: &str) -> Result<Option<AnomalyScan>> {
        self.anomalies.latest_scan(database_id).await
    }

    /// Alerts of a database, newest first
    pub async fn get_alerts(&self, database_id: &str, filter: AlertFilter) -> Result<Vec<AnomalyAlert>> {
        self.anomalies.list_alerts(database_id, filter).await
    }

    /// Mark alerts as seen; returns how many exist
    pub async fn mark_seen(&self, alert_ids: &[Uuid]) -> Result<usize> {
        self.anomalies.mark_seen(alert_ids).await
    }

    /// Dismiss an alert
    pub async fn dismiss_alert(&self, alert_id: Uuid) -> Result<()> {
        if self.anomalies.dismiss(alert_id).await? {
            Ok(())
        } else {
            Err(GatewayError::NotFound(format!("alert {}", alert_id)))
        }
    }

    /// Most recent audit records of a database
    pub async fn recent_audit(&self, database_id: &str, limit: usize) -> Result<Vec<AuditRecord>> {
        self.audit.recent_audit(database_id, limit).await
    }

    /// Current status
    pub async fn status(&self) -> GatewayStatus {
        GatewayStatus {
            version: crate::VERSION,
            open_pools: self.executor.registry().len().await,
            pool_idle_ttl_secs: self.config.executor.pool_idle_ttl_secs,
            enhancement_enabled: self.config.enhancement.enabled,
        }
    }

    /// Stop the background worker after queued scans finish
    pub async fn shutdown(self) {
        self.worker.shutdown().await;
    }
}

fn build_enhancer(config: &GatewayConfig) -> Arc<dyn AlertEnhancer> {
    if !config.enhancement.enabled {
        return Arc::new(HeuristicEnhancer);
    }
    match AnthropicClient::from_config(&config.enhancement) {
        Ok(client) => {
            info!("Alert rewrite enabled with model {}", client.model_name());
            Arc::new(LlmAlertRewriter::from_config(&config.enhancement, Arc::new(client)))
        }
        Err(e) => {
            warn!("Alert rewrite disabled: {}", e);
            Arc::new(HeuristicEnhancer)
        }
    }
}
