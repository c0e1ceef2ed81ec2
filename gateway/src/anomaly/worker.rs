//! Background scans
//!
//! Scan requests that the caller does not wait for are queued to a dispatcher
//! task, run with bounded concurrency, and every failure is both logged and
//! published on an error channel.

use log::{debug, error, info};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::engine::ScanEngine;
use crate::error::{to_scan_error, Result};
use guarded_query_core::ScanStatus;

/// Queued scan requests before `submit` waits
const QUEUE_CAPACITY: usize = 64;

/// A background scan that did not complete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanFailure {
    /// Database the scan targeted
    pub database_id: String,

    /// Scan record, when one was created
    pub scan_id: Option<Uuid>,

    /// Failure reason
    pub error: String,
}

/// Runs scans submitted without waiting for their result
pub struct ScanWorker {
    jobs: mpsc::Sender<String>,
    dispatcher: JoinHandle<()>,
    permits: Arc<Semaphore>,
    concurrency: usize,
}

impl ScanWorker {
    /// Start the dispatcher; failures are delivered on the returned receiver
    pub fn spawn(engine: Arc<ScanEngine>, concurrency: usize) -> (Self, mpsc::UnboundedReceiver<ScanFailure>) {
        let concurrency = concurrency.max(1);
        let (jobs, mut queue) = mpsc::channel::<String>(QUEUE_CAPACITY);
        let (failures, failure_rx) = mpsc::unbounded_channel();
        let permits = Arc::new(Semaphore::new(concurrency));

        let dispatcher_permits = permits.clone();
        let dispatcher = tokio::spawn(async move {
            while let Some(database_id) = queue.recv().await {
                let Ok(permit) = dispatcher_permits.clone().acquire_owned().await else {
                    break;
                };
                let engine = engine.clone();
                let failures = failures.clone();

                tokio::spawn(async move {
                    if let Some(failure) = run_one(&engine, database_id).await {
                        error!(
                            "Background scan for {} failed: {}",
                            failure.database_id, failure.error
                        );
                        // nobody listening is fine; the failure is already logged
                        let _ = failures.send(failure);
                    }
                    drop(permit);
                });
            }
            debug!("Scan worker queue closed");
        });

        info!("Scan worker started with concurrency {}", concurrency);
        (
            Self {
                jobs,
                dispatcher,
                permits,
                concurrency,
            },
            failure_rx,
        )
    }

    /// Queue a scan
    pub async fn submit(&self, database_id: &str) -> Result<()> {
        self.jobs
            .send(database_id.to_string())
            .await
            .map_err(|_| to_scan_error("scan worker is not running"))
    }

    /// Stop accepting scans and wait for queued and running ones to finish
    pub async fn shutdown(self) {
        drop(self.jobs);
        if let Err(e) = self.dispatcher.await {
            error!("Scan worker dispatcher ended abnormally: {}", e);
        }
        // every running scan holds a permit
        if let Ok(all) = self.permits.acquire_many(self.concurrency as u32).await {
            drop(all);
        }
        info!("Scan worker stopped");
    }
}

async fn run_one(engine: &ScanEngine, database_id: String) -> Option<ScanFailure> {
    match engine.run_scan(&database_id).await {
        Ok(report) if report.scan.status == ScanStatus::Failed => Some(ScanFailure {
            database_id,
            scan_id: Some(report.scan.id),
            error: report.scan.error.unwrap_or_default(),
        }),
        Ok(_) => None,
        Err(e) => Some(ScanFailure {
            database_id,
            scan_id: None,
            error: e.to_string(),
        }),
    }
}
