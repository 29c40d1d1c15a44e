//! Periodic scans of every registered datasource.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

use crate::error::{ErrorKind, Result, ScanError};
use crate::orchestrator::Scanner;
use crate::report::ScanResult;

/// Scans all datasources on a fixed interval.
///
/// Constructed once at process startup. [`SyncScheduler::start`] only spawns
/// the loop the first time it is called.
pub struct SyncScheduler {
    scanner: Arc<Scanner>,
    interval: Duration,
    started: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SyncScheduler {
    pub fn new(scanner: Arc<Scanner>, interval: Duration) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            scanner,
            interval,
            started: AtomicBool::new(false),
            shutdown_tx,
            handle: Mutex::new(None),
        })
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Spawn the sync loop. Returns `false` if it was already started.
    pub async fn start(self: &Arc<Self>) -> bool {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Sync scheduler already started");
            return false;
        }

        let scheduler = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        scheduler.run_once().await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::info!("Sync scheduler stopped");
        });

        *self.handle.lock().await = Some(handle);
        tracing::info!(interval_secs = self.interval.as_secs(), "Sync scheduler started");
        true
    }

    /// Scan every registered datasource once, one after another.
    ///
    /// Datasources already being scanned are skipped.
    pub async fn run_once(&self) -> Vec<(String, Result<ScanResult>)> {
        let datasources = match self.scanner.store().list_datasources().await {
            Ok(datasources) => datasources,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list datasources for sync");
                return vec![(String::new(), Err(ScanError::Database(e)))];
            }
        };

        let mut results = Vec::with_capacity(datasources.len());
        for datasource in datasources {
            let result = self.scanner.scan(&datasource.id).await;
            if let Err(e) = &result {
                if e.kind() == ErrorKind::DataSourceIsScanning {
                    tracing::info!(datasource_id = %datasource.id, "Datasource busy, skipped");
                }
            }
            results.push((datasource.id, result));
        }
        results
    }

    /// Stop the loop and wait for an in-flight round to finish.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Sync scheduler task failed");
            }
        }
    }
}
