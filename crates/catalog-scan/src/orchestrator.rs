//! Scan orchestration: lease, collection, catalog bootstrap, partitioned
//! reconciliation and the delete sweep.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use viewsync_catalog_core::{
    validation, AuditRevoker, CodeAllocator, Datasource, FormView, MetadataSource, SampleDataInvalidator,
    ScanRecord, TableInfo, ViewFederationGateway, ViewStatus,
};
use viewsync_catalog_storage::CatalogStore;

use crate::collection::{resolve_task_id, wait_for_task, PollPolicy};
use crate::config::ScanConfig;
use crate::engine::{DiffEngine, PartitionOutcome, ScanReceivers, ScanSinks};
use crate::error::{Result, ScanError};
use crate::metrics;
use crate::partition;
use crate::report::{ErrorView, RevokedView, ScanResult, ScanTimings};
use crate::working_set::ScanWorkingSet;

/// External services a scan talks to.
#[derive(Clone)]
pub struct ScanCollaborators {
    pub metadata: Arc<dyn MetadataSource>,
    pub federation: Arc<dyn ViewFederationGateway>,
    pub codes: Arc<dyn CodeAllocator>,
    pub audits: Arc<dyn AuditRevoker>,
    pub samples: Arc<dyn SampleDataInvalidator>,
}

/// Exclusive scan ownership of a datasource.
///
/// Acquired with a conditional status update. Release it with
/// [`ScanLease::release`]; a lease dropped without release schedules the
/// status restore on the current runtime.
pub struct ScanLease {
    store: Arc<dyn CatalogStore>,
    datasource_id: String,
    released: bool,
}

impl ScanLease {
    pub async fn acquire(store: Arc<dyn CatalogStore>, datasource_id: &str) -> Result<Self> {
        if !store.try_begin_scan(datasource_id).await? {
            return Err(ScanError::DatasourceIsScanning(datasource_id.to_string()));
        }
        Ok(Self {
            store,
            datasource_id: datasource_id.to_string(),
            released: false,
        })
    }

    pub fn datasource_id(&self) -> &str {
        &self.datasource_id
    }

    /// Return the datasource to `Available`; failures are logged.
    pub async fn release(mut self) {
        self.released = true;
        if let Err(e) = self.store.finish_scan(&self.datasource_id).await {
            tracing::error!(
                datasource_id = %self.datasource_id,
                error = %e,
                "Failed to release scan lease"
            );
        }
    }
}

impl Drop for ScanLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let store = Arc::clone(&self.store);
        let datasource_id = std::mem::take(&mut self.datasource_id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store.finish_scan(&datasource_id).await {
                        tracing::error!(
                            datasource_id = %datasource_id,
                            error = %e,
                            "Failed to release dropped scan lease"
                        );
                    }
                });
            }
            Err(_) => {
                tracing::error!(
                    datasource_id = %datasource_id,
                    "Scan lease dropped outside a runtime, datasource stays scanning"
                );
            }
        }
    }
}

/// Runs scans of registered datasources.
pub struct Scanner {
    store: Arc<dyn CatalogStore>,
    metadata: Arc<dyn MetadataSource>,
    federation: Arc<dyn ViewFederationGateway>,
    engine: Arc<DiffEngine>,
    config: ScanConfig,
}

impl Scanner {
    /// Build a scanner; fails when `config` does not validate.
    pub fn new(
        store: Arc<dyn CatalogStore>,
        collaborators: ScanCollaborators,
        config: ScanConfig,
    ) -> viewsync_catalog_core::Result<Self> {
        config.validate()?;
        let engine = Arc::new(DiffEngine::new(
            Arc::clone(&store),
            Arc::clone(&collaborators.federation),
            collaborators.codes,
            collaborators.audits,
            collaborators.samples,
            &config,
        ));
        Ok(Self {
            store,
            metadata: collaborators.metadata,
            federation: collaborators.federation,
            engine,
            config,
        })
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn CatalogStore> {
        Arc::clone(&self.store)
    }

    /// Scan a datasource outside of any external task.
    pub async fn scan(&self, datasource_id: &str) -> Result<ScanResult> {
        self.scan_for_task(datasource_id, None).await
    }

    /// Scan a datasource on behalf of an external task; the task id is recorded
    /// as the scanner of the scan record.
    pub async fn scan_for_task(
        &self,
        datasource_id: &str,
        task_id: Option<&str>,
    ) -> Result<ScanResult> {
        let started = Instant::now();
        let result = self.scan_inner(datasource_id, task_id).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind().code(),
        };
        metrics::record_scan(outcome, started.elapsed());

        match &result {
            Ok(r) => tracing::info!(
                datasource_id = %datasource_id,
                scanned = r.scan_total,
                created = r.created_count,
                updated = r.updated_count,
                errors = r.error_count,
                deleted = r.deleted_views.len(),
                duration_ms = %started.elapsed().as_millis(),
                "Scan finished"
            ),
            Err(e) => tracing::error!(
                datasource_id = %datasource_id,
                code = %e.kind(),
                error = %e,
                "Scan failed"
            ),
        }
        result
    }

    async fn scan_inner(&self, datasource_id: &str, task_id: Option<&str>) -> Result<ScanResult> {
        let datasource = self
            .store
            .get_datasource(datasource_id)
            .await?
            .ok_or_else(|| ScanError::DatasourceNotFound(datasource_id.to_string()))?;

        let lease = ScanLease::acquire(Arc::clone(&self.store), datasource_id).await?;
        tracing::info!(datasource_id = %datasource_id, "Scan started");

        let result = self.run(datasource, task_id).await;
        lease.release().await;
        result
    }

    async fn run(&self, mut datasource: Datasource, task_id: Option<&str>) -> Result<ScanResult> {
        if self.config.collect_metadata {
            self.collect(&datasource).await?;
        }
        self.ensure_view_catalog(&mut datasource).await?;

        let tables = self.fetch_tables(&datasource).await?;
        let scan_total = tables.len();

        let views = self.store.list_form_views(&datasource.id).await?;
        let working_set = Arc::new(ScanWorkingSet::from_views(views));
        let datasource = Arc::new(datasource);

        let (sinks, receivers) = ScanSinks::channel();
        let collector = spawn_collector(receivers);

        let dispatched = self
            .dispatch(Arc::clone(&datasource), Arc::clone(&working_set), tables, &sinks)
            .await;

        // Sweep revocations go through the same collector. Tables of a panicked
        // worker may never have been claimed, so their views must not be swept.
        let swept = match &dispatched {
            Ok((_, 0)) => self.sweep(&datasource, &working_set, &sinks).await,
            Ok((_, panicked)) => {
                tracing::warn!(
                    datasource_id = %datasource.id,
                    panicked_workers = *panicked,
                    "Skipping delete sweep after worker panic"
                );
                Ok(Vec::new())
            }
            Err(_) => Ok(Vec::new()),
        };
        drop(sinks);

        let (error_views, revoked_views, timings) = match collector.await {
            Ok(collected) => collected,
            Err(e) => {
                tracing::error!(error = %e, "Scan collector task failed");
                (Vec::new(), Vec::new(), ScanTimings::default())
            }
        };

        let (outcome, panicked_workers) = dispatched?;
        let deleted_views = swept?;

        self.store
            .append_scan_record(ScanRecord {
                id: uuid::Uuid::new_v4().to_string(),
                datasource_id: datasource.id.clone(),
                scanner: task_id.unwrap_or_default().to_string(),
                scanned_at: Utc::now(),
            })
            .await?;

        Ok(ScanResult {
            datasource_id: datasource.id.clone(),
            scan_total,
            created_count: outcome.created,
            updated_count: outcome.updated,
            error_count: error_views.len(),
            error_views,
            revoked_views,
            deleted_views,
            panicked_workers,
            timings,
        })
    }

    /// Start a collection task, persist its id and wait for it.
    async fn collect(&self, datasource: &Datasource) -> Result<()> {
        let descriptor = self
            .metadata
            .start_collection(&datasource.external_id)
            .await
            .map_err(ScanError::MetadataSource)?;
        let task_id = resolve_task_id(&descriptor)?;
        tracing::info!(
            datasource_id = %datasource.id,
            task_id = %task_id,
            "Metadata collection started"
        );

        self.store
            .set_metadata_task_id(&datasource.id, Some(task_id.clone()))
            .await?;

        wait_for_task(
            self.metadata.as_ref(),
            &task_id,
            PollPolicy::from_config(&self.config),
        )
        .await
    }

    /// Create the federated catalog the views live in, once per datasource.
    async fn ensure_view_catalog(&self, datasource: &mut Datasource) -> Result<()> {
        if !datasource.needs_view_catalog() {
            return Ok(());
        }

        let catalog = format!("vdm_{}", datasource.catalog_name);
        let created = self
            .federation
            .create_catalog(&catalog, &datasource.catalog_name)
            .await
            .map_err(|source| ScanError::CatalogCreate {
                catalog: catalog.clone(),
                source,
            })?;
        let catalog = created.into_iter().next().unwrap_or(catalog);
        let data_view_source = format!("{}.default", catalog);

        if let Err(e) = self
            .store
            .set_data_view_source(&datasource.id, &data_view_source)
            .await
        {
            tracing::error!(
                datasource_id = %datasource.id,
                catalog = %catalog,
                error = %e,
                "Failed to record federated catalog, removing it"
            );
            if let Err(rollback) = self.federation.delete_catalog(&catalog).await {
                tracing::error!(
                    catalog = %catalog,
                    error = %rollback,
                    "Failed to roll back federated catalog"
                );
            }
            return Err(e.into());
        }

        tracing::info!(
            datasource_id = %datasource.id,
            data_view_source = %data_view_source,
            "Created federated catalog"
        );
        datasource.data_view_source = data_view_source;
        Ok(())
    }

    /// Read every page of tables; duplicate names keep their first occurrence.
    async fn fetch_tables(&self, datasource: &Datasource) -> Result<Vec<TableInfo>> {
        let page_size = self.config.page_size;
        let mut tables = Vec::new();
        let mut offset = 0;

        loop {
            let page = self
                .metadata
                .list_table_batch(&datasource.external_id, page_size, offset)
                .await
                .map_err(ScanError::MetadataSource)?;
            let len = page.len();
            tables.extend(page);
            if len < page_size {
                break;
            }
            offset += page_size;
        }

        let mut seen = HashSet::with_capacity(tables.len());
        tables.retain(|table| {
            if let Err(e) = validation::validate_technical_name(&table.name, "table") {
                tracing::warn!(
                    datasource_id = %datasource.id,
                    table = %table.name,
                    error = %e,
                    "Skipping table with invalid name"
                );
                return false;
            }
            let first = seen.insert(table.name.clone());
            if !first {
                tracing::warn!(
                    datasource_id = %datasource.id,
                    table = %table.name,
                    "Duplicate table in collected batch, keeping first"
                );
            }
            first
        });

        tracing::debug!(datasource_id = %datasource.id, tables = tables.len(), "Fetched tables");
        Ok(tables)
    }

    /// Run the partitions; returns the merged outcome and the number of panicked workers.
    async fn dispatch(
        &self,
        datasource: Arc<Datasource>,
        working_set: Arc<ScanWorkingSet>,
        tables: Vec<TableInfo>,
        sinks: &ScanSinks,
    ) -> Result<(PartitionOutcome, usize)> {
        let plan = partition::plan(
            tables.len(),
            self.config.min_tables_per_worker,
            self.config.max_workers,
        );
        tracing::debug!(
            tables = plan.total,
            workers = plan.workers,
            chunk_size = plan.chunk_size,
            remainder = plan.remainder(),
            "Partitioned table batch"
        );

        // The remainder runs as one more task so a panic in it is recovered
        // through its JoinHandle like any worker's.
        let (mut chunks, remainder) = plan.split(tables);
        if !remainder.is_empty() {
            chunks.push(remainder);
        }

        let mut handles = Vec::with_capacity(chunks.len());
        for (worker, chunk) in chunks.into_iter().enumerate() {
            let engine = Arc::clone(&self.engine);
            let datasource = Arc::clone(&datasource);
            let working_set = Arc::clone(&working_set);
            let sinks = sinks.clone();
            let handle = tokio::spawn(async move {
                engine
                    .compare_views(&datasource, &working_set, chunk, &sinks)
                    .await
            });
            handles.push((worker, handle));
        }

        let mut outcome = PartitionOutcome::default();
        let mut first_error = None;
        let mut panicked = 0;
        for (worker, handle) in handles {
            match handle.await {
                Ok(Ok(partition)) => outcome.merge(partition),
                Ok(Err(e)) => {
                    tracing::error!(worker, error = %e, "Scan worker failed");
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    panicked += 1;
                    tracing::error!(worker, error = %e, "Scan worker panicked");
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok((outcome, panicked)),
        }
    }

    /// Soft-delete views whose table disappeared, revoking pending approvals.
    async fn sweep(
        &self,
        datasource: &Datasource,
        working_set: &ScanWorkingSet,
        sinks: &ScanSinks,
    ) -> Result<Vec<String>> {
        let mut vanished: Vec<FormView> = working_set
            .unmatched()
            .into_iter()
            .filter(|view| view.status != ViewStatus::Delete)
            .collect();
        if vanished.is_empty() {
            return Ok(Vec::new());
        }

        let now = Utc::now();
        for view in vanished.iter_mut() {
            self.engine.revoke_pending_audit(view, sinks).await;
            view.status = ViewStatus::Delete;
            view.delete_message = Some(self.config.delete_message.clone());
            view.updated_at = now;
        }

        let names: Vec<String> = vanished.iter().map(|v| v.technical_name.clone()).collect();
        let written = self.store.mark_views_deleted(vanished).await?;
        metrics::record_views("deleted", written);
        tracing::info!(
            datasource_id = %datasource.id,
            deleted = written,
            "Marked vanished views deleted"
        );
        Ok(names)
    }
}

type Collected = (Vec<ErrorView>, Vec<RevokedView>, ScanTimings);

/// Drain worker reports until every sender is gone.
fn spawn_collector(receivers: ScanReceivers) -> tokio::task::JoinHandle<Collected> {
    let ScanReceivers {
        mut errors,
        mut revoked,
        mut timings,
    } = receivers;

    let aggregate = tokio::spawn(async move {
        let mut total = ScanTimings::default();
        while let Some(partition) = timings.recv().await {
            total.merge(&partition);
        }
        total
    });

    tokio::spawn(async move {
        let mut error_views = Vec::new();
        let mut revoked_views = Vec::new();
        loop {
            tokio::select! {
                Some(view) = errors.recv() => error_views.push(view),
                Some(view) = revoked.recv() => revoked_views.push(view),
                else => break,
            }
        }
        let timings = match aggregate.await {
            Ok(timings) => timings,
            Err(e) => {
                tracing::error!(error = %e, "Timing aggregation task failed");
                ScanTimings::default()
            }
        };
        (error_views, revoked_views, timings)
    })
}
