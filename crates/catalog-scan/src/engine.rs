//! Per-partition reconciliation of scanned tables against the catalog.
//!
//! For each table [`DiffEngine`] either creates a logical view (federated view
//! first, catalog rows second) or diffs the stored view and its fields,
//! pushes a regenerated SELECT to the federation engine when the column list
//! changed and persists the result. Per-table failures are reported through
//! [`ScanSinks`] and never abort the partition; catalog errors do.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::mpsc;
use viewsync_catalog_core::{
    validation, AuditRevoker, CodeAllocator, Datasource, EditStatus, FormView, FormViewField,
    OnlineStatus, SampleDataInvalidator, TableInfo, ViewFederationGateway, ViewStatus,
};
use viewsync_catalog_storage::CatalogStore;

use crate::config::ScanConfig;
use crate::diff::{self, business_name};
use crate::error::Result;
use crate::metrics;
use crate::report::{ErrorView, RevokedView, ScanTimings};
use crate::sql::build_select;
use crate::working_set::ScanWorkingSet;

/// Channels workers report through; drained by the orchestrator for the whole scan.
#[derive(Debug, Clone)]
pub struct ScanSinks {
    errors: mpsc::UnboundedSender<ErrorView>,
    revoked: mpsc::UnboundedSender<RevokedView>,
    timings: mpsc::UnboundedSender<ScanTimings>,
}

/// Receiving ends of [`ScanSinks`].
#[derive(Debug)]
pub struct ScanReceivers {
    pub errors: mpsc::UnboundedReceiver<ErrorView>,
    pub revoked: mpsc::UnboundedReceiver<RevokedView>,
    pub timings: mpsc::UnboundedReceiver<ScanTimings>,
}

impl ScanSinks {
    pub fn channel() -> (Self, ScanReceivers) {
        let (errors, errors_rx) = mpsc::unbounded_channel();
        let (revoked, revoked_rx) = mpsc::unbounded_channel();
        let (timings, timings_rx) = mpsc::unbounded_channel();
        (
            Self {
                errors,
                revoked,
                timings,
            },
            ScanReceivers {
                errors: errors_rx,
                revoked: revoked_rx,
                timings: timings_rx,
            },
        )
    }

    pub fn error(&self, view: ErrorView) {
        if self.errors.send(view).is_err() {
            tracing::debug!("Error collector closed, dropping error view");
        }
    }

    pub fn revoked(&self, view: RevokedView) {
        if self.revoked.send(view).is_err() {
            tracing::debug!("Revocation collector closed, dropping revoked view");
        }
    }

    pub fn timings(&self, timings: ScanTimings) {
        let _ = self.timings.send(timings);
    }
}

/// Views created and updated by one partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartitionOutcome {
    pub created: usize,
    pub updated: usize,
}

impl PartitionOutcome {
    pub fn merge(&mut self, other: PartitionOutcome) {
        self.created += other.created;
        self.updated += other.updated;
    }
}

/// Reconciles one partition of scanned tables.
pub struct DiffEngine {
    store: Arc<dyn CatalogStore>,
    federation: Arc<dyn ViewFederationGateway>,
    codes: Arc<dyn CodeAllocator>,
    audits: Arc<dyn AuditRevoker>,
    samples: Arc<dyn SampleDataInvalidator>,
    code_rule_id: String,
}

impl DiffEngine {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        federation: Arc<dyn ViewFederationGateway>,
        codes: Arc<dyn CodeAllocator>,
        audits: Arc<dyn AuditRevoker>,
        samples: Arc<dyn SampleDataInvalidator>,
        config: &ScanConfig,
    ) -> Self {
        Self {
            store,
            federation,
            codes,
            audits,
            samples,
            code_rule_id: config.uniform_code_rule_id.clone(),
        }
    }

    /// Reconcile `tables` in order against the views claimed from `working_set`.
    pub async fn compare_views(
        &self,
        datasource: &Datasource,
        working_set: &ScanWorkingSet,
        tables: Vec<TableInfo>,
        sinks: &ScanSinks,
    ) -> Result<PartitionOutcome> {
        let mut outcome = PartitionOutcome::default();
        if tables.is_empty() {
            return Ok(outcome);
        }

        let matched: Vec<(TableInfo, Option<FormView>)> = tables
            .into_iter()
            .map(|table| {
                let view = working_set.claim(&table.name);
                (table, view)
            })
            .collect();

        let codes_needed = matched
            .iter()
            .filter(|(_, view)| {
                view.as_ref()
                    .map_or(true, |v| v.uniform_catalog_code.is_empty())
            })
            .count();
        let mut codes = self.allocate_codes(codes_needed).await.into_iter();

        let view_ids: Vec<String> = matched
            .iter()
            .filter_map(|(_, view)| view.as_ref().map(|v| v.id.clone()))
            .collect();
        let mut fields_by_view = if view_ids.is_empty() {
            HashMap::new()
        } else {
            self.store.list_fields_by_views(view_ids).await?
        };

        let mut timings = ScanTimings::default();
        for (table, existing) in matched {
            let started = Instant::now();
            match existing {
                None => {
                    let code = codes.next().unwrap_or_default();
                    if self.create_view(datasource, &table, code, sinks).await? {
                        let elapsed = started.elapsed();
                        outcome.created += 1;
                        timings.create.record(elapsed);
                        metrics::observe_view_operation("create", elapsed);
                    }
                }
                Some(view) => {
                    let late_code = if view.uniform_catalog_code.is_empty() {
                        codes.next()
                    } else {
                        None
                    };
                    let fields = fields_by_view.remove(&view.id).unwrap_or_default();
                    if self
                        .update_view(datasource, view, &table, fields, late_code, sinks)
                        .await?
                    {
                        let elapsed = started.elapsed();
                        outcome.updated += 1;
                        timings.update.record(elapsed);
                        metrics::observe_view_operation("update", elapsed);
                    }
                }
            }
        }

        metrics::record_views("created", outcome.created);
        metrics::record_views("updated", outcome.updated);
        sinks.timings(timings);
        Ok(outcome)
    }

    /// One code per view, empty codes when the code service cannot deliver.
    async fn allocate_codes(&self, count: usize) -> Vec<String> {
        if count == 0 {
            return Vec::new();
        }

        match self.codes.generate(&self.code_rule_id, count).await {
            Ok(mut codes) => {
                if codes.len() < count {
                    tracing::warn!(
                        requested = count,
                        received = codes.len(),
                        "Code service returned too few codes"
                    );
                    codes.resize(count, String::new());
                }
                codes
            }
            Err(err) if err.is_rule_not_found() => {
                tracing::warn!(
                    rule_id = %self.code_rule_id,
                    "Code rule not found, views are created without uniform codes"
                );
                vec![String::new(); count]
            }
            Err(err) => {
                tracing::warn!(
                    rule_id = %self.code_rule_id,
                    error = %err,
                    "Code service unavailable, views are created without uniform codes"
                );
                vec![String::new(); count]
            }
        }
    }

    fn report_error(&self, sinks: &ScanSinks, view: ErrorView) {
        tracing::warn!(
            table = %view.technical_name,
            form_view_id = ?view.form_view_id,
            code = %view.code,
            description = %view.description,
            cause = %view.cause,
            "Table not reconciled"
        );
        metrics::record_views("errored", 1);
        sinks.error(view);
    }

    /// Register a new table. Returns whether the view was created.
    async fn create_view(
        &self,
        datasource: &Datasource,
        table: &TableInfo,
        uniform_catalog_code: String,
        sinks: &ScanSinks,
    ) -> Result<bool> {
        let view_id = uuid::Uuid::new_v4().to_string();
        let fields = diff::new_fields(&view_id, &table.columns);

        let sql = match build_select(
            &datasource.catalog_name,
            &datasource.schema,
            &table.name,
            &fields,
            None,
        ) {
            Some(sql) => sql,
            None => {
                self.report_error(sinks, ErrorView::no_supported_column(None, &table.name));
                return Ok(false);
            }
        };

        if let Err(err) = self
            .federation
            .create_view(&datasource.data_view_source, &table.name, &sql)
            .await
        {
            self.report_error(sinks, ErrorView::from_gateway(None, &table.name, &err));
            return Ok(false);
        }

        let now = Utc::now();
        let view = FormView {
            id: view_id,
            datasource_id: datasource.id.clone(),
            technical_name: table.name.clone(),
            business_name: business_name(&table.name, table.comment.as_deref()),
            original_name: table.name.clone(),
            uniform_catalog_code,
            status: ViewStatus::New,
            edit_status: EditStatus::Draft,
            online_status: OnlineStatus::NotOnline,
            comment: table.comment.clone(),
            filter_rule: None,
            delete_message: None,
            created_at: now,
            updated_at: now,
        };

        if let Err(err) = self.store.create_form_view(view, fields).await {
            tracing::error!(
                table = %table.name,
                error = %err,
                "Failed to persist new view, removing federated view"
            );
            if let Err(rollback) = self
                .federation
                .delete_view(&datasource.data_view_source, &table.name)
                .await
            {
                tracing::error!(
                    table = %table.name,
                    error = %rollback,
                    "Failed to roll back federated view"
                );
            }
            return Err(err.into());
        }

        tracing::debug!(table = %table.name, "Created view");
        Ok(true)
    }

    /// Reconcile a table with its stored view. Returns whether anything was persisted.
    async fn update_view(
        &self,
        datasource: &Datasource,
        mut view: FormView,
        table: &TableInfo,
        fields: Vec<FormViewField>,
        late_code: Option<String>,
        sinks: &ScanSinks,
    ) -> Result<bool> {
        let diff = diff::diff_fields(&view.id, &fields, &table.columns);
        let before = view.clone();

        if let Some(code) = late_code.filter(|c| !c.is_empty()) {
            view.uniform_catalog_code = code;
        }
        if view.comment != table.comment {
            view.comment = table.comment.clone();
        }
        diff::advance_view_status(&mut view, diff.structural);

        if diff.structural {
            if let Some(filter) = view.filter_rule.as_deref().filter(|f| !f.trim().is_empty()) {
                if let Err(err) = validation::validate_filter_rule(filter) {
                    self.report_error(
                        sinks,
                        ErrorView::invalid_filter_rule(view.id.clone(), &table.name, err),
                    );
                    return Ok(false);
                }
            }

            let sql = match build_select(
                &datasource.catalog_name,
                &datasource.schema,
                &table.name,
                &diff.fields,
                view.filter_rule.as_deref(),
            ) {
                Some(sql) => sql,
                None => {
                    self.report_error(
                        sinks,
                        ErrorView::no_supported_column(Some(view.id.clone()), &table.name),
                    );
                    return Ok(false);
                }
            };

            if let Err(err) = self
                .federation
                .modify_view(&datasource.data_view_source, &view.technical_name, &sql)
                .await
            {
                self.report_error(
                    sinks,
                    ErrorView::from_gateway(Some(view.id.clone()), &table.name, &err),
                );
                return Ok(false);
            }

            self.revoke_pending_audit(&mut view, sinks).await;
        }

        let view_changed = view != before;
        if diff.changes.is_empty() && !view_changed {
            return Ok(false);
        }

        view.updated_at = Utc::now();
        let view_id = view.id.clone();
        if diff.changes.is_empty() {
            self.store.update_scanned_view(view).await?;
        } else {
            tracing::debug!(
                table = %table.name,
                created = diff.changes.created.len(),
                updated = diff.changes.updated.len(),
                deleted = diff.changes.deleted.len(),
                structural = diff.structural,
                "Updating view fields"
            );
            self.store
                .update_form_view_with_fields(view, diff.changes)
                .await?;
        }

        if diff.added_or_removed {
            self.samples.invalidate(&view_id).await;
        }
        Ok(true)
    }

    /// Cancel the approval pending on `view`, if any, and fall back its online status.
    ///
    /// Revocation failures are logged and leave the view untouched.
    pub async fn revoke_pending_audit(&self, view: &mut FormView, sinks: &ScanSinks) -> bool {
        let audit_type = match view.online_status.pending_audit() {
            Some(audit_type) => audit_type,
            None => return false,
        };

        match self.audits.revoke(&view.id, audit_type).await {
            Ok(()) => {
                tracing::info!(
                    form_view_id = %view.id,
                    audit_type = %audit_type,
                    "Revoked pending audit"
                );
                view.online_status = view.online_status.after_revoke();
                sinks.revoked(RevokedView {
                    form_view_id: view.id.clone(),
                    technical_name: view.technical_name.clone(),
                    audit_type,
                });
                true
            }
            Err(err) => {
                tracing::warn!(
                    form_view_id = %view.id,
                    audit_type = %audit_type,
                    error = %err,
                    "Failed to revoke pending audit"
                );
                false
            }
        }
    }
}
