//! In-process collaborator fakes with call recording.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use viewsync_catalog_core::collaborators::GatewayResult;
use viewsync_catalog_core::{
    AuditRevoker, AuditType, CodeAllocator, CollectionDescriptor, GatewayError, MetadataSource,
    SampleDataInvalidator, TableInfo, TaskStatus, ViewFederationGateway,
};

// ============================================================================
// Metadata source
// ============================================================================

/// Metadata source serving a fixed table list.
///
/// Task status answers are popped from a queue; once it is drained every poll
/// reports `Finished`.
#[derive(Debug)]
pub struct FakeMetadataSource {
    tables: Mutex<Vec<TableInfo>>,
    descriptor: Mutex<GatewayResult<CollectionDescriptor>>,
    statuses: Mutex<VecDeque<TaskStatus>>,
    fail_listing: Mutex<Option<GatewayError>>,
    collections: AtomicUsize,
    status_polls: AtomicUsize,
    page_requests: Mutex<Vec<(usize, usize)>>,
}

impl FakeMetadataSource {
    pub fn new(tables: Vec<TableInfo>) -> Self {
        Self {
            tables: Mutex::new(tables),
            descriptor: Mutex::new(Ok(CollectionDescriptor {
                task_id: Some("1000000000000000001".to_string()),
                message: "collection started".to_string(),
            })),
            statuses: Mutex::new(VecDeque::new()),
            fail_listing: Mutex::new(None),
            collections: AtomicUsize::new(0),
            status_polls: AtomicUsize::new(0),
            page_requests: Mutex::new(Vec::new()),
        }
    }

    /// Replace the tables served by subsequent scans.
    pub fn set_tables(&self, tables: Vec<TableInfo>) {
        *self.tables.lock().unwrap() = tables;
    }

    /// Answer `start_collection` with this descriptor.
    pub fn set_descriptor(&self, descriptor: CollectionDescriptor) {
        *self.descriptor.lock().unwrap() = Ok(descriptor);
    }

    /// Make `start_collection` fail.
    pub fn fail_collection(&self, err: GatewayError) {
        *self.descriptor.lock().unwrap() = Err(err);
    }

    /// Queue task status answers.
    pub fn push_statuses(&self, statuses: impl IntoIterator<Item = TaskStatus>) {
        self.statuses.lock().unwrap().extend(statuses);
    }

    /// Make `list_table_batch` fail.
    pub fn fail_listing(&self, err: GatewayError) {
        *self.fail_listing.lock().unwrap() = Some(err);
    }

    pub fn collections(&self) -> usize {
        self.collections.load(Ordering::SeqCst)
    }

    pub fn status_polls(&self) -> usize {
        self.status_polls.load(Ordering::SeqCst)
    }

    /// `(limit, offset)` of every page request, in order.
    pub fn page_requests(&self) -> Vec<(usize, usize)> {
        self.page_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetadataSource for FakeMetadataSource {
    async fn start_collection(&self, _external_id: &str) -> GatewayResult<CollectionDescriptor> {
        self.collections.fetch_add(1, Ordering::SeqCst);
        self.descriptor.lock().unwrap().clone()
    }

    async fn get_task_status(&self, _task_id: &str) -> GatewayResult<TaskStatus> {
        self.status_polls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(TaskStatus::Finished))
    }

    async fn list_table_batch(
        &self,
        _external_id: &str,
        limit: usize,
        offset: usize,
    ) -> GatewayResult<Vec<TableInfo>> {
        self.page_requests.lock().unwrap().push((limit, offset));
        if let Some(err) = self.fail_listing.lock().unwrap().clone() {
            return Err(err);
        }
        let tables = self.tables.lock().unwrap();
        Ok(tables.iter().skip(offset).take(limit).cloned().collect())
    }
}

// ============================================================================
// Federation gateway
// ============================================================================

/// One call made to [`RecordingGateway`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayOp {
    CreateView {
        catalog: String,
        view: String,
        sql: String,
    },
    ModifyView {
        catalog: String,
        view: String,
        sql: String,
    },
    DeleteView {
        catalog: String,
        view: String,
    },
    CreateCatalog {
        name: String,
        connector: String,
    },
    DeleteCatalog {
        name: String,
    },
}

/// Federation gateway that records calls and fails on demand.
#[derive(Debug, Default)]
pub struct RecordingGateway {
    ops: Mutex<Vec<GatewayOp>>,
    failing_views: Mutex<HashSet<String>>,
    panicking_views: Mutex<HashSet<String>>,
    fail_catalog: Mutex<bool>,
    latency: Option<Duration>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long in every view call (lets workers interleave).
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Reject create/modify calls for this view name.
    pub fn fail_view(&self, view: &str) {
        self.failing_views.lock().unwrap().insert(view.to_string());
    }

    /// Panic inside create/modify calls for this view name.
    pub fn panic_on_view(&self, view: &str) {
        self.panicking_views.lock().unwrap().insert(view.to_string());
    }

    pub fn heal_view(&self, view: &str) {
        self.failing_views.lock().unwrap().remove(view);
    }

    /// Reject `create_catalog`.
    pub fn fail_catalog(&self) {
        *self.fail_catalog.lock().unwrap() = true;
    }

    pub fn ops(&self) -> Vec<GatewayOp> {
        self.ops.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.ops.lock().unwrap().clear();
    }

    /// Names of views created, in call order.
    pub fn created_views(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                GatewayOp::CreateView { view, .. } => Some(view),
                _ => None,
            })
            .collect()
    }

    /// `(view, sql)` of every modify call, in call order.
    pub fn modified_views(&self) -> Vec<(String, String)> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                GatewayOp::ModifyView { view, sql, .. } => Some((view, sql)),
                _ => None,
            })
            .collect()
    }

    /// SQL sent for a view by its latest create or modify call.
    pub fn last_sql(&self, view_name: &str) -> Option<String> {
        self.ops().into_iter().rev().find_map(|op| match op {
            GatewayOp::CreateView { view, sql, .. } | GatewayOp::ModifyView { view, sql, .. }
                if view == view_name =>
            {
                Some(sql)
            }
            _ => None,
        })
    }

    async fn view_call(&self, op: GatewayOp, view: &str) -> GatewayResult<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.ops.lock().unwrap().push(op);
        // Checked without holding the lock so the panic leaves it unpoisoned
        let panics = self.panicking_views.lock().unwrap().contains(view);
        if panics {
            panic!("view call for {} crashed", view);
        }
        if self.failing_views.lock().unwrap().contains(view) {
            return Err(GatewayError::new(
                "VirtualizationEngine.ViewFailed",
                format!("view {} rejected", view),
            )
            .with_cause("injected failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl ViewFederationGateway for RecordingGateway {
    async fn create_view(&self, catalog: &str, view_name: &str, sql: &str) -> GatewayResult<()> {
        let op = GatewayOp::CreateView {
            catalog: catalog.to_string(),
            view: view_name.to_string(),
            sql: sql.to_string(),
        };
        self.view_call(op, view_name).await
    }

    async fn modify_view(&self, catalog: &str, view_name: &str, sql: &str) -> GatewayResult<()> {
        let op = GatewayOp::ModifyView {
            catalog: catalog.to_string(),
            view: view_name.to_string(),
            sql: sql.to_string(),
        };
        self.view_call(op, view_name).await
    }

    async fn delete_view(&self, catalog: &str, view_name: &str) -> GatewayResult<()> {
        self.ops.lock().unwrap().push(GatewayOp::DeleteView {
            catalog: catalog.to_string(),
            view: view_name.to_string(),
        });
        Ok(())
    }

    async fn create_catalog(&self, name: &str, connector: &str) -> GatewayResult<Vec<String>> {
        self.ops.lock().unwrap().push(GatewayOp::CreateCatalog {
            name: name.to_string(),
            connector: connector.to_string(),
        });
        if *self.fail_catalog.lock().unwrap() {
            return Err(GatewayError::new(
                "VirtualizationEngine.CatalogFailed",
                "catalog rejected",
            ));
        }
        Ok(vec![name.to_string()])
    }

    async fn delete_catalog(&self, name: &str) -> GatewayResult<()> {
        self.ops.lock().unwrap().push(GatewayOp::DeleteCatalog {
            name: name.to_string(),
        });
        Ok(())
    }
}

// ============================================================================
// Code allocator
// ============================================================================

/// How [`FakeCodeAllocator`] answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeMode {
    /// Hand out `VS000001`, `VS000002`, ...
    Sequential,
    /// Report the rule as missing
    RuleNotFound,
    /// Fail with a generic error
    Unavailable,
}

#[derive(Debug)]
pub struct FakeCodeAllocator {
    mode: Mutex<CodeMode>,
    next: AtomicUsize,
    requests: Mutex<Vec<(String, usize)>>,
}

impl FakeCodeAllocator {
    pub fn new(mode: CodeMode) -> Self {
        Self {
            mode: Mutex::new(mode),
            next: AtomicUsize::new(1),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn set_mode(&self, mode: CodeMode) {
        *self.mode.lock().unwrap() = mode;
    }

    /// `(rule_id, count)` of every call.
    pub fn requests(&self) -> Vec<(String, usize)> {
        self.requests.lock().unwrap().clone()
    }
}

impl Default for FakeCodeAllocator {
    fn default() -> Self {
        Self::new(CodeMode::Sequential)
    }
}

#[async_trait]
impl CodeAllocator for FakeCodeAllocator {
    async fn generate(&self, rule_id: &str, count: usize) -> GatewayResult<Vec<String>> {
        self.requests
            .lock()
            .unwrap()
            .push((rule_id.to_string(), count));
        let mode = *self.mode.lock().unwrap();
        match mode {
            CodeMode::Sequential => Ok((0..count)
                .map(|_| format!("VS{:06}", self.next.fetch_add(1, Ordering::SeqCst)))
                .collect()),
            CodeMode::RuleNotFound => Err(GatewayError::new(
                "CodeService.RuleNotFound",
                format!("rule {} not found", rule_id),
            )),
            CodeMode::Unavailable => Err(GatewayError::new("ServerError", "code service down")),
        }
    }
}

// ============================================================================
// Audit revoker / sample invalidator
// ============================================================================

#[derive(Debug, Default)]
pub struct RecordingAuditRevoker {
    revoked: Mutex<Vec<(String, AuditType)>>,
    fail: Mutex<bool>,
}

impl RecordingAuditRevoker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_all(&self) {
        *self.fail.lock().unwrap() = true;
    }

    pub fn revoked(&self) -> Vec<(String, AuditType)> {
        self.revoked.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditRevoker for RecordingAuditRevoker {
    async fn revoke(&self, form_view_id: &str, audit_type: AuditType) -> GatewayResult<()> {
        if *self.fail.lock().unwrap() {
            return Err(GatewayError::new("Workflow.Unavailable", "workflow down"));
        }
        self.revoked
            .lock()
            .unwrap()
            .push((form_view_id.to_string(), audit_type));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingInvalidator {
    invalidated: Mutex<Vec<String>>,
}

impl RecordingInvalidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidated(&self) -> Vec<String> {
        self.invalidated.lock().unwrap().clone()
    }
}

#[async_trait]
impl SampleDataInvalidator for RecordingInvalidator {
    async fn invalidate(&self, form_view_id: &str) {
        self.invalidated
            .lock()
            .unwrap()
            .push(form_view_id.to_string());
    }
}
