//! End-to-end scans against a SQLite catalog and in-process collaborator fakes.
//!
//! These tests verify:
//! - Creation, idempotent rescans and status transitions of logical views
//! - Partitioned scans reconcile every table exactly once
//! - Field overrides survive source type evolution when a conversion exists
//! - Deleted tables are swept and come back as new views
//! - Per-table gateway failures never abort the batch
//! - Scan lease, collection polling and catalog bootstrap failure modes

use std::sync::Arc;
use std::time::Duration;

use viewsync_catalog_core::{
    AuditType, CatalogError, CollectionDescriptor, DatasourceStatus, EditStatus, FieldReset,
    FieldStatus, FormView, FormViewField, GatewayError, OnlineStatus, TableInfo, TaskStatus,
    ViewStatus,
};
use viewsync_catalog_scan::{
    ErrorKind, ScanCollaborators, ScanConfig, ScanResult, Scanner, INVALID_FILTER_RULE_CODE,
    NO_SUPPORTED_COLUMN_CODE,
};
use viewsync_catalog_storage::{CatalogStore, FieldChangeSet};
use viewsync_catalog_test_utils::*;

// ============================================================================
// Test Helpers
// ============================================================================

struct Harness {
    store: TestStore,
    metadata: Arc<FakeMetadataSource>,
    gateway: Arc<RecordingGateway>,
    codes: Arc<FakeCodeAllocator>,
    audits: Arc<RecordingAuditRevoker>,
    samples: Arc<RecordingInvalidator>,
    scanner: Scanner,
}

fn fast_config() -> ScanConfig {
    ScanConfig::builder()
        .poll_initial_delay(Duration::from_millis(1))
        .poll_max_delay(Duration::from_millis(5))
        .poll_max_attempts(5)
        .build()
        .unwrap()
}

async fn harness(tables: Vec<TableInfo>) -> Harness {
    harness_with(tables, fast_config(), RecordingGateway::new()).await
}

async fn harness_with(
    tables: Vec<TableInfo>,
    config: ScanConfig,
    gateway: RecordingGateway,
) -> Harness {
    init_test_logging();
    let store = TestStore::new().await;
    let metadata = Arc::new(FakeMetadataSource::new(tables));
    let gateway = Arc::new(gateway);
    let codes = Arc::new(FakeCodeAllocator::default());
    let audits = Arc::new(RecordingAuditRevoker::new());
    let samples = Arc::new(RecordingInvalidator::new());

    let scanner = Scanner::new(
        store.dyn_store(),
        ScanCollaborators {
            metadata: metadata.clone(),
            federation: gateway.clone(),
            codes: codes.clone(),
            audits: audits.clone(),
            samples: samples.clone(),
        },
        config,
    )
    .unwrap();

    Harness {
        store,
        metadata,
        gateway,
        codes,
        audits,
        samples,
        scanner,
    }
}

impl Harness {
    async fn scan(&self) -> ScanResult {
        self.scanner.scan(TEST_DATASOURCE_ID).await.unwrap()
    }

    async fn view(&self, name: &str) -> FormView {
        self.store
            .list_form_views(TEST_DATASOURCE_ID)
            .await
            .unwrap()
            .into_iter()
            .find(|v| v.technical_name == name)
            .unwrap_or_else(|| panic!("view {} not found", name))
    }

    async fn fields(&self, name: &str) -> Vec<FormViewField> {
        let view = self.view(name).await;
        self.store.list_fields(&view.id).await.unwrap()
    }

    async fn field(&self, view: &str, field: &str) -> FormViewField {
        self.fields(view)
            .await
            .into_iter()
            .find(|f| f.technical_name == field)
            .unwrap_or_else(|| panic!("field {}.{} not found", view, field))
    }

    async fn view_count(&self) -> usize {
        self.store
            .list_form_views(TEST_DATASOURCE_ID)
            .await
            .unwrap()
            .len()
    }
}

fn orders(amount_type: &str) -> TableInfo {
    table(
        "orders",
        vec![
            column("id", "bigint").primary_key(),
            column("amount", amount_type).sized(12, 2),
            column("note", "varchar").sized(255, 0),
        ],
    )
    .commented("customer orders")
}

// ============================================================================
// Creation and rescans
// ============================================================================

#[tokio::test]
async fn test_first_scan_creates_views() {
    let h = harness(tables(3)).await;

    let result = h.scan().await;
    assert_eq!(result.scan_total, 3);
    assert_eq!(result.created_count, 3);
    assert_eq!(result.updated_count, 0);
    assert_eq!(result.error_count, 0);
    assert_eq!(result.timings.create.count, 3);

    let view = h.view("t0000").await;
    assert_eq!(view.status, ViewStatus::New);
    assert_eq!(view.edit_status, EditStatus::Draft);
    assert!(view.uniform_catalog_code.starts_with("VS"));
    assert_eq!(h.fields("t0000").await.len(), 2);

    // One batched code request for the whole (inline) partition
    assert_eq!(h.codes.requests().len(), 1);
    assert_eq!(h.codes.requests()[0].1, 3);

    let ops = h.gateway.ops();
    assert_eq!(
        ops[0],
        GatewayOp::CreateCatalog {
            name: "vdm_mysql_orders".into(),
            connector: "mysql_orders".into(),
        }
    );
    assert_eq!(h.gateway.created_views().len(), 3);
    assert_eq!(
        h.gateway.last_sql("t0000").unwrap(),
        r#"SELECT "id", "name" FROM "mysql_orders"."sales"."t0000""#
    );

    let ds = h.store.get_datasource(TEST_DATASOURCE_ID).await.unwrap().unwrap();
    assert_eq!(ds.status, DatasourceStatus::Available);
    assert_eq!(ds.data_view_source, "vdm_mysql_orders.default");
    assert!(ds.metadata_task_id.is_none());

    let records = h.store.list_scan_records(TEST_DATASOURCE_ID, 10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].scanner, "");
}

#[tokio::test]
async fn test_views_are_created_under_existing_catalog() {
    let h = harness(tables(1)).await;
    h.scan().await;
    h.gateway.clear();

    h.metadata.set_tables(tables(2));
    h.scan().await;

    // Catalog only created on the first scan
    assert!(h
        .gateway
        .ops()
        .iter()
        .all(|op| !matches!(op, GatewayOp::CreateCatalog { .. })));
    assert_eq!(
        h.gateway.ops(),
        vec![GatewayOp::CreateView {
            catalog: "vdm_mysql_orders.default".into(),
            view: "t0001".into(),
            sql: r#"SELECT "id", "name" FROM "mysql_orders"."sales"."t0001""#.into(),
        }]
    );
}

#[tokio::test]
async fn test_rescan_is_idempotent() {
    let h = harness(vec![orders("decimal")]).await;
    h.scan().await;
    let fields_before = h.fields("orders").await;
    h.gateway.clear();

    let second = h.scan().await;
    assert_eq!(second.created_count, 0);
    assert_eq!(second.updated_count, 1);
    assert_eq!(h.view("orders").await.status, ViewStatus::Uniformity);
    assert_eq!(h.fields("orders").await, fields_before);
    assert!(h.gateway.modified_views().is_empty());

    let third = h.scan().await;
    assert_eq!(third.updated_count, 0);
    assert_eq!(h.view("orders").await.status, ViewStatus::Uniformity);
    assert!(h.gateway.ops().is_empty());
}

#[tokio::test]
async fn test_nullable_flip_promotes_to_modify() {
    let h = harness(vec![orders("decimal")]).await;
    h.scan().await;
    h.scan().await;

    let mut view = h.view("orders").await;
    assert_eq!(view.status, ViewStatus::Uniformity);
    view.edit_status = EditStatus::Latest;
    h.store.update_form_view(view).await.unwrap();

    let mut changed = orders("decimal");
    changed.columns[2] = column("note", "varchar").sized(255, 0).not_null();
    h.metadata.set_tables(vec![changed]);

    let result = h.scan().await;
    assert_eq!(result.updated_count, 1);

    let view = h.view("orders").await;
    assert_eq!(view.status, ViewStatus::Modify);
    assert_eq!(view.edit_status, EditStatus::Draft);

    let note = h.field("orders", "note").await;
    assert!(!note.is_nullable);
    assert_eq!(note.status, FieldStatus::Modify);

    let modified = h.gateway.modified_views();
    assert_eq!(modified.len(), 1);
    assert_eq!(modified[0].0, "orders");
}

#[tokio::test]
async fn test_comment_only_change_skips_modify_view() {
    let h = harness(vec![orders("decimal")]).await;
    h.scan().await;
    h.gateway.clear();

    let mut commented = orders("decimal");
    commented.columns[1] = column("amount", "decimal").sized(12, 2).commented("gross amount");
    commented.comment = Some("all orders".into());
    h.metadata.set_tables(vec![commented]);

    let result = h.scan().await;
    assert_eq!(result.updated_count, 1);
    assert!(h.gateway.modified_views().is_empty());

    let view = h.view("orders").await;
    assert_eq!(view.status, ViewStatus::Uniformity);
    assert_eq!(view.comment.as_deref(), Some("all orders"));
    assert_eq!(
        h.field("orders", "amount").await.comment.as_deref(),
        Some("gross amount")
    );
}

#[tokio::test]
async fn test_added_column_regenerates_view_and_invalidates_samples() {
    let h = harness(vec![orders("decimal")]).await;
    h.scan().await;

    let mut widened = orders("decimal");
    widened.columns.push(column("created_at", "datetime"));
    h.metadata.set_tables(vec![widened]);

    h.scan().await;
    let view = h.view("orders").await;
    assert_eq!(view.status, ViewStatus::Modify);
    assert_eq!(h.samples.invalidated(), vec![view.id.clone()]);
    assert_eq!(
        h.gateway.last_sql("orders").unwrap(),
        r#"SELECT "id", "amount", "note", "created_at" FROM "mysql_orders"."sales"."orders""#
    );

    let created_at = h.field("orders", "created_at").await;
    assert_eq!(created_at.data_type, "timestamp");
    assert_eq!(created_at.index, 3);
}

#[tokio::test]
async fn test_filter_rule_survives_regeneration() {
    let h = harness(vec![orders("decimal")]).await;
    h.scan().await;

    let mut view = h.view("orders").await;
    view.filter_rule = Some("amount > 0".into());
    h.store.update_form_view(view).await.unwrap();

    h.metadata.set_tables(vec![orders("double")]);
    h.scan().await;

    assert!(h
        .gateway
        .last_sql("orders")
        .unwrap()
        .ends_with(r#"FROM "mysql_orders"."sales"."orders" WHERE amount > 0"#));
}

#[tokio::test]
async fn test_rejected_filter_rule_blocks_regeneration() {
    let h = harness(vec![orders("decimal")]).await;
    h.scan().await;

    let mut view = h.view("orders").await;
    view.filter_rule = Some("1 = 1; DROP TABLE orders".into());
    h.store.update_form_view(view.clone()).await.unwrap();
    h.gateway.clear();

    h.metadata.set_tables(vec![orders("double")]);
    let result = h.scan().await;

    assert_eq!(result.error_count, 1);
    assert_eq!(result.error_views[0].code, INVALID_FILTER_RULE_CODE);
    assert_eq!(result.error_views[0].form_view_id.as_deref(), Some(view.id.as_str()));
    assert!(h.gateway.modified_views().is_empty());
    assert_eq!(h.field("orders", "amount").await.original_data_type, "decimal");
}

// ============================================================================
// Partitioning
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_partitioned_scan_reconciles_every_table_once() {
    let config = ScanConfig::builder()
        .min_tables_per_worker(10)
        .max_workers(4)
        .poll_initial_delay(Duration::from_millis(1))
        .poll_max_delay(Duration::from_millis(5))
        .build()
        .unwrap();
    let gateway = RecordingGateway::new().with_latency(Duration::from_millis(1));
    let h = harness_with(tables(50), config, gateway).await;

    let result = h.scan().await;
    assert_eq!(result.scan_total, 50);
    assert_eq!(result.created_count, 50);
    assert_eq!(result.panicked_workers, 0);
    assert_eq!(result.timings.create.count, 50);

    let mut created = h.gateway.created_views();
    created.sort();
    created.dedup();
    assert_eq!(created.len(), 50);
    assert_eq!(h.view_count().await, 50);

    // 4 workers plus the 2-table remainder each ask for their own codes
    let mut batch_sizes: Vec<usize> = h.codes.requests().iter().map(|(_, n)| *n).collect();
    batch_sizes.sort();
    assert_eq!(batch_sizes, vec![2, 12, 12, 12, 12]);

    let second = h.scan().await;
    assert_eq!(second.created_count, 0);
    assert_eq!(second.updated_count, 50);
    assert!(second.deleted_views.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_worker_panic_is_counted_and_skips_sweep() {
    let config = ScanConfig::builder()
        .min_tables_per_worker(10)
        .max_workers(4)
        .poll_initial_delay(Duration::from_millis(1))
        .poll_max_delay(Duration::from_millis(5))
        .build()
        .unwrap();
    let h = harness_with(tables(50), config, RecordingGateway::new()).await;
    h.scan().await;

    // `boom` leads the first chunk; t0049 is gone from the source
    let mut batch = vec![table("boom", vec![column("id", "bigint")])];
    batch.extend(tables(49));
    h.metadata.set_tables(batch);
    h.gateway.panic_on_view("boom");

    let result = h.scan().await;
    assert_eq!(result.panicked_workers, 1);
    assert!(result.deleted_views.is_empty());

    let views = h.store.list_form_views(TEST_DATASOURCE_ID).await.unwrap();
    assert_eq!(views.len(), 50);
    assert!(views.iter().all(|v| v.status != ViewStatus::Delete));
    assert!(views.iter().all(|v| v.technical_name != "boom"));

    let ds = h.store.get_datasource(TEST_DATASOURCE_ID).await.unwrap().unwrap();
    assert_eq!(ds.status, DatasourceStatus::Available);
}

#[tokio::test]
async fn test_panic_in_small_batch_still_returns_result() {
    let h = harness(vec![orders("decimal")]).await;
    h.scan().await;

    // A single table stays below min_tables_per_worker, so no worker is split off
    h.metadata.set_tables(vec![table("boom", vec![column("id", "bigint")])]);
    h.gateway.panic_on_view("boom");

    let result = h.scan().await;
    assert_eq!(result.panicked_workers, 1);
    assert_eq!(result.created_count, 0);
    assert!(result.deleted_views.is_empty());
    assert_eq!(h.view("orders").await.status, ViewStatus::New);

    let ds = h.store.get_datasource(TEST_DATASOURCE_ID).await.unwrap().unwrap();
    assert_eq!(ds.status, DatasourceStatus::Available);
    let records = h.store.list_scan_records(TEST_DATASOURCE_ID, 10).await.unwrap();
    assert_eq!(records.len(), 2);
}

#[tokio::test]
async fn test_repeated_column_does_not_abort_batch() {
    let dup = table(
        "dup",
        vec![
            column("id", "bigint"),
            column("id", "varchar"),
            column("name", "varchar"),
        ],
    );
    let good = table("good", vec![column("id", "bigint")]);
    let h = harness(vec![dup, good]).await;

    let result = h.scan().await;
    assert_eq!(result.created_count, 2);
    assert_eq!(result.error_count, 0);

    let fields = h.fields("dup").await;
    assert_eq!(fields.len(), 2);
    assert_eq!(fields[0].technical_name, "id");
    assert_eq!(fields[0].data_type, "bigint");
    assert_eq!(fields[1].technical_name, "name");
    assert_eq!(fields[1].index, 1);
    assert_eq!(h.fields("good").await.len(), 1);

    let again = h.scan().await;
    assert_eq!(again.error_count, 0);
    assert_eq!(h.view("dup").await.status, ViewStatus::Uniformity);
}

#[tokio::test]
async fn test_scanner_rejects_zero_page_size() {
    let store = TestStore::new().await;
    let config = ScanConfig {
        page_size: 0,
        ..ScanConfig::default()
    };
    let scanner = Scanner::new(
        store.dyn_store(),
        ScanCollaborators {
            metadata: Arc::new(FakeMetadataSource::new(tables(1))),
            federation: Arc::new(RecordingGateway::new()),
            codes: Arc::new(FakeCodeAllocator::default()),
            audits: Arc::new(RecordingAuditRevoker::new()),
            samples: Arc::new(RecordingInvalidator::new()),
        },
        config,
    );
    assert!(matches!(scanner, Err(CatalogError::ValidationError(_))));
}

#[tokio::test]
async fn test_pages_are_concatenated_and_deduplicated() {
    let config = ScanConfig::builder()
        .page_size(2)
        .poll_initial_delay(Duration::from_millis(1))
        .poll_max_delay(Duration::from_millis(5))
        .build()
        .unwrap();
    let mut batch = tables(4);
    batch.insert(2, table("t0000", vec![column("other", "int")]));
    let h = harness_with(batch, config, RecordingGateway::new()).await;

    let result = h.scan().await;
    assert_eq!(h.metadata.page_requests(), vec![(2, 0), (2, 2), (2, 4)]);
    assert_eq!(result.scan_total, 4);
    assert_eq!(result.created_count, 4);

    // First occurrence wins
    assert_eq!(h.fields("t0000").await.len(), 2);
}

#[tokio::test]
async fn test_tables_with_invalid_names_are_skipped() {
    let h = harness(vec![orders("decimal"), table("bad\nname", vec![column("id", "int")])]).await;

    let result = h.scan().await;
    assert_eq!(result.scan_total, 1);
    assert_eq!(result.created_count, 1);
    assert_eq!(h.gateway.created_views(), vec!["orders".to_string()]);
}

// ============================================================================
// Field overrides
// ============================================================================

async fn apply_override(h: &Harness, view: &str, field: &str, override_vt: &str) {
    let view = h.view(view).await;
    let mut f = h.field(&view.technical_name, field).await;
    f.reset = Some(FieldReset {
        before_data_type: f.data_type.clone(),
        convert_rules: String::new(),
        data_length: 0,
        data_accuracy: 0,
    });
    f.data_type = override_vt.to_string();
    h.store
        .update_form_view_with_fields(
            view,
            FieldChangeSet {
                updated: vec![f],
                ..Default::default()
            },
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_override_preserved_across_convertible_type_change() {
    let h = harness(vec![orders("int")]).await;
    h.scan().await;
    apply_override(&h, "orders", "amount", "varchar").await;

    // Unchanged source: the override is not reported as a change
    h.gateway.clear();
    h.scan().await;
    assert!(h.gateway.modified_views().is_empty());

    h.metadata.set_tables(vec![orders("bigint")]);
    h.scan().await;

    let amount = h.field("orders", "amount").await;
    assert_eq!(amount.data_type, "varchar");
    assert_eq!(amount.original_data_type, "bigint");
    assert_eq!(amount.reset.as_ref().unwrap().before_data_type, "bigint");
    assert!(h
        .gateway
        .last_sql("orders")
        .unwrap()
        .contains(r#"CAST("amount" AS VARCHAR) AS "amount""#));
}

#[tokio::test]
async fn test_override_cleared_without_conversion_path() {
    let h = harness(vec![orders("varchar")]).await;
    h.scan().await;
    apply_override(&h, "orders", "amount", "date").await;

    h.metadata.set_tables(vec![orders("blob")]);
    h.scan().await;

    let amount = h.field("orders", "amount").await;
    assert!(amount.reset.is_none());
    assert_eq!(amount.data_type, "varbinary");
    assert!(!h.gateway.last_sql("orders").unwrap().contains("CAST"));
}

// ============================================================================
// Deletion
// ============================================================================

#[tokio::test]
async fn test_deletion_sweep_and_reversal() {
    let h = harness(vec![orders("decimal"), table("refunds", vec![column("id", "int")])]).await;
    h.scan().await;

    h.metadata.set_tables(vec![orders("decimal")]);
    let result = h.scan().await;
    assert_eq!(result.deleted_views, vec!["refunds".to_string()]);

    let refunds = h.view("refunds").await;
    assert_eq!(refunds.status, ViewStatus::Delete);
    assert!(refunds.delete_message.is_some());

    // Sweeping an already deleted view is a no-op
    let result = h.scan().await;
    assert!(result.deleted_views.is_empty());

    h.metadata
        .set_tables(vec![orders("decimal"), table("refunds", vec![column("id", "int")])]);
    h.gateway.clear();
    let result = h.scan().await;
    assert!(result.deleted_views.is_empty());
    assert_eq!(result.created_count, 0);

    let refunds = h.view("refunds").await;
    assert_eq!(refunds.status, ViewStatus::New);
    assert_eq!(refunds.edit_status, EditStatus::Draft);
    assert!(refunds.delete_message.is_none());
    assert!(h.gateway.created_views().is_empty());
}

#[tokio::test]
async fn test_sweep_revokes_pending_online_audit() {
    let h = harness(vec![orders("decimal"), table("refunds", vec![column("id", "int")])]).await;
    h.scan().await;

    let mut refunds = h.view("refunds").await;
    refunds.online_status = OnlineStatus::OnlineAuditing;
    h.store.update_form_view(refunds.clone()).await.unwrap();

    h.metadata.set_tables(vec![orders("decimal")]);
    let result = h.scan().await;

    assert_eq!(result.revoked_views.len(), 1);
    assert_eq!(result.revoked_views[0].form_view_id, refunds.id);
    assert_eq!(result.revoked_views[0].audit_type, AuditType::Online);
    assert_eq!(h.audits.revoked(), vec![(refunds.id.clone(), AuditType::Online)]);

    let refunds = h.view("refunds").await;
    assert_eq!(refunds.status, ViewStatus::Delete);
    assert_eq!(refunds.online_status, OnlineStatus::NotOnline);
}

#[tokio::test]
async fn test_structural_change_revokes_offline_audit() {
    let h = harness(vec![orders("decimal")]).await;
    h.scan().await;

    let mut view = h.view("orders").await;
    view.online_status = OnlineStatus::OfflineAuditing;
    h.store.update_form_view(view).await.unwrap();

    h.metadata.set_tables(vec![orders("double")]);
    let result = h.scan().await;

    assert_eq!(result.revoked_views.len(), 1);
    assert_eq!(result.revoked_views[0].audit_type, AuditType::Offline);
    assert_eq!(h.view("orders").await.online_status, OnlineStatus::Online);
}

#[tokio::test]
async fn test_failed_revocation_keeps_online_status() {
    let h = harness(vec![orders("decimal")]).await;
    h.scan().await;

    let mut view = h.view("orders").await;
    view.online_status = OnlineStatus::OnlineAuditing;
    h.store.update_form_view(view).await.unwrap();
    h.audits.fail_all();

    h.metadata.set_tables(vec![orders("double")]);
    let result = h.scan().await;

    assert!(result.revoked_views.is_empty());
    let view = h.view("orders").await;
    assert_eq!(view.online_status, OnlineStatus::OnlineAuditing);
    assert_eq!(view.status, ViewStatus::Modify);
}

// ============================================================================
// Per-table failures
// ============================================================================

#[tokio::test]
async fn test_create_failure_is_reported_per_table() {
    let h = harness(tables(3)).await;
    h.gateway.fail_view("t0001");

    let result = h.scan().await;
    assert_eq!(result.created_count, 2);
    assert_eq!(result.error_count, 1);
    let error = &result.error_views[0];
    assert_eq!(error.technical_name, "t0001");
    assert_eq!(error.code, "VirtualizationEngine.ViewFailed");
    assert_eq!(error.cause, "injected failure");
    assert!(error.form_view_id.is_none());
    assert_eq!(h.view_count().await, 2);

    h.gateway.heal_view("t0001");
    let result = h.scan().await;
    assert_eq!(result.created_count, 1);
    assert_eq!(h.view_count().await, 3);
}

#[tokio::test]
async fn test_modify_failure_leaves_view_untouched() {
    let h = harness(vec![orders("decimal")]).await;
    h.scan().await;
    let before = h.fields("orders").await;
    let view_id = h.view("orders").await.id;

    h.gateway.fail_view("orders");
    h.metadata.set_tables(vec![orders("double")]);
    let result = h.scan().await;

    assert_eq!(result.updated_count, 0);
    assert_eq!(result.error_count, 1);
    assert_eq!(result.error_views[0].form_view_id.as_deref(), Some(view_id.as_str()));
    assert_eq!(h.fields("orders").await, before);
    assert_eq!(h.view("orders").await.status, ViewStatus::New);
}

#[tokio::test]
async fn test_table_without_supported_columns() {
    let geo = table("shapes", vec![column("area", "geometry"), column("outline", "polygon")]);
    let h = harness(vec![geo, orders("decimal")]).await;

    let result = h.scan().await;
    assert_eq!(result.created_count, 1);
    assert_eq!(result.error_views.len(), 1);
    assert_eq!(result.error_views[0].code, NO_SUPPORTED_COLUMN_CODE);
    assert_eq!(h.gateway.created_views(), vec!["orders".to_string()]);
}

#[tokio::test]
async fn test_unsupported_column_is_kept_but_not_selected() {
    let mut t = orders("decimal");
    t.columns.push(column("area", "geometry"));
    let h = harness(vec![t]).await;
    h.scan().await;

    let area = h.field("orders", "area").await;
    assert_eq!(area.status, FieldStatus::NotSupport);
    assert!(!h.gateway.last_sql("orders").unwrap().contains("area"));
}

#[tokio::test]
async fn test_missing_code_rule_falls_back_to_empty_codes() {
    let h = harness(tables(2)).await;
    h.codes.set_mode(CodeMode::RuleNotFound);

    let result = h.scan().await;
    assert_eq!(result.created_count, 2);
    assert_eq!(h.view("t0000").await.uniform_catalog_code, "");

    // Late allocation once the rule exists
    h.codes.set_mode(CodeMode::Sequential);
    h.scan().await;
    assert!(h.view("t0000").await.uniform_catalog_code.starts_with("VS"));
    assert!(h.view("t0001").await.uniform_catalog_code.starts_with("VS"));
}

// ============================================================================
// Scan lifecycle
// ============================================================================

#[tokio::test]
async fn test_unknown_datasource() {
    let h = harness(tables(1)).await;
    let err = h.scanner.scan("missing").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DataSourceNotFound);
}

#[tokio::test]
async fn test_scan_rejected_while_scanning() {
    let h = harness(tables(1)).await;
    assert!(h.store.try_begin_scan(TEST_DATASOURCE_ID).await.unwrap());

    let err = h.scanner.scan(TEST_DATASOURCE_ID).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DataSourceIsScanning);

    // The lease of the other scan is left alone
    let ds = h.store.get_datasource(TEST_DATASOURCE_ID).await.unwrap().unwrap();
    assert_eq!(ds.status, DatasourceStatus::Scanning);
    assert_eq!(h.metadata.collections(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_scans_are_exclusive() {
    let gateway = RecordingGateway::new().with_latency(Duration::from_millis(50));
    let h = harness_with(tables(3), fast_config(), gateway).await;

    let (a, b) = tokio::join!(
        h.scanner.scan(TEST_DATASOURCE_ID),
        h.scanner.scan(TEST_DATASOURCE_ID)
    );
    let outcomes = [a, b];
    let ok = outcomes.iter().filter(|r| r.is_ok()).count();
    let busy = outcomes
        .iter()
        .filter(|r| matches!(r, Err(e) if e.kind() == ErrorKind::DataSourceIsScanning))
        .count();
    assert_eq!((ok, busy), (1, 1));
    assert_eq!(h.view_count().await, 3);
}

#[tokio::test]
async fn test_collection_task_failure_aborts_scan() {
    let h = harness(tables(2)).await;
    h.metadata
        .push_statuses([TaskStatus::Running, TaskStatus::Failed]);

    let err = h.scanner.scan(TEST_DATASOURCE_ID).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MetadataCollectTaskFail);
    assert_eq!(h.metadata.status_polls(), 2);
    assert_eq!(h.view_count().await, 0);

    let ds = h.store.get_datasource(TEST_DATASOURCE_ID).await.unwrap().unwrap();
    assert_eq!(ds.status, DatasourceStatus::Available);
    assert!(ds.metadata_task_id.is_none());
    assert!(h
        .store
        .list_scan_records(TEST_DATASOURCE_ID, 10)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_collection_poll_times_out() {
    let config = ScanConfig::builder()
        .poll_initial_delay(Duration::from_millis(1))
        .poll_max_delay(Duration::from_millis(2))
        .poll_max_attempts(3)
        .build()
        .unwrap();
    let h = harness_with(tables(1), config, RecordingGateway::new()).await;
    h.metadata.push_statuses(vec![TaskStatus::Running; 10]);

    let err = h.scanner.scan(TEST_DATASOURCE_ID).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MetadataCollectTaskTimeout);
    assert_eq!(h.metadata.status_polls(), 3);
}

#[tokio::test]
async fn test_task_id_parsed_from_message() {
    let h = harness(tables(1)).await;
    h.metadata.set_descriptor(CollectionDescriptor {
        task_id: None,
        message: "采集任务已创建，任务ID：1234567890123456789".into(),
    });

    let result = h.scan().await;
    assert_eq!(result.created_count, 1);
}

#[tokio::test]
async fn test_malformed_task_descriptor() {
    let h = harness(tables(1)).await;
    h.metadata.set_descriptor(CollectionDescriptor {
        task_id: None,
        message: "collection queued".into(),
    });

    let err = h.scanner.scan(TEST_DATASOURCE_ID).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MalformedTaskDescriptor);
    let ds = h.store.get_datasource(TEST_DATASOURCE_ID).await.unwrap().unwrap();
    assert_eq!(ds.status, DatasourceStatus::Available);
}

#[tokio::test]
async fn test_collection_start_failure() {
    let h = harness(tables(1)).await;
    h.metadata
        .fail_collection(GatewayError::new("Metadata.Unavailable", "down"));

    let err = h.scanner.scan(TEST_DATASOURCE_ID).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MetadataSourceFail);
}

#[tokio::test]
async fn test_collection_can_be_disabled() {
    let config = ScanConfig::builder().collect_metadata(false).build().unwrap();
    let h = harness_with(tables(1), config, RecordingGateway::new()).await;

    h.scan().await;
    assert_eq!(h.metadata.collections(), 0);
    assert_eq!(h.metadata.status_polls(), 0);
}

#[tokio::test]
async fn test_catalog_creation_failure() {
    let h = harness(tables(1)).await;
    h.gateway.fail_catalog();

    let err = h.scanner.scan(TEST_DATASOURCE_ID).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CatalogCreateFail);

    let ds = h.store.get_datasource(TEST_DATASOURCE_ID).await.unwrap().unwrap();
    assert_eq!(ds.status, DatasourceStatus::Available);
    assert!(ds.data_view_source.is_empty());
    assert!(h.gateway.created_views().is_empty());
}

#[tokio::test]
async fn test_table_listing_failure() {
    let h = harness(tables(1)).await;
    h.metadata
        .fail_listing(GatewayError::new("Metadata.Timeout", "too slow"));

    let err = h.scanner.scan(TEST_DATASOURCE_ID).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MetadataSourceFail);
}

#[tokio::test]
async fn test_scan_for_task_records_scanner() {
    let h = harness(tables(1)).await;
    h.scanner
        .scan_for_task(TEST_DATASOURCE_ID, Some("task-9"))
        .await
        .unwrap();
    h.scan().await;

    let records = h.store.list_scan_records(TEST_DATASOURCE_ID, 10).await.unwrap();
    let mut scanners: Vec<&str> = records.iter().map(|r| r.scanner.as_str()).collect();
    scanners.sort();
    assert_eq!(scanners, vec!["", "task-9"]);
}

#[tokio::test]
async fn test_outbox_receives_create_and_update_events() {
    let h = harness(vec![orders("decimal")]).await;
    h.scan().await;
    h.metadata.set_tables(vec![orders("double")]);
    h.scan().await;

    let events = h.store.list_pending_outbox(10).await.unwrap();
    let kinds: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(kinds, vec!["created", "updated"]);
    assert!(events[1].payload.contains("double"));
}
